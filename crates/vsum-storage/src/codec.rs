//! Record encoding.
//!
//! Records are JSON, optionally gzip-compressed. Decoding sniffs the gzip
//! magic bytes, so flipping the compression setting between runs does not
//! invalidate existing checkpoints.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use vsum_models::DocumentRecord;

use crate::error::{StorageError, StorageResult};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Compress bytes with gzip.
pub fn compress_bytes(data: &[u8]) -> StorageResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| StorageError::Serialization(format!("Failed to gzip record: {}", e)))?;

    encoder
        .finish()
        .map_err(|e| StorageError::Serialization(format!("Failed to finish gzip encoding: {}", e)))
}

/// Decompress gzip bytes.
pub fn decompress_bytes(data: &[u8]) -> StorageResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| StorageError::Serialization(format!("Failed to gunzip record: {}", e)))?;
    Ok(out)
}

pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

/// Serialize a record, compressing when `compress` is set.
pub fn encode_record(record: &DocumentRecord, compress: bool) -> StorageResult<Vec<u8>> {
    let json = serde_json::to_vec_pretty(record)?;
    if compress {
        compress_bytes(&json)
    } else {
        Ok(json)
    }
}

/// Deserialize a record in either encoding.
pub fn decode_record(data: &[u8]) -> StorageResult<DocumentRecord> {
    if is_gzip(data) {
        let json = decompress_bytes(data)?;
        Ok(serde_json::from_slice(&json)?)
    } else {
        Ok(serde_json::from_slice(data)?)
    }
}
