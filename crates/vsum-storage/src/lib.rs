//! Durable checkpoint storage for pipeline items.
//!
//! This crate provides:
//! - One JSON record per item under `{root}/{item_id}/{filename}`
//! - Optional gzip compression of records
//! - Atomic replace-on-write so a crash never leaves a torn record
//! - Run summary persistence

pub mod codec;
pub mod error;
pub mod store;

pub use codec::{compress_bytes, decode_record, decompress_bytes, encode_record};
pub use error::{StorageError, StorageResult};
pub use store::{DocumentStore, RUN_SUMMARY_FILENAME};
