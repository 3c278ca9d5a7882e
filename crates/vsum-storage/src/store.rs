//! Filesystem-backed document store.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};

use vsum_models::DocumentRecord;

use crate::codec::{decode_record, encode_record};
use crate::error::{StorageError, StorageResult};

/// Run-level summary written next to the item directories.
pub const RUN_SUMMARY_FILENAME: &str = "run_summary.json";

/// Per-item checkpoint store rooted at the output directory.
///
/// Layout: `{root}/{item_id}/{filename}`.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
    filename: String,
    compress: bool,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>, filename: impl Into<String>, compress: bool) -> Self {
        Self {
            root: root.into(),
            filename: filename.into(),
            compress,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding everything produced for `item_id`.
    pub fn item_dir(&self, item_id: &str) -> StorageResult<PathBuf> {
        validate_item_id(item_id)?;
        Ok(self.root.join(item_id))
    }

    pub fn record_path(&self, item_id: &str) -> StorageResult<PathBuf> {
        Ok(self.item_dir(item_id)?.join(&self.filename))
    }

    pub async fn exists(&self, item_id: &str) -> StorageResult<bool> {
        let path = self.record_path(item_id)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Load the persisted record, or `None` if the item has none yet.
    pub async fn load(&self, item_id: &str) -> StorageResult<Option<DocumentRecord>> {
        let path = self.record_path(item_id)?;
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(item_id = %item_id, "No persisted record");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match decode_record(&data) {
            Ok(record) => {
                debug!(item_id = %item_id, sentences = record.sentences.len(), "Loaded persisted record");
                Ok(Some(record))
            }
            Err(e) => {
                warn!(item_id = %item_id, path = %path.display(), error = %e, "Persisted record is unreadable");
                Err(StorageError::corrupt(path, e.to_string()))
            }
        }
    }

    /// Persist the record, replacing any previous one atomically.
    pub async fn save(&self, item_id: &str, record: &DocumentRecord) -> StorageResult<()> {
        let path = self.record_path(item_id)?;
        let bytes = encode_record(record, self.compress)?;
        write_atomic(&path, &bytes).await?;
        debug!(item_id = %item_id, bytes = bytes.len(), "Persisted record");
        Ok(())
    }

    /// Write the run summary to `{root}/run_summary.json`.
    pub async fn save_run_summary<T: Serialize>(&self, summary: &T) -> StorageResult<PathBuf> {
        self.save_report(RUN_SUMMARY_FILENAME, summary).await
    }

    /// Write a pretty-printed JSON report at `{root}/{filename}`.
    pub async fn save_report<T: Serialize>(&self, filename: &str, report: &T) -> StorageResult<PathBuf> {
        validate_item_id(filename)?;
        let path = self.root.join(filename);
        let bytes = serde_json::to_vec_pretty(report)?;
        write_atomic(&path, &bytes).await?;
        Ok(path)
    }

    /// Write a pretty-printed JSON report at `{root}/{item_id}/{filename}`.
    pub async fn save_item_report<T: Serialize>(
        &self,
        item_id: &str,
        filename: &str,
        report: &T,
    ) -> StorageResult<PathBuf> {
        validate_item_id(filename)?;
        if filename == self.filename {
            return Err(StorageError::invalid_key(filename));
        }
        let path = self.item_dir(item_id)?.join(filename);
        let bytes = serde_json::to_vec_pretty(report)?;
        write_atomic(&path, &bytes).await?;
        Ok(path)
    }
}

/// Item ids become directory names; reject anything that could escape the root.
fn validate_item_id(item_id: &str) -> StorageResult<()> {
    let invalid = item_id.is_empty()
        || item_id == "."
        || item_id == ".."
        || item_id.contains('/')
        || item_id.contains('\\')
        || item_id.contains('\0');
    if invalid {
        return Err(StorageError::invalid_key(item_id));
    }
    Ok(())
}

/// Write to a sibling temp file, then rename over the destination.
async fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    fs::write(&tmp, bytes).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
