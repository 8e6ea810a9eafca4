//! File-backed catalog
//!
//! One JSON document per predictor. Documents are written to a temp file
//! and renamed into place, and the model payload carries a SHA256 checksum
//! that is verified when the catalog is opened. Writes are serialized so a
//! version check and the write that follows it cannot interleave.

use super::{check_version, CatalogStore};
use crate::error::CatalogError;
use crate::models::PredictorRecord;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const DOCUMENT_EXTENSION: &str = "json";

/// On-disk document
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    record: PredictorRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_checksum: Option<String>,
}

/// Catalog persisted under a directory
pub struct FileCatalog {
    dir: PathBuf,
    cache: DashMap<String, PredictorRecord>,
    write_lock: Mutex<()>,
}

impl FileCatalog {
    /// Open (creating if needed) a catalog directory and load its records
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let cache = DashMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            match load_document(&path).await {
                Ok(record) => {
                    debug!(predictor = %record.name, path = %path.display(), "Loaded catalog entry");
                    cache.insert(record.name.clone(), record);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable catalog entry");
                }
            }
        }

        info!(dir = %dir.display(), records = cache.len(), "Opened file catalog");
        Ok(Self {
            dir,
            cache,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", file_stem(name), DOCUMENT_EXTENSION))
    }
}

#[async_trait]
impl CatalogStore for FileCatalog {
    async fn get(&self, name: &str) -> Result<Option<PredictorRecord>, CatalogError> {
        Ok(self.cache.get(name).map(|r| r.value().clone()))
    }

    async fn put(&self, record: PredictorRecord) -> Result<(), CatalogError> {
        let _guard = self.write_lock.lock().await;
        check_version(self.cache.get(&record.name).as_deref(), &record)?;

        let document = StoredRecord {
            model_checksum: record.model.as_ref().map(|m| payload_checksum(&m.payload)),
            record: record.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        let path = self.path_for(&record.name);
        let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        tokio::fs::write(&temp_path, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        self.cache.insert(record.name.clone(), record);
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, CatalogError> {
        let _guard = self.write_lock.lock().await;
        let existed = self.cache.remove(name).is_some();
        match tokio::fs::remove_file(self.path_for(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(existed),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<PredictorRecord>, CatalogError> {
        let mut records: Vec<PredictorRecord> =
            self.cache.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

async fn load_document(path: &Path) -> Result<PredictorRecord, CatalogError> {
    let bytes = tokio::fs::read(path).await?;
    let document: StoredRecord = serde_json::from_slice(&bytes)?;
    let record = document.record;

    match (&record.model, document.model_checksum) {
        (Some(model), Some(expected)) => {
            let computed = payload_checksum(&model.payload);
            if computed != expected {
                return Err(CatalogError::Corrupted {
                    name: record.name.clone(),
                    reason: format!("model checksum mismatch: expected {}, got {}", expected, computed),
                });
            }
        }
        (Some(_), None) => {
            return Err(CatalogError::Corrupted {
                name: record.name.clone(),
                reason: "model checksum missing".to_string(),
            });
        }
        _ => {}
    }

    Ok(record)
}

/// SHA256 of the serialized model payload. Floats must survive a
/// write/read cycle bit for bit, which serde_json's `float_roundtrip`
/// feature guarantees.
fn payload_checksum(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Names made of `[A-Za-z0-9_]` are used as-is, anything else is hex-encoded
fn file_stem(name: &str) -> String {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        name.to_string()
    } else {
        format!("%{}", hex::encode(name.as_bytes()))
    }
}
