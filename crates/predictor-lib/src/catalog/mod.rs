//! Durable keyed storage of predictor records
//!
//! Every operation is atomic per key; writes to distinct names never
//! contend on a shared lock.

mod file;
mod memory;

pub use file::FileCatalog;
pub use memory::MemoryCatalog;

use crate::error::CatalogError;
use crate::models::PredictorRecord;
use async_trait::async_trait;

/// Catalog store for predictor records
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Fetch a record by name
    async fn get(&self, name: &str) -> Result<Option<PredictorRecord>, CatalogError>;

    /// Insert or replace a record; rejects writes older than the stored version
    async fn put(&self, record: PredictorRecord) -> Result<(), CatalogError>;

    /// Remove a record, returning whether it existed
    async fn delete(&self, name: &str) -> Result<bool, CatalogError>;

    /// All records, ordered by name
    async fn list(&self) -> Result<Vec<PredictorRecord>, CatalogError>;
}

/// Reject a write whose version is older than what's stored
pub(crate) fn check_version(
    stored: Option<&PredictorRecord>,
    incoming: &PredictorRecord,
) -> Result<(), CatalogError> {
    match stored {
        Some(existing) if existing.version > incoming.version => Err(CatalogError::StaleWrite {
            name: incoming.name.clone(),
            stored: existing.version,
            attempted: incoming.version,
        }),
        _ => Ok(()),
    }
}
