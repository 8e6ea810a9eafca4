//! In-memory catalog

use super::{check_version, CatalogStore};
use crate::error::CatalogError;
use crate::models::PredictorRecord;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Catalog held in a concurrent map; contents are lost on restart
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    records: DashMap<String, PredictorRecord>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn get(&self, name: &str) -> Result<Option<PredictorRecord>, CatalogError> {
        Ok(self.records.get(name).map(|r| r.value().clone()))
    }

    async fn put(&self, record: PredictorRecord) -> Result<(), CatalogError> {
        match self.records.entry(record.name.clone()) {
            Entry::Occupied(mut e) => {
                check_version(Some(e.get()), &record)?;
                e.insert(record);
            }
            Entry::Vacant(e) => {
                e.insert(record);
            }
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool, CatalogError> {
        Ok(self.records.remove(name).is_some())
    }

    async fn list(&self) -> Result<Vec<PredictorRecord>, CatalogError> {
        let mut records: Vec<PredictorRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataSource, PredictorStatus, TrainingOptions};

    fn record(name: &str, version: u64) -> PredictorRecord {
        let mut r = PredictorRecord::new(
            name,
            vec!["y".to_string()],
            DataSource::Query("select * from t".to_string()),
            TrainingOptions::default(),
        );
        r.version = version;
        r
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let catalog = MemoryCatalog::new();
        catalog.put(record("b", 1)).await.unwrap();
        catalog.put(record("a", 1)).await.unwrap();

        assert!(catalog.get("a").await.unwrap().is_some());
        let names: Vec<String> = catalog.list().await.unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(catalog.delete("a").await.unwrap());
        assert!(!catalog.delete("a").await.unwrap());
        assert!(catalog.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_write_rejected() {
        let catalog = MemoryCatalog::new();
        let mut newer = record("p", 3);
        newer.status = PredictorStatus::Training;
        catalog.put(newer).await.unwrap();

        let err = catalog.put(record("p", 2)).await.unwrap_err();
        assert!(matches!(err, CatalogError::StaleWrite { stored: 3, attempted: 2, .. }));
        assert_eq!(
            catalog.get("p").await.unwrap().unwrap().status,
            PredictorStatus::Training
        );
    }
}
