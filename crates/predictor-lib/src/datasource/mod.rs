//! Datasources and sub-query execution
//!
//! Two collaborators feed data into the predictor tables:
//! - the datasource registry, holding named ingested datasets
//! - the integration database, which runs `select_data_query` strings

mod integration;
mod resolver;

pub use integration::{MemoryDatabase, QuerySource};
pub use resolver::SourceResolver;

use crate::error::SourceError;
use crate::models::{Dataset, DatasourceRecord, SourceKind};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Registry of named datasources
#[async_trait]
pub trait DatasourceRegistry: Send + Sync {
    /// Get the ingested data behind a datasource
    async fn resolve(&self, name: &str) -> Result<Arc<Dataset>, SourceError>;

    /// Register a new datasource
    async fn register(
        &self,
        name: &str,
        kind: SourceKind,
        location: Option<String>,
        payload: Dataset,
    ) -> Result<DatasourceRecord, SourceError>;

    /// Remove a datasource; predictors using it are not touched
    async fn unregister(&self, name: &str) -> Result<(), SourceError>;

    /// All registered datasources, ordered by name
    async fn list(&self) -> Result<Vec<DatasourceRecord>, SourceError>;
}

struct RegisteredDatasource {
    record: DatasourceRecord,
    data: Arc<Dataset>,
}

/// Datasource registry kept in memory
#[derive(Default)]
pub struct MemoryDatasourceRegistry {
    sources: DashMap<String, RegisteredDatasource>,
}

impl MemoryDatasourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatasourceRegistry for MemoryDatasourceRegistry {
    async fn resolve(&self, name: &str) -> Result<Arc<Dataset>, SourceError> {
        self.sources
            .get(name)
            .map(|s| Arc::clone(&s.data))
            .ok_or_else(|| SourceError::DatasourceNotFound(name.to_string()))
    }

    async fn register(
        &self,
        name: &str,
        kind: SourceKind,
        location: Option<String>,
        payload: Dataset,
    ) -> Result<DatasourceRecord, SourceError> {
        payload.validate().map_err(SourceError::InvalidDataset)?;

        match self.sources.entry(name.to_string()) {
            Entry::Occupied(_) => Err(SourceError::DatasourceExists(name.to_string())),
            Entry::Vacant(slot) => {
                let record = DatasourceRecord {
                    name: name.to_string(),
                    source_kind: kind,
                    location,
                    columns: payload.columns.clone(),
                    row_count: payload.len(),
                    registered_at: Utc::now(),
                };
                info!(
                    datasource = %name,
                    kind = %kind,
                    rows = record.row_count,
                    "Registered datasource"
                );
                slot.insert(RegisteredDatasource {
                    record: record.clone(),
                    data: Arc::new(payload),
                });
                Ok(record)
            }
        }
    }

    async fn unregister(&self, name: &str) -> Result<(), SourceError> {
        self.sources
            .remove(name)
            .map(|_| info!(datasource = %name, "Unregistered datasource"))
            .ok_or_else(|| SourceError::DatasourceNotFound(name.to_string()))
    }

    async fn list(&self) -> Result<Vec<DatasourceRecord>, SourceError> {
        let mut records: Vec<DatasourceRecord> =
            self.sources.iter().map(|s| s.record.clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;

    fn dataset() -> Dataset {
        Dataset::new(
            vec!["sqft".into(), "rental_price".into()],
            vec![
                vec![Value::Int(900), Value::Int(2100)],
                vec![Value::Int(1000), Value::Int(2500)],
            ],
        )
    }

    #[tokio::test]
    async fn test_register_resolve_unregister() {
        let registry = MemoryDatasourceRegistry::new();
        let record = registry
            .register("rentals", SourceKind::File, Some("rentals.csv".into()), dataset())
            .await
            .unwrap();
        assert_eq!(record.row_count, 2);
        assert_eq!(registry.resolve("rentals").await.unwrap().len(), 2);

        let dup = registry
            .register("rentals", SourceKind::File, None, dataset())
            .await;
        assert!(matches!(dup, Err(SourceError::DatasourceExists(_))));

        registry.unregister("rentals").await.unwrap();
        assert!(matches!(
            registry.resolve("rentals").await,
            Err(SourceError::DatasourceNotFound(_))
        ));
        assert!(registry.unregister("rentals").await.is_err());
    }

    #[tokio::test]
    async fn test_register_rejects_ragged_rows() {
        let registry = MemoryDatasourceRegistry::new();
        let mut ds = dataset();
        ds.rows.push(vec![Value::Int(1)]);
        let result = registry.register("bad", SourceKind::Db, None, ds).await;
        assert!(matches!(result, Err(SourceError::InvalidDataset(_))));
        assert!(registry.list().await.unwrap().is_empty());
    }
}
