//! Integration database used to run `select_data_query` sub-queries

use crate::error::SourceError;
use crate::models::Dataset;
use crate::sql::{self, Select, Statement};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Runs a sub-query and returns its rows
#[async_trait]
pub trait QuerySource: Send + Sync {
    async fn fetch(&self, query: &str) -> Result<Dataset, SourceError>;
}

/// In-memory database answering the `SELECT` subset over loaded tables
#[derive(Default)]
pub struct MemoryDatabase {
    tables: DashMap<String, Arc<Dataset>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or replace) a table under `db.table`
    pub fn load_table(&self, name: &str, data: Dataset) -> Result<(), SourceError> {
        data.validate().map_err(SourceError::InvalidDataset)?;
        info!(table = %name, rows = data.len(), "Loaded integration table");
        self.tables.insert(name.to_ascii_lowercase(), Arc::new(data));
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> Result<(), SourceError> {
        self.tables
            .remove(&name.to_ascii_lowercase())
            .map(|_| ())
            .ok_or_else(|| SourceError::TableNotFound(name.to_string()))
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    fn evaluate(&self, select: &Select) -> Result<Dataset, SourceError> {
        let key = select.from.qualified().to_ascii_lowercase();
        let table = self
            .tables
            .get(&key)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| SourceError::TableNotFound(select.from.qualified()))?;
        sql::apply_select(select, &table).map_err(SourceError::InvalidQuery)
    }
}

#[async_trait]
impl QuerySource for MemoryDatabase {
    async fn fetch(&self, query: &str) -> Result<Dataset, SourceError> {
        let statement = sql::parse(query).map_err(|e| SourceError::InvalidQuery(e.to_string()))?;
        let Statement::Select(select) = statement else {
            return Err(SourceError::InvalidQuery(
                "only SELECT statements can be used as a data query".to_string(),
            ));
        };
        let result = self.evaluate(&select)?;
        debug!(query = %query, rows = result.len(), "Integration query evaluated");
        Ok(result)
    }
}
