use super::{DatasourceRegistry, QuerySource};
use crate::error::PredictorError;
use crate::models::{DataSource, Dataset};
use std::sync::Arc;
use tracing::debug;

/// Loads the training data a predictor's [`DataSource`] points at
#[derive(Clone)]
pub struct SourceResolver {
    datasources: Arc<dyn DatasourceRegistry>,
    integration: Arc<dyn QuerySource>,
}

impl SourceResolver {
    pub fn new(datasources: Arc<dyn DatasourceRegistry>, integration: Arc<dyn QuerySource>) -> Self {
        Self {
            datasources,
            integration,
        }
    }

    pub fn datasources(&self) -> &Arc<dyn DatasourceRegistry> {
        &self.datasources
    }

    pub fn integration(&self) -> &Arc<dyn QuerySource> {
        &self.integration
    }

    pub async fn load(&self, source: &DataSource) -> Result<Dataset, PredictorError> {
        let data = match source {
            DataSource::Query(query) => self.integration.fetch(query).await?,
            DataSource::External(name) => self.datasources.resolve(name).await?.as_ref().clone(),
        };
        debug!(source = %source, rows = data.len(), "Resolved training data");
        Ok(data)
    }
}
