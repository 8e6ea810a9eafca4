//! Wiring of the predictor tables
//!
//! [`PredictorEngine`] owns the collaborators, the orchestrator and the
//! virtual tables. Clients talk to it through a [`Session`].

use crate::catalog::{CatalogStore, MemoryCatalog};
use crate::datasource::{
    DatasourceRegistry, MemoryDatabase, MemoryDatasourceRegistry, QuerySource, SourceResolver,
};
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::learner::{BaselineConfig, BaselineLearner, Learner};
use crate::observability::EventLogger;
use crate::orchestrator::{OrchestratorConfig, TrainingOrchestrator};
use crate::prediction::{PredictionConfig, PredictionServer};
use crate::tables::{CommandsTable, PredictorsTable, QueryOutput, VirtualTables};
use std::sync::Arc;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_DATABASE: &str = "mindsdb";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Database name the virtual tables live in
    pub database: String,
    pub orchestrator: OrchestratorConfig,
    pub prediction: PredictionConfig,
    pub baseline: BaselineConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
            orchestrator: OrchestratorConfig::default(),
            prediction: PredictionConfig::default(),
            baseline: BaselineConfig::default(),
        }
    }
}

/// Builds a [`PredictorEngine`]; every collaborator defaults to the
/// in-memory implementation
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    catalog: Option<Arc<dyn CatalogStore>>,
    datasources: Option<Arc<dyn DatasourceRegistry>>,
    database: Option<Arc<MemoryDatabase>>,
    learner: Option<Arc<dyn Learner>>,
    events: Option<EventLogger>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn CatalogStore>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn datasources(mut self, datasources: Arc<dyn DatasourceRegistry>) -> Self {
        self.datasources = Some(datasources);
        self
    }

    pub fn database(mut self, database: Arc<MemoryDatabase>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn learner(mut self, learner: Arc<dyn Learner>) -> Self {
        self.learner = Some(learner);
        self
    }

    pub fn events(mut self, events: EventLogger) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> PredictorEngine {
        let config = self.config;
        let events = self.events.unwrap_or_default();
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(MemoryCatalog::new()));
        let datasources = self
            .datasources
            .unwrap_or_else(|| Arc::new(MemoryDatasourceRegistry::new()));
        let database = self
            .database
            .unwrap_or_else(|| Arc::new(MemoryDatabase::new()));
        let learner = self
            .learner
            .unwrap_or_else(|| Arc::new(BaselineLearner::new(config.baseline.clone())));

        let integration: Arc<dyn QuerySource> = database.clone();
        let sources = SourceResolver::new(Arc::clone(&datasources), Arc::clone(&integration));
        let orchestrator = Arc::new(TrainingOrchestrator::new(
            catalog,
            sources,
            Arc::clone(&learner),
            config.orchestrator.clone(),
            events.clone(),
        ));
        let prediction = Arc::new(PredictionServer::new(learner, config.prediction.clone()));
        let predictors = Arc::new(PredictorsTable::new(
            Arc::clone(&orchestrator),
            prediction,
            events.clone(),
        ));
        let commands = CommandsTable::new(Arc::clone(&predictors), events.clone());
        let tables = Arc::new(VirtualTables::new(
            config.database.clone(),
            predictors,
            commands,
            integration,
        ));

        PredictorEngine {
            config,
            tables,
            orchestrator,
            datasources,
            database,
            health: HealthRegistry::new(),
            events,
        }
    }
}

#[derive(Clone)]
pub struct PredictorEngine {
    config: EngineConfig,
    tables: Arc<VirtualTables>,
    orchestrator: Arc<TrainingOrchestrator>,
    datasources: Arc<dyn DatasourceRegistry>,
    database: Arc<MemoryDatabase>,
    health: HealthRegistry,
    events: EventLogger,
}

impl PredictorEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Engine with in-memory collaborators and default settings
    pub fn in_memory() -> Self {
        Self::builder().build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tables(&self) -> &Arc<VirtualTables> {
        &self.tables
    }

    pub fn orchestrator(&self) -> &Arc<TrainingOrchestrator> {
        &self.orchestrator
    }

    pub fn datasources(&self) -> &Arc<dyn DatasourceRegistry> {
        &self.datasources
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Recover interrupted trainings and mark the engine ready
    pub async fn start(&self) -> Result<usize> {
        for component in [
            components::CATALOG,
            components::ORCHESTRATOR,
            components::PREDICTION,
        ] {
            self.health.register(component).await;
        }

        let recovered = match self.orchestrator.recover().await {
            Ok(n) => n,
            Err(e) => {
                self.health
                    .set_unhealthy(components::CATALOG, e.to_string())
                    .await;
                return Err(e);
            }
        };
        if recovered > 0 {
            warn!(recovered, "Predictors left mid-training were marked as failed");
        }

        let predictors = self
            .orchestrator
            .catalog()
            .list()
            .await
            .map(|r| r.len())
            .unwrap_or_default();
        self.events.log_startup(
            env!("CARGO_PKG_VERSION"),
            &self.config.database,
            predictors,
        );
        self.health.set_ready(true).await;
        Ok(recovered)
    }

    /// Cancel running trainings
    pub async fn shutdown(&self, reason: &str) {
        self.health.set_ready(false).await;
        self.orchestrator.shutdown().await;
        self.events.log_shutdown(reason);
    }

    pub fn session(&self) -> Session {
        Session {
            id: Uuid::new_v4(),
            tables: Arc::clone(&self.tables),
        }
    }
}

/// One client connection
pub struct Session {
    id: Uuid,
    tables: Arc<VirtualTables>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn execute(&self, sql: &str) -> Result<QueryOutput> {
        let span = tracing::info_span!("session", id = %self.id);
        async {
            info!(statement = %sql, "Executing statement");
            self.tables.execute(sql).await
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_marks_ready() {
        let engine = PredictorEngine::in_memory();
        assert!(!engine.health().readiness().await.ready);
        assert_eq!(engine.start().await.unwrap(), 0);
        assert!(engine.health().readiness().await.ready);
        assert_eq!(engine.health().health().await.components.len(), 3);

        engine.shutdown("test").await;
        assert!(!engine.health().readiness().await.ready);
    }

    #[tokio::test]
    async fn test_sessions_share_tables() {
        let engine = PredictorEngine::builder()
            .config(EngineConfig {
                database: "models".to_string(),
                ..Default::default()
            })
            .build();
        assert_eq!(engine.tables().database(), "models");

        let a = engine.session();
        let b = engine.session();
        assert_ne!(a.id(), b.id());
        let output = b.execute("show tables").await.unwrap();
        match output {
            QueryOutput::Rows(data) => assert_eq!(data.len(), 2),
            other => panic!("unexpected output {:?}", other),
        }
    }
}
