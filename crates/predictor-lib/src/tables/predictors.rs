//! The predictors catalog table and the per-predictor result tables

use crate::error::{PredictorError, Result};
use crate::models::{DataSource, PredictionRow, PredictorRecord, Value};
use crate::observability::EventLogger;
use crate::orchestrator::{TrainingOrchestrator, TrainingRequest};
use crate::prediction::{InputRow, PredictionServer};
use std::sync::Arc;
use tracing::debug;

/// How the feature rows of a prediction query are supplied
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionQuery {
    /// One row given by column equalities
    Point(InputRow),
    /// Rows read from a sub-query or datasource; `overrides` are applied to each
    Batch {
        source: DataSource,
        overrides: InputRow,
    },
}

pub struct PredictorsTable {
    orchestrator: Arc<TrainingOrchestrator>,
    prediction: Arc<PredictionServer>,
    events: EventLogger,
}

impl PredictorsTable {
    pub fn new(
        orchestrator: Arc<TrainingOrchestrator>,
        prediction: Arc<PredictionServer>,
        events: EventLogger,
    ) -> Self {
        Self {
            orchestrator,
            prediction,
            events,
        }
    }

    pub fn orchestrator(&self) -> &Arc<TrainingOrchestrator> {
        &self.orchestrator
    }

    /// Current records; never waits on training
    pub async fn list(&self) -> Result<Vec<PredictorRecord>> {
        Ok(self.orchestrator.catalog().list().await?)
    }

    pub async fn get(&self, name: &str) -> Result<PredictorRecord> {
        self.orchestrator
            .catalog()
            .get(name)
            .await?
            .ok_or_else(|| PredictorError::NotFound(name.to_string()))
    }

    /// Create and start training; with `join_learn_process` returns only
    /// once training has finished
    pub async fn create(&self, request: TrainingRequest) -> Result<PredictorRecord> {
        if request.name.trim().is_empty() {
            return Err(PredictorError::InvalidRequest(
                "predictor name must not be empty".to_string(),
            ));
        }
        if request.predict_columns.is_empty() {
            return Err(PredictorError::InvalidRequest(
                "at least one column to predict is required".to_string(),
            ));
        }

        let name = request.name.clone();
        let join = request.options.join_learn_process;
        self.events.log_predictor_created(
            &name,
            &request.data_source.to_string(),
            &request.predict_columns,
            join,
        );

        let handle = self.orchestrator.start(request).await?;
        if join {
            handle.join().await?;
        }
        self.get(&name).await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.orchestrator.delete(name).await
    }

    pub async fn query(&self, name: &str, query: PredictionQuery) -> Result<Vec<PredictionRow>> {
        let record = self.get(name).await?;
        PredictionServer::ready_model(&record)?;

        match query {
            PredictionQuery::Point(input) => {
                if input.is_empty() {
                    return Err(PredictorError::InvalidRequest(
                        "a point query needs at least one column = value condition".to_string(),
                    ));
                }
                Ok(vec![self.prediction.predict_one(&record, input).await?])
            }
            PredictionQuery::Batch { source, overrides } => {
                let data = self.orchestrator.sources().load(&source).await?;
                debug!(predictor = %name, source = %source, rows = data.len(), "Batch prediction input");
                let inputs = data
                    .rows
                    .into_iter()
                    .map(|row| {
                        let mut input: InputRow = data.columns.iter().cloned().zip(row).collect();
                        apply_overrides(&mut input, &overrides);
                        input
                    })
                    .collect();
                self.prediction.predict_batch(&record, inputs).await
            }
        }
    }
}

fn apply_overrides(input: &mut InputRow, overrides: &InputRow) {
    for (column, value) in overrides {
        match input.iter_mut().find(|(c, _)| c.eq_ignore_ascii_case(column)) {
            Some(slot) => slot.1 = value.clone(),
            None => input.push((column.clone(), value.clone())),
        }
    }
}
