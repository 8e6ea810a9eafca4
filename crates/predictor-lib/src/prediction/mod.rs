//! Prediction serving
//!
//! Turns a complete predictor's model plus feature rows into result rows.
//! Batches are split into chunks that run in parallel on the blocking pool;
//! rows come back in input order.

mod output;

pub use output::{EstimateFormatter, LOW_CONFIDENCE_THRESHOLD};

use crate::error::{LearnerError, PredictorError, Result};
use crate::learner::Learner;
use crate::models::{ModelArtifact, PredictionRow, PredictorRecord, PredictorStatus, Row, Value};
use crate::observability::ServiceMetrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PredictionConfig {
    /// Rows per blocking task
    pub chunk_size: usize,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self { chunk_size: 256 }
    }
}

/// One feature row in the caller's column order
pub type InputRow = Vec<(String, Value)>;

pub struct PredictionServer {
    learner: Arc<dyn Learner>,
    formatter: Arc<EstimateFormatter>,
    config: PredictionConfig,
    metrics: ServiceMetrics,
}

impl PredictionServer {
    pub fn new(learner: Arc<dyn Learner>, config: PredictionConfig) -> Self {
        Self {
            learner,
            formatter: Arc::new(EstimateFormatter::new()),
            config,
            metrics: ServiceMetrics::new(),
        }
    }

    /// The serving model, or `ModelNotReady` carrying the stored message
    pub fn ready_model(record: &PredictorRecord) -> Result<Arc<ModelArtifact>> {
        match (&record.status, &record.model) {
            (PredictorStatus::Complete, Some(model)) => Ok(Arc::clone(model)),
            _ => Err(PredictorError::ModelNotReady {
                name: record.name.clone(),
                status: record.status,
                message: record.error_message.clone(),
            }),
        }
    }

    pub async fn predict_one(&self, record: &PredictorRecord, input: InputRow) -> Result<PredictionRow> {
        let mut rows = self.predict_batch(record, vec![input]).await?;
        rows.pop().ok_or_else(|| PredictorError::PredictionFailed {
            name: record.name.clone(),
            message: "learner returned no rows".to_string(),
        })
    }

    pub async fn predict_batch(
        &self,
        record: &PredictorRecord,
        inputs: Vec<InputRow>,
    ) -> Result<Vec<PredictionRow>> {
        let model = Self::ready_model(record)?;
        let started = Instant::now();
        let total = inputs.len();
        let failed = |message: String| PredictorError::PredictionFailed {
            name: record.name.clone(),
            message,
        };

        let chunk_size = self.config.chunk_size.max(1);
        let mut tasks = Vec::with_capacity(total / chunk_size + 1);
        let mut remaining = inputs.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<InputRow> = remaining.by_ref().take(chunk_size).collect();
            let learner = Arc::clone(&self.learner);
            let formatter = Arc::clone(&self.formatter);
            let model = Arc::clone(&model);
            tasks.push(tokio::task::spawn_blocking(move || -> Result<Vec<PredictionRow>, LearnerError> {
                let features: Vec<Row> = chunk.iter().map(|r| r.iter().cloned().collect()).collect();
                let estimates = learner.predict(&model, &features)?;
                Ok(chunk
                    .into_iter()
                    .zip(estimates)
                    .map(|(input, per_target)| PredictionRow {
                        input,
                        predictions: per_target
                            .into_iter()
                            .map(|e| formatter.format(e, &model))
                            .collect(),
                    })
                    .collect())
            }));
        }

        let mut rows = Vec::with_capacity(total);
        for task in tasks {
            let chunk = task
                .await
                .map_err(|e| failed(format!("prediction task crashed: {}", e)))?
                .map_err(|e| failed(e.to_string()))?;
            rows.extend(chunk);
        }
        if rows.len() != total {
            return Err(failed(format!(
                "learner returned {} rows for {} inputs",
                rows.len(),
                total
            )));
        }

        self.metrics
            .observe_prediction(started.elapsed().as_secs_f64(), rows.len());
        debug!(predictor = %record.name, rows = rows.len(), "Served predictions");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::{BaselineLearner, TrainingContext};
    use crate::models::{DataSource, Dataset, TrainingOptions};

    fn trained_record() -> PredictorRecord {
        let data = Dataset::new(
            vec!["sqft".into(), "rental_price".into()],
            (0..30)
                .map(|i| vec![Value::Int(500 + i * 50), Value::Int(1000 + i * 100)])
                .collect(),
        );
        let model = BaselineLearner::default()
            .train(&data, &["rental_price".to_string()], &TrainingContext::unbounded())
            .unwrap();
        let mut record = PredictorRecord::new(
            "p",
            vec!["rental_price".to_string()],
            DataSource::External("rentals".into()),
            TrainingOptions::default(),
        );
        record.status = PredictorStatus::Complete;
        record.model = Some(Arc::new(model));
        record
    }

    fn server(chunk_size: usize) -> PredictionServer {
        PredictionServer::new(Arc::new(BaselineLearner::default()), PredictionConfig { chunk_size })
    }

    #[tokio::test]
    async fn test_point_prediction() {
        let row = server(256)
            .predict_one(&trained_record(), vec![("sqft".to_string(), Value::Int(1000))])
            .await
            .unwrap();
        assert_eq!(row.get("sqft"), Value::Int(1000));
        assert!(!row.get("rental_price").is_null());
        assert_eq!(row.get("number_of_rooms"), Value::Null);

        let p = &row.predictions[0];
        assert!((0.0..=1.0).contains(&p.confidence));
        let estimate = p.value.as_f64().unwrap();
        assert!(p.lower.unwrap() <= estimate && estimate <= p.upper.unwrap());
        assert!(!p.explanation.is_empty());
    }

    #[tokio::test]
    async fn test_batch_preserves_order_across_chunks() {
        let inputs: Vec<InputRow> = (0..7)
            .map(|i| vec![("sqft".to_string(), Value::Int(600 + i * 100))])
            .collect();
        let rows = server(2)
            .predict_batch(&trained_record(), inputs)
            .await
            .unwrap();
        assert_eq!(rows.len(), 7);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.get("sqft"), Value::Int(600 + i as i64 * 100));
        }
        let first = rows[0].get("rental_price").as_f64().unwrap();
        let last = rows[6].get("rental_price").as_f64().unwrap();
        assert!(last > first);
    }

    #[tokio::test]
    async fn test_not_ready_carries_stored_message() {
        let mut record = trained_record();
        record.status = PredictorStatus::Error;
        record.model = None;
        record.error_message = Some("target column 'x' is not present".to_string());

        let err = server(256)
            .predict_one(&record, vec![("sqft".to_string(), Value::Int(1))])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "model_not_ready");
        assert!(err.to_string().contains("target column 'x'"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let rows = server(4).predict_batch(&trained_record(), Vec::new()).await.unwrap();
        assert!(rows.is_empty());
    }
}
