//! A single training job
//!
//! The job owns every write to its predictor's record while it runs. Each
//! write re-checks the cancel signal first, and the final catalog write
//! happens before the terminal [`JobState`] is published.

use super::Shared;
use crate::error::{LearnerError, PredictorError};
use crate::learner::TrainingContext;
use crate::models::{DataSource, ModelArtifact, PredictorRecord, PredictorStatus, TrainingOptions};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

/// Progress of a training job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for data or a training permit
    Pending,
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed(_) | JobState::Cancelled
        )
    }

    fn outcome(&self) -> &'static str {
        match self {
            JobState::Succeeded => "succeeded",
            JobState::Failed(_) => "failed",
            JobState::Cancelled => "cancelled",
            JobState::Pending | JobState::Running => "unfinished",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingMode {
    /// First training of a freshly created record
    Create,
    /// New model for a complete predictor; the old one keeps serving
    Retrain,
}

impl TrainingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingMode::Create => "create",
            TrainingMode::Retrain => "retrain",
        }
    }
}

pub(super) struct TrainingJob {
    pub(super) name: String,
    pub(super) job_id: Uuid,
    pub(super) mode: TrainingMode,
    pub(super) predict_columns: Vec<String>,
    pub(super) data_source: DataSource,
    pub(super) options: TrainingOptions,
    pub(super) shared: Arc<Shared>,
    pub(super) state: watch::Sender<JobState>,
    pub(super) cancel: watch::Receiver<bool>,
}

impl TrainingJob {
    pub(super) async fn run(self) {
        let final_state = self.execute().await;
        debug!(
            predictor = %self.name,
            job_id = %self.job_id,
            state = ?final_state,
            "Training job finished"
        );
        self.state.send_replace(final_state);
        self.shared
            .jobs
            .remove_if(&self.name, |_, slot| slot.job_id == self.job_id);
    }

    async fn execute(&self) -> JobState {
        let mut cancel = self.cancel.clone();
        let permit = tokio::select! {
            permit = Arc::clone(&self.shared.permits).acquire_owned() => Some(permit),
            _ = wait_cancelled(&mut cancel) => None,
        };
        let _permit = match permit {
            Some(Ok(permit)) => permit,
            Some(Err(_)) => return self.fail("training pool is closed".to_string()).await,
            None => return JobState::Cancelled,
        };

        self.shared.metrics.training_started();
        let started = Instant::now();
        let state = self.train(started).await;
        self.shared.metrics.training_stopped();
        self.shared
            .metrics
            .observe_training(started.elapsed().as_secs_f64(), state.outcome());
        state
    }

    async fn train(&self, started: Instant) -> JobState {
        let data = match self.shared.sources.load(&self.data_source).await {
            Ok(data) => data,
            Err(e) => return self.fail(e.to_string()).await,
        };

        if self.mode == TrainingMode::Create {
            match self.update(|r| r.status = PredictorStatus::Training).await {
                Ok(true) => {}
                Ok(false) => return JobState::Cancelled,
                Err(e) => return self.fail(e.to_string()).await,
            }
        }
        self.state.send_replace(JobState::Running);
        self.shared.events.log_training_started(
            &self.name,
            &self.job_id.to_string(),
            self.mode.as_str(),
        );

        let deadline = self
            .options
            .stop_training_in_x_seconds
            .map(Duration::from_secs)
            .or(self.shared.config.default_training_timeout)
            .map(|d| Instant::now() + d);
        let ctx = TrainingContext::new(self.cancel.clone(), deadline);
        let learner = Arc::clone(&self.shared.learner);
        let targets = self.predict_columns.clone();

        let result =
            tokio::task::spawn_blocking(move || learner.train(&data, &targets, &ctx)).await;
        match result {
            Ok(Ok(model)) => self.succeed(model, started).await,
            Ok(Err(LearnerError::Cancelled)) => JobState::Cancelled,
            Ok(Err(e)) => self.fail(e.to_string()).await,
            Err(e) => self.fail(format!("learner crashed: {}", e)).await,
        }
    }

    async fn succeed(&self, model: ModelArtifact, started: Instant) -> JobState {
        let epochs = model.epochs;
        let early_stopped = model.early_stopped;
        let model = Arc::new(model);

        let stored = self
            .update(|r| {
                r.status = PredictorStatus::Complete;
                r.model = Some(model);
                r.error_message = None;
                r.generation += 1;
            })
            .await;
        match stored {
            Ok(true) => {
                self.shared.events.log_training_finished(
                    &self.name,
                    &self.job_id.to_string(),
                    started.elapsed().as_secs_f64(),
                    epochs,
                    early_stopped,
                );
                JobState::Succeeded
            }
            Ok(false) => JobState::Cancelled,
            Err(e) => self.fail(format!("failed to store model: {}", e)).await,
        }
    }

    /// Retrain failures leave the serving record untouched
    async fn fail(&self, message: String) -> JobState {
        self.shared
            .events
            .log_training_failed(&self.name, &self.job_id.to_string(), &message);

        if self.mode == TrainingMode::Create {
            let stored = self
                .update(|r| {
                    r.status = PredictorStatus::Error;
                    r.error_message = Some(message.clone());
                    r.model = None;
                })
                .await;
            match stored {
                Ok(true) => {}
                Ok(false) => return JobState::Cancelled,
                Err(e) => {
                    warn!(predictor = %self.name, error = %e, "Failed to record training error");
                }
            }
        }
        JobState::Failed(message)
    }

    /// Apply `change` to the stored record. Returns false without writing
    /// when the job was cancelled or the record is gone.
    async fn update(
        &self,
        change: impl FnOnce(&mut PredictorRecord),
    ) -> Result<bool, PredictorError> {
        if *self.cancel.borrow() {
            return Ok(false);
        }
        let Some(mut record) = self.shared.catalog.get(&self.name).await? else {
            return Ok(false);
        };

        let previous = record.status;
        change(&mut record);
        if !previous.can_transition_to(record.status) {
            warn!(
                predictor = %self.name,
                from = %previous,
                to = %record.status,
                "Refusing backwards status transition"
            );
            return Ok(false);
        }
        record.version += 1;
        record.updated_at = Utc::now();
        self.shared.catalog.put(record).await?;
        Ok(true)
    }
}

/// Resolves once cancellation is requested; never if the sender goes away
async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
