//! Asynchronous training orchestrator
//!
//! Runs one training job per predictor name on its own task. Setup of
//! `start`/`retrain` and teardown of `delete` are serialized per name by a
//! lifecycle lock; training itself runs outside the lock, bounded by a
//! semaphore of training permits.

mod job;

pub use job::{JobState, TrainingMode};

use crate::catalog::CatalogStore;
use crate::datasource::SourceResolver;
use crate::error::{PredictorError, Result};
use crate::learner::Learner;
use crate::models::{DataSource, PredictorRecord, PredictorStatus, TrainingOptions};
use crate::observability::{EventLogger, ServiceMetrics};
use chrono::Utc;
use dashmap::DashMap;
use job::TrainingJob;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_trainings: usize,
    /// Deadline for requests without `stop_training_in_x_seconds`
    pub default_training_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_trainings: 4,
            default_training_timeout: None,
        }
    }
}

/// A new predictor to train
#[derive(Debug, Clone)]
pub struct TrainingRequest {
    pub name: String,
    pub predict_columns: Vec<String>,
    pub data_source: DataSource,
    pub options: TrainingOptions,
}

/// Caller's view of a started job
#[derive(Debug)]
pub struct TrainingHandle {
    name: String,
    job_id: Uuid,
    state: watch::Receiver<JobState>,
}

impl TrainingHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// Suspend until the job reaches a terminal state
    pub async fn wait(mut self) -> JobState {
        loop {
            let current = self.state.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if self.state.changed().await.is_err() {
                let last = self.state.borrow().clone();
                return if last.is_terminal() {
                    last
                } else {
                    JobState::Failed("training job ended unexpectedly".to_string())
                };
            }
        }
    }

    /// Join semantics: anything but success becomes `TrainingFailed`
    pub async fn join(self) -> Result<()> {
        let name = self.name.clone();
        match self.wait().await {
            JobState::Succeeded => Ok(()),
            JobState::Failed(message) => Err(PredictorError::TrainingFailed { name, message }),
            _ => Err(PredictorError::TrainingFailed {
                name,
                message: "training cancelled: predictor was deleted".to_string(),
            }),
        }
    }
}

struct JobSlot {
    job_id: Uuid,
    state: watch::Receiver<JobState>,
    cancel: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl JobSlot {
    fn is_active(&self) -> bool {
        !self.state.borrow().is_terminal()
    }
}

/// State shared between the orchestrator and its jobs
struct Shared {
    catalog: Arc<dyn CatalogStore>,
    sources: SourceResolver,
    learner: Arc<dyn Learner>,
    permits: Arc<Semaphore>,
    jobs: DashMap<String, JobSlot>,
    config: OrchestratorConfig,
    metrics: ServiceMetrics,
    events: EventLogger,
}

pub struct TrainingOrchestrator {
    shared: Arc<Shared>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TrainingOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        sources: SourceResolver,
        learner: Arc<dyn Learner>,
        config: OrchestratorConfig,
        events: EventLogger,
    ) -> Self {
        info!(
            max_concurrent_trainings = config.max_concurrent_trainings,
            default_timeout_secs = ?config.default_training_timeout.map(|d| d.as_secs()),
            learner = %learner.name(),
            "Creating training orchestrator"
        );
        Self {
            shared: Arc::new(Shared {
                catalog,
                sources,
                learner,
                permits: Arc::new(Semaphore::new(config.max_concurrent_trainings.max(1))),
                jobs: DashMap::new(),
                config,
                metrics: ServiceMetrics::new(),
                events,
            }),
            locks: DashMap::new(),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.shared.catalog
    }

    pub fn sources(&self) -> &SourceResolver {
        &self.shared.sources
    }

    pub fn learner(&self) -> &Arc<dyn Learner> {
        &self.shared.learner
    }

    /// Take the lifecycle lock for `name`
    async fn lock_name(&self, name: &str) -> LifecycleGuard<'_> {
        let lock = Arc::clone(self.locks.entry(name.to_string()).or_default().value());
        LifecycleGuard {
            locks: &self.locks,
            name: name.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// True while a job for `name` hasn't reached a terminal state
    pub fn is_training(&self, name: &str) -> bool {
        self.shared
            .jobs
            .get(name)
            .is_some_and(|slot| slot.is_active())
    }

    pub fn active_jobs(&self) -> usize {
        self.shared.jobs.iter().filter(|s| s.is_active()).count()
    }

    /// Create a `generating` record and start training it
    pub async fn start(&self, request: TrainingRequest) -> Result<TrainingHandle> {
        let _guard = self.lock_name(&request.name).await;

        if self.is_training(&request.name) {
            return Err(PredictorError::TrainingInProgress(request.name));
        }
        let existing = self.shared.catalog.get(&request.name).await?;
        if let Some(current) = &existing {
            if current.status != PredictorStatus::Error {
                return Err(PredictorError::DuplicateName(request.name));
            }
        }

        let mut record = PredictorRecord::new(
            request.name.clone(),
            request.predict_columns,
            request.data_source,
            request.options,
        );
        if let Some(previous) = existing {
            record.version = previous.version + 1;
        }
        self.shared.catalog.put(record.clone()).await?;
        self.refresh_predictor_count().await;

        Ok(self.spawn(&record, TrainingMode::Create))
    }

    /// Train a new model for a complete predictor from its stored source
    pub async fn retrain(&self, name: &str) -> Result<TrainingHandle> {
        let _guard = self.lock_name(name).await;

        if self.is_training(name) {
            return Err(PredictorError::TrainingInProgress(name.to_string()));
        }
        let record = self
            .shared
            .catalog
            .get(name)
            .await?
            .ok_or_else(|| PredictorError::NotFound(name.to_string()))?;
        if record.status != PredictorStatus::Complete {
            return Err(PredictorError::ModelNotReady {
                name: name.to_string(),
                status: record.status,
                message: record.error_message,
            });
        }

        Ok(self.spawn(&record, TrainingMode::Retrain))
    }

    /// Caller must hold the lifecycle lock for `record.name`
    fn spawn(&self, record: &PredictorRecord, mode: TrainingMode) -> TrainingHandle {
        let job_id = Uuid::new_v4();
        let (state_tx, state_rx) = watch::channel(JobState::Pending);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        self.shared.jobs.insert(
            record.name.clone(),
            JobSlot {
                job_id,
                state: state_rx.clone(),
                cancel: cancel_tx,
                handle: None,
            },
        );

        let job = TrainingJob {
            name: record.name.clone(),
            job_id,
            mode,
            predict_columns: record.predict_columns.clone(),
            data_source: record.data_source.clone(),
            options: record.training_options.clone(),
            shared: Arc::clone(&self.shared),
            state: state_tx,
            cancel: cancel_rx,
        };
        let handle = tokio::spawn(job.run());
        if let Some(mut slot) = self.shared.jobs.get_mut(&record.name) {
            if slot.job_id == job_id {
                slot.handle = Some(handle);
            }
        }

        debug!(predictor = %record.name, job_id = %job_id, mode = mode.as_str(), "Spawned training job");
        TrainingHandle {
            name: record.name.clone(),
            job_id,
            state: state_rx,
        }
    }

    /// Cancel any job for `name`, wait for it to release its resources,
    /// then remove the record
    pub async fn delete(&self, name: &str) -> Result<()> {
        let _guard = self.lock_name(name).await;

        let cancelled_job = match self.shared.jobs.remove(name) {
            Some((_, slot)) => stop_job(name, slot).await,
            None => false,
        };
        let existed = self.shared.catalog.delete(name).await?;
        if !existed && !cancelled_job {
            return Err(PredictorError::NotFound(name.to_string()));
        }

        self.refresh_predictor_count().await;
        self.shared.events.log_predictor_deleted(name, cancelled_job);
        Ok(())
    }

    pub async fn status(&self, name: &str) -> Result<PredictorStatus> {
        self.shared
            .catalog
            .get(name)
            .await?
            .map(|r| r.status)
            .ok_or_else(|| PredictorError::NotFound(name.to_string()))
    }

    /// Mark records a previous process left mid-training as failed
    pub async fn recover(&self) -> Result<usize> {
        let mut recovered = 0;
        for mut record in self.shared.catalog.list().await? {
            if record.status.is_terminal() || self.is_training(&record.name) {
                continue;
            }
            let previous = record.status;
            record.status = PredictorStatus::Error;
            record.error_message = Some("training interrupted".to_string());
            record.version += 1;
            record.updated_at = Utc::now();
            self.shared.catalog.put(record.clone()).await?;
            self.shared.events.log_recovered(&record.name, previous.as_str());
            recovered += 1;
        }
        self.refresh_predictor_count().await;
        Ok(recovered)
    }

    /// Cancel every job and wait for them to stop
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.shared.jobs.iter().map(|s| s.key().clone()).collect();
        for name in names {
            if let Some((_, slot)) = self.shared.jobs.remove(&name) {
                stop_job(&name, slot).await;
            }
        }
        info!("Training orchestrator stopped");
    }

    async fn refresh_predictor_count(&self) {
        match self.shared.catalog.list().await {
            Ok(records) => self.shared.metrics.set_predictors(records.len()),
            Err(e) => warn!(error = %e, "Failed to count predictors"),
        }
    }
}

/// Holds a per-name lifecycle lock; the map entry is dropped with the last holder
struct LifecycleGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LifecycleGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.name, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Returns whether the job was still active
async fn stop_job(name: &str, mut slot: JobSlot) -> bool {
    let active = slot.is_active();
    slot.cancel.send_replace(true);
    if let Some(handle) = slot.handle.take() {
        if let Err(e) = handle.await {
            warn!(predictor = %name, job_id = %slot.job_id, error = %e, "Training job ended abnormally");
        }
    }
    active
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::datasource::{MemoryDatabase, MemoryDatasourceRegistry};
    use crate::error::LearnerError;
    use crate::learner::{BaselineLearner, Estimate, StopReason, TrainingContext};
    use crate::models::{Dataset, ModelArtifact, Row, Value};

    /// Trains until stopped; finalizes on deadline, gives up after ~10s
    struct SlowLearner;

    impl Learner for SlowLearner {
        fn name(&self) -> &str {
            "slow"
        }

        fn train(&self, _: &Dataset, _: &[String], ctx: &TrainingContext) -> std::result::Result<ModelArtifact, LearnerError> {
            for _ in 0..2000 {
                match ctx.should_stop() {
                    Some(StopReason::Cancelled) => return Err(LearnerError::Cancelled),
                    Some(StopReason::Deadline) => break,
                    None => std::thread::sleep(Duration::from_millis(5)),
                }
            }
            let mut model = ModelArtifact::new("slow", serde_json::json!({}));
            model.early_stopped = true;
            Ok(model)
        }

        fn predict(&self, _: &ModelArtifact, _: &[Row]) -> std::result::Result<Vec<Vec<Estimate>>, LearnerError> {
            Ok(Vec::new())
        }
    }

    struct PanickingLearner;

    impl Learner for PanickingLearner {
        fn name(&self) -> &str {
            "panicking"
        }

        fn train(&self, _: &Dataset, _: &[String], _: &TrainingContext) -> std::result::Result<ModelArtifact, LearnerError> {
            panic!("numerical blowup");
        }

        fn predict(&self, _: &ModelArtifact, _: &[Row]) -> std::result::Result<Vec<Vec<Estimate>>, LearnerError> {
            Ok(Vec::new())
        }
    }

    fn orchestrator(learner: Arc<dyn Learner>, max_concurrent: usize) -> TrainingOrchestrator {
        let db = Arc::new(MemoryDatabase::new());
        db.load_table(
            "test_data.home_rentals",
            Dataset::new(
                vec!["sqft".into(), "rental_price".into()],
                (0..20)
                    .map(|i| vec![Value::Int(500 + i * 50), Value::Int(1000 + i * 100)])
                    .collect(),
            ),
        )
        .unwrap();
        let sources = SourceResolver::new(Arc::new(MemoryDatasourceRegistry::new()), db);
        TrainingOrchestrator::new(
            Arc::new(MemoryCatalog::new()),
            sources,
            learner,
            OrchestratorConfig {
                max_concurrent_trainings: max_concurrent,
                default_training_timeout: None,
            },
            EventLogger::new("test"),
        )
    }

    fn request(name: &str) -> TrainingRequest {
        TrainingRequest {
            name: name.to_string(),
            predict_columns: vec!["rental_price".to_string()],
            data_source: DataSource::Query("select * from test_data.home_rentals".to_string()),
            options: TrainingOptions::default(),
        }
    }

    async fn wait_for_status(orch: &TrainingOrchestrator, name: &str, status: PredictorStatus) {
        for _ in 0..400 {
            if orch.status(name).await.ok() == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{} never reached {}", name, status);
    }

    #[tokio::test]
    async fn test_join_returns_after_complete() {
        let orch = orchestrator(Arc::new(BaselineLearner::default()), 4);
        orch.start(request("p")).await.unwrap().join().await.unwrap();

        let record = orch.catalog().get("p").await.unwrap().unwrap();
        assert_eq!(record.status, PredictorStatus::Complete);
        assert!(record.model.is_some());
        assert_eq!(record.generation, 1);
        assert!(!orch.is_training("p"));
    }

    #[tokio::test]
    async fn test_duplicate_and_in_progress() {
        let orch = orchestrator(Arc::new(SlowLearner), 4);
        let handle = orch.start(request("p")).await.unwrap();

        assert!(matches!(
            orch.start(request("p")).await,
            Err(PredictorError::TrainingInProgress(_))
        ));
        assert!(matches!(
            orch.retrain("p").await,
            Err(PredictorError::TrainingInProgress(_))
        ));

        orch.delete("p").await.unwrap();
        assert_eq!(handle.wait().await, JobState::Cancelled);

        let orch = orchestrator(Arc::new(BaselineLearner::default()), 4);
        orch.start(request("q")).await.unwrap().join().await.unwrap();
        assert!(matches!(
            orch.start(request("q")).await,
            Err(PredictorError::DuplicateName(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_run_one_job() {
        let orch = Arc::new(orchestrator(Arc::new(SlowLearner), 4));
        let mut req = request("cc");
        req.options.stop_training_in_x_seconds = Some(1);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orch = Arc::clone(&orch);
                let req = req.clone();
                tokio::spawn(async move {
                    let result = match orch.start(req).await {
                        Ok(handle) => handle.join().await,
                        Err(e) => Err(e),
                    };
                    assert!(orch.active_jobs() <= 1);
                    result
                })
            })
            .collect();

        let watcher = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move {
                for _ in 0..200 {
                    assert!(orch.active_jobs() <= 1);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
        };

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => succeeded += 1,
                Err(e) => assert!(
                    matches!(e.code(), "training_in_progress" | "duplicate_name"),
                    "unexpected error {}",
                    e.code()
                ),
            }
        }
        watcher.await.unwrap();

        assert_eq!(succeeded, 1);
        let record = orch.catalog().get("cc").await.unwrap().unwrap();
        assert_eq!(record.status, PredictorStatus::Complete);
        assert_eq!(record.generation, 1);
    }

    #[tokio::test]
    async fn test_lifecycle_locks_are_released() {
        let orch = orchestrator(Arc::new(BaselineLearner::default()), 4);
        for i in 0..16 {
            let name = format!("missing_{}", i);
            assert!(matches!(orch.delete(&name).await, Err(PredictorError::NotFound(_))));
            assert!(matches!(orch.retrain(&name).await, Err(PredictorError::NotFound(_))));
        }
        assert!(orch.locks.is_empty());

        orch.start(request("p")).await.unwrap().join().await.unwrap();
        orch.delete("p").await.unwrap();
        assert!(orch.locks.is_empty());
    }

    #[tokio::test]
    async fn test_delete_cancels_and_removes() {
        let orch = orchestrator(Arc::new(SlowLearner), 4);
        let handle = orch.start(request("p")).await.unwrap();
        wait_for_status(&orch, "p", PredictorStatus::Training).await;

        orch.delete("p").await.unwrap();
        assert!(!orch.is_training("p"));
        assert!(orch.catalog().get("p").await.unwrap().is_none());
        assert!(matches!(orch.status("p").await, Err(PredictorError::NotFound(_))));
        assert!(matches!(
            handle.join().await,
            Err(PredictorError::TrainingFailed { .. })
        ));
        assert!(matches!(orch.delete("p").await, Err(PredictorError::NotFound(_))));

        // name reuse after deletion
        let handle = orch.start(request("p")).await.unwrap();
        assert_ne!(handle.state(), JobState::Cancelled);
        orch.delete("p").await.unwrap();
    }

    #[tokio::test]
    async fn test_deadline_completes_with_best_effort_model() {
        let orch = orchestrator(Arc::new(SlowLearner), 4);
        let mut req = request("p");
        req.options.stop_training_in_x_seconds = Some(0);
        orch.start(req).await.unwrap().join().await.unwrap();

        let record = orch.catalog().get("p").await.unwrap().unwrap();
        assert_eq!(record.status, PredictorStatus::Complete);
        assert!(record.model.unwrap().early_stopped);
    }

    #[tokio::test]
    async fn test_learner_failures_become_error_status() {
        let orch = orchestrator(Arc::new(PanickingLearner), 4);
        let err = orch.start(request("p")).await.unwrap().join().await.unwrap_err();
        assert_eq!(err.code(), "training_failed");

        let record = orch.catalog().get("p").await.unwrap().unwrap();
        assert_eq!(record.status, PredictorStatus::Error);
        assert!(record.error_message.unwrap().contains("learner crashed"));

        // an errored name can be created again
        assert!(orch.start(request("p")).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_target_reports_learner_message() {
        let orch = orchestrator(Arc::new(BaselineLearner::default()), 4);
        let mut req = request("p");
        req.predict_columns = vec!["bogus".to_string()];
        let err = orch.start(req).await.unwrap().join().await.unwrap_err();
        assert!(err.to_string().contains("bogus"));
        assert_eq!(orch.status("p").await.unwrap(), PredictorStatus::Error);
    }

    #[tokio::test]
    async fn test_unavailable_source_is_error_status() {
        let orch = orchestrator(Arc::new(BaselineLearner::default()), 4);
        let mut req = request("p");
        req.data_source = DataSource::External("missing".to_string());
        assert!(orch.start(req).await.unwrap().join().await.is_err());

        let record = orch.catalog().get("p").await.unwrap().unwrap();
        assert!(record.error_message.unwrap().contains("source unavailable"));
    }

    #[tokio::test]
    async fn test_retrain_swaps_model_and_keeps_complete() {
        let orch = orchestrator(Arc::new(BaselineLearner::default()), 4);
        assert!(matches!(orch.retrain("p").await, Err(PredictorError::NotFound(_))));

        orch.start(request("p")).await.unwrap().join().await.unwrap();
        let first = orch.catalog().get("p").await.unwrap().unwrap();

        orch.retrain("p").await.unwrap().join().await.unwrap();
        let second = orch.catalog().get("p").await.unwrap().unwrap();
        assert_eq!(second.status, PredictorStatus::Complete);
        assert_eq!(second.generation, 2);
        assert!(second.version > first.version);
        assert_ne!(
            second.model.as_ref().unwrap().id,
            first.model.as_ref().unwrap().id
        );
    }

    #[tokio::test]
    async fn test_waiting_for_permit_stays_generating() {
        let orch = orchestrator(Arc::new(SlowLearner), 1);
        orch.start(request("a")).await.unwrap();
        wait_for_status(&orch, "a", PredictorStatus::Training).await;

        let waiting = orch.start(request("b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(orch.status("b").await.unwrap(), PredictorStatus::Generating);
        assert_eq!(waiting.state(), JobState::Pending);

        orch.delete("b").await.unwrap();
        orch.delete("a").await.unwrap();
        assert_eq!(orch.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_recover_marks_interrupted_records() {
        let orch = orchestrator(Arc::new(BaselineLearner::default()), 4);
        let stale = PredictorRecord::new(
            "stale",
            vec!["rental_price".to_string()],
            DataSource::External("x".to_string()),
            TrainingOptions::default(),
        );
        orch.catalog().put(stale).await.unwrap();

        assert_eq!(orch.recover().await.unwrap(), 1);
        let record = orch.catalog().get("stale").await.unwrap().unwrap();
        assert_eq!(record.status, PredictorStatus::Error);
        assert_eq!(record.error_message.as_deref(), Some("training interrupted"));
        assert_eq!(orch.recover().await.unwrap(), 0);
    }
}
