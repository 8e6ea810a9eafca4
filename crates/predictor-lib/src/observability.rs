//! Observability infrastructure for the predictor service
//!
//! Provides:
//! - Prometheus metrics (training duration, prediction latency, outcomes, errors)
//! - Structured lifecycle events with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Prediction latency buckets (seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Training duration buckets (seconds)
const TRAINING_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ServiceMetricsInner> = OnceLock::new();

/// Prometheus collectors behind every [`ServiceMetrics`] handle
struct ServiceMetricsInner {
    training_duration_seconds: Histogram,
    prediction_latency_seconds: Histogram,
    trainings_total: IntCounterVec,
    active_trainings: IntGauge,
    prediction_rows_total: IntCounter,
    predictors: IntGauge,
    statement_errors_total: IntCounterVec,
}

impl ServiceMetricsInner {
    fn new() -> Self {
        Self {
            training_duration_seconds: register_histogram!(
                "predictor_training_duration_seconds",
                "Wall time of training jobs, from data load to model write",
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register training_duration_seconds"),

            prediction_latency_seconds: register_histogram!(
                "predictor_prediction_latency_seconds",
                "Time spent serving one prediction query",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            trainings_total: register_int_counter_vec!(
                "predictor_trainings_total",
                "Finished training jobs by outcome",
                &["outcome"]
            )
            .expect("Failed to register trainings_total"),

            active_trainings: register_int_gauge!(
                "predictor_active_trainings",
                "Training jobs currently holding a permit"
            )
            .expect("Failed to register active_trainings"),

            prediction_rows_total: register_int_counter!(
                "predictor_prediction_rows_total",
                "Prediction rows produced"
            )
            .expect("Failed to register prediction_rows_total"),

            predictors: register_int_gauge!(
                "predictor_catalog_predictors",
                "Predictors currently in the catalog"
            )
            .expect("Failed to register predictors"),

            statement_errors_total: register_int_counter_vec!(
                "predictor_statement_errors_total",
                "Failed statements by error code",
                &["code"]
            )
            .expect("Failed to register statement_errors_total"),
        }
    }
}

/// Handle to the process-wide metrics; clones share the same registry
#[derive(Clone)]
pub struct ServiceMetrics {
    _private: (),
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    /// Create a metrics handle, registering the collectors on first use
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ServiceMetricsInner {
        GLOBAL_METRICS.get_or_init(ServiceMetricsInner::new)
    }

    /// Record a finished training job and its outcome
    pub fn observe_training(&self, duration_secs: f64, outcome: &str) {
        self.inner().training_duration_seconds.observe(duration_secs);
        self.inner()
            .trainings_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record one served prediction query
    pub fn observe_prediction(&self, duration_secs: f64, rows: usize) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
        self.inner().prediction_rows_total.inc_by(rows as u64);
    }

    /// A job acquired a training permit
    pub fn training_started(&self) {
        self.inner().active_trainings.inc();
    }

    /// A job released its training permit
    pub fn training_stopped(&self) {
        self.inner().active_trainings.dec();
    }

    /// Update the catalog size gauge
    pub fn set_predictors(&self, count: usize) {
        self.inner().predictors.set(count as i64);
    }

    /// Increment failed statements for an error code
    pub fn inc_statement_error(&self, code: &str) {
        self.inner()
            .statement_errors_total
            .with_label_values(&[code])
            .inc();
    }
}

/// Structured logger for predictor lifecycle events
///
/// Every event carries an `event` field so log pipelines can filter on it.
#[derive(Clone)]
pub struct EventLogger {
    service: String,
}

impl Default for EventLogger {
    fn default() -> Self {
        Self::new("predictor-server")
    }
}

impl EventLogger {
    /// Create a logger tagging events with `service`
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Log service startup
    pub fn log_startup(&self, version: &str, database: &str, predictors: usize) {
        info!(
            event = "service_started",
            service = %self.service,
            version = %version,
            database = %database,
            predictors = predictors,
            "Predictor service started"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service,
            reason = %reason,
            "Predictor service shutting down"
        );
    }

    /// Log a predictor creation request
    pub fn log_predictor_created(&self, name: &str, source: &str, targets: &[String], join: bool) {
        info!(
            event = "predictor_created",
            service = %self.service,
            predictor = %name,
            source = %source,
            targets = ?targets,
            join = join,
            "Predictor created"
        );
    }

    /// Log a job starting to train
    pub fn log_training_started(&self, name: &str, job_id: &str, mode: &str) {
        info!(
            event = "training_started",
            service = %self.service,
            predictor = %name,
            job_id = %job_id,
            mode = %mode,
            "Training started"
        );
    }

    /// Log a job that produced a model
    pub fn log_training_finished(
        &self,
        name: &str,
        job_id: &str,
        duration_secs: f64,
        epochs: usize,
        early_stopped: bool,
    ) {
        info!(
            event = "training_finished",
            service = %self.service,
            predictor = %name,
            job_id = %job_id,
            duration_secs = duration_secs,
            epochs = epochs,
            early_stopped = early_stopped,
            "Training finished"
        );
    }

    /// Log a job that ended in error
    pub fn log_training_failed(&self, name: &str, job_id: &str, message: &str) {
        warn!(
            event = "training_failed",
            service = %self.service,
            predictor = %name,
            job_id = %job_id,
            error = %message,
            "Training failed"
        );
    }

    /// Log a predictor deletion
    pub fn log_predictor_deleted(&self, name: &str, cancelled_job: bool) {
        info!(
            event = "predictor_deleted",
            service = %self.service,
            predictor = %name,
            cancelled_job = cancelled_job,
            "Predictor deleted"
        );
    }

    /// Log a command from the commands table
    pub fn log_command_executed(&self, command: &str, success: bool) {
        if success {
            info!(
                event = "command_executed",
                service = %self.service,
                command = %command,
                "Command executed"
            );
        } else {
            warn!(
                event = "command_failed",
                service = %self.service,
                command = %command,
                "Command failed"
            );
        }
    }

    /// Log a record marked failed at startup
    pub fn log_recovered(&self, name: &str, previous_status: &str) {
        warn!(
            event = "training_interrupted",
            service = %self.service,
            predictor = %name,
            previous_status = %previous_status,
            "Marked interrupted training as failed"
        );
    }
}
