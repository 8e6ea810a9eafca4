//! Error types surfaced by the predictor tables
//!
//! `PredictorError` is what every table operation returns; the front end
//! renders it as a protocol-level error using `code()` and its message.

use crate::models::PredictorStatus;
use thiserror::Error;

/// Failures of the catalog store
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("catalog entry '{name}' is corrupted: {reason}")]
    Corrupted { name: String, reason: String },

    #[error("stale write to '{name}': stored version {stored}, attempted {attempted}")]
    StaleWrite {
        name: String,
        stored: u64,
        attempted: u64,
    },
}

/// Failures resolving datasources or running sub-queries
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("datasource '{0}' not found")]
    DatasourceNotFound(String),

    #[error("datasource '{0}' already exists")]
    DatasourceExists(String),

    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid dataset: {0}")]
    InvalidDataset(String),
}

/// Failures inside the learning capability
#[derive(Debug, Error)]
pub enum LearnerError {
    #[error("training dataset is empty")]
    EmptyDataset,

    #[error("target column '{0}' is not present in the training data")]
    MissingTarget(String),

    #[error("target column '{0}' has no values to learn from")]
    EmptyTarget(String),

    #[error("model was produced by learner '{found}', expected '{expected}'")]
    IncompatibleModel { expected: String, found: String },

    #[error("invalid model payload: {0}")]
    InvalidModel(#[from] serde_json::Error),

    #[error("training cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

/// Errors returned by table operations
#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("predictor '{0}' already exists")]
    DuplicateName(String),

    #[error("predictor '{0}' not found")]
    NotFound(String),

    #[error("predictor '{0}' is already training")]
    TrainingInProgress(String),

    #[error("{}", model_not_ready_message(.name, .status, .message.as_deref()))]
    ModelNotReady {
        name: String,
        status: PredictorStatus,
        message: Option<String>,
    },

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("unknown command: '{0}'")]
    UnknownCommand(String),

    #[error("training of predictor '{name}' failed: {message}")]
    TrainingFailed { name: String, message: String },

    #[error("prediction with predictor '{name}' failed: {message}")]
    PredictionFailed { name: String, message: String },

    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

fn model_not_ready_message(name: &str, status: &PredictorStatus, message: Option<&str>) -> String {
    match message {
        Some(m) => format!("predictor '{}' is not ready (status: {}): {}", name, status, m),
        None => format!("predictor '{}' is not ready (status: {})", name, status),
    }
}

impl From<SourceError> for PredictorError {
    fn from(e: SourceError) -> Self {
        PredictorError::SourceUnavailable(e.to_string())
    }
}

impl PredictorError {
    /// Stable machine-readable code for the front end
    pub fn code(&self) -> &'static str {
        match self {
            PredictorError::DuplicateName(_) => "duplicate_name",
            PredictorError::NotFound(_) => "not_found",
            PredictorError::TrainingInProgress(_) => "training_in_progress",
            PredictorError::ModelNotReady { .. } => "model_not_ready",
            PredictorError::SourceUnavailable(_) => "source_unavailable",
            PredictorError::UnknownCommand(_) => "unknown_command",
            PredictorError::TrainingFailed { .. } => "training_failed",
            PredictorError::PredictionFailed { .. } => "prediction_failed",
            PredictorError::InvalidStatement(_) => "invalid_statement",
            PredictorError::InvalidRequest(_) => "invalid_request",
            PredictorError::Catalog(_) => "catalog_error",
        }
    }
}

pub type Result<T, E = PredictorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_not_ready_carries_stored_message() {
        let err = PredictorError::ModelNotReady {
            name: "p".to_string(),
            status: PredictorStatus::Error,
            message: Some("target column 'x' is not present".to_string()),
        };
        let text = err.to_string();
        assert!(text.contains("status: error"));
        assert!(text.contains("target column 'x'"));
        assert_eq!(err.code(), "model_not_ready");
    }

    #[test]
    fn test_source_errors_become_source_unavailable() {
        let err: PredictorError = SourceError::DatasourceNotFound("ds".to_string()).into();
        assert_eq!(err.code(), "source_unavailable");
        assert!(err.to_string().contains("'ds'"));
    }
}
