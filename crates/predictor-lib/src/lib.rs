//! SQL-addressable predictors
//!
//! This crate provides the core functionality for:
//! - Predictor catalog storage
//! - Asynchronous training with cooperative cancellation and deadlines
//! - Prediction serving through per-predictor result tables
//! - The command queue table
//! - Health checks and observability

pub mod catalog;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod health;
pub mod learner;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod prediction;
pub mod sql;
pub mod tables;

pub use engine::{EngineBuilder, EngineConfig, PredictorEngine, Session, DEFAULT_DATABASE};
pub use error::{CatalogError, LearnerError, PredictorError, Result, SourceError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{EventLogger, ServiceMetrics};
pub use tables::QueryOutput;
