//! Server configuration

use anyhow::{Context, Result};
use predictor_lib::learner::BaselineConfig;
use predictor_lib::orchestrator::OrchestratorConfig;
use predictor_lib::prediction::PredictionConfig;
use predictor_lib::EngineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read when `PREDICTOR_CONFIG` is unset
pub const DEFAULT_CONFIG_FILE: &str = "predictor.toml";

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// API server port for SQL, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Database the virtual tables live in
    #[serde(default = "default_database")]
    pub database: String,

    /// Directory of the file catalog; unset keeps predictors in memory
    #[serde(default)]
    pub catalog_dir: Option<PathBuf>,

    #[serde(default = "default_max_concurrent_trainings")]
    pub max_concurrent_trainings: usize,

    /// Training deadline for requests that don't set one
    #[serde(default)]
    pub default_training_timeout_secs: Option<u64>,

    #[serde(default = "default_prediction_chunk_size")]
    pub prediction_chunk_size: usize,

    #[serde(default = "default_max_training_epochs")]
    pub max_training_epochs: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_database() -> String {
    predictor_lib::DEFAULT_DATABASE.to_string()
}

fn default_max_concurrent_trainings() -> usize {
    4
}

fn default_prediction_chunk_size() -> usize {
    256
}

fn default_max_training_epochs() -> usize {
    300
}

impl ServerConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("PREDICTOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    /// The file is optional; `PREDICTOR_*` variables override it
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("PREDICTOR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;

        config
            .try_deserialize()
            .context("invalid server configuration")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.api_port)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            database: self.database.clone(),
            orchestrator: OrchestratorConfig {
                max_concurrent_trainings: self.max_concurrent_trainings,
                default_training_timeout: self
                    .default_training_timeout_secs
                    .map(Duration::from_secs),
            },
            prediction: PredictionConfig {
                chunk_size: self.prediction_chunk_size,
            },
            baseline: BaselineConfig {
                max_epochs: self.max_training_epochs,
                ..BaselineConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load_from(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.database, "mindsdb");
        assert!(config.catalog_dir.is_none());
        assert_eq!(config.listen_addr(), "0.0.0.0:8080");

        let engine = config.engine_config();
        assert_eq!(engine.orchestrator.max_concurrent_trainings, 4);
        assert!(engine.orchestrator.default_training_timeout.is_none());
        assert_eq!(engine.baseline.max_epochs, 300);
    }

    #[test]
    fn test_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictor.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "api_port = 9000\ndatabase = \"models\"\ncatalog_dir = \"/var/lib/predictors\"\n\
             default_training_timeout_secs = 30\nprediction_chunk_size = 64"
        )
        .unwrap();

        let config = ServerConfig::load_from(&path).unwrap();
        assert_eq!(config.api_port, 9000);
        assert_eq!(config.database, "models");
        assert_eq!(config.catalog_dir, Some(PathBuf::from("/var/lib/predictors")));

        let engine = config.engine_config();
        assert_eq!(
            engine.orchestrator.default_training_timeout,
            Some(Duration::from_secs(30))
        );
        assert_eq!(engine.prediction.chunk_size, 64);
    }
}
