//! Predictor server - SQL-addressable predictors over HTTP
//!
//! Accepts SQL statements against the predictor database, trains
//! predictors in the background and serves their result tables.

use anyhow::{Context, Result};
use predictor_lib::catalog::{CatalogStore, FileCatalog, MemoryCatalog};
use predictor_lib::{EventLogger, PredictorEngine};
use predictor_server::{api, config::ServerConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs unless LOG_FORMAT=pretty
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let pretty = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("pretty"));
    if pretty {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    }

    info!("Starting predictor-server");

    let config = ServerConfig::load()?;
    info!(
        database = %config.database,
        catalog_dir = ?config.catalog_dir,
        max_concurrent_trainings = config.max_concurrent_trainings,
        "Server configured"
    );

    let catalog: Arc<dyn CatalogStore> = match &config.catalog_dir {
        Some(dir) => Arc::new(
            FileCatalog::open(dir.clone())
                .await
                .with_context(|| format!("failed to open catalog at {}", dir.display()))?,
        ),
        None => Arc::new(MemoryCatalog::new()),
    };

    let engine = PredictorEngine::builder()
        .config(config.engine_config())
        .catalog(catalog)
        .events(EventLogger::new("predictor-server"))
        .build();
    engine
        .start()
        .await
        .context("failed to recover the predictor catalog")?;

    let state = Arc::new(api::AppState::new(engine.clone()));
    api::serve(&config.listen_addr(), state, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    engine.shutdown("SIGINT received").await;
    info!("Shutting down");

    Ok(())
}
