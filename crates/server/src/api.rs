//! HTTP API: SQL statements, management routes, health checks and
//! Prometheus metrics

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use predictor_lib::{
    health::ComponentStatus, Dataset, DatasourceRecord, PredictorEngine, PredictorError,
    PredictorRecord, QueryOutput, SourceError, SourceKind, Value,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: PredictorEngine,
}

impl AppState {
    pub fn new(engine: PredictorEngine) -> Self {
        Self { engine }
    }
}

/// Error body: `{ "error": message, "code": code }`
#[derive(Debug)]
pub enum ApiError {
    Predictor(PredictorError),
    Source(SourceError),
    Internal(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Predictor(e) => match e {
                PredictorError::NotFound(_) => StatusCode::NOT_FOUND,
                PredictorError::DuplicateName(_) | PredictorError::TrainingInProgress(_) => {
                    StatusCode::CONFLICT
                }
                PredictorError::ModelNotReady { .. }
                | PredictorError::TrainingFailed { .. }
                | PredictorError::PredictionFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                PredictorError::InvalidStatement(_)
                | PredictorError::InvalidRequest(_)
                | PredictorError::UnknownCommand(_) => StatusCode::BAD_REQUEST,
                PredictorError::SourceUnavailable(_) => StatusCode::BAD_GATEWAY,
                PredictorError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Source(e) => match e {
                SourceError::DatasourceNotFound(_) | SourceError::TableNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                SourceError::DatasourceExists(_) => StatusCode::CONFLICT,
                SourceError::InvalidQuery(_) | SourceError::InvalidDataset(_) => {
                    StatusCode::BAD_REQUEST
                }
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Predictor(e) => e.code(),
            ApiError::Source(e) => match e {
                SourceError::DatasourceNotFound(_) | SourceError::TableNotFound(_) => "not_found",
                SourceError::DatasourceExists(_) => "already_exists",
                SourceError::InvalidQuery(_) => "invalid_statement",
                SourceError::InvalidDataset(_) => "invalid_request",
            },
            ApiError::Internal(_) => "internal",
        }
    }
}

impl From<PredictorError> for ApiError {
    fn from(e: PredictorError) -> Self {
        ApiError::Predictor(e)
    }
}

impl From<SourceError> for ApiError {
    fn from(e: SourceError) -> Self {
        ApiError::Source(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Predictor(e) => e.to_string(),
            ApiError::Source(e) => e.to_string(),
            ApiError::Internal(m) => m.clone(),
        };
        if status.is_server_error() {
            warn!(code = self.code(), error = %message, "Request failed");
        }
        let body = ErrorBody {
            error: message,
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
pub struct SqlRequest {
    pub query: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SqlResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub affected_rows: u64,
}

impl From<QueryOutput> for SqlResponse {
    fn from(output: QueryOutput) -> Self {
        match output {
            QueryOutput::Rows(data) => Self {
                columns: data.columns,
                rows: data.rows,
                affected_rows: 0,
            },
            QueryOutput::Affected(n) => Self {
                affected_rows: n,
                ..Default::default()
            },
        }
    }
}

async fn sql(State(state): State<Arc<AppState>>, Json(request): Json<SqlRequest>) -> ApiResult<SqlResponse> {
    let session = state.engine.session();
    let output = session.execute(&request.query).await?;
    Ok(Json(output.into()))
}

/// Predictor as listed by the management API; the model itself stays private
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictorSummary {
    pub name: String,
    pub status: String,
    pub predict: Vec<String>,
    pub data_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub generation: u64,
    pub training: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl PredictorSummary {
    fn new(record: PredictorRecord, training: bool) -> Self {
        Self {
            status: record.status.to_string(),
            data_source: record.data_source.to_string(),
            predict: record.predict_columns,
            error: record.error_message,
            generation: record.generation,
            training,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
            name: record.name,
        }
    }
}

async fn list_predictors(State(state): State<Arc<AppState>>) -> ApiResult<Vec<PredictorSummary>> {
    let orchestrator = state.engine.orchestrator();
    let records = state.engine.tables().predictors().list().await?;
    Ok(Json(
        records
            .into_iter()
            .map(|r| {
                let training = orchestrator.is_training(&r.name);
                PredictorSummary::new(r, training)
            })
            .collect(),
    ))
}

async fn get_predictor(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<PredictorSummary> {
    let record = state.engine.tables().predictors().get(&name).await?;
    let training = state.engine.orchestrator().is_training(&name);
    Ok(Json(PredictorSummary::new(record, training)))
}

async fn delete_predictor(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.tables().predictors().delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Retrain and wait for the new model
async fn retrain_predictor(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<PredictorSummary> {
    let handle = state.engine.orchestrator().retrain(&name).await?;
    handle.join().await?;
    let record = state.engine.tables().predictors().get(&name).await?;
    Ok(Json(PredictorSummary::new(record, false)))
}

#[derive(Debug, Deserialize)]
pub struct RegisterDatasourceRequest {
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub location: Option<String>,
    pub data: Dataset,
}

async fn list_datasources(State(state): State<Arc<AppState>>) -> ApiResult<Vec<DatasourceRecord>> {
    Ok(Json(state.engine.datasources().list().await?))
}

async fn register_datasource(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<RegisterDatasourceRequest>,
) -> Result<(StatusCode, Json<DatasourceRecord>), ApiError> {
    let record = state
        .engine
        .datasources()
        .register(&name, request.kind, request.location, request.data)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn unregister_datasource(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.datasources().unregister(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_tables(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.engine.database().table_names())
}

async fn load_table(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(data): Json<Dataset>,
) -> Result<StatusCode, ApiError> {
    let rows = data.len();
    state.engine.database().load_table(&name, data)?;
    info!(table = %name, rows, "Loaded table");
    Ok(StatusCode::CREATED)
}

async fn drop_table(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.database().drop_table(&name)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.engine.health().health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.engine.health().readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ApiError::Internal(format!("failed to encode metrics: {}", e)))?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    ))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/sql", post(sql))
        .route("/api/v1/predictors", get(list_predictors))
        .route(
            "/api/v1/predictors/:name",
            get(get_predictor).delete(delete_predictor),
        )
        .route("/api/v1/predictors/:name/retrain", post(retrain_predictor))
        .route("/api/v1/datasources", get(list_datasources))
        .route(
            "/api/v1/datasources/:name",
            post(register_datasource).delete(unregister_datasource),
        )
        .route("/api/v1/tables", get(list_tables))
        .route("/api/v1/tables/:name", post(load_table).delete(drop_table))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server; returns once `shutdown` resolves
pub async fn serve(
    addr: &str,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
