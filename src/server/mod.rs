//! HTTP control surface of the worker.
//!
//! | Route                                         | Result                         |
//! |-----------------------------------------------|--------------------------------|
//! | `GET /job/list`                               | job records                    |
//! | `GET /job/status/{id}`                        | one job record                 |
//! | `POST /job/run/{id}?database=..&workload=..`  | create and run; body = properties |
//! | `GET /job/download/{id}?key=..`               | raw artifact bytes             |
//!
//! Failures carry `{ "message": .., "code": .. }`.

mod error;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        rejection::{PathRejection, QueryRejection, StringRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::WorkerError;
use crate::properties::Properties;
use crate::scheduler::{JobRecord, JobRegistry};

pub use error::{ApiError, ErrorBody};

#[derive(Clone)]
pub struct ServerState {
    pub registry: Arc<JobRegistry>,
}

#[derive(Debug, Deserialize)]
struct RunParams {
    database: Option<String>,
    workload: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadParams {
    key: Option<String>,
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/job/list", get(list_jobs_handler))
        .route("/job/status/:id", get(job_status_handler))
        .route("/job/run/:id", post(run_job_handler))
        .route("/job/download/:id", get(download_handler))
        .route("/job/status/", get(missing_job_id_handler))
        .route("/job/run", post(missing_job_id_handler))
        .route("/job/run/", post(missing_job_id_handler))
        .route("/job/download/", get(missing_job_id_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the control surface on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    registry: Arc<JobRegistry>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(addr = %addr, "Starting job control server");

    let app = router(ServerState { registry });
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn list_jobs_handler(State(state): State<ServerState>) -> Json<Vec<JobRecord>> {
    Json(state.registry.list_jobs().await)
}

async fn job_status_handler(
    State(state): State<ServerState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<JobRecord>, ApiError> {
    let Path(id) = path?;
    let job = state.registry.get_job(&id).await?;
    Ok(Json(job.record().await))
}

async fn run_job_handler(
    State(state): State<ServerState>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<RunParams>, QueryRejection>,
    body: Result<String, StringRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = path?;
    let Query(params) = query?;
    let body = body?;
    let database = required(params.database, "database")?;
    let workload = required(params.workload, "workload")?;
    let configuration = Properties::parse(&body)
        .map_err(|e| WorkerError::InvalidRequest(format!("properties: {e}")))?;

    state
        .registry
        .submit_job(&id, configuration, &workload, &database)
        .await?;
    Ok(StatusCode::OK)
}

async fn download_handler(
    State(state): State<ServerState>,
    path: Result<Path<String>, PathRejection>,
    query: Result<Query<DownloadParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Path(id) = path?;
    let Query(params) = query?;
    let key = params
        .key
        .filter(|key| !key.is_empty())
        .ok_or_else(|| WorkerError::InvalidKey(String::new()))?;

    let artifact = state.registry.serve_artifact(&id, &key).await?;
    tracing::debug!(job_id = %id, key = %artifact.key, len = artifact.len, "Serving artifact");

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, artifact.len.to_string()),
        ],
        Body::from_stream(ReaderStream::new(artifact.file)),
    )
        .into_response())
}

async fn missing_job_id_handler() -> ApiError {
    WorkerError::InvalidJobId(String::new()).into()
}

fn required(value: Option<String>, name: &str) -> Result<String, WorkerError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| WorkerError::InvalidRequest(format!("query parameter '{name}' is required")))
}
