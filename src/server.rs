//! HTTP API: `POST /scan`, `POST /query`, `GET /health`.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

use crate::executor::IngestExecutor;
use crate::github::parse_repo_url;
use crate::model::{FileRef, StoredVulnerability};
use crate::traits::{ContentFetcher, RepositoryLister, VulnerabilityStore};

/// Executor over type-erased collaborators, as wired by the binary.
pub type DynExecutor = IngestExecutor<Arc<dyn ContentFetcher>, Arc<dyn VulnerabilityStore>>;

#[derive(Clone)]
pub struct AppState {
    executor: Arc<DynExecutor>,
    lister: Arc<dyn RepositoryLister>,
}

impl AppState {
    pub fn new(executor: DynExecutor, lister: Arc<dyn RepositoryLister>) -> Self {
        Self {
            executor: Arc::new(executor),
            lister,
        }
    }

    fn store(&self) -> &Arc<dyn VulnerabilityStore> {
        self.executor.pipeline().store()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/scan", post(scan_handler))
        .route("/query", post(query_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl From<JsonRejection> for AppError {
    fn from(_: JsonRejection) -> Self {
        Self::bad_request("Invalid JSON")
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub repository: String,
    pub file_count: usize,
    pub files: Vec<FileRef>,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

pub async fn scan_handler(
    State(state): State<AppState>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<Json<ScanResponse>, AppError> {
    let Json(request) = payload?;
    if request.repo_url.is_empty() || request.files.is_empty() {
        return Err(AppError::bad_request("Missing repo_url or files"));
    }

    let (owner, repo) = parse_repo_url(&request.repo_url)
        .map_err(|_| AppError::bad_request("Invalid GitHub repository URL"))?;
    info!(repo = %request.repo_url, files = ?request.files, "Scan requested");

    let files = state
        .lister
        .list_matching(&owner, &repo, &request.files)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    if let Err(e) = state.executor.ingest(files.clone()).await {
        error!(kind = e.kind(), error = %e, "Ingestion batch failed");
        return Err(AppError::internal("Failed to populate database"));
    }

    Ok(Json(ScanResponse {
        repository: format!("{}/{}", owner, repo),
        file_count: files.len(),
        files,
    }))
}

pub async fn query_handler(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<Vec<StoredVulnerability>>, AppError> {
    let Json(request) = payload?;
    let severity = request
        .filters
        .get("severity")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::bad_request("Missing severity filter"))?;

    let rows = state.store().find_by_severity(severity).await.map_err(|e| {
        error!(error = %e, "Severity query failed");
        AppError::internal("Database query failed")
    })?;

    Ok(Json(rows))
}

pub async fn health_handler(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state.store().ping().await.map_err(|e| {
        error!(error = %e, "Database liveness check failed");
        AppError::new(StatusCode::SERVICE_UNAVAILABLE, "Database unavailable")
    })?;
    Ok(Json(json!({ "status": "ok" })))
}
