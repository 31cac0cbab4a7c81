use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::bulk::BulkIngestionPipeline;
use super::domain::{LeadSubmission, LenderId};
use super::jobs::{JobId, JobStore};
use super::repository::RepositoryError;
use super::service::{DistributionError, LeadDistributionService};

/// Shared state behind the distribution endpoints.
#[derive(Clone)]
pub struct DistributionRouterState {
    pub service: Arc<LeadDistributionService>,
    pub pipeline: Arc<BulkIngestionPipeline>,
    pub jobs: Arc<dyn JobStore>,
    pub spool_dir: PathBuf,
}

/// Router builder exposing HTTP endpoints for intake, bulk upload, and job
/// status reads.
pub fn distribution_router(state: DistributionRouterState) -> Router {
    Router::new()
        .route("/api/v1/leads", post(submit_handler))
        .route("/api/v1/leads/bulk", post(bulk_handler))
        .route("/api/v1/leads/bulk/:job_id", get(job_status_handler))
        .with_state(state)
}

pub(crate) async fn submit_handler(
    State(state): State<DistributionRouterState>,
    axum::Json(submission): axum::Json<LeadSubmission>,
) -> Response {
    match state.service.submit(submission) {
        Ok(lead) => (StatusCode::ACCEPTED, axum::Json(lead.intake_view())).into_response(),
        Err(DistributionError::ConsentRequired) => {
            let payload = json!({
                "error": DistributionError::ConsentRequired.to_string(),
            });
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response()
        }
        Err(DistributionError::Repository(RepositoryError::DuplicateIdentity)) => {
            let payload = json!({
                "error": RepositoryError::DuplicateIdentity.to_string(),
            });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        Err(other) => {
            let payload = json!({
                "error": other.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

/// Upload request: CSV content plus the lenders to dispatch to and the
/// originating partner source.
#[derive(Debug, Deserialize)]
pub(crate) struct BulkUploadRequest {
    pub(crate) csv: String,
    pub(crate) lenders: Vec<String>,
    pub(crate) source: String,
}

static SPOOL_SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub(crate) async fn bulk_handler(
    State(state): State<DistributionRouterState>,
    axum::Json(request): axum::Json<BulkUploadRequest>,
) -> Response {
    let mut lenders = Vec::with_capacity(request.lenders.len());
    for raw in &request.lenders {
        match LenderId::parse(raw) {
            Some(lender) => lenders.push(lender),
            None => {
                let payload = json!({
                    "error": format!("unknown lender '{raw}'"),
                });
                return (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response();
            }
        }
    }
    if lenders.is_empty() {
        let payload = json!({
            "error": "at least one lender is required",
        });
        return (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response();
    }

    let spool_id = SPOOL_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let path = state
        .spool_dir
        .join(format!("bulk-{}-{spool_id}.csv", std::process::id()));
    if let Err(err) = tokio::fs::write(&path, request.csv.as_bytes()).await {
        warn!(error = %err, "could not spool batch upload");
        let payload = json!({
            "error": "could not accept batch upload",
        });
        return (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response();
    }

    let job_id = state.pipeline.ingest(path, lenders, request.source);
    (StatusCode::ACCEPTED, axum::Json(json!({ "job_id": job_id }))).into_response()
}

pub(crate) async fn job_status_handler(
    State(state): State<DistributionRouterState>,
    Path(job_id): Path<String>,
) -> Response {
    let id = JobId(job_id);
    match state.jobs.fetch(&id) {
        Ok(Some(job)) => (StatusCode::OK, axum::Json(job.status_view())).into_response(),
        Ok(None) => {
            let payload = json!({
                "error": format!("job '{id}' not found"),
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(err) => {
            let payload = json!({
                "error": err.to_string(),
            });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}
