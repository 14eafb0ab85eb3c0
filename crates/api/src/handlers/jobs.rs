//! Handlers for the `/jobs` resource.
//!
//! Request bodies are validated here, before a job exists. Everything else
//! is delegated to the [`atomera_engine::JobOrchestrator`] in the app state.

use atomera_core::request::{validate_request, PredictionRequest};
use atomera_core::types::JobId;
use atomera_db::models::job::JobListQuery;
use atomera_db::models::status::JobStatus;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of a successful submission.
#[derive(Debug, Serialize)]
pub struct SubmittedJob {
    pub job_id: JobId,
    pub status: JobStatus,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Validate a prediction request and queue it. Returns 202 with the new
/// job id; the job starts in `pending`.
pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(body) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let request = validate_request(PredictionRequest::from_value(&body)?)?;
    let input = serde_json::to_value(&request)
        .map_err(|e| AppError::InternalError(format!("Failed to serialize request: {e}")))?;

    let job_id = state.orchestrator.submit(input).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmittedJob {
                job_id,
                status: JobStatus::Pending,
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Most recently updated first. Supports optional `status` and `limit`.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state.orchestrator.list(&params).await?;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Get / result
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.orchestrator.get_status(job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs/{id}/result
///
/// 409 while the job is not completed, 422 with the stored error message
/// once it has failed.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let result = state.orchestrator.get_result(job_id).await?;
    Ok(Json(DataResponse { data: result }))
}

// ---------------------------------------------------------------------------
// Cancel / delete
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Returns 204 on success, 409 if the job is already in a terminal state.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<StatusCode> {
    state.orchestrator.cancel(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/jobs/{id}
///
/// Removes the job and its artifacts, stopping it first if it is active.
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<StatusCode> {
    state.orchestrator.delete(job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/artifacts/{name}
///
/// Raw bytes of one artifact from a completed job's manifest.
pub async fn get_artifact(
    State(state): State<AppState>,
    Path((job_id, name)): Path<(JobId, String)>,
) -> AppResult<impl IntoResponse> {
    let bytes = state.orchestrator.get_artifact(job_id, &name).await?;
    let headers = [
        (CONTENT_TYPE, content_type_for(&name).to_string()),
        (CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\"")),
    ];
    Ok((headers, bytes))
}

fn content_type_for(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()).as_deref() {
        Some("cif") => "chemical/x-cif",
        Some("pdb") => "chemical/x-pdb",
        Some("json") => "application/json",
        Some("yaml") | Some("yml") => "application/yaml",
        Some("txt") | Some("log") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
