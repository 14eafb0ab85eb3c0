//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                        -> list_jobs
/// POST   /                        -> submit_job
/// GET    /{id}                    -> get_job
/// DELETE /{id}                    -> delete_job
/// GET    /{id}/result             -> get_job_result
/// POST   /{id}/cancel             -> cancel_job
/// GET    /{id}/artifacts/{name}   -> get_artifact
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/{id}", get(jobs::get_job).delete(jobs::delete_job))
        .route("/{id}/result", get(jobs::get_job_result))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/artifacts/{name}", get(jobs::get_artifact))
}
