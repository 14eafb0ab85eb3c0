pub mod health;
pub mod jobs;
pub mod validation;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /jobs                              submit, list
/// /jobs/{id}                         status, delete
/// /jobs/{id}/result                  result of a completed job
/// /jobs/{id}/cancel                  cancel (POST)
/// /jobs/{id}/artifacts/{name}        artifact download
/// /validate/protein                  check a protein sequence (POST)
/// /validate/ligand                   check a SMILES string (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/validate", validation::router())
}
