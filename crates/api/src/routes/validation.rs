//! Route definitions for input validation.

use axum::routing::post;
use axum::Router;

use crate::handlers::validation;
use crate::state::AppState;

/// Routes mounted at `/validate`.
///
/// ```text
/// POST   /protein                 -> validate_protein_sequence
/// POST   /ligand                  -> validate_ligand_smiles
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/protein", post(validation::validate_protein_sequence))
        .route("/ligand", post(validation::validate_ligand_smiles))
}
