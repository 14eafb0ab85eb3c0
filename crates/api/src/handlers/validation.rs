//! Handlers that check prediction inputs without queueing a job.

use atomera_core::request::{validate_ligand, validate_protein, LigandMolecule, ProteinSequence};
use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;

#[derive(Debug, Serialize)]
pub struct ValidProtein {
    pub valid: bool,
    pub sequence: String,
    pub length: usize,
}

#[derive(Debug, Serialize)]
pub struct ValidLigand {
    pub valid: bool,
    pub smiles: String,
}

/// POST /api/v1/validate/protein
///
/// Returns the normalized sequence and its length. Invalid sequences are
/// rejected with `VALIDATION_ERROR`.
pub async fn validate_protein_sequence(
    payload: Result<Json<ProteinSequence>, JsonRejection>,
) -> AppResult<Json<DataResponse<ValidProtein>>> {
    let Json(protein) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let protein = validate_protein(protein)?;

    Ok(Json(DataResponse {
        data: ValidProtein {
            valid: true,
            length: protein.sequence.chars().count(),
            sequence: protein.sequence,
        },
    }))
}

/// POST /api/v1/validate/ligand
pub async fn validate_ligand_smiles(
    payload: Result<Json<LigandMolecule>, JsonRejection>,
) -> AppResult<Json<DataResponse<ValidLigand>>> {
    let Json(ligand) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let ligand = validate_ligand(ligand)?;

    Ok(Json(DataResponse {
        data: ValidLigand {
            valid: true,
            smiles: ligand.smiles,
        },
    }))
}
