//! Binding-affinity prediction request schema and validation.
//!
//! The HTTP layer deserializes a [`PredictionRequest`], normalizes it and
//! calls [`validate_request`] before anything reaches the job engine. Both
//! execution backends render the same Boltz input document from it via
//! [`PredictionRequest::to_input_yaml`].

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::CoreError;

/// Maximum protein sequence length accepted by the modeling backend.
pub const MAX_SEQUENCE_LEN: u64 = 10_000;

/// Maximum SMILES string length.
pub const MAX_SMILES_LEN: u64 = 1_000;

/// One-letter codes of the twenty standard amino acids.
const AMINO_ACIDS: &str = "ACDEFGHIKLMNPQRSTVWY";

static SMILES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9@+\-\[\]\(\)=#$%:\.\\/]+$").expect("valid regex")
});

static CHAIN_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{1,4}$").expect("valid regex"));

/// Protein input: an amino-acid sequence or a four-character PDB id.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProteinSequence {
    #[validate(
        length(min = 1, max = 10000),
        custom(function = "validate_sequence")
    )]
    pub sequence: String,
    #[serde(default = "default_protein_id")]
    #[validate(custom(function = "validate_chain_id"))]
    pub id: String,
}

/// Ligand input as a SMILES string.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LigandMolecule {
    #[validate(length(min = 1, max = 1000), custom(function = "validate_smiles"))]
    pub smiles: String,
    #[serde(default = "default_ligand_id")]
    #[validate(custom(function = "validate_chain_id"))]
    pub id: String,
}

/// A complete protein/ligand affinity prediction request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PredictionRequest {
    #[validate(nested)]
    pub protein: ProteinSequence,
    #[validate(nested)]
    pub ligand: LigandMolecule,
    /// Whether the MSA server should be queried for the protein.
    #[serde(default = "default_true")]
    pub use_msa: bool,
    #[serde(default = "default_confidence_threshold")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub confidence_threshold: Option<f64>,
}

fn default_protein_id() -> String {
    "A".to_string()
}

fn default_ligand_id() -> String {
    "B".to_string()
}

fn default_true() -> bool {
    true
}

fn default_confidence_threshold() -> Option<f64> {
    Some(0.5)
}

fn validate_sequence(sequence: &str) -> Result<(), ValidationError> {
    // Four alphanumeric characters are accepted as a PDB identifier.
    if sequence.len() == 4 && sequence.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Ok(());
    }

    let mut invalid: Vec<char> = sequence
        .chars()
        .filter(|c| !AMINO_ACIDS.contains(*c))
        .collect();
    if invalid.is_empty() {
        return Ok(());
    }
    invalid.sort_unstable();
    invalid.dedup();
    let listed: Vec<String> = invalid.iter().map(|c| c.to_string()).collect();
    Err(ValidationError::new("invalid_amino_acids").with_message(
        format!("Invalid amino acid characters found: {}", listed.join(", ")).into(),
    ))
}

fn validate_smiles(smiles: &str) -> Result<(), ValidationError> {
    if SMILES_RE.is_match(smiles) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_smiles")
            .with_message("SMILES may only contain alphanumerics and common chemical symbols".into()))
    }
}

fn validate_chain_id(id: &str) -> Result<(), ValidationError> {
    if CHAIN_ID_RE.is_match(id) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_chain_id")
            .with_message("Chain identifiers must be 1-4 alphanumeric characters".into()))
    }
}

impl ProteinSequence {
    pub fn normalized(mut self) -> Self {
        self.sequence = self.sequence.trim().to_uppercase();
        self
    }
}

impl LigandMolecule {
    pub fn normalized(mut self) -> Self {
        self.smiles = self.smiles.trim().to_string();
        self
    }
}

impl PredictionRequest {
    /// Uppercase and trim the sequence, trim the SMILES string.
    pub fn normalized(mut self) -> Self {
        self.protein = self.protein.normalized();
        self.ligand = self.ligand.normalized();
        self
    }

    /// Parse a request back out of a stored job input payload.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, CoreError> {
        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::Validation(format!("Malformed prediction request: {e}")))
    }

    /// Stem used for the input document file name. Boltz names its
    /// prediction directory and output files after it.
    pub fn input_name(job_id: &str) -> String {
        format!("{job_id}_input")
    }

    /// Render the Boltz input document for this request.
    pub fn to_input_yaml(&self) -> String {
        format!(
            "version: 1\n\
             sequences:\n  \
               - protein:\n      \
                   id: {protein_id}\n      \
                   sequence: '{sequence}'\n  \
               - ligand:\n      \
                   id: {ligand_id}\n      \
                   smiles: '{smiles}'\n\
             properties:\n  \
               - affinity:\n      \
                   binder: {ligand_id}\n",
            protein_id = self.protein.id,
            sequence = self.protein.sequence,
            ligand_id = self.ligand.id,
            smiles = self.ligand.smiles,
        )
    }
}

/// Normalize and validate a request, mapping failures to
/// [`CoreError::Validation`].
pub fn validate_request(request: PredictionRequest) -> Result<PredictionRequest, CoreError> {
    checked(request.normalized())
}

/// Normalize and validate a protein on its own.
pub fn validate_protein(protein: ProteinSequence) -> Result<ProteinSequence, CoreError> {
    checked(protein.normalized())
}

/// Normalize and validate a ligand on its own.
pub fn validate_ligand(ligand: LigandMolecule) -> Result<LigandMolecule, CoreError> {
    checked(ligand.normalized())
}

fn checked<T: Validate>(value: T) -> Result<T, CoreError> {
    value
        .validate()
        .map_err(|e| CoreError::Validation(e.to_string()))?;
    Ok(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
