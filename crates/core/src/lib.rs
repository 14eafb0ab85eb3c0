//! Shared domain building blocks for the Atomera job service.
//!
//! Pure logic with no storage or network access: identifiers, the common
//! error type, artifact transport encoding, request validation and the
//! subprocess runner used by the local backend.

pub mod codec;
pub mod error;
pub mod hashing;
pub mod process;
pub mod request;
pub mod types;
