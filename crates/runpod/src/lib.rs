//! RunPod serverless REST client.
//!
//! Provides the HTTP API wrapper, provider status mapping, input document
//! preparation and output decoding for delegating prediction jobs to a
//! RunPod endpoint.

pub mod api;
pub mod input;
pub mod messages;
pub mod output;

pub use api::{RunPodApi, RunPodApiError};
pub use messages::{RemoteState, StatusResponse};
