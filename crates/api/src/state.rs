use std::sync::Arc;

use atomera_engine::JobOrchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: the orchestrator is a handle around an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Job engine: submission, status, results, cancellation.
    pub orchestrator: JobOrchestrator,
    pub config: Arc<ServerConfig>,
}
