//! Job execution engine: backend selection, local and remote execution,
//! result assembly and the [`orchestrator::JobOrchestrator`] that drives
//! every job through its lifecycle.

pub mod assembler;
pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod local;
pub mod orchestrator;
pub mod remote;

pub use config::EngineConfig;
pub use error::EngineError;
pub use events::JobEvent;
pub use orchestrator::JobOrchestrator;
