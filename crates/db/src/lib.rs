//! Job persistence for the Atomera prediction service.
//!
//! [`models`] holds the job entity and its state machine; [`store::JobStore`]
//! is the storage seam, implemented by [`fs::FsJobStore`] for production and
//! [`memory::MemoryJobStore`] for tests.

pub mod fs;
pub mod memory;
pub mod models;
pub mod store;

pub use fs::FsJobStore;
pub use memory::MemoryJobStore;
pub use store::{JobStore, StoreError};
