pub mod jobs;
pub mod validation;
