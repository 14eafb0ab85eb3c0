/// Job identifiers are time-ordered UUIDs (v7) and are never reused.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Allocate a fresh job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::now_v7()
}
