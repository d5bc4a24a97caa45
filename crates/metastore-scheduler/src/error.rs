//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A queued job has no plan in the store.
    #[error("compaction job plan not found: {0}")]
    PlanNotFound(String),

    #[error("state store error: {0}")]
    State(#[from] metastore_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
