use thiserror::Error;

use crate::params::ValidationError;

/// Reasons a run never got going (or could not be joined).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("a run is already in progress")]
    AlreadyRunning,
    #[error("canary parameters are not configured")]
    MissingCanary,
    #[error("canary parameters are invalid: {0}")]
    InvalidCanary(#[from] ValidationError),
    #[error("concurrency must be between 1 and {max} (got {requested})")]
    InvalidConcurrency { requested: usize, max: usize },
    #[error("run task aborted: {0}")]
    Aborted(String),
}
