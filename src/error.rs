//! Error types for poolvisor.

use thiserror::Error;

/// Main error type for poolvisor.
///
/// Every variant is fatal to the supervisor. Per-job problems that the
/// dispatch loop recovers from are reported as [`crate::job::JobRejection`].
#[derive(Error, Debug)]
pub enum PoolvisorError {
    #[error("Invalid worker configuration: {0}")]
    Config(String),

    #[error("Failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Failed to read job input: {0}")]
    Input(#[source] std::io::Error),

    #[error("Worker error: {0}")]
    Worker(String),
}

impl PoolvisorError {
    /// Process exit code for this error.
    ///
    /// Configuration problems exit with 2 so callers can tell them apart
    /// from runtime failures, which exit with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            _ => 1,
        }
    }
}

/// Result type alias for poolvisor operations.
pub type Result<T> = std::result::Result<T, PoolvisorError>;
