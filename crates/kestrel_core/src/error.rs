use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Low-level I/O error.
    /// Maps to **HTTP 500 Internal Server Error**.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested output was not found.
    /// Maps to **HTTP 404 Not Found**.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The user request was invalid (e.g., bad file name).
    /// Maps to **HTTP 400 Bad Request**.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Generic system or backend-specific failure.
    /// Maps to **HTTP 500 Internal Server Error**.
    #[error("Storage system failure: {0}")]
    System(String),
}

/// Everything that can end a job, from validation up to normalizing its output.
///
/// Carries messages rather than sources so it can be cloned into a [`JobOutcome`](crate::job::JobOutcome).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    /// Missing or invalid request fields. Never reaches the provider.
    /// Maps to **HTTP 400 Bad Request**.
    #[error("{0}")]
    Validation(String),

    /// Missing credential or other setup problem, raised before submission.
    /// Maps to **HTTP 500 Internal Server Error**.
    #[error("{0}")]
    Configuration(String),

    /// The provider answered with a non-2xx status or a body we could not read.
    /// Maps to **HTTP 500 Internal Server Error**.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The request never got an answer (connect, reset, socket timeout).
    /// The only error a [`RetryPolicy`](crate::poller::RetryPolicy) retries.
    #[error("Network error: {0}")]
    Network(String),

    /// The provider does not know the job.
    /// Maps to **HTTP 404 Not Found**.
    #[error("Job {0} not found")]
    NotFound(String),

    /// The attempt ceiling was reached before the job finished.
    #[error("timeout")]
    Timeout,

    /// The job succeeded but its output had no recognizable shape.
    #[error("unexpected output format")]
    UnexpectedOutput,

    /// Draining or persisting the output failed.
    #[error("IO error: {0}")]
    Io(String),

    /// The provider reported the job as failed.
    #[error("{0}")]
    Failed(String),

    /// No adapter is registered for the capability.
    /// Maps to **HTTP 404 Not Found**.
    #[error("Capability not supported: {0}")]
    Unsupported(String),
}

impl JobError {
    /// Transport failures are the only errors worth retrying; the provider never saw them.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Network(_))
    }
}

impl From<StorageError> for JobError {
    fn from(err: StorageError) -> Self {
        JobError::Io(err.to_string())
    }
}
