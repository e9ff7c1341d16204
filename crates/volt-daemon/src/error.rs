use thiserror::Error;

/// Result type for daemon startup and runtime.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Policy(#[from] volt_policy::PolicyError),

    #[error(transparent)]
    Storage(#[from] volt_storage::StorageError),
}
