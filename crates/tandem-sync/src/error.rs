use thiserror::Error;

/// Failures surfaced by tree operations. None of them are fatal; callers turn
/// them into an inline error and stay interactive.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid email or password")]
    Authentication,

    #[error("Store unavailable: {0}")]
    Network(#[from] anyhow::Error),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),
}
