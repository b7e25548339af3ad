// src/error.rs

//! Defines the primary error type for the entire application.
//!
//! Mirrors the failure-category taxonomy from the error handling design:
//! transient failures are retried by the caller, conflicts are retried
//! silently, invariant violations are refused and logged as events,
//! configuration errors are fatal at startup (and roll back on reload),
//! and programming errors are logged with a `BUG:` prefix and exit code 12.

use thiserror::Error;

/// The main error enum, representing all possible failures within the
/// monitor and keeper processes.
#[derive(Error, Debug)]
pub enum PgAutoFailoverError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("BUG: {0}")]
    Internal(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("formation not found: {0}")]
    FormationNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

impl PgAutoFailoverError {
    /// Maps this error to the process exit code defined for the CLI surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            PgAutoFailoverError::Configuration(_) => 2,
            PgAutoFailoverError::InvariantViolation(_) => 3,
            PgAutoFailoverError::NodeNotFound(_) | PgAutoFailoverError::FormationNotFound(_) => 3,
            PgAutoFailoverError::Rpc(_) | PgAutoFailoverError::Transient(_) => 6,
            PgAutoFailoverError::Conflict(_) => 6,
            PgAutoFailoverError::Io(_) | PgAutoFailoverError::Serialization(_) => 8,
            PgAutoFailoverError::Internal(_) => 12,
        }
    }

    /// True if the caller should retry this call rather than surface it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PgAutoFailoverError::Transient(_) | PgAutoFailoverError::Conflict(_)
        )
    }
}

impl From<serde_json::Error> for PgAutoFailoverError {
    fn from(e: serde_json::Error) -> Self {
        PgAutoFailoverError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PgAutoFailoverError>;
