//! Error taxonomy for the table store.
//!
//! Errors with a documented recovery (`NotFound`, `Conflict`) are absorbed by
//! the component that can recover from them. Everything else reaches the
//! caller.

use std::io::{Error as IoError, ErrorKind};

/// Result alias used throughout the crate
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type for object store, codec and table operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Credentials missing or rejected by the remote service
    #[error("authentication failed: {0}")]
    Auth(String),

    /// No object at the given path
    #[error("object not found: {0}")]
    NotFound(String),

    /// Remote revision changed since it was last observed, or the
    /// destination of a move already exists
    #[error("revision conflict: {0}")]
    Conflict(String),

    /// Network failure, timeout or unexpected remote response
    #[error("transport error: {0}")]
    Transport(String),

    /// Table bytes could not be decoded
    #[error("malformed table data: {0}")]
    Parse(String),

    /// Record does not match a schema descriptor
    #[error("schema violation: {0}")]
    Schema(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// True for failures that may succeed if the whole operation is re-run.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transport(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<IoError> for StoreError {
    fn from(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(e.to_string()),
            ErrorKind::AlreadyExists => StoreError::Conflict(e.to_string()),
            ErrorKind::PermissionDenied => StoreError::Auth(e.to_string()),
            _ => StoreError::Transport(e.to_string()),
        }
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Parse(e.to_string())
    }
}

#[cfg(feature = "remote")]
impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Transport(e.to_string())
    }
}
