//! Error types for medialease.

use thiserror::Error;

/// Main error type for media resource operations.
#[derive(Error, Debug)]
pub enum MediaError {
    /// Acquire attempted on zero-length content. The content is not ready yet.
    #[error("Empty source: {name} has no bytes")]
    EmptySource { name: String },

    /// The platform refused to create a handle.
    #[error("Handle creation failed for {name}: {reason}")]
    HandleCreationFailed { name: String, reason: String },

    /// The platform reports the handle is no longer usable.
    #[error("Stale handle: {handle}")]
    StaleHandleAccess { handle: String },

    /// No entry exists for this handle.
    #[error("Unknown handle: {handle}")]
    UnknownHandle { handle: String },

    /// Writing a staged export copy failed. Any partial file has been removed.
    #[error("Export staging failed for {key}: {source}")]
    ExportStagingFailed {
        key: String,
        source: std::io::Error,
    },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Operation '{purpose}' timed out after {after_ms} ms")]
    OperationTimedOut { purpose: String, after_ms: u64 },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MediaError {
    /// Whether the caller should treat this as "content not ready" rather than a failure.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::EmptySource { .. })
    }

    /// Whether the caller should re-request a fresh handle for the same source.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleHandleAccess { .. })
    }
}

impl From<serde_json::Error> for MediaError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias for media resource operations.
pub type Result<T> = std::result::Result<T, MediaError>;
