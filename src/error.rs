//! Error types for the bulk engine
//!
//! This module defines the error hierarchy covering:
//! - Namespace errors (directory listing, attribute fetch)
//! - Activity errors (the pluggable per-target operation)
//! - Target store (SQLite ledger) errors
//! - Configuration and job lifecycle errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Transient failures are distinguishable from permanent ones, since the
//!   retry machinery keys off that split
//! - Preserve error chains for debugging

use thiserror::Error;

use crate::target::TargetState;

/// Top-level error type for the bulk engine
#[derive(Error, Debug)]
pub enum BulkError {
    /// Namespace errors (directory listing, attribute fetch)
    #[error("Namespace error: {0}")]
    Namespace(#[from] NamespaceError),

    /// Activity errors
    #[error("Activity error: {0}")]
    Activity(#[from] ActivityError),

    /// Target store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Job lifecycle errors
    #[error("Job error: {0}")]
    Job(#[from] JobError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Namespace errors raised by the directory lister and attribute fetcher
#[derive(Error, Debug, Clone)]
pub enum NamespaceError {
    /// Path does not exist (or vanished mid-walk)
    #[error("Path not found: '{path}'")]
    NotFound { path: String },

    /// Permission denied
    #[error("Permission denied: '{path}'")]
    PermissionDenied { path: String },

    /// Directory listing failed
    #[error("Failed to list directory '{path}': {reason}")]
    ListFailed { path: String, reason: String },

    /// Attribute fetch failed
    #[error("Failed to fetch attributes for '{path}': {reason}")]
    StatFailed { path: String, reason: String },

    /// Path names a non-directory where a directory was expected
    #[error("Not a directory: '{path}'")]
    NotADirectory { path: String },

    /// Operation timed out
    #[error("Operation timed out: '{path}'")]
    Timeout { path: String },

    /// Walk aborted by cancellation
    #[error("Operation interrupted by cancellation")]
    Interrupted,
}

impl NamespaceError {
    /// Check if this error is transient (a later attempt may succeed)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NamespaceError::Timeout { .. } | NamespaceError::ListFailed { .. }
        )
    }

    /// Check if this error is the cancellation marker
    pub fn is_interrupted(&self) -> bool {
        matches!(self, NamespaceError::Interrupted)
    }
}

/// Errors raised by an Activity invocation
#[derive(Error, Debug, Clone)]
pub enum ActivityError {
    /// Transient failure against the backing system; eligible for retry
    #[error("Transient activity failure: {message}")]
    Transient { message: String },

    /// Permanent failure; retrying will not help
    #[error("Permanent activity failure: {message}")]
    Permanent { message: String },

    /// The invocation was cancelled before or while running
    #[error("Activity invocation cancelled")]
    Cancelled,
}

impl ActivityError {
    /// Convenience constructor for transient failures
    pub fn transient(message: impl Into<String>) -> Self {
        ActivityError::Transient {
            message: message.into(),
        }
    }

    /// Convenience constructor for permanent failures
    pub fn permanent(message: impl Into<String>) -> Self {
        ActivityError::Permanent {
            message: message.into(),
        }
    }

    /// Check if a retry could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ActivityError::Transient { .. })
    }
}

/// Target store (ledger) errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// store() called for a target that already has an id
    #[error("Target already persisted with id {0}")]
    AlreadyStored(i64),

    /// No target with the given id
    #[error("No target with id {0}")]
    NotFound(i64),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid listing permit count
    #[error("Invalid listing permit count {count}: must be between 1 and {max}")]
    InvalidListingPermits { count: usize, max: usize },

    /// Invalid ready-batch size
    #[error("Invalid batch size {size}: must be between {min} and {max}")]
    InvalidBatchSize { size: usize, min: usize, max: usize },

    /// Activity declared a zero permit budget
    #[error("Activity '{name}' declared zero permits")]
    ZeroActivityPermits { name: String },

    /// No activity registered under the requested name
    #[error("Unknown activity '{name}'")]
    UnknownActivity { name: String },

    /// Request names no targets
    #[error("Request '{request}' names no targets")]
    EmptyRequest { request: String },

    /// Request prefix is not an absolute path
    #[error("Request prefix '{prefix}' is not absolute")]
    RelativePrefix { prefix: String },
}

/// Job lifecycle errors
#[derive(Error, Debug)]
pub enum JobError {
    /// run() called before initialize()
    #[error("Job was not initialized")]
    NotInitialized,

    /// Illegal target state transition
    #[error("Illegal target state transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: TargetState,
        to: TargetState,
    },

    /// A task panicked; the job stops and the fault surfaces
    #[error("Task panicked: {message}")]
    TaskPanicked { message: String },

    /// The internal event channel closed while tasks were outstanding
    #[error("Task event channel closed unexpectedly")]
    ChannelClosed,
}

/// Result type alias for BulkError
pub type Result<T> = std::result::Result<T, BulkError>;

/// Result type alias for NamespaceError
pub type NamespaceResult<T> = std::result::Result<T, NamespaceError>;

/// Result type alias for ActivityError
pub type ActivityResult<T> = std::result::Result<T, ActivityError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;
