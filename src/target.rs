//! Targets: the persisted record of one path's progress
//!
//! A target is created for every path a request touches: the synthetic root,
//! each initially named path, and every file or directory discovered during
//! expansion. The ledger row is the durable record; the in-memory value is
//! owned by at most one task at a time.
//!
//! State machine:
//!
//! ```text
//! CREATED -> READY -> RUNNING -> { COMPLETED | FAILED | SKIPPED | CANCELLED }
//!               ^                      |
//!               +----- retry reset ----+
//! ```
//!
//! All four outcomes are terminal. The only backward edge is the explicit
//! reset-for-retry from FAILED back to READY, which preserves identity.

use crate::error::{ActivityError, JobError, NamespaceError};
use crate::namespace::{path_depth, FileType, FsAttributes};
use crate::request::BulkRequest;

/// Execution state of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TargetState {
    /// Persisted, not yet scheduled
    Created = 0,
    /// Scheduled (or reset after a retryable failure)
    Ready = 1,
    /// Activity invocation in flight
    Running = 2,
    /// Activity succeeded
    Completed = 3,
    /// Activity or expansion failed
    Failed = 4,
    /// No activity applies (directory under a file-only filter)
    Skipped = 5,
    /// Cancelled before reaching another terminal state
    Cancelled = 6,
}

impl TargetState {
    /// Convert from the ledger integer representation
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => TargetState::Created,
            1 => TargetState::Ready,
            2 => TargetState::Running,
            3 => TargetState::Completed,
            4 => TargetState::Failed,
            5 => TargetState::Skipped,
            _ => TargetState::Cancelled,
        }
    }

    /// Get the ledger integer representation
    pub fn as_db_int(&self) -> i64 {
        *self as i64
    }

    /// Check whether this state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TargetState::Completed
                | TargetState::Failed
                | TargetState::Skipped
                | TargetState::Cancelled
        )
    }

    /// Check whether the state machine admits `next` from this state
    ///
    /// Cancellation is admitted from any non-terminal state. The FAILED ->
    /// READY edge is not admitted here; it only exists through
    /// [`Target::reset_for_retry`].
    pub fn can_transition(&self, next: TargetState) -> bool {
        use TargetState::*;
        match (*self, next) {
            (Created, Ready) | (Created, Skipped) | (Created, Cancelled) => true,
            (Ready, Running) | (Ready, Skipped) | (Ready, Cancelled) => true,
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
            // Created targets may fail before being scheduled (expansion faults)
            (Created, Failed) | (Ready, Failed) => true,
            _ => false,
        }
    }
}

/// Provenance of a target within its request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Pid {
    /// Synthetic top-level marker carrying the job's own outcome
    Root = 0,
    /// Named directly in the request
    Initial = 1,
    /// Found during expansion
    Discovered = 2,
}

impl Pid {
    /// Convert from the ledger integer representation
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Pid::Root,
            1 => Pid::Initial,
            _ => Pid::Discovered,
        }
    }

    /// Get the ledger integer representation
    pub fn as_db_int(&self) -> i64 {
        *self as i64
    }
}

/// Error recorded on a failed target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetError {
    /// Error kind, stable across retries ("transient", "permanent", "defect")
    pub kind: String,

    /// Human-readable message
    pub message: String,
}

impl TargetError {
    /// Record an activity failure
    pub fn from_activity(err: &ActivityError) -> Self {
        let kind = match err {
            ActivityError::Transient { .. } => "transient",
            ActivityError::Permanent { .. } => "permanent",
            ActivityError::Cancelled => "cancelled",
        };
        Self {
            kind: kind.into(),
            message: err.to_string(),
        }
    }

    /// Record a namespace failure (listing or attribute fetch)
    pub fn from_namespace(err: &NamespaceError) -> Self {
        let kind = if err.is_transient() {
            "transient"
        } else {
            "permanent"
        };
        Self {
            kind: kind.into(),
            message: err.to_string(),
        }
    }

    /// Record a programming defect (task panic)
    pub fn defect(message: impl Into<String>) -> Self {
        Self {
            kind: "defect".into(),
            message: message.into(),
        }
    }
}

/// Persisted record of one namespace path's progress within a bulk request
#[derive(Debug, Clone)]
pub struct Target {
    /// Ledger id; assigned by the store on first persistence, then immutable
    pub id: Option<i64>,

    /// Request uid this target belongs to
    pub request_id: String,

    /// Human-readable request label
    pub request_label: String,

    /// Provenance marker
    pub pid: Pid,

    /// Absolute path within the namespace
    pub path: String,

    /// Attributes; populated lazily (listing or attribute fetch)
    pub attrs: FsAttributes,

    /// Current state
    pub state: TargetState,

    /// Error kind/message pair, set on failure
    pub error: Option<TargetError>,

    /// Number of activity invocations so far
    pub attempts: u32,
}

impl Target {
    /// Create the synthetic root target for a request
    pub fn root(request: &BulkRequest) -> Self {
        Self {
            id: None,
            request_id: request.id.clone(),
            request_label: request.label.clone(),
            pid: Pid::Root,
            path: request.prefix.clone(),
            attrs: FsAttributes::of_type(FileType::Dir),
            state: TargetState::Created,
            error: None,
            attempts: 0,
        }
    }

    /// Create a target for a path named directly in the request
    pub fn initial(request: &BulkRequest, path: String) -> Self {
        Self {
            id: None,
            request_id: request.id.clone(),
            request_label: request.label.clone(),
            pid: Pid::Initial,
            path,
            attrs: FsAttributes::default(),
            state: TargetState::Created,
            error: None,
            attempts: 0,
        }
    }

    /// Create a target for a path discovered during expansion
    pub fn discovered(request: &BulkRequest, path: String, attrs: FsAttributes) -> Self {
        Self {
            id: None,
            request_id: request.id.clone(),
            request_label: request.label.clone(),
            pid: Pid::Discovered,
            path,
            attrs,
            state: TargetState::Created,
            error: None,
            attempts: 0,
        }
    }

    /// Entry type, if attributes have been populated
    pub fn file_type(&self) -> Option<FileType> {
        self.attrs.file_type
    }

    /// Path depth in components, for the deepest-first directory pass
    pub fn depth(&self) -> usize {
        path_depth(&self.path)
    }

    /// Check whether the target has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Advance the state machine
    ///
    /// States only move forward; an illegal edge is a programming defect and
    /// surfaces as an error rather than silently corrupting the record.
    pub fn advance(&mut self, next: TargetState) -> Result<(), JobError> {
        if !self.state.can_transition(next) {
            return Err(JobError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Mark the target failed with the given error record
    pub fn fail(&mut self, error: TargetError) {
        self.state = TargetState::Failed;
        self.error = Some(error);
    }

    /// Reset a failed target for retry
    ///
    /// Identity (id, path, pid) is preserved; only state and the recorded
    /// error are cleared. Panics are avoided by refusing non-FAILED states.
    pub fn reset_for_retry(&mut self) -> Result<(), JobError> {
        if self.state != TargetState::Failed {
            return Err(JobError::InvalidTransition {
                from: self.state,
                to: TargetState::Ready,
            });
        }
        self.state = TargetState::Ready;
        self.error = None;
        Ok(())
    }
}
