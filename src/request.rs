//! Bulk request description
//!
//! A request names some paths, an activity, and the policies controlling how
//! directories are expanded and which entry types become targets. Requests
//! are created externally (REST/CLI front-ends); this crate only consumes
//! them.

use crate::error::ConfigError;
use crate::namespace::{join_path, SecurityContext};

/// Depth policy: whether and how directories are expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Depth {
    /// Directories are never expanded; the activity runs directly on the
    /// initially named path
    #[default]
    None,
    /// Immediate children become targets; no deeper recursion
    Targets,
    /// Full recursive expansion
    All,
}

/// Which entry types become targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetFilter {
    /// Files and links only
    File,
    /// Directories only
    Dir,
    /// Everything
    #[default]
    Both,
}

impl TargetFilter {
    /// Check whether files and links are targeted
    pub fn includes_files(&self) -> bool {
        matches!(self, TargetFilter::File | TargetFilter::Both)
    }

    /// Check whether directories are targeted
    pub fn includes_dirs(&self) -> bool {
        matches!(self, TargetFilter::Dir | TargetFilter::Both)
    }
}

/// One bulk request: paths plus policy
#[derive(Debug, Clone)]
pub struct BulkRequest {
    /// Request uid (assigned by the front-end)
    pub id: String,

    /// Human-readable request label
    pub label: String,

    /// Absolute path prefix all targets are resolved against
    pub prefix: String,

    /// Target paths, relative to the prefix
    pub targets: Vec<String>,

    /// Name of the activity to perform, resolved through the registry
    pub activity: String,

    /// Depth policy
    pub depth: Depth,

    /// Target-type filter
    pub filter: TargetFilter,

    /// Cancel the whole request on the first non-retryable failure
    pub cancel_on_failure: bool,

    /// Security context passed through to the namespace
    pub security: SecurityContext,
}

impl BulkRequest {
    /// Create a request with default policies (no expansion, both types)
    pub fn new(id: impl Into<String>, label: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            prefix: prefix.into(),
            targets: Vec::new(),
            activity: String::new(),
            depth: Depth::default(),
            filter: TargetFilter::default(),
            cancel_on_failure: false,
            security: SecurityContext::default(),
        }
    }

    /// Set the relative target paths
    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.targets = targets;
        self
    }

    /// Set the activity name
    pub fn with_activity(mut self, activity: impl Into<String>) -> Self {
        self.activity = activity.into();
        self
    }

    /// Set the depth policy
    pub fn with_depth(mut self, depth: Depth) -> Self {
        self.depth = depth;
        self
    }

    /// Set the target-type filter
    pub fn with_filter(mut self, filter: TargetFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Cancel the whole request on first failure
    pub fn with_cancel_on_failure(mut self, cancel: bool) -> Self {
        self.cancel_on_failure = cancel;
        self
    }

    /// Set the security context
    pub fn with_security(mut self, security: SecurityContext) -> Self {
        self.security = security;
        self
    }

    /// Resolve a relative target string against the request prefix
    pub fn absolute_path(&self, relative: &str) -> String {
        join_path(&self.prefix, relative)
    }

    /// Validate the request shape
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.prefix.starts_with('/') {
            return Err(ConfigError::RelativePrefix {
                prefix: self.prefix.clone(),
            });
        }
        if self.targets.is_empty() {
            return Err(ConfigError::EmptyRequest {
                request: self.id.clone(),
            });
        }
        Ok(())
    }
}
