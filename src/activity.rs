//! Activities: the pluggable per-target operation
//!
//! An activity (pin, delete, archive, ...) is the unit of work performed on
//! each target. It declares its own safe concurrency budget against the
//! backing system and its own retry policy; the engine supplies admission
//! control and lifecycle around it.
//!
//! Activities are resolved by name through an explicit registry at
//! request-creation time, never by reflection at dispatch time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ActivityError, ActivityResult, ConfigError};
use crate::namespace::{AttributeSet, FsAttributes, SecurityContext};
use crate::request::{BulkRequest, TargetFilter};
use crate::target::Target;

/// Retry policy consulted by the container job after an activity failure
pub trait RetryPolicy: Send + Sync {
    /// Decide whether a failed target should be reset and re-run
    fn should_retry(&self, target: &Target, error: &ActivityError) -> bool;
}

/// Policy that never retries
#[derive(Debug, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _target: &Target, _error: &ActivityError) -> bool {
        false
    }
}

/// Policy that retries transient failures up to a fixed attempt count
#[derive(Debug)]
pub struct LimitedRetry {
    max_attempts: u32,
}

impl LimitedRetry {
    /// Retry transient failures until `max_attempts` invocations have run
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl RetryPolicy for LimitedRetry {
    fn should_retry(&self, target: &Target, error: &ActivityError) -> bool {
        error.is_transient() && target.attempts < self.max_attempts
    }
}

/// A pluggable operation applied to each target of a bulk request
#[async_trait]
pub trait Activity: Send + Sync {
    /// Perform the operation on one target
    ///
    /// The future is the asynchronous handle: dropping it cancels the
    /// invocation as far as the engine is concerned; [`Activity::cancel`]
    /// additionally tells the backing system, advisorily.
    async fn perform(
        &self,
        request_id: &str,
        target_id: i64,
        prefix: &str,
        path: &str,
        attrs: &FsAttributes,
    ) -> ActivityResult<()>;

    /// Post-completion hook, called after `perform` resolves successfully
    /// and before the terminal state is persisted
    async fn handle_completion(&self, _target: &Target) {}

    /// Advisory cancellation of an in-flight invocation
    async fn cancel(&self, _prefix: &str, _path: &str) {}

    /// Retry policy for failed invocations
    fn retry_policy(&self) -> &dyn RetryPolicy;

    /// Maximum concurrent invocations this activity tolerates
    fn max_permits(&self) -> usize;

    /// Entry types this activity applies to
    fn target_filter(&self) -> TargetFilter {
        TargetFilter::Both
    }

    /// Attribute detail the activity needs listings to supply
    fn required_attributes(&self) -> AttributeSet {
        AttributeSet::Basic
    }

    /// Security context the request runs under, passed through to the
    /// namespace services
    fn security(&self) -> SecurityContext {
        SecurityContext::default()
    }
}

/// Factory building one activity instance per request
pub trait ActivityFactory: Send + Sync {
    /// Build the activity for a request
    fn create(&self, request: &BulkRequest) -> Result<Arc<dyn Activity>, ConfigError>;
}

impl<F> ActivityFactory for F
where
    F: Fn(&BulkRequest) -> Result<Arc<dyn Activity>, ConfigError> + Send + Sync,
{
    fn create(&self, request: &BulkRequest) -> Result<Arc<dyn Activity>, ConfigError> {
        self(request)
    }
}

/// Explicit registry mapping activity names to factories
///
/// Resolution happens once, at request-creation time.
#[derive(Default)]
pub struct ActivityRegistry {
    factories: HashMap<String, Arc<dyn ActivityFactory>>,
}

impl ActivityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a name, replacing any previous registration
    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn ActivityFactory>) {
        self.factories.insert(name.into(), factory);
    }

    /// Registered activity names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Resolve and build the activity for a request
    pub fn create(&self, request: &BulkRequest) -> Result<Arc<dyn Activity>, ConfigError> {
        let factory =
            self.factories
                .get(&request.activity)
                .ok_or_else(|| ConfigError::UnknownActivity {
                    name: request.activity.clone(),
                })?;
        let activity = factory.create(request)?;
        if activity.max_permits() == 0 {
            return Err(ConfigError::ZeroActivityPermits {
                name: request.activity.clone(),
            });
        }
        Ok(activity)
    }
}
