//! Job factory: builds a container job and its activity from a request
//!
//! The factory persists the synthetic root target and one row per initially
//! named path before the job ever runs, so the ledger reflects the request
//! even if the process dies between creation and execution.

use std::sync::Arc;

use tracing::{info, warn};

use crate::activity::{ActivityFactory, ActivityRegistry};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::namespace::{AttributeFetcher, DirLister};
use crate::progress::{NoProgress, ProgressSignal};
use crate::request::BulkRequest;
use crate::store::TargetStore;
use crate::target::Target;

use super::job::{ContainerJob, JobHandle};

/// Builds container jobs for incoming requests
pub struct JobFactory {
    registry: ActivityRegistry,
    store: Arc<dyn TargetStore>,
    lister: Arc<dyn DirLister>,
    fetcher: Arc<dyn AttributeFetcher>,
    progress: Arc<dyn ProgressSignal>,
    config: EngineConfig,
}

impl JobFactory {
    /// Create a factory with default configuration and no progress listener
    pub fn new(
        store: Arc<dyn TargetStore>,
        lister: Arc<dyn DirLister>,
        fetcher: Arc<dyn AttributeFetcher>,
    ) -> Self {
        Self {
            registry: ActivityRegistry::new(),
            store,
            lister,
            fetcher,
            progress: Arc::new(NoProgress),
            config: EngineConfig::default(),
        }
    }

    /// Attach a progress listener
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSignal>) -> Self {
        self.progress = progress;
        self
    }

    /// Replace the engine configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an activity factory under a name
    pub fn register_activity(&mut self, name: impl Into<String>, factory: Arc<dyn ActivityFactory>) {
        self.registry.register(name, factory);
    }

    /// Registered activity names
    pub fn activity_names(&self) -> impl Iterator<Item = &str> {
        self.registry.names()
    }

    /// Validate a request, resolve its activity, persist its root and
    /// initial targets, and build the job
    pub fn create_job(&self, request: BulkRequest) -> Result<(ContainerJob, JobHandle)> {
        request.validate()?;
        let activity = self.registry.create(&request)?;

        // These rows must exist before the job runs; a store fault here
        // fails request creation outright.
        let mut root = Target::root(&request);
        self.store.store(&mut root)?;
        for relative in &request.targets {
            let mut target = Target::initial(&request, request.absolute_path(relative));
            self.store.store(&mut target)?;
        }

        if let Err(err) = self.store.record_request_start(&request.id) {
            warn!(request = %request.id, error = %err, "Failed to stamp request start");
        }

        info!(
            request = %request.id,
            activity = %request.activity,
            targets = request.targets.len(),
            "Created container job"
        );

        Ok(ContainerJob::new(
            request,
            activity,
            self.store.clone(),
            self.lister.clone(),
            self.fetcher.clone(),
            self.progress.clone(),
            self.config.clone(),
            root,
        ))
    }
}
