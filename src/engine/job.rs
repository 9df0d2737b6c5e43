//! Container job: the per-request orchestrator
//!
//! One container job drives one bulk request from its initial targets to a
//! terminal record for every path it touches. A single driver loop consumes
//! task events, owns the running-task registry, and makes every routing
//! decision; a task writes only the target it owns. The driver never waits
//! on a permit itself (tasks acquire their own), so it can always drain the
//! event channel that listing tasks stream into.
//!
//! Container state machine:
//!
//! ```text
//! START -> PROCESS_FILES -> WAIT -> PROCESS_DIRS -> STOP
//! ```
//!
//! `PROCESS_DIRS` runs exactly once, after the registry drains, and executes
//! deferred directory targets serially in deepest-first order so that every
//! directory runs only after everything beneath it is terminal.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::activity::Activity;
use crate::config::{EngineConfig, ExpansionStrategy};
use crate::error::{ActivityError, JobError, Result, StoreResult};
use crate::namespace::{join_path, AttributeFetcher, DirEntry, DirLister, SecurityContext};
use crate::progress::{JobStats, ProgressSignal};
use crate::request::{BulkRequest, Depth, TargetFilter};
use crate::store::TargetStore;
use crate::target::{Target, TargetError, TargetState};

use super::expand::{self, ChildAction, SelfDisposition};
use super::task::{self, RunningTask, TaskEvent, TaskKind, EVENT_CHANNEL_CAPACITY};

/// Container state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Created, not yet initialized
    Start,
    /// Submitting tasks for the initially named targets
    ProcessFiles,
    /// Passive; the driver consumes events until the registry drains
    Wait,
    /// Serial deepest-first pass over deferred directory targets
    ProcessDirs,
    /// Terminal
    Stop,
}

/// How the job as a whole ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
    Cancelled,
}

impl JobOutcome {
    /// Stable string recorded in the request metadata table
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Failed => "failed",
            JobOutcome::Cancelled => "cancelled",
        }
    }

    fn root_state(&self) -> TargetState {
        match self {
            JobOutcome::Completed => TargetState::Completed,
            JobOutcome::Failed => TargetState::Failed,
            JobOutcome::Cancelled => TargetState::Cancelled,
        }
    }
}

/// Result of one job run
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub request_id: String,
    pub outcome: JobOutcome,
    pub duration: Duration,
    pub discovered: u64,
    pub listings: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cancelled: u64,
    pub retries: u64,
}

/// State shared between the driver and cancellation callers, behind the
/// single per-job lock
pub(crate) struct JobShared {
    /// In-flight tasks keyed by sequence number
    pub registry: HashMap<u64, RunningTask>,

    /// Paths cancelled before their target existed
    pub cancelled_paths: HashSet<String>,

    /// Directory targets awaiting the final serial pass
    pub dir_queue: Vec<Target>,
}

/// Everything tasks and the cancellation handle need from the job
pub(crate) struct JobContext {
    pub request: BulkRequest,
    pub security: SecurityContext,
    pub activity: Arc<dyn Activity>,
    pub store: Arc<dyn TargetStore>,
    pub lister: Arc<dyn DirLister>,
    pub fetcher: Arc<dyn AttributeFetcher>,
    pub progress: Arc<dyn ProgressSignal>,
    pub stats: Arc<JobStats>,
    pub cancelled: AtomicBool,
    pub shared: Mutex<JobShared>,
    pub seq: AtomicU64,
    pub listing_permits: Arc<Semaphore>,
    pub activity_permits: Arc<Semaphore>,
    pub events: mpsc::Sender<TaskEvent>,
}

impl JobContext {
    pub(crate) fn shared(&self) -> MutexGuard<'_, JobShared> {
        // A poisoned job lock means a panic while holding it; nothing left
        // to salvage in this job.
        self.shared.lock().expect("job lock poisoned")
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_path_cancelled(&self, path: &str) -> bool {
        self.shared().cancelled_paths.contains(path)
    }

    /// Persist a non-terminal transition; the ledger is eventually
    /// consistent, so a write fault is logged and the job continues
    pub(crate) fn persist_nonterminal(&self, target: &mut Target) {
        if let Err(err) = self.store.store_or_update(target) {
            warn!(path = %target.path, error = %err, "Failed to persist target state");
        }
    }

    /// Persist a terminal transition, fire the progress signal, and count it
    pub(crate) fn persist_terminal(&self, target: &mut Target) {
        if let Err(err) = self.store.store_or_update(target) {
            warn!(path = %target.path, error = %err, "Failed to persist terminal target state");
        }
        self.progress.signal();
        match target.state {
            TargetState::Completed => self.stats.record_completed(),
            TargetState::Failed => self.stats.record_failed(),
            TargetState::Skipped => self.stats.record_skipped(),
            TargetState::Cancelled => self.stats.record_cancelled(),
            _ => {}
        }
    }

    /// Cancel the whole request: flag, abort in-flight tasks, advise the
    /// activity, mark every non-terminal ledger row, wake the driver
    pub(crate) async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);

        let drained: Vec<RunningTask> = {
            let mut shared = self.shared();
            shared.registry.drain().map(|(_, t)| t).collect()
        };
        for running in &drained {
            running.abort.abort();
        }
        for running in &drained {
            if running.kind == TaskKind::Execution {
                self.activity.cancel(&self.request.prefix, &running.path).await;
            }
        }

        match self.store.cancel_all(&self.request.id) {
            Ok(changed) => {
                if changed > 0 {
                    info!(request = %self.request.id, cancelled = changed, "Cancelled outstanding targets");
                }
            }
            Err(err) => warn!(request = %self.request.id, error = %err, "Failed to cancel ledger rows"),
        }

        let _ = self.events.try_send(TaskEvent::Wake);
    }
}

/// Cloneable handle for observing and cancelling a running job
#[derive(Clone)]
pub struct JobHandle {
    ctx: Arc<JobContext>,
}

impl JobHandle {
    pub fn request_id(&self) -> &str {
        &self.ctx.request.id
    }

    /// Live counters for the job
    pub fn stats(&self) -> Arc<JobStats> {
        self.ctx.stats.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.ctx.cancelled.load(Ordering::SeqCst)
    }

    /// Cancel the whole request
    pub async fn cancel(&self) {
        self.ctx.cancel().await;
    }

    /// Cancel a single target by absolute path
    ///
    /// In-flight tasks for the path are aborted and the activity is advised,
    /// exactly as a request-wide cancel would. If the target is not yet
    /// discovered, the path is remembered and persisted straight to
    /// CANCELLED when expansion reaches it.
    pub async fn cancel_path(&self, path: &str) -> StoreResult<()> {
        let drained: Vec<RunningTask> = {
            let mut shared = self.ctx.shared();
            shared.cancelled_paths.insert(path.to_string());
            let seqs: Vec<u64> = shared
                .registry
                .iter()
                .filter(|(_, task)| task.path == path)
                .map(|(seq, _)| *seq)
                .collect();
            seqs.into_iter()
                .filter_map(|seq| shared.registry.remove(&seq))
                .collect()
        };
        for running in &drained {
            running.abort.abort();
        }
        for running in &drained {
            if running.kind == TaskKind::Execution {
                self.ctx.activity.cancel(&self.ctx.request.prefix, &running.path).await;
            }
        }

        if let Some(target) = self.ctx.store.find_by_path(&self.ctx.request.id, path)? {
            if !target.is_terminal() {
                if let Some(id) = target.id {
                    self.ctx.store.update(id, TargetState::Cancelled, None)?;
                    self.ctx.progress.signal();
                }
            }
        }

        // Aborted tasks send nothing; nudge the driver to re-check the
        // registry.
        if !drained.is_empty() {
            let _ = self.ctx.events.try_send(TaskEvent::Wake);
        }
        Ok(())
    }
}

/// Per-request orchestrator
pub struct ContainerJob {
    ctx: Arc<JobContext>,
    config: EngineConfig,
    state: ContainerState,
    root: Target,
    initial: Vec<Target>,
    events_rx: mpsc::Receiver<TaskEvent>,
    ready_drained: bool,
    summary: Option<JobSummary>,
}

impl ContainerJob {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        request: BulkRequest,
        activity: Arc<dyn Activity>,
        store: Arc<dyn TargetStore>,
        lister: Arc<dyn DirLister>,
        fetcher: Arc<dyn AttributeFetcher>,
        progress: Arc<dyn ProgressSignal>,
        config: EngineConfig,
        root: Target,
    ) -> (Self, JobHandle) {
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let security = if request.security.subject.is_empty() {
            activity.security()
        } else {
            request.security.clone()
        };

        let ctx = Arc::new(JobContext {
            security,
            listing_permits: Arc::new(Semaphore::new(config.listing_permits)),
            activity_permits: Arc::new(Semaphore::new(activity.max_permits())),
            activity,
            store,
            lister,
            fetcher,
            progress,
            stats: Arc::new(JobStats::default()),
            cancelled: AtomicBool::new(false),
            shared: Mutex::new(JobShared {
                registry: HashMap::new(),
                cancelled_paths: HashSet::new(),
                dir_queue: Vec::new(),
            }),
            seq: AtomicU64::new(0),
            events,
            request,
        });

        let handle = JobHandle { ctx: ctx.clone() };
        let job = Self {
            ctx,
            config,
            state: ContainerState::Start,
            root,
            initial: Vec::new(),
            events_rx,
            ready_drained: false,
            summary: None,
        };
        (job, handle)
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Load the initial targets and enter the running state machine
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != ContainerState::Start {
            return Ok(());
        }
        self.initial = self.ctx.store.initial_targets(&self.ctx.request.id)?;
        self.state = ContainerState::ProcessFiles;
        info!(
            request = %self.ctx.request.id,
            activity = %self.ctx.request.activity,
            targets = self.initial.len(),
            "Container job initialized"
        );
        Ok(())
    }

    /// Drive the job to its terminal state
    ///
    /// Re-entering after STOP is a no-op that still finalizes the job's
    /// terminal record.
    pub async fn run(&mut self) -> Result<JobSummary> {
        let started = Instant::now();

        match self.state {
            ContainerState::Start => return Err(JobError::NotInitialized.into()),
            ContainerState::Stop => {
                if let Some(summary) = self.summary.clone() {
                    self.finalize_root(summary.outcome);
                    return Ok(summary);
                }
                return Err(JobError::NotInitialized.into());
            }
            _ => {}
        }

        self.process_files();
        self.state = ContainerState::Wait;

        loop {
            if self.ctx.cancelled.load(Ordering::SeqCst) {
                return Ok(self.finish(JobOutcome::Cancelled, started).await);
            }

            // The registry emptiness check happens only after a finished
            // task's removal, so it cannot race a task mid-submission.
            if self.registry_empty() {
                if self.refill_ready() {
                    continue;
                }
                break;
            }

            let event = match self.events_rx.recv().await {
                Some(event) => event,
                None => return Err(JobError::ChannelClosed.into()),
            };
            if let Err(defect) = self.handle_event(event) {
                return Err(self.fail_on_defect(defect, started).await.into());
            }
        }

        if self.ctx.cancelled.load(Ordering::SeqCst) {
            return Ok(self.finish(JobOutcome::Cancelled, started).await);
        }

        self.process_dirs().await;

        if self.ctx.cancelled.load(Ordering::SeqCst) {
            return Ok(self.finish(JobOutcome::Cancelled, started).await);
        }
        Ok(self.finish(JobOutcome::Completed, started).await)
    }

    fn registry_empty(&self) -> bool {
        self.ctx.shared().registry.is_empty()
    }

    /// Submit attribute-fetch tasks for every initially named target
    fn process_files(&mut self) {
        self.state = ContainerState::ProcessFiles;
        let initial = std::mem::take(&mut self.initial);
        for mut target in initial {
            if self.ctx.cancelled.load(Ordering::SeqCst) {
                return;
            }
            if self.ctx.is_path_cancelled(&target.path) {
                self.cancel_target(&mut target);
                continue;
            }
            self.submit_resolve(target);
        }
    }

    fn submit_resolve(&self, target: Target) {
        let seq = self.ctx.next_seq();
        let path = target.path.clone();
        let fut = task::run_resolve(self.ctx.clone(), seq, target);
        let abort = task::spawn_supervised(seq, self.ctx.events.clone(), fut);
        self.ctx.shared().registry.insert(
            seq,
            RunningTask {
                kind: TaskKind::Resolve,
                path,
                abort,
            },
        );
    }

    fn submit_listing(&self, target: Target) {
        let seq = self.ctx.next_seq();
        let path = target.path.clone();
        let fut = task::run_listing(self.ctx.clone(), seq, target);
        let abort = task::spawn_supervised(seq, self.ctx.events.clone(), fut);
        self.ctx.shared().registry.insert(
            seq,
            RunningTask {
                kind: TaskKind::Listing,
                path,
                abort,
            },
        );
    }

    fn submit_execution(&self, mut target: Target) {
        if target.state == TargetState::Created {
            if target.advance(TargetState::Ready).is_err() {
                return;
            }
            self.ctx.persist_nonterminal(&mut target);
        }

        let seq = self.ctx.next_seq();
        let path = target.path.clone();
        let fut = task::run_execution(self.ctx.clone(), seq, target);
        let abort = task::spawn_supervised(seq, self.ctx.events.clone(), fut);
        self.ctx.shared().registry.insert(
            seq,
            RunningTask {
                kind: TaskKind::Execution,
                path,
                abort,
            },
        );
    }

    fn handle_event(&mut self, event: TaskEvent) -> std::result::Result<(), JobError> {
        match event {
            TaskEvent::Wake => Ok(()),
            TaskEvent::Panicked { seq, message } => {
                self.remove_task(seq);
                Err(JobError::TaskPanicked { message })
            }
            TaskEvent::Resolved {
                seq,
                mut target,
                outcome,
            } => {
                self.remove_task(seq);
                match outcome {
                    Ok(attrs) => {
                        target.attrs = attrs;
                        self.dispatch_resolved(target);
                    }
                    Err(err) => self.fail_target(target, TargetError::from_namespace(&err)),
                }
                Ok(())
            }
            TaskEvent::Discovered { parent_path, entry } => {
                self.handle_discovered(parent_path, entry);
                Ok(())
            }
            TaskEvent::ListingDone {
                seq,
                target,
                outcome,
            } => {
                self.remove_task(seq);
                self.handle_listing_done(target, outcome);
                Ok(())
            }
            TaskEvent::ExecutionDone {
                seq,
                target,
                outcome,
            } => {
                self.remove_task(seq);
                self.handle_execution_done(target, outcome);
                Ok(())
            }
        }
    }

    fn remove_task(&self, seq: u64) {
        self.ctx.shared().registry.remove(&seq);
    }

    /// Route an initial target now that its type is known
    fn dispatch_resolved(&mut self, mut target: Target) {
        // Write the now-known type to the ledger row
        self.ctx.persist_nonterminal(&mut target);

        let filter = self.ctx.request.filter;
        let file_type = target.attrs.file_type();

        if file_type.is_dir() {
            if self.ctx.request.depth == Depth::None {
                // Never expanded; the activity runs on the directory itself
                if filter.includes_dirs() {
                    self.submit_or_defer_execution(target);
                } else {
                    self.skip_target(&mut target);
                }
            } else {
                self.submit_listing(target);
            }
        } else if file_type.is_file_like() {
            if filter.includes_files() {
                self.submit_or_defer_execution(target);
            } else {
                self.skip_target(&mut target);
            }
        } else {
            self.skip_target(&mut target);
        }
    }

    /// Execute now, or persist READY for the batch phase under the
    /// store-then-expand strategy
    fn submit_or_defer_execution(&mut self, mut target: Target) {
        match self.config.strategy {
            ExpansionStrategy::ExpandThenStore => self.submit_execution(target),
            ExpansionStrategy::StoreThenExpand => {
                if target.state == TargetState::Created && target.advance(TargetState::Ready).is_err()
                {
                    return;
                }
                self.ctx.persist_nonterminal(&mut target);
            }
        }
    }

    fn handle_discovered(&mut self, parent_path: String, entry: DirEntry) {
        let path = join_path(&parent_path, &entry.name);
        let action = expand::child_action(
            self.ctx.request.depth,
            self.ctx.request.filter,
            entry.attrs.file_type(),
        );
        if action == ChildAction::Ignore {
            return;
        }

        let mut target = Target::discovered(&self.ctx.request, path, entry.attrs);

        if self.ctx.is_path_cancelled(&target.path) {
            // Persisted straight to CANCELLED, never executed
            self.cancel_target(&mut target);
            return;
        }

        self.ctx.stats.record_discovered();
        match action {
            ChildAction::Execute => self.submit_or_defer_execution(target),
            ChildAction::Recurse => {
                self.ctx.persist_nonterminal(&mut target);
                self.submit_listing(target);
            }
            ChildAction::Defer => self.defer_directory(target),
            ChildAction::Ignore => {}
        }
    }

    fn defer_directory(&self, mut target: Target) {
        if target.state == TargetState::Created && target.advance(TargetState::Ready).is_err() {
            return;
        }
        self.ctx.persist_nonterminal(&mut target);
        debug!(path = %target.path, "Deferred directory target");
        self.ctx.shared().dir_queue.push(target);
    }

    fn handle_listing_done(
        &mut self,
        mut target: Target,
        outcome: std::result::Result<(), crate::error::NamespaceError>,
    ) {
        match outcome {
            Ok(()) => match expand::self_disposition(self.ctx.request.filter) {
                SelfDisposition::Defer => self.defer_directory(target),
                SelfDisposition::Skip => self.skip_target(&mut target),
            },
            Err(err) if err.is_interrupted() => self.cancel_target(&mut target),
            Err(err) => self.fail_target(target, TargetError::from_namespace(&err)),
        }
    }

    fn handle_execution_done(
        &mut self,
        mut target: Target,
        outcome: std::result::Result<(), ActivityError>,
    ) {
        if self.ctx.is_path_cancelled(&target.path) {
            // The ledger row is already CANCELLED; terminal-once keeps it
            self.ctx.stats.record_cancelled();
            self.ctx.progress.signal();
            return;
        }

        match outcome {
            Ok(()) => {
                if target.advance(TargetState::Completed).is_ok() {
                    self.ctx.persist_terminal(&mut target);
                }
            }
            Err(ActivityError::Cancelled) => self.cancel_target(&mut target),
            Err(err) => {
                let record = TargetError::from_activity(&err);
                let retry = self.ctx.activity.retry_policy().should_retry(&target, &err)
                    && !self.ctx.cancelled.load(Ordering::SeqCst);

                if retry {
                    // Persist the failed attempt, then reset and go again
                    target.fail(record);
                    self.ctx.persist_nonterminal(&mut target);
                    self.ctx.progress.signal();
                    if target.reset_for_retry().is_ok() {
                        self.ctx.persist_nonterminal(&mut target);
                        self.ctx.stats.record_retry();
                        debug!(path = %target.path, attempts = target.attempts, "Retrying target");
                        self.submit_execution(target);
                    }
                } else {
                    self.fail_target(target, record);
                }
            }
        }
    }

    fn skip_target(&self, target: &mut Target) {
        if target.advance(TargetState::Skipped).is_ok() {
            self.ctx.persist_terminal(target);
        }
    }

    fn cancel_target(&self, target: &mut Target) {
        if target.advance(TargetState::Cancelled).is_ok() {
            self.ctx.persist_terminal(target);
        }
    }

    fn fail_target(&self, mut target: Target, record: TargetError) {
        warn!(path = %target.path, kind = %record.kind, error = %record.message, "Target failed");
        target.fail(record);
        self.ctx.persist_terminal(&mut target);
        if self.ctx.request.cancel_on_failure {
            self.ctx.cancelled.store(true, Ordering::SeqCst);
        }
    }

    /// Under store-then-expand, pull and execute the next READY batch once
    /// expansion has drained; returns false when nothing is left
    fn refill_ready(&mut self) -> bool {
        if self.config.strategy != ExpansionStrategy::StoreThenExpand || self.ready_drained {
            return false;
        }
        match self.ctx.store.next_ready(
            &self.ctx.request.id,
            TargetFilter::File,
            self.config.batch_size,
        ) {
            Ok(batch) if batch.is_empty() => {
                self.ready_drained = true;
                false
            }
            Ok(batch) => {
                debug!(request = %self.ctx.request.id, count = batch.len(), "Executing ready batch");
                for target in batch {
                    if self.ctx.cancelled.load(Ordering::SeqCst) {
                        break;
                    }
                    self.submit_execution(target);
                }
                true
            }
            Err(err) => {
                warn!(request = %self.ctx.request.id, error = %err, "Failed to pull ready batch");
                self.ready_drained = true;
                false
            }
        }
    }

    /// The final serial pass: deferred directories, deepest first
    async fn process_dirs(&mut self) {
        self.state = ContainerState::ProcessDirs;

        let mut dirs: Vec<Target> = {
            let mut shared = self.ctx.shared();
            std::mem::take(&mut shared.dir_queue)
        };
        // Deepest first, so every directory runs after everything beneath it
        dirs.sort_by(|a, b| b.depth().cmp(&a.depth()).then_with(|| a.path.cmp(&b.path)));

        if !dirs.is_empty() {
            info!(request = %self.ctx.request.id, dirs = dirs.len(), "Processing directory targets");
        }

        for mut target in dirs {
            if self.ctx.cancelled.load(Ordering::SeqCst) || self.ctx.is_path_cancelled(&target.path)
            {
                self.cancel_target(&mut target);
                continue;
            }
            self.execute_directory(target).await;
        }
    }

    /// Run the activity on one deferred directory, inline and serially
    async fn execute_directory(&mut self, mut target: Target) {
        let Some(id) = target.id else {
            warn!(path = %target.path, "Directory target was never persisted");
            return;
        };

        if target.advance(TargetState::Running).is_err() {
            return;
        }
        self.ctx.persist_nonterminal(&mut target);

        loop {
            let Ok(permit) = self.ctx.activity_permits.clone().acquire_owned().await else {
                return;
            };
            if self.ctx.cancelled.load(Ordering::SeqCst) {
                self.cancel_target(&mut target);
                return;
            }

            target.attempts += 1;
            let outcome = self
                .ctx
                .activity
                .perform(
                    &target.request_id,
                    id,
                    &self.ctx.request.prefix,
                    &target.path,
                    &target.attrs,
                )
                .await;
            drop(permit);

            match outcome {
                Ok(()) => {
                    self.ctx.activity.handle_completion(&target).await;
                    if target.advance(TargetState::Completed).is_ok() {
                        self.ctx.persist_terminal(&mut target);
                    }
                    return;
                }
                Err(ActivityError::Cancelled) => {
                    self.cancel_target(&mut target);
                    return;
                }
                Err(err) => {
                    let record = TargetError::from_activity(&err);
                    let retry = self.ctx.activity.retry_policy().should_retry(&target, &err)
                        && !self.ctx.cancelled.load(Ordering::SeqCst);
                    if !retry {
                        self.fail_target(target, record);
                        return;
                    }
                    target.fail(record);
                    self.ctx.persist_nonterminal(&mut target);
                    self.ctx.progress.signal();
                    if target.reset_for_retry().is_err()
                        || target.advance(TargetState::Running).is_err()
                    {
                        return;
                    }
                    self.ctx.persist_nonterminal(&mut target);
                    self.ctx.stats.record_retry();
                }
            }
        }
    }

    /// A task died with an uncaught fault: the job stops, its root target
    /// records the defect, everything outstanding is cancelled
    async fn fail_on_defect(&mut self, defect: JobError, started: Instant) -> JobError {
        warn!(request = %self.ctx.request.id, error = %defect, "Task defect; stopping job");

        if let Some(id) = self.root.id {
            let record = TargetError::defect(defect.to_string());
            if let Err(err) = self.ctx.store.update(id, TargetState::Failed, Some(&record)) {
                warn!(request = %self.ctx.request.id, error = %err, "Failed to record defect on root target");
            }
            self.ctx.progress.signal();
        }

        self.ctx.cancel().await;
        self.state = ContainerState::Stop;
        let summary = self.make_summary(JobOutcome::Failed, started);
        if let Err(err) = self
            .ctx
            .store
            .record_request_end(&self.ctx.request.id, JobOutcome::Failed.as_str())
        {
            warn!(request = %self.ctx.request.id, error = %err, "Failed to stamp request end");
        }
        self.summary = Some(summary);
        defect
    }

    async fn finish(&mut self, outcome: JobOutcome, started: Instant) -> JobSummary {
        if outcome == JobOutcome::Cancelled {
            // Idempotent: drains any straggler tasks and marks their rows
            self.ctx.cancel().await;
        }

        self.state = ContainerState::Stop;
        self.finalize_root(outcome);

        if let Err(err) = self
            .ctx
            .store
            .record_request_end(&self.ctx.request.id, outcome.as_str())
        {
            warn!(request = %self.ctx.request.id, error = %err, "Failed to stamp request end");
        }

        let summary = self.make_summary(outcome, started);
        info!(
            request = %self.ctx.request.id,
            outcome = outcome.as_str(),
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "Container job finished"
        );
        self.summary = Some(summary.clone());
        summary
    }

    fn finalize_root(&self, outcome: JobOutcome) {
        if let Some(id) = self.root.id {
            if let Err(err) = self.ctx.store.update(id, outcome.root_state(), None) {
                warn!(request = %self.ctx.request.id, error = %err, "Failed to finalize root target");
            }
            self.ctx.progress.signal();
        }
    }

    fn make_summary(&self, outcome: JobOutcome, started: Instant) -> JobSummary {
        let stats = &self.ctx.stats;
        JobSummary {
            request_id: self.ctx.request.id.clone(),
            outcome,
            duration: started.elapsed(),
            discovered: stats.discovered.load(Ordering::Relaxed),
            listings: stats.listings.load(Ordering::Relaxed),
            completed: stats.completed.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            skipped: stats.skipped.load(Ordering::Relaxed),
            cancelled: stats.cancelled.load(Ordering::Relaxed),
            retries: stats.retries.load(Ordering::Relaxed),
        }
    }
}
