//! End-to-end container job scenarios against mock namespace collaborators
//!
//! The namespace is an in-memory tree, the activity records its invocations,
//! and the ledger is an in-memory SQLite store, so every scenario asserts
//! against the same durable rows an external status query would see.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use nsbulk::activity::{Activity, LimitedRetry, NoRetry, RetryPolicy};
use nsbulk::config::{EngineConfig, ExpansionStrategy};
use nsbulk::engine::{JobFactory, JobOutcome};
use nsbulk::error::{
    ActivityError, ActivityResult, BulkError, ConfigError, JobError, NamespaceError,
    NamespaceResult,
};
use nsbulk::namespace::{
    join_path, AttributeFetcher, AttributeSet, DirEntry, DirLister, FileType, FsAttributes,
    SecurityContext,
};
use nsbulk::request::{BulkRequest, Depth, TargetFilter};
use nsbulk::store::{SqliteTargetStore, TargetStore};
use nsbulk::target::{Pid, Target, TargetState};

/// In-memory namespace tree serving both listings and attribute fetches
#[derive(Default)]
struct MemNamespace {
    dirs: HashMap<String, Vec<(String, FileType)>>,
}

impl MemNamespace {
    fn new() -> Self {
        Self::default()
    }

    fn dir(mut self, path: &str, children: &[(&str, FileType)]) -> Self {
        self.dirs.insert(
            path.to_string(),
            children
                .iter()
                .map(|(name, ft)| (name.to_string(), *ft))
                .collect(),
        );
        self
    }

    fn type_of(&self, path: &str) -> Option<FileType> {
        if self.dirs.contains_key(path) {
            return Some(FileType::Dir);
        }
        for (parent, children) in &self.dirs {
            for (name, ft) in children {
                if join_path(parent, name) == path {
                    return Some(*ft);
                }
            }
        }
        None
    }
}

impl DirLister for MemNamespace {
    fn list(
        &self,
        _ctx: &SecurityContext,
        path: &str,
        _attrs: AttributeSet,
    ) -> NamespaceResult<Box<dyn Iterator<Item = NamespaceResult<DirEntry>> + Send>> {
        match self.dirs.get(path) {
            Some(children) => {
                let entries: Vec<NamespaceResult<DirEntry>> = children
                    .iter()
                    .map(|(name, ft)| {
                        Ok(DirEntry {
                            name: name.clone(),
                            attrs: FsAttributes::of_type(*ft),
                        })
                    })
                    .collect();
                Ok(Box::new(entries.into_iter()))
            }
            None => Err(NamespaceError::NotFound {
                path: path.to_string(),
            }),
        }
    }
}

#[async_trait]
impl AttributeFetcher for MemNamespace {
    async fn fetch(
        &self,
        _ctx: &SecurityContext,
        path: &str,
        _attrs: AttributeSet,
    ) -> NamespaceResult<FsAttributes> {
        self.type_of(path)
            .map(FsAttributes::of_type)
            .ok_or_else(|| NamespaceError::NotFound {
                path: path.to_string(),
            })
    }
}

/// Activity that records invocation order and concurrency
struct RecordingActivity {
    calls: Mutex<Vec<String>>,
    completions: Mutex<Vec<String>>,
    fail_once: Mutex<HashSet<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    permits: usize,
    retry: Box<dyn RetryPolicy>,
}

impl RecordingActivity {
    fn new(permits: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            completions: Mutex::new(Vec::new()),
            fail_once: Mutex::new(HashSet::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Duration::ZERO,
            permits,
            retry: Box::new(NoRetry),
        }
    }

    fn with_retry(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Box::new(policy);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing_once(self, path: &str) -> Self {
        self.fail_once.lock().unwrap().insert(path.to_string());
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn calls_for(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == path).count()
    }
}

#[async_trait]
impl Activity for RecordingActivity {
    async fn perform(
        &self,
        _request_id: &str,
        _target_id: i64,
        _prefix: &str,
        path: &str,
        _attrs: &FsAttributes,
    ) -> ActivityResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(path.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let fail = self.fail_once.lock().unwrap().remove(path);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if fail {
            Err(ActivityError::transient("induced failure"))
        } else {
            Ok(())
        }
    }

    async fn handle_completion(&self, target: &Target) {
        self.completions.lock().unwrap().push(target.path.clone());
    }

    fn retry_policy(&self) -> &dyn RetryPolicy {
        self.retry.as_ref()
    }

    fn max_permits(&self) -> usize {
        self.permits
    }
}

/// Activity whose invocations block until the test releases them
struct GatedActivity {
    started: Arc<Semaphore>,
    release: Arc<Semaphore>,
    calls: AtomicUsize,
    cancels: Mutex<Vec<String>>,
    permits: usize,
}

#[async_trait]
impl Activity for GatedActivity {
    async fn perform(
        &self,
        _request_id: &str,
        _target_id: i64,
        _prefix: &str,
        _path: &str,
        _attrs: &FsAttributes,
    ) -> ActivityResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.add_permits(1);
        let _released = self
            .release
            .acquire()
            .await
            .map_err(|_| ActivityError::Cancelled)?;
        Ok(())
    }

    async fn cancel(&self, _prefix: &str, path: &str) {
        self.cancels.lock().unwrap().push(path.to_string());
    }

    fn retry_policy(&self) -> &dyn RetryPolicy {
        &NoRetry
    }

    fn max_permits(&self) -> usize {
        self.permits
    }
}

/// Activity with a programming defect
struct PanickingActivity;

#[async_trait]
impl Activity for PanickingActivity {
    async fn perform(
        &self,
        _request_id: &str,
        _target_id: i64,
        _prefix: &str,
        _path: &str,
        _attrs: &FsAttributes,
    ) -> ActivityResult<()> {
        panic!("defective activity");
    }

    fn retry_policy(&self) -> &dyn RetryPolicy {
        &NoRetry
    }

    fn max_permits(&self) -> usize {
        2
    }
}

fn register<A: Activity + 'static>(factory: &mut JobFactory, name: &str, activity: Arc<A>) {
    let make = move |_req: &BulkRequest| -> Result<Arc<dyn Activity>, ConfigError> {
        Ok(activity.clone() as Arc<dyn Activity>)
    };
    factory.register_activity(name, Arc::new(make));
}

fn engine<A: Activity + 'static>(
    ns: MemNamespace,
    activity: Arc<A>,
) -> (Arc<SqliteTargetStore>, JobFactory) {
    let store = Arc::new(SqliteTargetStore::open_in_memory().unwrap());
    let ns = Arc::new(ns);
    let mut factory = JobFactory::new(store.clone(), ns.clone(), ns);
    register(&mut factory, "rec", activity);
    (store, factory)
}

fn request(id: &str) -> BulkRequest {
    BulkRequest::new(id, id, "/data").with_activity("rec")
}

fn state_of(store: &SqliteTargetStore, request_id: &str, path: &str) -> TargetState {
    store
        .find_by_path(request_id, path)
        .unwrap()
        .unwrap_or_else(|| panic!("no target for {path}"))
        .state
}

async fn wait_until<F: Fn() -> bool>(cond: F, what: &str) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn completes_tree_children_before_directories() {
    let ns = MemNamespace::new()
        .dir("/data/a", &[("f", FileType::Regular), ("b", FileType::Dir)])
        .dir("/data/a/b", &[]);
    let activity = Arc::new(RecordingActivity::new(4));
    let (store, factory) = engine(ns, activity.clone());

    let req = request("req-a")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::Both);
    let (mut job, _handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let summary = job.run().await.unwrap();

    assert_eq!(summary.outcome, JobOutcome::Completed);
    assert_eq!(summary.completed, 3);

    for path in ["/data/a/f", "/data/a/b", "/data/a"] {
        assert_eq!(state_of(&store, "req-a", path), TargetState::Completed, "{path}");
    }

    // Root target carries the job's own outcome
    let root = store.find_by_path("req-a", "/data").unwrap().unwrap();
    assert_eq!(root.pid, Pid::Root);
    assert_eq!(root.state, TargetState::Completed);

    // The file runs during expansion; directories run afterwards, deepest
    // first, so the initial directory is executed last
    assert_eq!(
        activity.calls(),
        vec!["/data/a/f", "/data/a/b", "/data/a"]
    );
}

#[tokio::test]
async fn file_filter_skips_directories() {
    let ns = MemNamespace::new()
        .dir("/data/a", &[("sub", FileType::Dir)])
        .dir("/data/a/sub", &[("f", FileType::Regular)]);
    let activity = Arc::new(RecordingActivity::new(4));
    let (store, factory) = engine(ns, activity.clone());

    let req = request("req-b")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::File);
    let (mut job, _handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let summary = job.run().await.unwrap();

    assert_eq!(summary.outcome, JobOutcome::Completed);
    assert_eq!(state_of(&store, "req-b", "/data/a/sub/f"), TargetState::Completed);
    assert_eq!(state_of(&store, "req-b", "/data/a/sub"), TargetState::Skipped);
    assert_eq!(state_of(&store, "req-b", "/data/a"), TargetState::Skipped);
    assert_eq!(summary.skipped, 2);
    assert_eq!(activity.calls(), vec!["/data/a/sub/f"]);
}

#[tokio::test]
async fn transient_failure_is_retried_preserving_identity() {
    let ns = MemNamespace::new().dir("/data/a", &[("x", FileType::Regular)]);
    let activity = Arc::new(
        RecordingActivity::new(4)
            .with_retry(LimitedRetry::new(2))
            .failing_once("/data/a/x"),
    );
    let (store, factory) = engine(ns, activity.clone());

    let req = request("req-c")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::Both);
    let (mut job, _handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let summary = job.run().await.unwrap();

    assert_eq!(summary.outcome, JobOutcome::Completed);
    assert_eq!(summary.retries, 1);
    assert_eq!(activity.calls_for("/data/a/x"), 2);

    // One row, same identity, exactly one terminal state
    let target = store.find_by_path("req-c", "/data/a/x").unwrap().unwrap();
    assert_eq!(target.state, TargetState::Completed);
    assert_eq!(target.pid, Pid::Discovered);
    assert_eq!(target.attempts, 2);
}

#[tokio::test]
async fn cancellation_terminates_everything_outstanding() {
    let ns = MemNamespace::new()
        .dir(
            "/data/a",
            &[
                ("f1", FileType::Regular),
                ("f2", FileType::Regular),
                ("f3", FileType::Regular),
                ("f4", FileType::Regular),
                ("f5", FileType::Regular),
                ("d1", FileType::Dir),
                ("d2", FileType::Dir),
                ("d3", FileType::Dir),
            ],
        )
        .dir("/data/a/d1", &[])
        .dir("/data/a/d2", &[])
        .dir("/data/a/d3", &[]);

    let started = Arc::new(Semaphore::new(0));
    let release = Arc::new(Semaphore::new(0));
    let activity = Arc::new(GatedActivity {
        started: started.clone(),
        release: release.clone(),
        calls: AtomicUsize::new(0),
        cancels: Mutex::new(Vec::new()),
        permits: 5,
    });
    let (store, factory) = engine(ns, activity.clone());

    let req = request("req-d")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::Both);
    let (mut job, handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let run = tokio::spawn(async move { job.run().await });

    // Five execution tasks in flight, three directory targets deferred
    for _ in 0..5 {
        started.acquire().await.unwrap().forget();
    }
    let dirs_ready = || {
        (1..=3).all(|i| {
            store
                .find_by_path("req-d", &format!("/data/a/d{i}"))
                .unwrap()
                .map(|t| t.state == TargetState::Ready)
                .unwrap_or(false)
        })
    };
    wait_until(dirs_ready, "directory targets deferred").await;

    handle.cancel().await;
    let summary = run.await.unwrap().unwrap();

    assert_eq!(summary.outcome, JobOutcome::Cancelled);
    for path in [
        "/data/a/f1", "/data/a/f2", "/data/a/f3", "/data/a/f4", "/data/a/f5",
        "/data/a/d1", "/data/a/d2", "/data/a/d3",
    ] {
        assert_eq!(state_of(&store, "req-d", path), TargetState::Cancelled, "{path}");
    }
    assert_eq!(state_of(&store, "req-d", "/data"), TargetState::Cancelled);

    // No new invocation after cancellation
    assert_eq!(activity.calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn activity_permit_limit_is_never_exceeded() {
    let mut children = Vec::new();
    let names: Vec<String> = (0..8).map(|i| format!("f{i}")).collect();
    for name in &names {
        children.push((name.as_str(), FileType::Regular));
    }
    let ns = MemNamespace::new().dir("/data/a", &children);
    let activity = Arc::new(RecordingActivity::new(2).with_delay(Duration::from_millis(20)));
    let (_store, factory) = engine(ns, activity.clone());

    let req = request("req-p")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::File);
    let (mut job, _handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let summary = job.run().await.unwrap();

    assert_eq!(summary.outcome, JobOutcome::Completed);
    assert_eq!(summary.completed, 8);
    assert!(activity.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn path_cancelled_before_discovery_never_runs() {
    let ns = MemNamespace::new().dir(
        "/data/a",
        &[("f", FileType::Regular), ("g", FileType::Regular)],
    );
    let activity = Arc::new(RecordingActivity::new(4));
    let (store, factory) = engine(ns, activity.clone());

    let req = request("req-e")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::File);
    let (mut job, handle) = factory.create_job(req).unwrap();
    handle.cancel_path("/data/a/f").await.unwrap();

    job.initialize().unwrap();
    let summary = job.run().await.unwrap();

    assert_eq!(summary.outcome, JobOutcome::Completed);
    assert_eq!(state_of(&store, "req-e", "/data/a/f"), TargetState::Cancelled);
    assert_eq!(state_of(&store, "req-e", "/data/a/g"), TargetState::Completed);
    assert_eq!(activity.calls(), vec!["/data/a/g"]);
}

#[tokio::test]
async fn single_listing_permit_handles_directories_larger_than_the_channel() {
    // More children than the event channel holds, with a subdirectory first
    // so a second listing is requested while the first is still streaming
    let names: Vec<String> = (0..2000).map(|i| format!("f{i:04}")).collect();
    let mut children: Vec<(&str, FileType)> = vec![("sub", FileType::Dir)];
    for name in &names {
        children.push((name.as_str(), FileType::Regular));
    }
    let ns = MemNamespace::new()
        .dir("/data/a", &children)
        .dir("/data/a/sub", &[("g", FileType::Regular)]);
    let activity = Arc::new(RecordingActivity::new(8));
    let (store, factory) = engine(ns, activity.clone());
    let factory = factory.with_config(
        EngineConfig::new(1, 1000, ExpansionStrategy::ExpandThenStore).unwrap(),
    );

    let req = request("req-l")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::Both);
    let (mut job, _handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(30), job.run())
        .await
        .expect("job stalled on a full event channel")
        .unwrap();

    assert_eq!(summary.outcome, JobOutcome::Completed);
    // 2000 files, the nested file, and both directories
    assert_eq!(summary.completed, 2003);
    assert_eq!(state_of(&store, "req-l", "/data/a"), TargetState::Completed);
    assert_eq!(state_of(&store, "req-l", "/data/a/sub/g"), TargetState::Completed);
}

#[tokio::test]
async fn cancel_path_aborts_in_flight_execution() {
    let ns = MemNamespace::new().dir(
        "/data/a",
        &[("f", FileType::Regular), ("g", FileType::Regular)],
    );
    let started = Arc::new(Semaphore::new(0));
    let release = Arc::new(Semaphore::new(0));
    let activity = Arc::new(GatedActivity {
        started: started.clone(),
        release: release.clone(),
        calls: AtomicUsize::new(0),
        cancels: Mutex::new(Vec::new()),
        permits: 2,
    });
    let (store, factory) = engine(ns, activity.clone());

    let req = request("req-g")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::File);
    let (mut job, handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let run = tokio::spawn(async move { job.run().await });

    // Both executions in flight, then cancel one of them mid-invocation
    for _ in 0..2 {
        started.acquire().await.unwrap().forget();
    }
    handle.cancel_path("/data/a/f").await.unwrap();
    release.add_permits(2);

    let summary = run.await.unwrap().unwrap();
    assert_eq!(summary.outcome, JobOutcome::Completed);
    assert_eq!(state_of(&store, "req-g", "/data/a/f"), TargetState::Cancelled);
    assert_eq!(state_of(&store, "req-g", "/data/a/g"), TargetState::Completed);

    // The backing system was advised about the aborted invocation
    assert_eq!(
        activity.cancels.lock().unwrap().clone(),
        vec!["/data/a/f".to_string()]
    );
}

#[tokio::test]
async fn target_depth_expands_one_level_only() {
    let ns = MemNamespace::new()
        .dir("/data/a", &[("f", FileType::Regular), ("sub", FileType::Dir)])
        .dir("/data/a/sub", &[("deep", FileType::Regular)]);
    let activity = Arc::new(RecordingActivity::new(4));
    let (store, factory) = engine(ns, activity.clone());

    let req = request("req-t")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::Targets)
        .with_filter(TargetFilter::Both);
    let (mut job, _handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let summary = job.run().await.unwrap();

    assert_eq!(summary.outcome, JobOutcome::Completed);
    assert_eq!(state_of(&store, "req-t", "/data/a/f"), TargetState::Completed);
    assert_eq!(state_of(&store, "req-t", "/data/a/sub"), TargetState::Completed);
    assert_eq!(state_of(&store, "req-t", "/data/a"), TargetState::Completed);
    // One level only: the deeper file is never discovered
    assert!(store.find_by_path("req-t", "/data/a/sub/deep").unwrap().is_none());
}

#[tokio::test]
async fn no_depth_runs_activity_on_named_directory() {
    let ns = MemNamespace::new().dir("/data/a", &[("f", FileType::Regular)]);
    let activity = Arc::new(RecordingActivity::new(4));
    let (store, factory) = engine(ns, activity.clone());

    let req = request("req-n")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::None)
        .with_filter(TargetFilter::Both);
    let (mut job, _handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let summary = job.run().await.unwrap();

    assert_eq!(summary.outcome, JobOutcome::Completed);
    assert_eq!(summary.listings, 0);
    assert_eq!(activity.calls(), vec!["/data/a"]);
    assert_eq!(state_of(&store, "req-n", "/data/a"), TargetState::Completed);
    assert!(store.find_by_path("req-n", "/data/a/f").unwrap().is_none());
}

#[tokio::test]
async fn store_then_expand_executes_in_batches() {
    let ns = MemNamespace::new().dir(
        "/data/a",
        &[
            ("f1", FileType::Regular),
            ("f2", FileType::Regular),
            ("f3", FileType::Regular),
            ("f4", FileType::Regular),
            ("f5", FileType::Regular),
        ],
    );
    let activity = Arc::new(RecordingActivity::new(4));
    let (store, factory) = engine(ns, activity.clone());
    let factory = factory.with_config(
        EngineConfig::new(4, 2, ExpansionStrategy::StoreThenExpand).unwrap(),
    );

    let req = request("req-s")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::Both);
    let (mut job, _handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let summary = job.run().await.unwrap();

    assert_eq!(summary.outcome, JobOutcome::Completed);
    assert_eq!(activity.calls().len(), 6); // five files plus the directory
    for i in 1..=5 {
        assert_eq!(
            state_of(&store, "req-s", &format!("/data/a/f{i}")),
            TargetState::Completed
        );
    }
    assert_eq!(state_of(&store, "req-s", "/data/a"), TargetState::Completed);
}

#[tokio::test]
async fn task_panic_fails_root_and_stops_job() {
    let ns = MemNamespace::new().dir("/data/a", &[("f", FileType::Regular)]);
    let activity = Arc::new(PanickingActivity);
    let (store, factory) = engine(ns, activity);

    let req = request("req-x")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::Both);
    let (mut job, _handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let err = job.run().await.unwrap_err();

    assert!(matches!(
        err,
        BulkError::Job(JobError::TaskPanicked { .. })
    ));

    let root = store.find_by_path("req-x", "/data").unwrap().unwrap();
    assert_eq!(root.state, TargetState::Failed);
    assert_eq!(root.error.unwrap().kind, "defect");
}

#[tokio::test]
async fn missing_initial_target_fails_without_failing_job() {
    let ns = MemNamespace::new().dir("/data/a", &[("f", FileType::Regular)]);
    let activity = Arc::new(RecordingActivity::new(4));
    let (store, factory) = engine(ns, activity);

    let req = request("req-m")
        .with_targets(vec!["a".into(), "missing".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::Both);
    let (mut job, _handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let summary = job.run().await.unwrap();

    assert_eq!(summary.outcome, JobOutcome::Completed);
    assert_eq!(summary.failed, 1);
    let failed = store.find_by_path("req-m", "/data/missing").unwrap().unwrap();
    assert_eq!(failed.state, TargetState::Failed);
    assert_eq!(failed.error.unwrap().kind, "permanent");
    assert_eq!(state_of(&store, "req-m", "/data/a/f"), TargetState::Completed);
}

#[tokio::test]
async fn cancel_on_failure_cancels_request() {
    let ns = MemNamespace::new().dir("/data/a", &[("f", FileType::Regular)]);
    let activity = Arc::new(RecordingActivity::new(4).failing_once("/data/a/f"));
    let (store, factory) = engine(ns, activity);

    // NoRetry policy: the transient failure is terminal for the target
    let req = request("req-f")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::Both)
        .with_cancel_on_failure(true);
    let (mut job, _handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let summary = job.run().await.unwrap();

    assert_eq!(summary.outcome, JobOutcome::Cancelled);
    assert_eq!(state_of(&store, "req-f", "/data/a/f"), TargetState::Failed);
    assert_eq!(state_of(&store, "req-f", "/data"), TargetState::Cancelled);
}

#[tokio::test]
async fn rerun_after_stop_is_a_noop() {
    let ns = MemNamespace::new().dir("/data/a", &[("f", FileType::Regular)]);
    let activity = Arc::new(RecordingActivity::new(4));
    let (_store, factory) = engine(ns, activity.clone());

    let req = request("req-r")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::Both);
    let (mut job, _handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    let first = job.run().await.unwrap();
    let second = job.run().await.unwrap();

    assert_eq!(first.outcome, JobOutcome::Completed);
    assert_eq!(second.outcome, JobOutcome::Completed);
    // No additional activity invocations on re-entry
    assert_eq!(activity.calls().len(), 2); // the file and the directory
}

#[tokio::test]
async fn request_metadata_is_stamped() {
    let ns = MemNamespace::new().dir("/data/a", &[]);
    let activity = Arc::new(RecordingActivity::new(4));
    let (store, factory) = engine(ns, activity);

    let req = request("req-i")
        .with_targets(vec!["a".into()])
        .with_depth(Depth::All)
        .with_filter(TargetFilter::Both);
    let (mut job, _handle) = factory.create_job(req).unwrap();
    job.initialize().unwrap();
    job.run().await.unwrap();

    assert!(store
        .get_request_info("req-i", "started_at")
        .unwrap()
        .is_some());
    assert_eq!(
        store.get_request_info("req-i", "final_state").unwrap(),
        Some("completed".to_string())
    );
}
