//! nsbulk - Bulk Target Expansion-and-Execution Engine
//!
//! Performs bulk operations (pin, delete, archive, ...) over arbitrarily
//! large directory trees of a remote namespace, without loading the whole
//! tree into memory and without unbounded concurrency against the namespace
//! or the backing activity service.
//!
//! # Features
//!
//! - **Lazy Expansion**: Directory trees are walked incrementally; listings
//!   stream children one at a time and never materialize a directory.
//!
//! - **Durable Targets**: Every discovered path becomes a persisted,
//!   individually trackable target in a SQLite ledger, with a terminal
//!   outcome written exactly once.
//!
//! - **Bounded Concurrency**: Two permit pools cap concurrent directory
//!   listings and in-flight activity invocations; the activity declares its
//!   own safe concurrency budget.
//!
//! - **Children First**: Directories are executed only after everything
//!   beneath them is terminal, via a serial deepest-first final pass.
//!
//! - **Cancellation and Retry**: Request-wide and single-target
//!   cancellation, plus automatic retry of transient failures under the
//!   activity's own policy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Remote Namespace                         │
//! │           (directory lister / attribute fetcher)             │
//! └────────────────────────────┬────────────────────────────────┘
//!                              │ streamed listings
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Container Job                           │
//! │                                                              │
//! │   ┌───────────┐  ┌───────────┐       ┌───────────┐          │
//! │   │ listing   │  │ execution │  ...  │ execution │  tasks   │
//! │   │  (permit) │  │  (permit) │       │  (permit) │          │
//! │   └─────┬─────┘  └─────┬─────┘       └─────┬─────┘          │
//! │         │              │                   │                │
//! │         └──────────────┼───────────────────┘                │
//! │                        ▼                                    │
//! │              ┌───────────────────┐                          │
//! │              │   event channel   │                          │
//! │              └─────────┬─────────┘                          │
//! │                        ▼                                    │
//! │              ┌───────────────────┐   serial, deepest-first  │
//! │              │    driver loop    │──► directory pass        │
//! │              └─────────┬─────────┘                          │
//! └────────────────────────┼────────────────────────────────────┘
//!                          ▼
//!               ┌────────────────────┐
//!               │   target ledger    │
//!               │     (SQLite)       │
//!               └────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nsbulk::engine::JobFactory;
//! use nsbulk::request::{BulkRequest, Depth, TargetFilter};
//! use nsbulk::store::SqliteTargetStore;
//! # use nsbulk::activity::{Activity, ActivityFactory};
//! # use nsbulk::namespace::{AttributeFetcher, DirLister};
//! # async fn example(
//! #     lister: Arc<dyn DirLister>,
//! #     fetcher: Arc<dyn AttributeFetcher>,
//! #     pin_factory: Arc<dyn ActivityFactory>,
//! # ) -> nsbulk::error::Result<()> {
//! let store = Arc::new(SqliteTargetStore::open(std::path::Path::new("targets.db"))?);
//! let mut factory = JobFactory::new(store, lister, fetcher);
//! factory.register_activity("pin", pin_factory);
//!
//! let request = BulkRequest::new("req-42", "pin /data/pool", "/data")
//!     .with_targets(vec!["pool".into()])
//!     .with_activity("pin")
//!     .with_depth(Depth::All)
//!     .with_filter(TargetFilter::Both);
//!
//! let (mut job, handle) = factory.create_job(request)?;
//! job.initialize()?;
//! let summary = job.run().await?;
//! # let _ = (summary, handle);
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod config;
pub mod engine;
pub mod error;
pub mod namespace;
pub mod progress;
pub mod request;
pub mod store;
pub mod target;

pub use activity::{Activity, ActivityFactory, ActivityRegistry, LimitedRetry, NoRetry, RetryPolicy};
pub use config::{EngineConfig, ExpansionStrategy};
pub use engine::{ContainerJob, ContainerState, JobFactory, JobHandle, JobOutcome, JobSummary};
pub use error::{BulkError, Result};
pub use namespace::{AttributeFetcher, DirLister, FileType, FsAttributes};
pub use progress::{JobStats, ProgressSignal};
pub use request::{BulkRequest, Depth, TargetFilter};
pub use store::{SqliteTargetStore, TargetStore};
pub use target::{Pid, Target, TargetState};
