//! Task events and supervised spawning
//!
//! Each task owns its target while it runs and reports back through the
//! per-job event channel; the driver loop owns the registry and all routing,
//! so a target is only ever written by one place at a time. Tasks acquire
//! their own permits: the driver never parks on admission, which keeps it
//! free to drain the event channel while listings stream.
//!
//! Every spawned task is wrapped by a watcher that forwards its final event,
//! converts a panic into [`TaskEvent::Panicked`], and stays silent on abort
//! (whoever aborted the task also drained its registry entry).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError};

use crate::error::{ActivityError, NamespaceError};
use crate::namespace::{DirEntry, FsAttributes};
use crate::target::{Target, TargetState};

use super::expand;
use super::job::JobContext;

/// Capacity of the per-job event channel; listing tasks block on a full
/// channel, which backpressures expansion against the driver
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// What a running task is doing, for cancellation bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    /// Initial-target attribute fetch
    Resolve,
    /// Directory listing
    Listing,
    /// Activity invocation
    Execution,
}

/// Registry entry for one in-flight task
pub(crate) struct RunningTask {
    pub kind: TaskKind,
    pub path: String,
    pub abort: AbortHandle,
}

/// Messages tasks send back to the driver loop
pub(crate) enum TaskEvent {
    /// Attribute fetch for an initial target finished
    Resolved {
        seq: u64,
        target: Target,
        outcome: Result<FsAttributes, NamespaceError>,
    },

    /// A listing task found one child; streamed while the listing runs
    Discovered {
        parent_path: String,
        entry: DirEntry,
    },

    /// A listing task exhausted its directory (or aborted)
    ListingDone {
        seq: u64,
        target: Target,
        outcome: Result<(), NamespaceError>,
    },

    /// An execution task finished its activity invocation
    ExecutionDone {
        seq: u64,
        target: Target,
        outcome: Result<(), ActivityError>,
    },

    /// A task died with an uncaught fault
    Panicked { seq: u64, message: String },

    /// No payload; nudges the driver to re-check the cancel flag
    Wake,
}

/// Spawn a task and a watcher that forwards its event to the driver
pub(crate) fn spawn_supervised<F>(
    seq: u64,
    events: mpsc::Sender<TaskEvent>,
    fut: F,
) -> AbortHandle
where
    F: std::future::Future<Output = TaskEvent> + Send + 'static,
{
    let inner = tokio::spawn(fut);
    let abort = inner.abort_handle();
    tokio::spawn(async move {
        match inner.await {
            Ok(event) => {
                let _ = events.send(event).await;
            }
            Err(err) if err.is_panic() => {
                let _ = events
                    .send(TaskEvent::Panicked {
                        seq,
                        message: panic_message(err),
                    })
                    .await;
            }
            // Aborted: whoever aborted the task cleans up after it.
            Err(_) => {}
        }
    });
    abort
}

/// Extract a printable message from a panicked task's payload
pub(crate) fn panic_message(err: JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

/// Fetch attributes for one initial target
pub(crate) async fn run_resolve(ctx: Arc<JobContext>, seq: u64, target: Target) -> TaskEvent {
    let outcome = ctx
        .fetcher
        .fetch(&ctx.security, &target.path, ctx.activity.required_attributes())
        .await;
    TaskEvent::Resolved {
        seq,
        target,
        outcome,
    }
}

/// Expand one directory, streaming children back through the channel
///
/// The listing permit is awaited here, not in the driver, so a permit
/// holder blocked on a full event channel can always be drained. The
/// listing call itself is blocking, so the body runs on the blocking pool.
pub(crate) async fn run_listing(ctx: Arc<JobContext>, seq: u64, target: Target) -> TaskEvent {
    let Ok(_permit) = ctx.listing_permits.clone().acquire_owned().await else {
        // The semaphore is never closed
        return TaskEvent::ListingDone {
            seq,
            target,
            outcome: Err(NamespaceError::Interrupted),
        };
    };
    ctx.stats.record_listing();

    let blocking_ctx = ctx.clone();
    let path = target.path.clone();
    let joined = tokio::task::spawn_blocking(move || expand::list_children(&blocking_ctx, &path)).await;

    match joined {
        Ok(outcome) => TaskEvent::ListingDone {
            seq,
            target,
            outcome,
        },
        Err(err) if err.is_panic() => TaskEvent::Panicked {
            seq,
            message: panic_message(err),
        },
        Err(_) => TaskEvent::ListingDone {
            seq,
            target,
            outcome: Err(NamespaceError::Interrupted),
        },
    }
}

/// Run the activity against one target
///
/// The activity permit is awaited here; RUNNING is persisted only once the
/// permit is held, so the ledger never shows a queued target as running.
pub(crate) async fn run_execution(ctx: Arc<JobContext>, seq: u64, mut target: Target) -> TaskEvent {
    let Ok(_permit) = ctx.activity_permits.clone().acquire_owned().await else {
        // The semaphore is never closed
        return TaskEvent::ExecutionDone {
            seq,
            target,
            outcome: Err(ActivityError::Cancelled),
        };
    };

    if ctx.cancelled.load(Ordering::SeqCst) {
        return TaskEvent::ExecutionDone {
            seq,
            target,
            outcome: Err(ActivityError::Cancelled),
        };
    }

    let id = match target.id {
        Some(id) => id,
        None => {
            return TaskEvent::ExecutionDone {
                seq,
                target,
                outcome: Err(ActivityError::permanent("target was never persisted")),
            };
        }
    };

    if let Err(err) = target.advance(TargetState::Running) {
        return TaskEvent::ExecutionDone {
            seq,
            target,
            outcome: Err(ActivityError::permanent(err.to_string())),
        };
    }
    ctx.persist_nonterminal(&mut target);

    target.attempts += 1;
    let outcome = ctx
        .activity
        .perform(
            &target.request_id,
            id,
            &ctx.request.prefix,
            &target.path,
            &target.attrs,
        )
        .await;

    if outcome.is_ok() {
        ctx.activity.handle_completion(&target).await;
    }

    TaskEvent::ExecutionDone {
        seq,
        target,
        outcome,
    }
}
