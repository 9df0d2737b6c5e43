//! Expansion decisions and the blocking listing body
//!
//! The decision table maps one listed child to an action under the request's
//! depth policy and target-type filter. The driver applies the table; the
//! listing body only streams entries back.

use std::sync::atomic::Ordering;

use crate::error::{NamespaceError, NamespaceResult};
use crate::namespace::FileType;
use crate::request::{Depth, TargetFilter};

use super::job::JobContext;
use super::task::TaskEvent;

/// What to do with one listed child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildAction {
    /// Persist and run the activity (files and links)
    Execute,
    /// Persist and expand recursively (directories under full depth)
    Recurse,
    /// Persist and defer to the final directory pass
    Defer,
    /// Not a target under this request
    Ignore,
}

pub(crate) fn child_action(depth: Depth, filter: TargetFilter, file_type: FileType) -> ChildAction {
    match file_type {
        FileType::Special => ChildAction::Ignore,
        FileType::Dir => match depth {
            Depth::All => ChildAction::Recurse,
            Depth::Targets if filter.includes_dirs() => ChildAction::Defer,
            _ => ChildAction::Ignore,
        },
        FileType::Regular | FileType::Link => {
            if filter.includes_files() {
                ChildAction::Execute
            } else {
                ChildAction::Ignore
            }
        }
    }
}

/// What happens to an expanded directory once its children are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelfDisposition {
    /// Queue for the deepest-first directory pass
    Defer,
    /// No activity applies; mark SKIPPED so the request can still complete
    Skip,
}

pub(crate) fn self_disposition(filter: TargetFilter) -> SelfDisposition {
    if filter.includes_dirs() {
        SelfDisposition::Defer
    } else {
        SelfDisposition::Skip
    }
}

/// Blocking listing body, run on the blocking pool under a listing permit
///
/// Streams children back to the driver one event at a time. The cancel flag
/// is checked before every child so a cancelled job aborts mid-directory.
pub(crate) fn list_children(ctx: &JobContext, path: &str) -> NamespaceResult<()> {
    let entries = ctx
        .lister
        .list(&ctx.security, path, ctx.activity.required_attributes())?;

    for entry in entries {
        if ctx.cancelled.load(Ordering::SeqCst) {
            return Err(NamespaceError::Interrupted);
        }
        let entry = entry?;
        if entry.is_dot() {
            continue;
        }
        ctx.events
            .blocking_send(TaskEvent::Discovered {
                parent_path: path.to_string(),
                entry,
            })
            .map_err(|_| NamespaceError::Interrupted)?;
    }

    Ok(())
}
