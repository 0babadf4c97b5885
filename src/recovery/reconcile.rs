// src/recovery/reconcile.rs

//! Matching a persisted run against a live engine poll.
//!
//! The poll is ground truth; the persisted context only says where to
//! resume from.

use serde::Serialize;
use tracing::{info, warn};

use crate::command::Catalog;
use crate::errors::AutoflowError;
use crate::exec::EngineStatus;
use crate::flow::{RunContext, TaskSpec};

/// Where a recovered run picks up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResumePoint {
    /// The cursor task is still running: wait for it, do not resubmit.
    Await,
    /// The engine is idle: the cursor task is assumed to have finished
    /// while unobserved (or was never started; the poll cannot tell).
    Advance,
    /// The engine is busy with a job that is not the cursor task. Wait for
    /// it, then submit the cursor task.
    AwaitForeign { job: Option<String> },
    /// The cursor entry cannot be matched to a known task; skip it.
    Skip { reason: String },
}

/// Whether the engine's current job is the given task.
///
/// Jobs are labelled with the task id; engines that only report the
/// command name are matched on kind.
pub fn job_matches(status: &EngineStatus, task: &TaskSpec) -> bool {
    match status.task_name.as_deref() {
        Some(name) => name == task.id().as_str() || name == task.kind(),
        None => status.kind.as_deref() == Some(task.kind()),
    }
}

pub fn reconcile(ctx: &RunContext, catalog: &Catalog, status: &EngineStatus) -> ResumePoint {
    let Some(task) = ctx.current_task() else {
        return ambiguous(format!(
            "cursor {} is outside a flow of {} tasks",
            ctx.cursor,
            ctx.flow_snapshot().len()
        ));
    };

    if !catalog.contains(task.kind()) {
        return ambiguous(format!("task {} has unknown kind '{}'", task.id(), task.kind()));
    }

    if !status.is_running {
        info!(
            run_id = %ctx.run_id,
            cursor = ctx.cursor,
            task = %task.id(),
            persisted_phase = %ctx.phase,
            "engine idle; resuming by advancing past the persisted cursor"
        );
        return ResumePoint::Advance;
    }

    if job_matches(status, task) {
        info!(
            run_id = %ctx.run_id,
            cursor = ctx.cursor,
            task = %task.id(),
            "engine still running the persisted task; resuming wait"
        );
        ResumePoint::Await
    } else {
        warn!(
            run_id = %ctx.run_id,
            cursor = ctx.cursor,
            task = %task.id(),
            job = ?status.task_name,
            "engine busy with an unrelated job; will resubmit after it finishes"
        );
        ResumePoint::AwaitForeign {
            job: status.task_name.clone(),
        }
    }
}

/// Non-fatal: the entry is skipped and the run continues after it.
pub fn ambiguous(reason: impl Into<String>) -> ResumePoint {
    ResumePoint::Skip {
        reason: AutoflowError::ReconciliationAmbiguous(reason.into()).to_string(),
    }
}
