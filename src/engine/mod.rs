// src/engine/mod.rs

//! Task-flow orchestration.
//!
//! The pure state machine lives in [`core`] (with per-event logic in
//! [`event_handlers`]); the async shell that performs dispatch, polling,
//! persistence and settle delays is [`runtime`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::{Invocation, SettleClass};
use crate::extract::RecognitionResult;
use crate::flow::{RunContext, TaskId};
use crate::recovery::ResumePoint;
use crate::types::{RecognitionKind, RunOrigin};

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use self::core::FlowMachine;
pub use event_handlers::FlowStep;
pub use runtime::{FlowRunner, RunShared, RunnerOptions};

/// Caller-facing identity of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunHandle(Uuid);

impl RunHandle {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Events fed into the state machine by the runner.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// Start a fresh run at the context's cursor.
    Begin,
    /// Continue a persisted run from a reconciled point.
    Resume(ResumePoint),
    Dispatched {
        result: Result<(), String>,
        at: DateTime<Utc>,
    },
    EngineIdle,
    StaleConfirmed,
    LostContact(String),
    SettleElapsed,
    CancelRequested,
    /// The engine stop request was acknowledged, failed or timed out.
    StopFinished,
}

/// Work the runner performs on behalf of the state machine.
#[derive(Debug, Clone)]
pub enum FlowCommand {
    Persist(RunContext),
    Clear,
    Dispatch(Invocation),
    Await,
    Settle(SettleClass),
    Stop,
    Harvest {
        task_id: TaskId,
        kind: RecognitionKind,
    },
    Finish(RunOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Dispatch,
    LostContact,
    /// The state machine received an event it had no transition for.
    Stalled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Configuration => "configuration error",
            FailureKind::Dispatch => "dispatch error",
            FailureKind::LostContact => "lost contact",
            FailureKind::Stalled => "stalled",
        };
        f.write_str(s)
    }
}

/// Context for a run that stopped on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub task_id: Option<TaskId>,
    pub cursor: usize,
    pub reason: String,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.task_id {
            Some(id) => write!(
                f,
                "{} at task {} (cursor {}): {}",
                self.kind, id, self.cursor, self.reason
            ),
            None => write!(f, "{} at cursor {}: {}", self.kind, self.cursor, self.reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed(RunFailure),
    Cancelled,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded)
    }
}

/// Result harvested from the log after a recognition task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Harvest {
    pub task_id: TaskId,
    pub kind: RecognitionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RecognitionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal summary of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub origin: RunOrigin,
    pub outcome: RunOutcome,
    /// Tasks the engine accepted, in submission order.
    pub submitted: Vec<TaskId>,
    pub harvested: Vec<Harvest>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn handle(&self) -> RunHandle {
        RunHandle(self.run_id)
    }
}
