// src/flow/context.rs

//! Ephemeral state of one in-progress run, persisted after every transition.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::flow::task::TaskSpec;
use crate::flow::task_flow::TaskFlow;
use crate::types::RunOrigin;

/// Phase of the task-flow state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Submitting,
    AwaitingCompletion,
    Advancing,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunPhase::Succeeded | RunPhase::Failed | RunPhase::Cancelled
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Submitting => "submitting",
            RunPhase::AwaitingCompletion => "awaiting_completion",
            RunPhase::Advancing => "advancing",
            RunPhase::Succeeded => "succeeded",
            RunPhase::Failed => "failed",
            RunPhase::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Persisted pointer into a running flow.
///
/// `flow_snapshot` is a private copy taken at submission; editing the live
/// flow never reaches a run in progress. `cursor` indexes the task currently
/// executing or about to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub origin: RunOrigin,
    flow_snapshot: TaskFlow,
    pub cursor: usize,
    pub phase: RunPhase,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub task_started_at: Option<DateTime<Utc>>,
    /// blake3 over the snapshot's JSON as written, checked on load.
    #[serde(default)]
    digest: String,
}

impl RunContext {
    /// Start a context positioned on the first enabled task.
    ///
    /// Returns `None` when the flow has nothing enabled.
    pub fn start(flow: &TaskFlow, origin: RunOrigin, now: DateTime<Utc>) -> Option<Self> {
        let cursor = flow.first_enabled()?;
        let snapshot = flow.clone();
        let digest = snapshot_digest(&snapshot);
        Some(Self {
            run_id: Uuid::new_v4(),
            origin,
            flow_snapshot: snapshot,
            cursor,
            phase: RunPhase::Idle,
            started_at: now,
            task_started_at: None,
            digest,
        })
    }

    pub fn flow_snapshot(&self) -> &TaskFlow {
        &self.flow_snapshot
    }

    pub fn current_task(&self) -> Option<&TaskSpec> {
        self.flow_snapshot.at(self.cursor)
    }

    /// A cursor beyond the last index marks completion.
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.flow_snapshot.len()
    }

    /// Move the cursor to the next enabled task, or past the end.
    ///
    /// Returns `true` if there is another task to run.
    pub fn advance(&mut self) -> bool {
        self.task_started_at = None;
        match self.flow_snapshot.next_enabled_after(self.cursor) {
            Some(next) => {
                self.cursor = next;
                true
            }
            None => {
                self.cursor = self.flow_snapshot.len();
                false
            }
        }
    }

    /// Whether the stored digest matches the snapshot as it was stored.
    ///
    /// `raw_snapshot` is the `flow_snapshot` value read from the document,
    /// before typed decoding. Hashing that rather than a re-serialization
    /// keeps documents written by an older build valid after `TaskSpec`
    /// gains fields. An empty digest predates digests and is accepted.
    pub fn verify_stored(&self, raw_snapshot: &Value) -> bool {
        self.digest.is_empty() || self.digest == raw_digest(raw_snapshot)
    }
}

fn snapshot_digest(flow: &TaskFlow) -> String {
    // Serializing a TaskFlow cannot fail: every value is a plain JSON type.
    let value = serde_json::to_value(flow).unwrap_or_default();
    raw_digest(&value)
}

fn raw_digest(value: &Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}
