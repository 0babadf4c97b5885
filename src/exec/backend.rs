// src/exec/backend.rs

//! Pluggable engine backend abstraction.
//!
//! The runner and monitor talk to an `EngineBackend` instead of spawning
//! processes themselves, so tests can swap in a fake engine that records
//! dispatched invocations and scripts status answers.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::Invocation;
use crate::errors::Result;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Single status snapshot from the engine. No history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub is_running: bool,
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub kind: Option<String>,
}

impl EngineStatus {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn running(
        task_name: impl Into<String>,
        kind: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            is_running: true,
            task_name: Some(task_name.into()),
            started_at: Some(started_at),
            kind: Some(kind.into()),
        }
    }
}

/// The engine's three externally observable capabilities.
///
/// Production code uses [`ProcessEngine`](super::ProcessEngine); tests
/// provide their own implementation that doesn't spawn real processes.
pub trait EngineBackend: Send + Sync {
    /// Hand one job to the engine. An error means the engine rejected it or
    /// never received it.
    fn dispatch<'a>(&'a self, invocation: &'a Invocation) -> BoxFuture<'a, Result<()>>;

    /// Current job status. An error means "unknown", never "not running".
    fn status(&self) -> BoxFuture<'_, Result<EngineStatus>>;

    /// Best-effort request to terminate the current job.
    fn stop(&self) -> BoxFuture<'_, Result<()>>;
}
