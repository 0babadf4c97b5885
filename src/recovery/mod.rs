// src/recovery/mod.rs

//! Crash-safe persistence of the active run and the startup protocol that
//! reconciles it with the engine.

pub mod reconcile;
pub mod store;

use serde::Serialize;

use crate::engine::RunHandle;

pub use reconcile::{ambiguous, job_matches, reconcile, ResumePoint};
pub use store::{
    open_store, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, RecoveryStore, StoredRun,
    RUN_CONTEXT_KEY,
};

/// What the startup protocol did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RecoveryReport {
    NothingToRecover,
    Resumed { handle: RunHandle, point: ResumePoint },
    /// A persisted document existed but could not be trusted.
    Discarded { reason: String },
}
