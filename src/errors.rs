// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::extract::ExtractionError;
use crate::flow::TaskId;

#[derive(Error, Debug)]
pub enum AutoflowError {
    /// The config file itself is invalid.
    #[error("Configuration file error: {0}")]
    Config(String),

    /// A task spec could not be translated into an engine invocation.
    #[error("Task {task_id} ({kind}) cannot be translated: {reason}")]
    Configuration {
        task_id: TaskId,
        kind: String,
        reason: String,
    },

    /// The engine rejected or never received the invocation.
    #[error("Engine rejected task {task_id}: {reason}")]
    Dispatch { task_id: TaskId, reason: String },

    /// A status poll could not determine engine state.
    #[error("Engine state unknown: {0}")]
    MonitorUnknown(String),

    /// Polls kept failing past the giving-up ceiling.
    #[error("Lost contact with engine: {0}")]
    LostContact(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Persisted run cannot be reconciled: {0}")]
    ReconciliationAmbiguous(String),

    #[error("A run is already active ({0})")]
    RunActive(String),

    #[error("Flow has no enabled tasks")]
    EmptyFlow,

    #[error("Unknown run handle: {0}")]
    UnknownRun(String),

    #[error("Run {0} is not flagged as possibly stale")]
    NotStale(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, AutoflowError>;
