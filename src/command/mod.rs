// src/command/mod.rs

//! Command Builder: translate a [`TaskSpec`](crate::flow::TaskSpec) into an
//! engine [`Invocation`]. Pure; no state and no IO.
//!
//! - [`catalog`] knows every translatable `kind`: the engine's built-in
//!   commands plus capabilities configured at runtime.
//! - [`builder`] applies the translation rules.

pub mod builder;
pub mod catalog;

use serde::{Deserialize, Serialize};

use crate::flow::TaskId;
use crate::types::RecognitionKind;

pub use builder::build;
pub use catalog::{ArgStyle, Capability, Catalog, CatalogEntry, CommandSpec, FieldSpec};

/// How long to let the game settle after a job goes idle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleClass {
    #[default]
    Standard,
    /// The job launched an external application that needs time to come up.
    Launch,
}

/// Structured task handed to the engine as a side-channel payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// What the engine is asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "lowercase")]
pub enum InvocationPayload {
    /// `<program> <command> <args...>`
    Command { command: String, args: Vec<String> },
    /// Descriptor written next to the engine, then `<program> run <task id>`.
    Descriptor(TaskDescriptor),
}

/// A fully translated engine request for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub task_id: TaskId,
    pub kind: String,
    /// Name the engine reports back while the job runs.
    pub label: String,
    pub payload: InvocationPayload,
    pub settle: SettleClass,
    pub recognition: Option<RecognitionKind>,
}

impl Invocation {
    /// Arguments after the program name.
    pub fn argv(&self) -> Vec<String> {
        match &self.payload {
            InvocationPayload::Command { command, args } => {
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(command.clone());
                argv.extend(args.iter().cloned());
                argv
            }
            InvocationPayload::Descriptor(_) => vec!["run".to_string(), self.label.clone()],
        }
    }

    pub fn descriptor(&self) -> Option<&TaskDescriptor> {
        match &self.payload {
            InvocationPayload::Descriptor(d) => Some(d),
            InvocationPayload::Command { .. } => None,
        }
    }
}
