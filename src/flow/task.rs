// src/flow/task.rs

//! A single step of a flow.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable task identity, kept across persistence round-trips and reorders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random identity for a task created without an explicit id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A producer-supplied parameter value.
///
/// Untagged so that both TOML (`stage = "1-7"`, `times = 3`) and JSON
/// snapshots map onto it directly. TOML has no null; JSON snapshots may.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Absent, null, blank text and empty lists are never emitted.
    pub fn is_empty(&self) -> bool {
        match self {
            ParamValue::Null => true,
            ParamValue::Text(s) => s.trim().is_empty(),
            ParamValue::List(items) => items.iter().all(ParamValue::is_empty),
            ParamValue::Bool(_) | ParamValue::Integer(_) | ParamValue::Float(_) => false,
        }
    }

    /// Truthiness used for switch-style arguments.
    pub fn is_truthy(&self) -> bool {
        match self {
            ParamValue::Bool(b) => *b,
            ParamValue::Integer(n) => *n != 0,
            ParamValue::Float(f) => *f != 0.0,
            ParamValue::Text(s) => matches!(
                s.trim().to_lowercase().as_str(),
                "true" | "yes" | "on" | "1"
            ),
            ParamValue::Null | ParamValue::List(_) => false,
        }
    }

    /// Render a scalar as a single command-line token.
    ///
    /// Returns `None` for lists and nulls.
    pub fn as_arg(&self) -> Option<String> {
        match self {
            ParamValue::Bool(b) => Some(b.to_string()),
            ParamValue::Integer(n) => Some(n.to_string()),
            ParamValue::Float(f) => Some(f.to_string()),
            ParamValue::Text(s) => Some(s.trim().to_string()),
            ParamValue::Null | ParamValue::List(_) => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Integer(n)
    }
}

impl From<i32> for ParamValue {
    fn from(n: i32) -> Self {
        ParamValue::Integer(n.into())
    }
}

fn default_enabled() -> bool {
    true
}

/// One step in a flow.
///
/// `id` and `kind` are fixed at construction; `enabled` and `params` are
/// edited freely. Unknown fields in older or newer snapshots are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    id: TaskId,
    kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub params: IndexMap<String, ParamValue>,
}

impl TaskSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self::with_id(TaskId::generate(), kind)
    }

    pub fn with_id(id: TaskId, kind: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            enabled: true,
            params: IndexMap::new(),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
