// src/flow/mod.rs

//! Task flows: what a run executes, and the run context that tracks it.
//!
//! - [`task`] holds a single step ([`TaskSpec`]) and its parameter values.
//! - [`task_flow`] is the ordered, individually-enabled list of steps plus
//!   the editing operations (including session parameter coupling).
//! - [`context`] is the persisted [`RunContext`] of one in-progress run.

pub mod context;
pub mod task;
pub mod task_flow;

pub use context::{RunContext, RunPhase};
pub use task::{ParamValue, TaskId, TaskSpec};
pub use task_flow::TaskFlow;
