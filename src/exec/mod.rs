// src/exec/mod.rs

//! Engine execution layer.
//!
//! The control plane never talks to the automation engine directly; it goes
//! through an [`EngineBackend`], which exposes exactly the three channels
//! the engine offers: dispatch a job, poll its status, ask it to stop.
//!
//! - [`backend`] defines the trait and the status snapshot type.
//! - [`process_engine`] is the production backend: it launches the engine
//!   executable per job and tracks the child (and a job file, so a restarted
//!   control plane can still see a job launched before the restart).
//! - [`task_runner`] supervises one engine process until it exits or is
//!   stopped.

pub mod backend;
pub mod process_engine;
pub mod task_runner;

pub use backend::{BoxFuture, EngineBackend, EngineStatus};
pub use process_engine::ProcessEngine;
