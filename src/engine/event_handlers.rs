// src/engine/event_handlers.rs

//! Transition logic for the flow state machine.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::command::{build, Catalog, Invocation};
use crate::engine::{FailureKind, FlowCommand, RunFailure, RunOutcome};
use crate::flow::{RunContext, RunPhase};
use crate::recovery::{ambiguous, ResumePoint};

/// Decision returned after handling a single [`FlowEvent`](super::FlowEvent).
#[derive(Debug, Clone, Default)]
pub struct FlowStep {
    /// Commands for the runner, in order.
    pub commands: Vec<FlowCommand>,
    /// Whether the run continues after these commands.
    pub keep_running: bool,
}

impl FlowStep {
    fn next(commands: Vec<FlowCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    fn last(commands: Vec<FlowCommand>) -> Self {
        Self {
            commands,
            keep_running: false,
        }
    }

    fn prepend(mut self, command: FlowCommand) -> Self {
        self.commands.insert(0, command);
        self
    }
}

/// Mutable state of one run.
#[derive(Debug)]
pub struct MachineState {
    pub ctx: RunContext,
    /// Invocation for the task at the cursor, once built.
    pub current: Option<Invocation>,
    /// Set while waiting out a job that is not ours during recovery.
    pub resubmit_after_idle: bool,
    pub stopping: bool,
    /// Set while the engine is told to drop a job the operator confirmed
    /// as stale.
    pub retiring_stale: bool,
}

impl MachineState {
    pub fn new(ctx: RunContext) -> Self {
        Self {
            ctx,
            current: None,
            resubmit_after_idle: false,
            stopping: false,
            retiring_stale: false,
        }
    }
}

/// Build and dispatch the task at the cursor.
///
/// The pre-dispatch write is the persistence for this cursor position.
pub fn submit_current(state: &mut MachineState, catalog: &Catalog) -> FlowStep {
    let Some(task) = state.ctx.current_task() else {
        return succeed(state);
    };

    match build(task, catalog) {
        Ok(invocation) => {
            info!(
                run_id = %state.ctx.run_id,
                cursor = state.ctx.cursor,
                task = %task.id(),
                kind = %task.kind(),
                "submitting task"
            );
            state.ctx.phase = RunPhase::Submitting;
            state.ctx.task_started_at = None;
            state.current = Some(invocation.clone());
            FlowStep::next(vec![
                FlowCommand::Persist(state.ctx.clone()),
                FlowCommand::Dispatch(invocation),
            ])
        }
        Err(e) => fail(state, FailureKind::Configuration, e.to_string()),
    }
}

pub fn handle_dispatched(
    state: &mut MachineState,
    result: Result<(), String>,
    at: DateTime<Utc>,
) -> FlowStep {
    if state.ctx.phase != RunPhase::Submitting {
        return unexpected(state, "dispatch result");
    }
    match result {
        Ok(()) => {
            state.ctx.phase = RunPhase::AwaitingCompletion;
            state.ctx.task_started_at = Some(at);
            FlowStep::next(vec![FlowCommand::Persist(state.ctx.clone()), FlowCommand::Await])
        }
        Err(reason) => fail(state, FailureKind::Dispatch, reason),
    }
}

/// The operator confirmed the job as stale. It is still running on the
/// engine, so it has to be stopped before anything else can be dispatched.
pub fn handle_stale_confirmed(state: &mut MachineState) -> FlowStep {
    if state.ctx.phase != RunPhase::AwaitingCompletion || state.stopping || state.retiring_stale {
        return unexpected(state, "stale confirmation");
    }
    info!(
        run_id = %state.ctx.run_id,
        cursor = state.ctx.cursor,
        "stale job confirmed; stopping it"
    );
    state.retiring_stale = true;
    FlowStep::next(vec![FlowCommand::Stop])
}

/// The engine went idle, or a confirmed stale job was stopped.
pub fn handle_job_finished(state: &mut MachineState, catalog: &Catalog) -> FlowStep {
    if state.ctx.phase != RunPhase::AwaitingCompletion || state.stopping {
        return unexpected(state, "job completion");
    }

    if state.resubmit_after_idle {
        info!(
            run_id = %state.ctx.run_id,
            cursor = state.ctx.cursor,
            "unrelated job finished; submitting persisted task"
        );
        state.resubmit_after_idle = false;
        return submit_current(state, catalog);
    }

    state.ctx.phase = RunPhase::Advancing;
    let settle = state
        .current
        .as_ref()
        .map(|inv| inv.settle)
        .unwrap_or_default();

    let mut commands = vec![FlowCommand::Persist(state.ctx.clone())];
    commands.extend(harvest_for_cursor(state, catalog));
    commands.push(FlowCommand::Settle(settle));
    FlowStep::next(commands)
}

pub fn handle_settled(state: &mut MachineState, catalog: &Catalog) -> FlowStep {
    if state.ctx.phase != RunPhase::Advancing {
        return unexpected(state, "settle");
    }
    advance(state, catalog)
}

/// Move past the cursor, skipping disabled tasks, and submit the next one.
pub fn advance(state: &mut MachineState, catalog: &Catalog) -> FlowStep {
    state.ctx.phase = RunPhase::Advancing;
    state.current = None;
    if state.ctx.advance() {
        debug!(run_id = %state.ctx.run_id, cursor = state.ctx.cursor, "advanced cursor");
        submit_current(state, catalog)
    } else {
        succeed(state)
    }
}

pub fn handle_resume(state: &mut MachineState, catalog: &Catalog, point: ResumePoint) -> FlowStep {
    info!(run_id = %state.ctx.run_id, cursor = state.ctx.cursor, ?point, "resuming persisted run");
    match point {
        ResumePoint::Await => {
            let built = state.ctx.current_task().map(|task| build(task, catalog));
            match built {
                Some(Ok(invocation)) => {
                    state.current = Some(invocation);
                    state.ctx.phase = RunPhase::AwaitingCompletion;
                    FlowStep::next(vec![
                        FlowCommand::Persist(state.ctx.clone()),
                        FlowCommand::Await,
                    ])
                }
                Some(Err(e)) => handle_resume(state, catalog, ambiguous(e.to_string())),
                None => handle_resume(state, catalog, ambiguous("cursor is outside the flow")),
            }
        }
        ResumePoint::AwaitForeign { .. } => {
            state.resubmit_after_idle = true;
            state.current = None;
            state.ctx.phase = RunPhase::AwaitingCompletion;
            FlowStep::next(vec![FlowCommand::Persist(state.ctx.clone()), FlowCommand::Await])
        }
        ResumePoint::Advance => {
            let harvest = harvest_for_cursor(state, catalog);
            let step = advance(state, catalog);
            match harvest {
                Some(command) => step.prepend(command),
                None => step,
            }
        }
        ResumePoint::Skip { reason } => skip(state, catalog, reason),
    }
}

fn skip(state: &mut MachineState, catalog: &Catalog, reason: String) -> FlowStep {
    warn!(
        run_id = %state.ctx.run_id,
        cursor = state.ctx.cursor,
        %reason,
        "skipping unreconcilable entry"
    );
    advance(state, catalog)
}

pub fn handle_cancel(state: &mut MachineState) -> FlowStep {
    let dispatched = state.ctx.phase == RunPhase::AwaitingCompletion && !state.resubmit_after_idle;
    if dispatched && !state.stopping {
        info!(
            run_id = %state.ctx.run_id,
            cursor = state.ctx.cursor,
            "cancel requested; stopping engine job"
        );
        state.stopping = true;
        return FlowStep::next(vec![FlowCommand::Stop]);
    }
    info!(
        run_id = %state.ctx.run_id,
        cursor = state.ctx.cursor,
        phase = %state.ctx.phase,
        "cancel requested"
    );
    cancelled(state)
}

pub fn handle_stop_finished(state: &mut MachineState, catalog: &Catalog) -> FlowStep {
    if state.stopping {
        return cancelled(state);
    }
    if state.retiring_stale {
        state.retiring_stale = false;
        return handle_job_finished(state, catalog);
    }
    unexpected(state, "stop completion")
}

pub fn handle_lost_contact(state: &mut MachineState, reason: String) -> FlowStep {
    fail(state, FailureKind::LostContact, reason)
}

fn harvest_for_cursor(state: &MachineState, catalog: &Catalog) -> Option<FlowCommand> {
    let task = state.ctx.current_task()?;
    let kind = match &state.current {
        Some(inv) => inv.recognition,
        None => catalog.lookup(task.kind()).and_then(|e| e.recognition()),
    }?;
    Some(FlowCommand::Harvest {
        task_id: task.id().clone(),
        kind,
    })
}

fn succeed(state: &mut MachineState) -> FlowStep {
    info!(run_id = %state.ctx.run_id, "run succeeded");
    finish(state, RunPhase::Succeeded, RunOutcome::Succeeded)
}

fn cancelled(state: &mut MachineState) -> FlowStep {
    finish(state, RunPhase::Cancelled, RunOutcome::Cancelled)
}

fn fail(state: &mut MachineState, kind: FailureKind, reason: String) -> FlowStep {
    let failure = RunFailure {
        kind,
        task_id: state.ctx.current_task().map(|t| t.id().clone()),
        cursor: state.ctx.cursor,
        reason,
    };
    warn!(run_id = %state.ctx.run_id, %failure, "run failed");
    finish(state, RunPhase::Failed, RunOutcome::Failed(failure))
}

fn unexpected(state: &mut MachineState, what: &str) -> FlowStep {
    let reason = format!("unexpected {what} in phase {}", state.ctx.phase);
    fail(state, FailureKind::Stalled, reason)
}

/// Terminal states clear the persisted context so a finished run is never
/// mistaken for a stuck one.
fn finish(state: &mut MachineState, phase: RunPhase, outcome: RunOutcome) -> FlowStep {
    state.ctx.phase = phase;
    state.current = None;
    FlowStep::last(vec![FlowCommand::Clear, FlowCommand::Finish(outcome)])
}
