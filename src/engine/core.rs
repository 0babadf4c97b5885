// src/engine/core.rs

//! Pure flow state machine.
//!
//! `Idle -> Submitting -> AwaitingCompletion -> Advancing -> (Submitting |
//! Succeeded | Failed | Cancelled)`.
//!
//! [`FlowMachine::step`] consumes one [`FlowEvent`] and returns the
//! commands the async shell ([`FlowRunner`](super::FlowRunner)) must carry
//! out. Every transition that changes the run context emits a `Persist`
//! before any command that talks to the engine. No Tokio, no IO.

use std::sync::Arc;

use crate::command::Catalog;
use crate::engine::event_handlers::{
    advance, handle_cancel, handle_dispatched, handle_job_finished, handle_lost_contact,
    handle_resume, handle_settled, handle_stale_confirmed, handle_stop_finished,
    submit_current, FlowStep, MachineState,
};
use crate::engine::FlowEvent;
use crate::flow::{RunContext, RunPhase};

#[derive(Debug)]
pub struct FlowMachine {
    catalog: Arc<Catalog>,
    state: MachineState,
    done: bool,
}

impl FlowMachine {
    pub fn new(catalog: Arc<Catalog>, ctx: RunContext) -> Self {
        Self {
            catalog,
            state: MachineState::new(ctx),
            done: false,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.state.ctx
    }

    pub fn phase(&self) -> RunPhase {
        self.state.ctx.phase
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn step(&mut self, event: FlowEvent) -> FlowStep {
        if self.done {
            return FlowStep::default();
        }

        let catalog = self.catalog.as_ref();
        let state = &mut self.state;
        let step = match event {
            FlowEvent::Begin => {
                if state.ctx.current_task().is_some_and(|t| t.enabled) {
                    submit_current(state, catalog)
                } else {
                    // A cursor on a disabled entry only happens for hand-built
                    // contexts; move to the next enabled task.
                    advance(state, catalog)
                }
            }
            FlowEvent::Resume(point) => handle_resume(state, catalog, point),
            FlowEvent::Dispatched { result, at } => handle_dispatched(state, result, at),
            FlowEvent::EngineIdle => handle_job_finished(state, catalog),
            FlowEvent::StaleConfirmed => handle_stale_confirmed(state),
            FlowEvent::SettleElapsed => handle_settled(state, catalog),
            FlowEvent::LostContact(reason) => handle_lost_contact(state, reason),
            FlowEvent::CancelRequested => handle_cancel(state),
            FlowEvent::StopFinished => handle_stop_finished(state, catalog),
        };

        if !step.keep_running {
            self.done = true;
        }
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Capability, SettleClass};
    use crate::engine::{FailureKind, FlowCommand, RunOutcome};
    use crate::flow::{TaskFlow, TaskId, TaskSpec};
    use crate::recovery::ResumePoint;
    use crate::types::{RecognitionKind, RunOrigin};
    use chrono::Utc;

    fn task(id: &str, kind: &str) -> TaskSpec {
        TaskSpec::with_id(TaskId::new(id), kind)
    }

    fn machine(flow: TaskFlow) -> FlowMachine {
        let ctx = RunContext::start(&flow, RunOrigin::Manual, Utc::now()).unwrap();
        FlowMachine::new(Arc::new(Catalog::builtin()), ctx)
    }

    fn dispatched_label(step: &FlowStep) -> Option<String> {
        step.commands.iter().find_map(|c| match c {
            FlowCommand::Dispatch(inv) => Some(inv.label.clone()),
            _ => None,
        })
    }

    fn ok() -> FlowEvent {
        FlowEvent::Dispatched {
            result: Ok(()),
            at: Utc::now(),
        }
    }

    fn outcome(step: &FlowStep) -> Option<&RunOutcome> {
        step.commands.iter().find_map(|c| match c {
            FlowCommand::Finish(o) => Some(o),
            _ => None,
        })
    }

    #[test]
    fn persists_before_every_dispatch() {
        let flow: TaskFlow = vec![
            task("a", "startup").param("client_type", "Official"),
            task("b", "fight").param("stage", "1-7").disabled(),
            task("c", "closedown").param("client_type", "Official"),
        ]
        .into_iter()
        .collect();
        let mut m = machine(flow);

        let step = m.step(FlowEvent::Begin);
        assert!(matches!(
            step.commands[0],
            FlowCommand::Persist(ref ctx) if ctx.phase == RunPhase::Submitting && ctx.cursor == 0
        ));
        assert_eq!(dispatched_label(&step).as_deref(), Some("a"));

        let step = m.step(ok());
        assert!(matches!(step.commands[..], [FlowCommand::Persist(_), FlowCommand::Await]));

        let step = m.step(FlowEvent::EngineIdle);
        assert!(matches!(step.commands.last(), Some(FlowCommand::Settle(SettleClass::Launch))));

        let step = m.step(FlowEvent::SettleElapsed);
        assert!(matches!(step.commands[0], FlowCommand::Persist(ref ctx) if ctx.cursor == 2));
        assert_eq!(dispatched_label(&step).as_deref(), Some("c"));

        m.step(ok());
        let step = m.step(FlowEvent::EngineIdle);
        assert!(matches!(step.commands.last(), Some(FlowCommand::Settle(SettleClass::Standard))));

        let step = m.step(FlowEvent::SettleElapsed);
        assert!(!step.keep_running);
        assert!(matches!(step.commands[0], FlowCommand::Clear));
        assert_eq!(outcome(&step), Some(&RunOutcome::Succeeded));
        assert!(m.is_done());
    }

    #[test]
    fn dispatch_failure_fails_without_advancing() {
        let flow: TaskFlow = vec![task("a", "fight"), task("b", "fight")].into_iter().collect();
        let mut m = machine(flow);
        m.step(FlowEvent::Begin);

        let step = m.step(FlowEvent::Dispatched {
            result: Err("engine busy".into()),
            at: Utc::now(),
        });
        match outcome(&step) {
            Some(RunOutcome::Failed(f)) => {
                assert_eq!(f.kind, FailureKind::Dispatch);
                assert_eq!(f.task_id, Some(TaskId::new("a")));
                assert_eq!(f.cursor, 0);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(m.context().cursor, 0);
    }

    #[test]
    fn untranslatable_task_aborts_at_its_cursor() {
        let flow: TaskFlow = vec![task("a", "fight"), task("b", "warp-drive")]
            .into_iter()
            .collect();
        let mut m = machine(flow);
        m.step(FlowEvent::Begin);
        m.step(ok());
        m.step(FlowEvent::EngineIdle);
        let step = m.step(FlowEvent::SettleElapsed);

        match outcome(&step) {
            Some(RunOutcome::Failed(f)) => {
                assert_eq!(f.kind, FailureKind::Configuration);
                assert_eq!(f.cursor, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(dispatched_label(&step).is_none());
    }

    #[test]
    fn cancel_before_dispatch_needs_no_stop() {
        let flow: TaskFlow = vec![task("a", "fight")].into_iter().collect();
        let mut m = machine(flow);
        m.step(FlowEvent::Begin);
        let step = m.step(FlowEvent::CancelRequested);
        assert_eq!(outcome(&step), Some(&RunOutcome::Cancelled));
        assert!(!step.commands.iter().any(|c| matches!(c, FlowCommand::Stop)));
    }

    #[test]
    fn cancel_while_awaiting_stops_the_engine_first() {
        let flow: TaskFlow = vec![task("a", "fight")].into_iter().collect();
        let mut m = machine(flow);
        m.step(FlowEvent::Begin);
        m.step(ok());

        let step = m.step(FlowEvent::CancelRequested);
        assert!(matches!(step.commands[..], [FlowCommand::Stop]));
        assert!(step.keep_running);

        let step = m.step(FlowEvent::StopFinished);
        assert_eq!(outcome(&step), Some(&RunOutcome::Cancelled));
        assert_eq!(m.phase(), RunPhase::Cancelled);
    }

    #[test]
    fn confirmed_stale_job_is_stopped_before_advancing() {
        let flow: TaskFlow = vec![task("a", "fight"), task("b", "fight")].into_iter().collect();
        let mut m = machine(flow);
        m.step(FlowEvent::Begin);
        m.step(ok());

        let step = m.step(FlowEvent::StaleConfirmed);
        assert!(matches!(step.commands[..], [FlowCommand::Stop]));
        assert_eq!(m.phase(), RunPhase::AwaitingCompletion);

        let step = m.step(FlowEvent::StopFinished);
        assert!(matches!(
            step.commands[0],
            FlowCommand::Persist(ref ctx) if ctx.phase == RunPhase::Advancing
        ));
        assert!(matches!(step.commands.last(), Some(FlowCommand::Settle(_))));

        let step = m.step(FlowEvent::SettleElapsed);
        assert_eq!(dispatched_label(&step).as_deref(), Some("b"));
    }

    #[test]
    fn lost_contact_is_a_distinct_failure() {
        let flow: TaskFlow = vec![task("a", "fight")].into_iter().collect();
        let mut m = machine(flow);
        m.step(FlowEvent::Begin);
        m.step(ok());
        let step = m.step(FlowEvent::LostContact("timeout".into()));
        assert!(matches!(
            outcome(&step),
            Some(RunOutcome::Failed(f)) if f.kind == FailureKind::LostContact
        ));
    }

    #[test]
    fn recognition_tasks_are_harvested() {
        let flow: TaskFlow = vec![task("d", "depot")].into_iter().collect();
        let mut m = machine(flow);
        m.step(FlowEvent::Begin);
        m.step(ok());
        let step = m.step(FlowEvent::EngineIdle);
        assert!(step.commands.iter().any(|c| matches!(
            c,
            FlowCommand::Harvest { kind: RecognitionKind::Inventory, .. }
        )));
    }

    #[test]
    fn resume_await_does_not_resubmit() {
        let flow: TaskFlow = vec![task("A", "fight"), task("B", "fight"), task("C", "fight")]
            .into_iter()
            .collect();
        let mut ctx = RunContext::start(&flow, RunOrigin::Recovered, Utc::now()).unwrap();
        ctx.cursor = 1;
        let mut m = FlowMachine::new(Arc::new(Catalog::builtin()), ctx);

        let step = m.step(FlowEvent::Resume(ResumePoint::Await));
        assert!(dispatched_label(&step).is_none());
        assert!(matches!(step.commands.last(), Some(FlowCommand::Await)));

        m.step(FlowEvent::EngineIdle);
        let step = m.step(FlowEvent::SettleElapsed);
        assert_eq!(dispatched_label(&step).as_deref(), Some("C"));
    }

    #[test]
    fn resume_advance_submits_next_task_once() {
        let flow: TaskFlow = vec![task("A", "fight"), task("B", "fight"), task("C", "fight")]
            .into_iter()
            .collect();
        let mut ctx = RunContext::start(&flow, RunOrigin::Recovered, Utc::now()).unwrap();
        ctx.cursor = 1;
        let mut m = FlowMachine::new(Arc::new(Catalog::builtin()), ctx);

        let step = m.step(FlowEvent::Resume(ResumePoint::Advance));
        assert_eq!(dispatched_label(&step).as_deref(), Some("C"));
    }

    #[test]
    fn resume_foreign_job_resubmits_after_idle() {
        let flow: TaskFlow = vec![task("A", "fight"), task("B", "fight")].into_iter().collect();
        let mut m = machine(flow);

        let step = m.step(FlowEvent::Resume(ResumePoint::AwaitForeign {
            job: Some("x".into()),
        }));
        assert!(matches!(step.commands.last(), Some(FlowCommand::Await)));

        let step = m.step(FlowEvent::EngineIdle);
        assert_eq!(dispatched_label(&step).as_deref(), Some("A"));
    }

    #[test]
    fn resume_skip_moves_to_next_enabled() {
        let flow: TaskFlow = vec![
            task("A", "fight"),
            task("B", "fight").disabled(),
            task("C", "fight"),
        ]
        .into_iter()
        .collect();
        let mut m = machine(flow);
        let step = m.step(FlowEvent::Resume(ResumePoint::Skip {
            reason: "gone".into(),
        }));
        assert_eq!(dispatched_label(&step).as_deref(), Some("C"));
    }

    #[test]
    fn capability_tasks_dispatch_descriptors() {
        let flow: TaskFlow = vec![task("cap", "custom").param("threshold", "0.3")]
            .into_iter()
            .collect();
        let ctx = RunContext::start(&flow, RunOrigin::Manual, Utc::now()).unwrap();
        let catalog = Catalog::builtin().with_capability(Capability::new("custom", "Custom"));
        let mut m = FlowMachine::new(Arc::new(catalog), ctx);
        let step = m.step(FlowEvent::Begin);
        let inv = step
            .commands
            .iter()
            .find_map(|c| match c {
                FlowCommand::Dispatch(inv) => Some(inv),
                _ => None,
            })
            .unwrap();
        assert!(inv.descriptor().is_some());
    }

    #[test]
    fn out_of_order_event_fails_instead_of_hanging() {
        let flow: TaskFlow = vec![task("a", "fight")].into_iter().collect();
        let mut m = machine(flow);
        m.step(FlowEvent::Begin);
        let step = m.step(FlowEvent::SettleElapsed);
        assert!(matches!(
            outcome(&step),
            Some(RunOutcome::Failed(f)) if f.kind == FailureKind::Stalled
        ));
        assert!(m.step(FlowEvent::Begin).commands.is_empty());
    }
}
