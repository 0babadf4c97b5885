// tests/flow_ordering.rs

use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;

use autoflow::command::Catalog;
use autoflow::engine::{FlowCommand, FlowEvent, FlowMachine, RunOutcome};
use autoflow::flow::{RunContext, RunPhase, TaskFlow};
use autoflow::types::RunOrigin;
use autoflow_test_utils::TaskFlowBuilder;

fn flow_from(enabled: &[bool]) -> TaskFlow {
    let mut builder = TaskFlowBuilder::new();
    for (i, on) in enabled.iter().enumerate() {
        builder = builder.task(&format!("t{i}"), "fight").param("stage", "1-7");
        if !on {
            builder = builder.disabled();
        }
    }
    builder.build()
}

/// Drive the machine with a well-behaved engine: every dispatch is accepted
/// and every job finishes on the first poll.
fn drive(flow: &TaskFlow) -> (Vec<String>, Vec<RunPhase>, RunOutcome) {
    let ctx =
        RunContext::start(flow, RunOrigin::Manual, Utc::now()).expect("flow has enabled tasks");
    let mut machine = FlowMachine::new(Arc::new(Catalog::builtin()), ctx);

    let mut dispatched = Vec::new();
    let mut persisted = Vec::new();
    let mut outcome = None;
    let mut event = FlowEvent::Begin;

    for _ in 0..(flow.len() * 8 + 8) {
        let step = machine.step(event);
        let mut next = None;
        for command in step.commands {
            match command {
                FlowCommand::Persist(ctx) => persisted.push(ctx.phase),
                FlowCommand::Dispatch(invocation) => {
                    dispatched.push(invocation.label);
                    next = Some(FlowEvent::Dispatched {
                        result: Ok(()),
                        at: Utc::now(),
                    });
                }
                FlowCommand::Await => next = Some(FlowEvent::EngineIdle),
                FlowCommand::Settle(_) => next = Some(FlowEvent::SettleElapsed),
                FlowCommand::Finish(o) => outcome = Some(o),
                FlowCommand::Clear | FlowCommand::Stop | FlowCommand::Harvest { .. } => {}
            }
        }
        if !step.keep_running {
            break;
        }
        event = next.expect("a running step always yields follow-up work");
    }

    (dispatched, persisted, outcome.expect("run reached a terminal state"))
}

proptest! {
    #[test]
    fn enabled_tasks_are_dispatched_once_each_in_order(
        enabled in proptest::collection::vec(any::<bool>(), 1..12)
    ) {
        let flow = flow_from(&enabled);
        let expected: Vec<String> = enabled
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .map(|(i, _)| format!("t{i}"))
            .collect();

        if expected.is_empty() {
            prop_assert!(RunContext::start(&flow, RunOrigin::Manual, Utc::now()).is_none());
            return Ok(());
        }

        let (dispatched, persisted, outcome) = drive(&flow);
        prop_assert_eq!(dispatched, expected.clone());
        prop_assert_eq!(outcome, RunOutcome::Succeeded);

        let submits = persisted.iter().filter(|p| **p == RunPhase::Submitting).count();
        prop_assert_eq!(submits, expected.len());
    }
}
