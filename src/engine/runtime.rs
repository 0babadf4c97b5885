// src/engine/runtime.rs

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::command::SettleClass;
use crate::engine::core::FlowMachine;
use crate::engine::{
    FailureKind, FlowCommand, FlowEvent, Harvest, RunFailure, RunOutcome, RunReport,
};
use crate::exec::EngineBackend;
use crate::extract::LogExtractor;
use crate::flow::RunContext;
use crate::monitor::{cancelled, AwaitOutcome, ExecutionMonitor, MonitorOptions};
use crate::recovery::RecoveryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
    pub settle_delay: Duration,
    pub launch_settle_delay: Duration,
    pub stop_timeout: Duration,
    pub monitor: MonitorOptions,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            launch_settle_delay: Duration::from_secs(15),
            stop_timeout: Duration::from_secs(10),
            monitor: MonitorOptions::default(),
        }
    }
}

impl RunnerOptions {
    fn settle(&self, class: SettleClass) -> Duration {
        match class {
            SettleClass::Standard => self.settle_delay,
            SettleClass::Launch => self.launch_settle_delay,
        }
    }
}

/// State of the active run visible to the controller while it executes.
#[derive(Debug, Default)]
pub struct RunShared {
    context: Mutex<Option<RunContext>>,
    possibly_stale: AtomicBool,
}

impl RunShared {
    pub fn context(&self) -> Option<RunContext> {
        self.context.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn publish(&self, ctx: Option<RunContext>) {
        *self.context.lock().unwrap_or_else(|e| e.into_inner()) = ctx;
    }

    pub fn possibly_stale(&self) -> bool {
        self.possibly_stale.load(Ordering::SeqCst)
    }

    pub(crate) fn stale_flag(&self) -> &AtomicBool {
        &self.possibly_stale
    }
}

/// Async shell around [`FlowMachine`]: performs the IO each command asks
/// for and feeds the result back as the next event.
pub struct FlowRunner {
    machine: FlowMachine,
    engine: Arc<dyn EngineBackend>,
    monitor: ExecutionMonitor,
    store: RecoveryStore,
    extractor: Option<Arc<LogExtractor>>,
    options: RunnerOptions,
    cancel: watch::Receiver<bool>,
    confirm: Arc<Notify>,
    shared: Arc<RunShared>,
}

impl fmt::Debug for FlowRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRunner")
            .field("machine", &self.machine)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl FlowRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        machine: FlowMachine,
        engine: Arc<dyn EngineBackend>,
        store: RecoveryStore,
        extractor: Option<Arc<LogExtractor>>,
        options: RunnerOptions,
        cancel: watch::Receiver<bool>,
        confirm: Arc<Notify>,
        shared: Arc<RunShared>,
    ) -> Self {
        let monitor = ExecutionMonitor::new(Arc::clone(&engine), options.monitor);
        shared.publish(Some(machine.context().clone()));
        Self {
            machine,
            engine,
            monitor,
            store,
            extractor,
            options,
            cancel,
            confirm,
            shared,
        }
    }

    /// Drive the run to a terminal state, starting with `first`.
    pub async fn run(mut self, first: FlowEvent) -> RunReport {
        let ctx = self.machine.context();
        let mut report = RunReport {
            run_id: ctx.run_id,
            origin: ctx.origin,
            outcome: RunOutcome::Cancelled,
            submitted: Vec::new(),
            harvested: Vec::new(),
            started_at: ctx.started_at,
            finished_at: ctx.started_at,
        };
        info!(run_id = %report.run_id, origin = %report.origin, "run started");

        let mut finished = None;
        let mut next = Some(first);

        while let Some(event) = next.take() {
            debug!(run_id = %report.run_id, ?event, "flow event");
            let step = self.machine.step(event);

            for command in step.commands {
                if let FlowCommand::Finish(outcome) = command {
                    finished = Some(outcome);
                    continue;
                }
                if let Some(event) = self.execute(command, &mut report).await {
                    next = Some(event);
                    break;
                }
            }

            if !step.keep_running {
                break;
            }
        }

        report.outcome = finished.unwrap_or_else(|| {
            error!(run_id = %report.run_id, "flow stopped without a terminal state");
            let ctx = self.machine.context();
            RunOutcome::Failed(RunFailure {
                kind: FailureKind::Stalled,
                task_id: ctx.current_task().map(|t| t.id().clone()),
                cursor: ctx.cursor,
                reason: "no follow-up event".to_string(),
            })
        });
        if !self.machine.is_done() {
            self.clear();
        }
        report.finished_at = Utc::now();

        info!(
            run_id = %report.run_id,
            outcome = ?report.outcome,
            submitted = report.submitted.len(),
            "run finished"
        );
        report
    }

    async fn execute(&mut self, command: FlowCommand, report: &mut RunReport) -> Option<FlowEvent> {
        match command {
            FlowCommand::Persist(ctx) => {
                if let Err(e) = self.store.save(Some(&ctx)) {
                    error!(
                        run_id = %ctx.run_id,
                        cursor = ctx.cursor,
                        error = %e,
                        "failed to persist run context"
                    );
                }
                self.shared.publish(Some(ctx));
                None
            }
            FlowCommand::Clear => {
                self.clear();
                None
            }
            FlowCommand::Dispatch(invocation) => {
                if *self.cancel.borrow() {
                    return Some(FlowEvent::CancelRequested);
                }
                let result = self.engine.dispatch(&invocation).await;
                let at = Utc::now();
                match result {
                    Ok(()) => {
                        info!(
                            task = %invocation.task_id,
                            kind = %invocation.kind,
                            "engine accepted task"
                        );
                        report.submitted.push(invocation.task_id.clone());
                        Some(FlowEvent::Dispatched { result: Ok(()), at })
                    }
                    Err(e) => Some(FlowEvent::Dispatched {
                        result: Err(e.to_string()),
                        at,
                    }),
                }
            }
            FlowCommand::Await => {
                let outcome = self
                    .monitor
                    .await_idle(&mut self.cancel, &self.confirm, self.shared.stale_flag())
                    .await;
                Some(match outcome {
                    AwaitOutcome::Idle => FlowEvent::EngineIdle,
                    AwaitOutcome::StaleConfirmed => FlowEvent::StaleConfirmed,
                    AwaitOutcome::Cancelled => FlowEvent::CancelRequested,
                    AwaitOutcome::LostContact(reason) => FlowEvent::LostContact(reason),
                })
            }
            FlowCommand::Settle(class) => {
                let delay = self.options.settle(class);
                debug!(?class, ?delay, "settling before next task");
                tokio::select! {
                    biased;
                    _ = cancelled(&mut self.cancel) => Some(FlowEvent::CancelRequested),
                    _ = tokio::time::sleep(delay) => Some(FlowEvent::SettleElapsed),
                }
            }
            FlowCommand::Stop => {
                match tokio::time::timeout(self.options.stop_timeout, self.engine.stop()).await {
                    Ok(Ok(())) => info!("engine acknowledged stop"),
                    Ok(Err(e)) => warn!(error = %e, "engine stop failed; continuing"),
                    Err(_) => warn!(
                        timeout = ?self.options.stop_timeout,
                        "engine stop timed out; continuing"
                    ),
                }
                Some(FlowEvent::StopFinished)
            }
            FlowCommand::Harvest { task_id, kind } => {
                let harvest = match &self.extractor {
                    Some(extractor) => match extractor.extract_latest(kind).await {
                        Ok(result) => Harvest {
                            task_id,
                            kind,
                            result: Some(result),
                            error: None,
                        },
                        Err(e) => Harvest {
                            task_id,
                            kind,
                            result: None,
                            error: Some(e.to_string()),
                        },
                    },
                    None => {
                        debug!(%kind, "no engine log configured; skipping harvest");
                        Harvest {
                            task_id,
                            kind,
                            result: None,
                            error: Some("no engine log configured".to_string()),
                        }
                    }
                };
                report.harvested.push(harvest);
                None
            }
            FlowCommand::Finish(_) => None,
        }
    }

    fn clear(&self) {
        if let Err(e) = self.store.save(None) {
            error!(error = %e, "failed to clear persisted run context");
        }
        self.shared.publish(None);
        self.shared.stale_flag().store(false, Ordering::SeqCst);
    }
}
