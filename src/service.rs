// src/service.rs

//! Caller-facing control plane.
//!
//! [`Controller`] owns the single run slot shared by manual requests and
//! the scheduler: acquiring it is a try-acquire, so a second run is
//! rejected (manual) or skipped (scheduled), never queued.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tracing::{info, warn};

use crate::command::Catalog;
use crate::engine::{
    FlowEvent, FlowMachine, FlowRunner, RunHandle, RunReport, RunShared, RunnerOptions,
};
use crate::errors::{AutoflowError, Result};
use crate::exec::EngineBackend;
use crate::extract::{ExtractionError, LogExtractor, RecognitionResult};
use crate::flow::{RunContext, TaskFlow};
use crate::monitor::ExecutionMonitor;
use crate::recovery::{reconcile, KeyValueStore, RecoveryReport, RecoveryStore, StoredRun};
use crate::schedule::{ScheduleConfig, ScheduleStore};
use crate::types::{RecognitionKind, RunOrigin};

/// Finished reports kept for `wait` and `get_status`.
const REPORT_HISTORY: usize = 32;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ControllerStatus {
    Idle {
        #[serde(skip_serializing_if = "Option::is_none")]
        last_report: Option<RunReport>,
    },
    Active {
        handle: RunHandle,
        origin: RunOrigin,
        context: Option<RunContext>,
        possibly_stale: bool,
    },
}

struct ActiveRun {
    handle: RunHandle,
    origin: RunOrigin,
    cancel: watch::Sender<bool>,
    confirm: Arc<Notify>,
    shared: Arc<RunShared>,
    done: watch::Receiver<Option<RunReport>>,
}

pub struct Controller {
    engine: Arc<dyn EngineBackend>,
    catalog: Arc<Catalog>,
    store: RecoveryStore,
    schedules: ScheduleStore,
    extractor: Option<Arc<LogExtractor>>,
    options: RunnerOptions,
    slot: Mutex<Option<ActiveRun>>,
    schedule: Mutex<Option<ScheduleConfig>>,
    history: Mutex<VecDeque<RunReport>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("options", &self.options)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Controller {
    pub fn new(
        engine: Arc<dyn EngineBackend>,
        catalog: Catalog,
        kv: Arc<dyn KeyValueStore>,
        options: RunnerOptions,
    ) -> Self {
        Self {
            engine,
            catalog: Arc::new(catalog),
            store: RecoveryStore::new(Arc::clone(&kv)),
            schedules: ScheduleStore::new(kv),
            extractor: None,
            options,
            slot: Mutex::new(None),
            schedule: Mutex::new(None),
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<LogExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn recovery_store(&self) -> &RecoveryStore {
        &self.store
    }

    /// Start a run of `flow` now.
    ///
    /// Fails with `RunActive` while another run holds the slot and with
    /// `EmptyFlow` when nothing is enabled.
    pub fn submit_flow(self: &Arc<Self>, flow: TaskFlow, origin: RunOrigin) -> Result<RunHandle> {
        let ctx = RunContext::start(&flow, origin, Utc::now()).ok_or(AutoflowError::EmptyFlow)?;
        self.launch(ctx, FlowEvent::Begin)
    }

    fn launch(self: &Arc<Self>, ctx: RunContext, first: FlowEvent) -> Result<RunHandle> {
        let mut slot = lock(&self.slot);
        if let Some(active) = slot.as_ref() {
            return Err(AutoflowError::RunActive(active.handle.to_string()));
        }

        let handle = RunHandle::new(ctx.run_id);
        let origin = ctx.origin;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(None);
        let confirm = Arc::new(Notify::new());
        let shared = Arc::new(RunShared::default());

        let runner = FlowRunner::new(
            FlowMachine::new(Arc::clone(&self.catalog), ctx),
            Arc::clone(&self.engine),
            self.store.clone(),
            self.extractor.clone(),
            self.options,
            cancel_rx,
            Arc::clone(&confirm),
            Arc::clone(&shared),
        );

        *slot = Some(ActiveRun {
            handle,
            origin,
            cancel: cancel_tx,
            confirm,
            shared,
            done: done_rx,
        });
        drop(slot);

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let report = runner.run(first).await;
            controller.complete(report, done_tx);
        });

        info!(%handle, %origin, "run submitted");
        Ok(handle)
    }

    fn complete(&self, report: RunReport, done: watch::Sender<Option<RunReport>>) {
        let handle = report.handle();
        {
            let mut history = lock(&self.history);
            history.push_back(report.clone());
            while history.len() > REPORT_HISTORY {
                history.pop_front();
            }
        }
        {
            let mut slot = lock(&self.slot);
            if slot.as_ref().is_some_and(|a| a.handle == handle) {
                *slot = None;
            }
        }
        // Waiters must find the slot free once they see the report.
        done.send_replace(Some(report));
    }

    /// Request cooperative cancellation of the active run.
    pub fn cancel(&self, handle: RunHandle) -> Result<()> {
        let slot = lock(&self.slot);
        match slot.as_ref() {
            Some(active) if active.handle == handle => {
                info!(%handle, "cancel requested");
                active.cancel.send_replace(true);
                Ok(())
            }
            _ => Err(AutoflowError::UnknownRun(handle.to_string())),
        }
    }

    pub fn get_status(&self) -> ControllerStatus {
        if let Some(active) = lock(&self.slot).as_ref() {
            return ControllerStatus::Active {
                handle: active.handle,
                origin: active.origin,
                context: active.shared.context(),
                possibly_stale: active.shared.possibly_stale(),
            };
        }
        ControllerStatus::Idle {
            last_report: lock(&self.history).back().cloned(),
        }
    }

    /// Confirm that a job flagged as possibly stale has finished.
    pub fn confirm_stale(&self, handle: RunHandle) -> Result<()> {
        let slot = lock(&self.slot);
        match slot.as_ref() {
            Some(active) if active.handle == handle => {
                if !active.shared.possibly_stale() {
                    return Err(AutoflowError::NotStale(handle.to_string()));
                }
                info!(%handle, "operator confirmed stale job");
                active.confirm.notify_one();
                Ok(())
            }
            _ => Err(AutoflowError::UnknownRun(handle.to_string())),
        }
    }

    /// Wait for a run's terminal report.
    pub async fn wait(&self, handle: RunHandle) -> Result<RunReport> {
        let done = lock(&self.slot)
            .as_ref()
            .filter(|a| a.handle == handle)
            .map(|a| a.done.clone());

        if let Some(mut done) = done {
            if let Ok(report) = done.wait_for(Option::is_some).await {
                if let Some(report) = report.clone() {
                    return Ok(report);
                }
            }
        }

        lock(&self.history)
            .iter()
            .rev()
            .find(|r| r.handle() == handle)
            .cloned()
            .ok_or_else(|| AutoflowError::UnknownRun(handle.to_string()))
    }

    pub fn schedule(&self) -> Option<ScheduleConfig> {
        lock(&self.schedule).clone()
    }

    /// Replace the active schedule; effective from the next tick.
    pub fn set_schedule(&self, config: ScheduleConfig) -> Result<()> {
        self.schedules.save(&config)?;
        info!(enabled = config.enabled, times = config.times.len(), "schedule updated");
        *lock(&self.schedule) = Some(config);
        Ok(())
    }

    pub fn clear_schedule(&self) -> Result<()> {
        self.schedules.clear()?;
        info!("schedule cleared");
        *lock(&self.schedule) = None;
        Ok(())
    }

    /// Load the persisted schedule, or adopt `fallback` when none is stored.
    pub fn restore_schedule(&self, fallback: Option<ScheduleConfig>) -> Result<()> {
        let restored = match self.schedules.load() {
            Ok(Some(config)) => {
                info!("restored persisted schedule");
                Some(config)
            }
            Ok(None) => fallback,
            Err(e) => {
                warn!(error = %e, "persisted schedule unreadable; using configured schedule");
                fallback
            }
        };
        *lock(&self.schedule) = restored;
        Ok(())
    }

    /// Extract the latest recognition result from the engine log.
    pub async fn extract_latest(&self, kind: RecognitionKind) -> Result<RecognitionResult> {
        let Some(extractor) = &self.extractor else {
            return Err(
                ExtractionError::LogUnavailable("no engine log configured".to_string()).into(),
            );
        };
        Ok(extractor.extract_latest(kind).await?)
    }

    /// Startup protocol: reconcile a persisted run with a live poll and
    /// resume it.
    pub async fn recover(self: &Arc<Self>) -> Result<RecoveryReport> {
        if let Some(active) = lock(&self.slot).as_ref() {
            return Err(AutoflowError::RunActive(active.handle.to_string()));
        }

        let mut ctx = match self.store.load_checked()? {
            StoredRun::Absent => {
                info!("no persisted run; nothing to recover");
                return Ok(RecoveryReport::NothingToRecover);
            }
            StoredRun::Corrupt(reason) => return Ok(RecoveryReport::Discarded { reason }),
            StoredRun::Present(ctx) => ctx,
        };

        info!(run_id = %ctx.run_id, cursor = ctx.cursor, phase = %ctx.phase, "found persisted run");
        let monitor = ExecutionMonitor::new(Arc::clone(&self.engine), self.options.monitor);
        let status = monitor.poll_until_known().await?;
        let point = reconcile(&ctx, &self.catalog, &status);

        ctx.origin = RunOrigin::Recovered;
        let handle = self.launch(ctx, FlowEvent::Resume(point.clone()))?;
        Ok(RecoveryReport::Resumed { handle, point })
    }
}
