// src/monitor/mod.rs

//! Execution monitor: the polling loop that stands in for a completion
//! callback the engine does not have.
//!
//! A failed poll means "unknown", never "idle". Unknown polls are retried
//! with [`Backoff`] until no poll has succeeded for `lost_contact_after`.

mod backoff;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{AutoflowError, Result};
use crate::exec::{EngineBackend, EngineStatus};

pub use backoff::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    pub poll_interval: Duration,
    pub max_backoff: Duration,
    pub lost_contact_after: Duration,
    pub stale_after: Duration,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            lost_contact_after: Duration::from_secs(60),
            stale_after: Duration::from_secs(5 * 60),
        }
    }
}

/// How waiting for the engine to go idle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwaitOutcome {
    Idle,
    /// The operator confirmed a possibly-stale job as finished.
    StaleConfirmed,
    Cancelled,
    LostContact(String),
}

#[derive(Clone)]
pub struct ExecutionMonitor {
    engine: Arc<dyn EngineBackend>,
    options: MonitorOptions,
}

impl std::fmt::Debug for ExecutionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionMonitor")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ExecutionMonitor {
    pub fn new(engine: Arc<dyn EngineBackend>, options: MonitorOptions) -> Self {
        Self { engine, options }
    }

    pub fn options(&self) -> &MonitorOptions {
        &self.options
    }

    /// One status snapshot. Any backend failure becomes `MonitorUnknown`.
    pub async fn poll(&self) -> Result<EngineStatus> {
        self.engine.status().await.map_err(|e| match e {
            AutoflowError::MonitorUnknown(_) => e,
            other => AutoflowError::MonitorUnknown(other.to_string()),
        })
    }

    /// Running for longer than `stale_after` according to the engine's own
    /// start time.
    pub fn is_possibly_stale(&self, status: &EngineStatus, now: DateTime<Utc>) -> bool {
        if !status.is_running {
            return false;
        }
        let Some(started) = status.started_at else {
            return false;
        };
        match (now - started).to_std() {
            Ok(elapsed) => elapsed > self.options.stale_after,
            Err(_) => false,
        }
    }

    /// Poll until a status is known, retrying unknown polls with backoff.
    ///
    /// Fails with `LostContact` once no poll has succeeded for
    /// `lost_contact_after`.
    pub async fn poll_until_known(&self) -> Result<EngineStatus> {
        let mut backoff = Backoff::new(self.options.poll_interval, self.options.max_backoff);
        let since = Instant::now();
        loop {
            match self.poll().await {
                Ok(status) => return Ok(status),
                Err(e) => {
                    if since.elapsed() >= self.options.lost_contact_after {
                        return Err(AutoflowError::LostContact(e.to_string()));
                    }
                    let delay = backoff.next_delay();
                    warn!(error = %e, retry_in = ?delay, "engine status unknown; retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Poll until the engine reports idle.
    ///
    /// `stale` is raised while the job looks hung and lowered on entry.
    /// A `confirm` notification only counts while `stale` is raised.
    pub async fn await_idle(
        &self,
        cancel: &mut watch::Receiver<bool>,
        confirm: &Notify,
        stale: &AtomicBool,
    ) -> AwaitOutcome {
        let mut backoff = Backoff::new(self.options.poll_interval, self.options.max_backoff);
        let mut last_known = Instant::now();
        stale.store(false, Ordering::SeqCst);

        loop {
            if *cancel.borrow() {
                return AwaitOutcome::Cancelled;
            }

            let delay = match self.poll().await {
                Ok(status) if !status.is_running => {
                    debug!("engine reports idle");
                    stale.store(false, Ordering::SeqCst);
                    return AwaitOutcome::Idle;
                }
                Ok(status) => {
                    backoff.reset();
                    last_known = Instant::now();
                    if self.is_possibly_stale(&status, Utc::now())
                        && !stale.swap(true, Ordering::SeqCst)
                    {
                        warn!(
                            job = ?status.task_name,
                            started_at = ?status.started_at,
                            "engine job is possibly stale; waiting for operator confirmation"
                        );
                    }
                    self.options.poll_interval
                }
                Err(e) => {
                    if last_known.elapsed() >= self.options.lost_contact_after {
                        warn!(error = %e, "no successful poll within the giving-up ceiling");
                        return AwaitOutcome::LostContact(e.to_string());
                    }
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = backoff.attempts(),
                        retry_in = ?delay,
                        "engine status unknown"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancelled(cancel) => return AwaitOutcome::Cancelled,
                _ = confirm.notified() => {
                    if stale.load(Ordering::SeqCst) {
                        info!("operator confirmed stale job as finished");
                        stale.store(false, Ordering::SeqCst);
                        return AwaitOutcome::StaleConfirmed;
                    }
                    debug!("ignoring stale confirmation for a job that is not stale");
                }
            }
        }
    }
}

/// Resolves once the cancel flag is raised. A dropped sender never cancels.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}
