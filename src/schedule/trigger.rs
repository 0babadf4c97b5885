// src/schedule/trigger.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::errors::AutoflowError;
use crate::service::Controller;
use crate::types::RunOrigin;

/// Default spacing between schedule evaluations.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Starts the schedule's flow at each configured time of day.
///
/// A tick that finds a run already active is a no-op; nothing is queued.
#[derive(Debug)]
pub struct SchedulerTrigger {
    controller: Arc<Controller>,
    tick: Duration,
}

impl SchedulerTrigger {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self {
            controller,
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Evaluate one tick in the window `(last_tick, now]`.
    ///
    /// Returns whether a run was started.
    pub fn evaluate(&self, last_tick: NaiveDateTime, now: NaiveDateTime) -> bool {
        let Some(schedule) = self.controller.schedule() else {
            return false;
        };
        let Some(time) = schedule.due(last_tick, now) else {
            return false;
        };

        info!(%time, "schedule time reached");
        match self.controller.submit_flow(schedule.flow, RunOrigin::Scheduled) {
            Ok(handle) => {
                info!(%handle, %time, "scheduled run started");
                true
            }
            Err(AutoflowError::RunActive(active)) => {
                info!(%time, active = %active, "run already active; skipping scheduled tick");
                false
            }
            Err(e) => {
                warn!(%time, error = %e, "scheduled run could not start");
                false
            }
        }
    }

    /// Tick until `shutdown` is raised.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Times already past when the trigger starts are not fired.
        let mut last_tick = Local::now().naive_local();
        info!(tick = ?self.tick, "scheduler trigger started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Local::now().naive_local();
                    self.evaluate(last_tick, now);
                    if now > last_tick {
                        last_tick = now;
                    } else {
                        debug!("wall clock moved backwards; keeping previous tick");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler trigger stopping");
                        break;
                    }
                }
            }
        }
    }
}
