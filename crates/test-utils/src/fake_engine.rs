use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use autoflow::command::Invocation;
use autoflow::errors::{AutoflowError, Result};
use autoflow::exec::{BoxFuture, EngineBackend, EngineStatus};

/// How the fake answers stop requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBehaviour {
    #[default]
    Ack,
    Fail,
    /// Never answers; the caller's timeout has to fire.
    Hang,
}

#[derive(Debug)]
struct Job {
    label: String,
    kind: String,
    started_at: DateTime<Utc>,
    polls_left: u32,
}

#[derive(Debug, Default)]
struct State {
    current: Option<Job>,
    dispatched: Vec<Invocation>,
    events: Vec<String>,
    rejected: HashSet<String>,
    failing_polls: u32,
    fail_all_polls: bool,
    hold: bool,
    stop: StopBehaviour,
}

/// An engine that:
/// - records every dispatched invocation and every poll/stop in order
/// - reports a job as running for `polls_per_job` polls, then idle
///   (or until `finish_current` when jobs are held)
/// - rejects labels marked with `reject` and dispatches while busy
/// - can fail status polls to simulate a lost connection
#[derive(Debug, Clone)]
pub struct FakeEngine {
    state: Arc<Mutex<State>>,
    polls_per_job: u32,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            polls_per_job: 1,
        }
    }

    pub fn with_polls_per_job(mut self, polls: u32) -> Self {
        self.polls_per_job = polls;
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn reject(&self, label: &str) {
        self.lock().rejected.insert(label.to_string());
    }

    pub fn fail_next_polls(&self, n: u32) {
        self.lock().failing_polls = n;
    }

    pub fn fail_all_polls(&self, fail: bool) {
        self.lock().fail_all_polls = fail;
    }

    /// Keep jobs running until `finish_current` is called.
    pub fn hold_jobs(&self, hold: bool) {
        self.lock().hold = hold;
    }

    pub fn set_stop_behaviour(&self, behaviour: StopBehaviour) {
        self.lock().stop = behaviour;
    }

    /// Pretend a job is already running, e.g. one launched before a restart.
    pub fn set_running(&self, label: &str, kind: &str, started_at: DateTime<Utc>) {
        let polls_left = self.polls_per_job;
        self.lock().current = Some(Job {
            label: label.to_string(),
            kind: kind.to_string(),
            started_at,
            polls_left,
        });
    }

    pub fn finish_current(&self) {
        self.lock().current = None;
    }

    pub fn is_busy(&self) -> bool {
        self.lock().current.is_some()
    }

    pub fn dispatched(&self) -> Vec<Invocation> {
        self.lock().dispatched.clone()
    }

    pub fn dispatched_labels(&self) -> Vec<String> {
        self.lock().dispatched.iter().map(|i| i.label.clone()).collect()
    }

    /// `dispatch:<label>`, `poll:running:<label>`, `poll:idle`,
    /// `poll:error`, `stop` in the order they happened.
    pub fn events(&self) -> Vec<String> {
        self.lock().events.clone()
    }

    pub fn poll_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| e.starts_with("poll:"))
            .count()
    }

    pub fn stop_count(&self) -> usize {
        self.lock().events.iter().filter(|e| *e == "stop").count()
    }

    /// Wait until at least `n` invocations were dispatched.
    pub async fn wait_for_dispatches(&self, n: usize) {
        loop {
            let count = self.lock().dispatched.len();
            if count >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

impl EngineBackend for FakeEngine {
    fn dispatch<'a>(&'a self, invocation: &'a Invocation) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.rejected.contains(&invocation.label) {
                state.events.push(format!("reject:{}", invocation.label));
                return Err(AutoflowError::Dispatch {
                    task_id: invocation.task_id.clone(),
                    reason: "rejected by fake engine".to_string(),
                });
            }
            if let Some(job) = &state.current {
                let reason = format!("engine busy with '{}'", job.label);
                return Err(AutoflowError::Dispatch {
                    task_id: invocation.task_id.clone(),
                    reason,
                });
            }
            state.events.push(format!("dispatch:{}", invocation.label));
            state.dispatched.push(invocation.clone());
            state.current = Some(Job {
                label: invocation.label.clone(),
                kind: invocation.kind.clone(),
                started_at: Utc::now(),
                polls_left: self.polls_per_job,
            });
            Ok(())
        })
    }

    fn status(&self) -> BoxFuture<'_, Result<EngineStatus>> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.fail_all_polls || state.failing_polls > 0 {
                state.failing_polls = state.failing_polls.saturating_sub(1);
                state.events.push("poll:error".to_string());
                return Err(AutoflowError::Other(anyhow::anyhow!("engine unreachable")));
            }

            let hold = state.hold;
            let status = match state.current.as_mut() {
                Some(job) if hold || job.polls_left > 0 => {
                    job.polls_left = job.polls_left.saturating_sub(1);
                    Some(EngineStatus::running(job.label.clone(), job.kind.clone(), job.started_at))
                }
                _ => None,
            };

            match status {
                Some(status) => {
                    let label = status.task_name.clone().unwrap_or_default();
                    state.events.push(format!("poll:running:{label}"));
                    Ok(status)
                }
                None => {
                    state.current = None;
                    state.events.push("poll:idle".to_string());
                    Ok(EngineStatus::idle())
                }
            }
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let behaviour = {
                let mut state = self.lock();
                state.events.push("stop".to_string());
                if state.stop == StopBehaviour::Ack {
                    state.current = None;
                }
                state.stop
            };
            match behaviour {
                StopBehaviour::Ack => Ok(()),
                StopBehaviour::Fail => Err(AutoflowError::Other(anyhow::anyhow!("stop refused"))),
                StopBehaviour::Hang => {
                    std::future::pending::<()>().await;
                    Ok(())
                }
            }
        })
    }
}
