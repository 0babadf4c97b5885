// src/exec/process_engine.rs

//! Production engine backend: one engine process per job.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::Invocation;
use crate::errors::{AutoflowError, Result};
use crate::exec::backend::{BoxFuture, EngineBackend, EngineStatus};
use crate::exec::task_runner::{spawn_process, supervise, JobExit};
use crate::fs::{FileSystem, RealFileSystem};

/// File (under the storage dir) describing the job currently launched.
pub const JOB_FILE_NAME: &str = "engine-job.json";

/// What is known about a launched job, also persisted as the job file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobRecord {
    pid: Option<u32>,
    task_name: String,
    kind: String,
    started_at: DateTime<Utc>,
}

impl JobRecord {
    fn status(&self) -> EngineStatus {
        EngineStatus::running(self.task_name.clone(), self.kind.clone(), self.started_at)
    }
}

/// Internal handle for the engine process launched by this instance.
struct ActiveJob {
    record: JobRecord,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<JobExit>,
}

/// Launches `<program> <argv...>` per job and observes it.
///
/// At most one job runs at a time; a dispatch while busy is rejected.
pub struct ProcessEngine {
    program: String,
    task_dir: PathBuf,
    job_file: PathBuf,
    fs: Arc<dyn FileSystem>,
    active: Mutex<Option<ActiveJob>>,
}

impl std::fmt::Debug for ProcessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessEngine")
            .field("program", &self.program)
            .field("task_dir", &self.task_dir)
            .field("job_file", &self.job_file)
            .finish_non_exhaustive()
    }
}

impl ProcessEngine {
    pub fn new(program: impl Into<String>, task_dir: PathBuf, state_dir: &Path) -> Self {
        Self {
            program: program.into(),
            task_dir,
            job_file: state_dir.join(JOB_FILE_NAME),
            fs: Arc::new(RealFileSystem),
            active: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveJob>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The job currently running, whether launched by this instance or
    /// found through the job file left by a previous one.
    async fn current_job(&self) -> Result<Option<JobRecord>> {
        {
            let mut guard = self.lock();
            if let Some(job) = guard.as_ref() {
                if !job.handle.is_finished() {
                    return Ok(Some(job.record.clone()));
                }
            }
            *guard = None;
        }

        let Some(record) = self.read_job_file()? else {
            return Ok(None);
        };

        if let Some(pid) = record.pid {
            if pid_alive(pid).await {
                return Ok(Some(record));
            }
        }

        debug!(job = %record.task_name, "job file refers to a finished process; removing");
        self.fs.remove(&self.job_file)?;
        Ok(None)
    }

    fn read_job_file(&self) -> Result<Option<JobRecord>> {
        let Some(text) = self.fs.read_optional(&self.job_file)? else {
            return Ok(None);
        };
        match serde_json::from_str(&text) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(error = %e, path = ?self.job_file, "ignoring unreadable job file");
                self.fs.remove(&self.job_file)?;
                Ok(None)
            }
        }
    }

    fn write_descriptor(&self, invocation: &Invocation) -> Result<()> {
        let Some(descriptor) = invocation.descriptor() else {
            return Ok(());
        };
        let path = self.task_dir.join(format!("{}.json", invocation.label));
        let bytes = serde_json::to_vec_pretty(descriptor)?;
        self.fs.write_atomic(&path, &bytes)?;
        debug!(job = %invocation.label, path = ?path, "wrote task descriptor");
        Ok(())
    }
}

impl EngineBackend for ProcessEngine {
    fn dispatch<'a>(&'a self, invocation: &'a Invocation) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let reject = |reason: String| AutoflowError::Dispatch {
                task_id: invocation.task_id.clone(),
                reason,
            };

            if let Some(busy) = self.current_job().await? {
                return Err(reject(format!("engine busy with '{}'", busy.task_name)));
            }

            self.write_descriptor(invocation)
                .map_err(|e| reject(format!("writing task descriptor: {e}")))?;

            let argv = invocation.argv();
            let child = spawn_process(&self.program, &argv, &invocation.label)
                .map_err(|e| reject(format!("{e:#}")))?;

            let record = JobRecord {
                pid: child.id(),
                task_name: invocation.label.clone(),
                kind: invocation.kind.clone(),
                started_at: Utc::now(),
            };

            match serde_json::to_vec(&record) {
                Ok(bytes) => {
                    if let Err(e) = self.fs.write_atomic(&self.job_file, &bytes) {
                        warn!(
                            error = %e,
                            "failed to write job file; restart adoption disabled for this job"
                        );
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode job file"),
            }

            let (stop_tx, stop_rx) = oneshot::channel();
            let fs = Arc::clone(&self.fs);
            let job_file = self.job_file.clone();
            let label = invocation.label.clone();
            let handle = tokio::spawn(async move {
                let exit = supervise(label, child, stop_rx).await;
                if let Err(e) = fs.remove(&job_file) {
                    warn!(error = %e, "failed to remove job file");
                }
                exit
            });

            info!(
                job = %invocation.label,
                kind = %invocation.kind,
                program = %self.program,
                ?argv,
                "dispatched engine job"
            );

            *self.lock() = Some(ActiveJob {
                record,
                stop: Some(stop_tx),
                handle,
            });
            Ok(())
        })
    }

    fn status(&self) -> BoxFuture<'_, Result<EngineStatus>> {
        Box::pin(async move {
            Ok(match self.current_job().await? {
                Some(record) => record.status(),
                None => EngineStatus::idle(),
            })
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let job = self.lock().take();

            if let Some(mut job) = job {
                if let Some(stop) = job.stop.take() {
                    if stop.send(()).is_err() {
                        debug!(job = %job.record.task_name, "job already finished while stopping");
                    }
                }
                let exit = job
                    .handle
                    .await
                    .map_err(|e| anyhow!("engine supervisor task failed: {e}"))?;
                info!(job = %job.record.task_name, ?exit, "engine job stopped");
                return Ok(());
            }

            match self.current_job().await? {
                Some(JobRecord { pid: Some(pid), task_name, .. }) => {
                    info!(job = %task_name, pid, "stopping engine job launched before restart");
                    kill_pid(pid).await?;
                    self.fs.remove(&self.job_file)?;
                    Ok(())
                }
                Some(record) => Err(anyhow!(
                    "job '{}' has no known process id; cannot stop it",
                    record.task_name
                )
                .into()),
                None => {
                    debug!("stop requested but no engine job is running");
                    Ok(())
                }
            }
        })
    }
}

#[cfg(target_os = "linux")]
async fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
async fn pid_alive(pid: u32) -> bool {
    tokio::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
async fn pid_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
async fn kill_pid(pid: u32) -> Result<()> {
    let status = tokio::process::Command::new("kill")
        .arg(pid.to_string())
        .status()
        .await?;
    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("kill {pid} exited with {status}").into())
    }
}

#[cfg(not(unix))]
async fn kill_pid(pid: u32) -> Result<()> {
    Err(anyhow!("cannot stop process {pid} launched before restart on this platform").into())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::{InvocationPayload, SettleClass};
    use crate::flow::TaskId;
    use std::time::Duration;

    fn invocation(label: &str, command: &str, args: &[&str]) -> Invocation {
        Invocation {
            task_id: TaskId::new(label),
            kind: "fight".to_string(),
            label: label.to_string(),
            payload: InvocationPayload::Command {
                command: command.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
            },
            settle: SettleClass::Standard,
            recognition: None,
        }
    }

    async fn wait_idle(engine: &ProcessEngine) -> EngineStatus {
        for _ in 0..100 {
            let status = engine.status().await.unwrap();
            if !status.is_running {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("engine never went idle");
    }

    #[tokio::test]
    async fn short_job_runs_then_goes_idle() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ProcessEngine::new("sh", dir.path().join("tasks"), dir.path());

        engine
            .dispatch(&invocation("job-1", "-c", &["sleep 0.2"]))
            .await
            .unwrap();
        let status = engine.status().await.unwrap();
        assert!(status.is_running);
        assert_eq!(status.task_name.as_deref(), Some("job-1"));
        assert!(dir.path().join(JOB_FILE_NAME).exists());

        wait_idle(&engine).await;
        assert!(!dir.path().join(JOB_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn busy_engine_rejects_second_dispatch_and_stop_kills() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ProcessEngine::new("sh", dir.path().join("tasks"), dir.path());

        engine
            .dispatch(&invocation("long", "-c", &["sleep 30"]))
            .await
            .unwrap();
        let second = engine.dispatch(&invocation("other", "-c", &["true"])).await;
        assert!(matches!(second, Err(AutoflowError::Dispatch { .. })));

        tokio::time::timeout(Duration::from_secs(5), engine.stop())
            .await
            .unwrap()
            .unwrap();
        assert!(!engine.status().await.unwrap().is_running);
    }

    #[tokio::test]
    async fn missing_program_is_a_dispatch_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ProcessEngine::new(
            "definitely-not-an-engine-binary",
            dir.path().join("tasks"),
            dir.path(),
        );
        let res = engine.dispatch(&invocation("x", "fight", &[])).await;
        assert!(matches!(res, Err(AutoflowError::Dispatch { .. })));
    }
}
