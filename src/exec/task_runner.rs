// src/exec/task_runner.rs

//! Supervision of a single engine process.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// How an engine process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobExit {
    Exited { code: i32, success: bool },
    /// Killed on request through the stop channel.
    Stopped,
    /// Waiting on the process failed.
    Lost(String),
}

/// Launch the engine executable with the given arguments.
///
/// The engine writes its own log; stdout/stderr are drained and logged at
/// debug level so pipe buffers never fill.
///
/// The process outlives a dropped [`Child`], so a job survives a clean
/// shutdown of the control plane and is picked up again through the job
/// file on the next start.
pub fn spawn_process(program: &str, argv: &[String], label: &str) -> Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(argv)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning '{program}' for job '{label}'"))?;

    if let Some(stdout) = child.stdout.take() {
        let label = label.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(job = %label, "stdout: {}", line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let label = label.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(job = %label, "stderr: {}", line);
            }
        });
    }

    Ok(child)
}

/// Wait for the process to exit on its own, or kill it when the stop
/// channel fires.
///
/// A dropped stop sender is not a stop request; the process keeps running
/// until it exits.
pub async fn supervise(label: String, mut child: Child, stop_rx: oneshot::Receiver<()>) -> JobExit {
    tokio::select! {
        status_res = child.wait() => exit_from(&label, status_res),

        stop = stop_rx => {
            match stop {
                Ok(()) => {
                    info!(job = %label, "stop requested; killing engine process");
                    if let Err(e) = child.kill().await {
                        warn!(job = %label, error = %e, "failed to kill engine process");
                        return JobExit::Lost(e.to_string());
                    }
                    JobExit::Stopped
                }
                Err(_) => {
                    debug!(job = %label, "stop channel dropped; waiting for natural exit");
                    exit_from(&label, child.wait().await)
                }
            }
        }
    }
}

fn exit_from(label: &str, status_res: std::io::Result<std::process::ExitStatus>) -> JobExit {
    match status_res {
        Ok(status) => {
            let code = status.code().unwrap_or(-1);
            info!(
                job = %label,
                exit_code = code,
                success = status.success(),
                "engine process exited"
            );
            JobExit::Exited {
                code,
                success: status.success(),
            }
        }
        Err(e) => {
            warn!(job = %label, error = %e, "waiting for engine process failed");
            JobExit::Lost(e.to_string())
        }
    }
}
