// src/lib.rs

pub mod cli;
pub mod command;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod extract;
pub mod flow;
pub mod fs;
pub mod logging;
pub mod monitor;
pub mod recovery;
pub mod schedule;
pub mod service;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::{CliArgs, Command};
use crate::command::{build, InvocationPayload};
use crate::config::{load_and_validate, ConfigFile};
use crate::engine::RunReport;
use crate::exec::ProcessEngine;
use crate::extract::{LogExtractor, ReferenceData};
use crate::recovery::{open_store, RecoveryReport, RecoveryStore, StoredRun};
use crate::schedule::SchedulerTrigger;
use crate::service::{Controller, ControllerStatus};
use crate::types::RunOrigin;

/// High-level entry point used by `main.rs`. Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config {}", args.config))?;

    match args.command {
        Command::Plan => {
            print_plan(&cfg);
            Ok(0)
        }
        Command::Status => print_status(&cfg),
        Command::Extract { kind } => {
            let extractor = extractor(&cfg)
                .context("[engine].log_path must be set to extract results")?;
            let result = extractor.extract_latest(kind).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(0)
        }
        Command::Run => run_once(&cfg).await,
        Command::Serve => serve(&cfg).await,
    }
}

/// Wire the controller from the validated config.
pub fn build_controller(cfg: &ConfigFile) -> Arc<Controller> {
    let kv = open_store(cfg.storage.mode, cfg.storage.dir.clone());
    let engine = Arc::new(ProcessEngine::new(
        cfg.engine.program.clone(),
        cfg.engine.task_dir.clone(),
        &cfg.storage.dir,
    ));

    let mut controller = Controller::new(engine, cfg.catalog.clone(), kv, cfg.engine.runner);
    if let Some(extractor) = extractor(cfg) {
        controller = controller.with_extractor(Arc::new(extractor));
    }
    Arc::new(controller)
}

fn extractor(cfg: &ConfigFile) -> Option<LogExtractor> {
    let log_path = cfg.engine.log_path.clone()?;
    let references = ReferenceData::new(cfg.reference.dir.clone(), cfg.reference.url.clone());
    Some(LogExtractor::new(log_path, Arc::new(references)))
}

fn print_plan(cfg: &ConfigFile) {
    println!("Flow ({} tasks):", cfg.flow.len());
    for (idx, task) in cfg.flow.tasks().iter().enumerate() {
        if !task.enabled {
            println!("  [{idx}] {} ({}): disabled", task.id(), task.kind());
            continue;
        }
        match build(task, &cfg.catalog) {
            Ok(invocation) => {
                let argv = invocation.argv().join(" ");
                println!(
                    "  [{idx}] {} ({}): {} {}",
                    task.id(),
                    task.kind(),
                    cfg.engine.program,
                    argv
                );
                if let InvocationPayload::Descriptor(descriptor) = &invocation.payload {
                    let json = serde_json::to_string(descriptor).unwrap_or_default();
                    println!("        descriptor: {json}");
                }
            }
            Err(e) => println!("  [{idx}] {} ({}): ERROR {e}", task.id(), task.kind()),
        }
    }

    match &cfg.schedule {
        Some(schedule) => {
            let times: Vec<String> = schedule
                .times
                .iter()
                .map(|t| t.format("%H:%M").to_string())
                .collect();
            println!(
                "Schedule: {} at [{}] ({} tasks)",
                if schedule.enabled { "enabled" } else { "disabled" },
                times.join(", "),
                schedule.flow.len()
            );
        }
        None => println!("Schedule: none"),
    }
}

fn print_status(cfg: &ConfigFile) -> Result<i32> {
    let store = RecoveryStore::new(open_store(cfg.storage.mode, cfg.storage.dir.clone()));
    match store.load_checked()? {
        StoredRun::Present(ctx) => println!("{}", serde_json::to_string_pretty(&ctx)?),
        StoredRun::Absent => println!("No persisted run."),
        StoredRun::Corrupt(reason) => println!("Persisted run discarded: {reason}"),
    }
    Ok(0)
}

async fn run_once(cfg: &ConfigFile) -> Result<i32> {
    let controller = build_controller(cfg);
    let handle = controller.submit_flow(cfg.flow.clone(), RunOrigin::Manual)?;

    let report = tokio::select! {
        report = controller.wait(handle) => report?,
        _ = tokio::signal::ctrl_c() => {
            info!(%handle, "Ctrl-C received; cancelling run");
            controller.cancel(handle)?;
            controller.wait(handle).await?
        }
    };

    print_report(&report)?;
    Ok(if report.outcome.is_success() { 0 } else { 1 })
}

async fn serve(cfg: &ConfigFile) -> Result<i32> {
    let controller = build_controller(cfg);

    match controller.recover().await {
        Ok(RecoveryReport::NothingToRecover) => {}
        Ok(RecoveryReport::Resumed { handle, point }) => {
            info!(%handle, ?point, "resumed interrupted run")
        }
        Ok(RecoveryReport::Discarded { reason }) => warn!(%reason, "discarded persisted run"),
        Err(e) => warn!(error = %e, "recovery failed; persisted run left in place"),
    }

    controller.restore_schedule(cfg.schedule.clone())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let trigger = tokio::spawn(SchedulerTrigger::new(Arc::clone(&controller)).run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Ctrl-C received; shutting down");
    shutdown_tx.send_replace(true);

    if let ControllerStatus::Active { handle, .. } = controller.get_status() {
        controller.cancel(handle)?;
        let report = controller.wait(handle).await?;
        print_report(&report)?;
    }

    if let Err(e) = trigger.await {
        warn!(error = %e, "scheduler trigger task failed");
    }
    Ok(0)
}

fn print_report(report: &RunReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
