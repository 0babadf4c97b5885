// tests/recovery.rs

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use autoflow::engine::RunOutcome;
use autoflow::errors::AutoflowError;
use autoflow::flow::{RunContext, RunPhase, TaskFlow};
use autoflow::recovery::{
    FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, RecoveryReport, RecoveryStore,
    ResumePoint, StoredRun, RUN_CONTEXT_KEY,
};
use autoflow::types::RunOrigin;
use autoflow_test_utils::{controller, init_tracing, with_timeout, FakeEngine, TaskFlowBuilder};

fn abc() -> TaskFlow {
    TaskFlowBuilder::new()
        .task("A", "fight")
        .task("B", "fight")
        .task("C", "fight")
        .build()
}

/// A context as it would have been persisted before a crash.
fn persisted(flow: &TaskFlow, cursor: usize, phase: RunPhase) -> RunContext {
    let mut ctx = RunContext::start(flow, RunOrigin::Manual, Utc::now()).unwrap();
    ctx.cursor = cursor;
    ctx.phase = phase;
    if phase == RunPhase::AwaitingCompletion {
        ctx.task_started_at = Some(Utc::now() - ChronoDuration::seconds(30));
    }
    ctx
}

fn seeded(ctx: &RunContext) -> Arc<MemoryKeyValueStore> {
    let kv = Arc::new(MemoryKeyValueStore::new());
    RecoveryStore::new(kv.clone()).save(Some(ctx)).unwrap();
    kv
}

fn resumed(report: RecoveryReport) -> (autoflow::engine::RunHandle, ResumePoint) {
    match report {
        RecoveryReport::Resumed { handle, point } => (handle, point),
        other => panic!("expected a resumed run, got {other:?}"),
    }
}

#[tokio::test]
async fn running_cursor_task_is_awaited_not_resubmitted() {
    init_tracing();
    let engine = FakeEngine::new();
    engine.set_running("B", "fight", Utc::now() - ChronoDuration::seconds(30));
    let kv = seeded(&persisted(&abc(), 1, RunPhase::AwaitingCompletion));
    let controller = controller(&engine, kv);

    let (handle, point) = resumed(with_timeout(controller.recover()).await.unwrap());
    assert_eq!(point, ResumePoint::Await);

    let report = with_timeout(controller.wait(handle)).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(report.origin, RunOrigin::Recovered);
    assert_eq!(engine.dispatched_labels(), vec!["C".to_string()]);
    assert!(controller.recovery_store().load().unwrap().is_none());
}

#[tokio::test]
async fn idle_engine_advances_past_the_cursor_exactly_once() {
    init_tracing();
    let engine = FakeEngine::new();
    let flow = TaskFlowBuilder::new()
        .task("A", "fight")
        .task("B", "fight")
        .task("C", "fight")
        .task("D", "fight")
        .build();
    let kv = seeded(&persisted(&flow, 1, RunPhase::AwaitingCompletion));
    let controller = controller(&engine, kv);

    let (handle, point) = resumed(with_timeout(controller.recover()).await.unwrap());
    assert_eq!(point, ResumePoint::Advance);

    let report = with_timeout(controller.wait(handle)).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    let labels = engine.dispatched_labels();
    assert_eq!(labels, vec!["C".to_string(), "D".to_string()]);
    assert!(!labels.iter().any(|l| l == "B"));
}

#[tokio::test]
async fn submitting_phase_is_reconciled_by_polling_before_any_dispatch() {
    init_tracing();
    let engine = FakeEngine::new();
    engine.set_running("B", "fight", Utc::now());
    let controller = controller(&engine, seeded(&persisted(&abc(), 1, RunPhase::Submitting)));

    let (handle, point) = resumed(with_timeout(controller.recover()).await.unwrap());
    assert_eq!(point, ResumePoint::Await);
    with_timeout(controller.wait(handle)).await.unwrap();

    let events = engine.events();
    let first_poll = events.iter().position(|e| e.starts_with("poll:")).unwrap();
    let first_dispatch = events.iter().position(|e| e.starts_with("dispatch:")).unwrap();
    assert!(first_poll < first_dispatch, "events: {events:?}");
    assert_eq!(engine.dispatched_labels(), vec!["C".to_string()]);
}

#[tokio::test]
async fn foreign_job_is_awaited_then_cursor_task_is_submitted() {
    init_tracing();
    let engine = FakeEngine::new();
    engine.set_running("maintenance", "depot", Utc::now());
    let controller = controller(&engine, seeded(&persisted(&abc(), 1, RunPhase::Submitting)));

    let (handle, point) = resumed(with_timeout(controller.recover()).await.unwrap());
    assert_eq!(
        point,
        ResumePoint::AwaitForeign {
            job: Some("maintenance".to_string())
        }
    );

    let report = with_timeout(controller.wait(handle)).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(engine.dispatched_labels(), vec!["B".to_string(), "C".to_string()]);
}

#[tokio::test]
async fn unknown_kind_at_cursor_is_skipped_not_fatal() {
    init_tracing();
    let engine = FakeEngine::new();
    let flow = TaskFlowBuilder::new()
        .task("A", "fight")
        .task("X", "retired-feature")
        .task("C", "fight")
        .build();
    let kv = seeded(&persisted(&flow, 1, RunPhase::AwaitingCompletion));
    let controller = controller(&engine, kv);

    let (handle, point) = resumed(with_timeout(controller.recover()).await.unwrap());
    assert!(matches!(point, ResumePoint::Skip { .. }));

    let report = with_timeout(controller.wait(handle)).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(engine.dispatched_labels(), vec!["C".to_string()]);
}

#[tokio::test]
async fn nothing_persisted_means_nothing_to_recover() {
    let engine = FakeEngine::new();
    let controller = controller(&engine, Arc::new(MemoryKeyValueStore::new()));
    let report = with_timeout(controller.recover()).await.unwrap();
    assert!(matches!(report, RecoveryReport::NothingToRecover));
    assert_eq!(engine.poll_count(), 0);
}

#[tokio::test]
async fn corrupt_document_is_discarded_and_cleared() {
    let engine = FakeEngine::new();
    let kv = Arc::new(MemoryKeyValueStore::new());
    kv.save(RUN_CONTEXT_KEY, &json!({ "garbage": true })).unwrap();
    let controller = controller(&engine, kv.clone());

    let report = with_timeout(controller.recover()).await.unwrap();
    assert!(matches!(report, RecoveryReport::Discarded { .. }));
    assert!(kv.load(RUN_CONTEXT_KEY).unwrap().is_none());
    assert!(engine.dispatched().is_empty());
}

#[tokio::test]
async fn tampered_snapshot_fails_digest_check() {
    let engine = FakeEngine::new();
    let kv = Arc::new(MemoryKeyValueStore::new());
    let ctx = persisted(&abc(), 1, RunPhase::AwaitingCompletion);
    let mut value = serde_json::to_value(&ctx).unwrap();
    value["flow_snapshot"][2]["kind"] = json!("closedown");
    kv.save(RUN_CONTEXT_KEY, &value).unwrap();

    let store = RecoveryStore::new(kv.clone());
    assert!(matches!(store.load_checked().unwrap(), StoredRun::Corrupt(_)));

    let controller = controller(&engine, kv);
    let report = with_timeout(controller.recover()).await.unwrap();
    assert!(matches!(report, RecoveryReport::NothingToRecover));
}

#[tokio::test]
async fn snapshot_from_an_older_task_layout_still_resumes() {
    init_tracing();
    let engine = FakeEngine::new();
    let kv = Arc::new(MemoryKeyValueStore::new());
    let ctx = persisted(&abc(), 1, RunPhase::Submitting);

    // Written by a build whose tasks had no `enabled` or `params` yet.
    let mut value = serde_json::to_value(&ctx).unwrap();
    for task in value["flow_snapshot"].as_array_mut().unwrap() {
        let task = task.as_object_mut().unwrap();
        task.remove("enabled");
        task.remove("params");
    }
    let old_bytes = serde_json::to_vec(&value["flow_snapshot"]).unwrap();
    value["digest"] = json!(blake3::hash(&old_bytes).to_hex().to_string());
    kv.save(RUN_CONTEXT_KEY, &value).unwrap();

    let store = RecoveryStore::new(kv.clone());
    match store.load_checked().unwrap() {
        StoredRun::Present(loaded) => {
            assert_eq!(loaded.run_id, ctx.run_id);
            assert!(loaded.flow_snapshot().at(2).unwrap().enabled);
        }
        other => panic!("expected the older document to load, got {other:?}"),
    }

    let controller = controller(&engine, kv);
    let (handle, _) = resumed(with_timeout(controller.recover()).await.unwrap());
    let report = with_timeout(controller.wait(handle)).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(report.run_id, ctx.run_id);
    assert!(engine.dispatched_labels().contains(&"C".to_string()));
}

#[tokio::test]
async fn unreachable_engine_leaves_the_persisted_run_in_place() {
    init_tracing();
    let engine = FakeEngine::new();
    engine.fail_all_polls(true);
    let ctx = persisted(&abc(), 1, RunPhase::AwaitingCompletion);
    let controller = controller(&engine, seeded(&ctx));

    let err = with_timeout(controller.recover()).await.unwrap_err();
    assert!(matches!(err, AutoflowError::LostContact(_)));
    let still_there = controller.recovery_store().load().unwrap().unwrap();
    assert_eq!(still_there.run_id, ctx.run_id);
    assert!(engine.dispatched().is_empty());
}

#[tokio::test]
async fn file_backed_context_survives_a_new_process() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let ctx = persisted(&abc(), 1, RunPhase::AwaitingCompletion);
    {
        let kv: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::new(dir.path().to_path_buf()));
        RecoveryStore::new(kv).save(Some(&ctx)).unwrap();
    }
    assert!(dir.path().join("run_context.json").exists());

    let engine = FakeEngine::new();
    engine.set_running("B", "fight", Utc::now());
    let kv: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::new(dir.path().to_path_buf()));
    let controller = controller(&engine, kv);

    let (handle, point) = resumed(with_timeout(controller.recover()).await.unwrap());
    assert_eq!(point, ResumePoint::Await);
    assert_eq!(handle.id(), ctx.run_id);

    let report = with_timeout(controller.wait(handle)).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(engine.dispatched_labels(), vec!["C".to_string()]);
    assert!(!dir.path().join("run_context.json").exists());
}
