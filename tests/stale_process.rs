// tests/stale_process.rs
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use autoflow::command::Catalog;
use autoflow::engine::RunOutcome;
use autoflow::exec::ProcessEngine;
use autoflow::flow::{TaskFlow, TaskId, TaskSpec};
use autoflow::recovery::MemoryKeyValueStore;
use autoflow::service::{Controller, ControllerStatus};
use autoflow::types::RunOrigin;
use autoflow_test_utils::{fast_options, init_tracing, with_timeout};

/// Engine stand-in: `fight hang` never returns, any other job exits at once.
fn write_engine_script(dir: &Path) -> String {
    let path = dir.join("engine.sh");
    std::fs::write(&path, "#!/bin/sh\n[ \"$2\" = \"hang\" ] && exec sleep 30\nexit 0\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

#[tokio::test]
async fn confirmed_stale_process_is_killed_so_the_next_task_can_run() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let program = write_engine_script(dir.path());
    let engine = ProcessEngine::new(program, dir.path().join("tasks"), dir.path());

    let mut options = fast_options();
    options.monitor.stale_after = Duration::from_millis(1);
    options.stop_timeout = Duration::from_secs(5);
    let controller = Arc::new(Controller::new(
        Arc::new(engine),
        Catalog::builtin(),
        Arc::new(MemoryKeyValueStore::new()),
        options,
    ));

    let flow = TaskFlow::new(vec![
        TaskSpec::with_id(TaskId::new("a"), "fight").param("stage", "hang"),
        TaskSpec::with_id(TaskId::new("b"), "fight").param("stage", "1-7"),
    ]);
    let handle = controller.submit_flow(flow, RunOrigin::Manual).unwrap();

    with_timeout(async {
        loop {
            if let ControllerStatus::Active { possibly_stale: true, .. } = controller.get_status() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    controller.confirm_stale(handle).unwrap();
    let report = with_timeout(controller.wait(handle)).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Succeeded);
    assert_eq!(report.submitted, vec![TaskId::new("a"), TaskId::new("b")]);
}
