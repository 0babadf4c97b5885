pub mod builders;
pub mod fake_engine;

use std::sync::{Arc, Once};
use std::time::Duration;

use autoflow::command::Catalog;
use autoflow::engine::RunnerOptions;
use autoflow::monitor::MonitorOptions;
use autoflow::recovery::KeyValueStore;
use autoflow::service::Controller;
use tracing_subscriber::{fmt, EnvFilter};

pub use builders::{ConfigFileBuilder, TaskFlowBuilder};
pub use fake_engine::{FakeEngine, StopBehaviour};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=autoflow=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 10-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(10), f)
        .await
        .expect("Test timed out after 10 seconds")
}

/// Runner timings scaled down so whole flows finish in milliseconds.
pub fn fast_options() -> RunnerOptions {
    RunnerOptions {
        settle_delay: Duration::from_millis(5),
        launch_settle_delay: Duration::from_millis(10),
        stop_timeout: Duration::from_millis(100),
        monitor: MonitorOptions {
            poll_interval: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            lost_contact_after: Duration::from_millis(200),
            stale_after: Duration::from_secs(300),
        },
    }
}

/// Controller over a fake engine with the built-in catalog and fast timings.
pub fn controller(engine: &FakeEngine, kv: Arc<dyn KeyValueStore>) -> Arc<Controller> {
    controller_with(engine, kv, fast_options())
}

pub fn controller_with(
    engine: &FakeEngine,
    kv: Arc<dyn KeyValueStore>,
    options: RunnerOptions,
) -> Arc<Controller> {
    Arc::new(Controller::new(
        Arc::new(engine.clone()),
        Catalog::builtin(),
        kv,
        options,
    ))
}
