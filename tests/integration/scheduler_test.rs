//! Refresh scheduling through the engine facade.
//!
//! All tests run on paused tokio time; sleeping advances the virtual clock and
//! fires any timers due in between.

use super::{init_test_env, ScriptedTransport};
use source_refresh::clock::{Clock, ManualClock};
use source_refresh::{
    EngineConfig, ExecutionError, RefreshEngine, RefreshOptions, RefreshStatus, RefreshUpdate,
    RunOptions, SourceDescriptor,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MINUTE: Duration = Duration::from_secs(60);

struct Harness {
    engine: RefreshEngine,
    transport: Arc<ScriptedTransport>,
    clock: ManualClock,
    updates: Arc<Mutex<Vec<RefreshUpdate>>>,
}

impl Harness {
    fn new(script: Vec<Result<String, source_refresh::TransportError>>) -> Self {
        init_test_env();
        let transport = Arc::new(ScriptedTransport::new(script));
        let clock = ManualClock::at_unix(1_700_000_000);
        let engine = RefreshEngine::builder()
            .config(EngineConfig {
                startup_delay_ms: 1_000,
                failure_threshold: 2,
                ..EngineConfig::default()
            })
            .transport(transport.clone())
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();

        Self {
            engine,
            transport,
            clock,
            updates: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn schedule(&self, source: SourceDescriptor) {
        let sink = self.updates.clone();
        self.engine
            .setup_refresh(source, move |update| sink.lock().unwrap().push(update));
    }

    fn updates(&self) -> Vec<RefreshUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn weather(minutes: u32) -> SourceDescriptor {
    SourceDescriptor::new("weather", "https://api.example.com/weather")
        .with_refresh(RefreshOptions::every(minutes))
}

#[tokio::test(start_paused = true)]
async fn test_periodic_updates_carry_timestamps() {
    let harness = Harness::new(vec![ScriptedTransport::ok(200, "sunny")]);
    harness.schedule(weather(5));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    settle().await;

    let updates = harness.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].source_id, "weather");
    assert_eq!(updates[0].outcome.content(), "sunny");

    let now = harness.clock.now();
    assert_eq!(updates[0].refresh_options.last_refresh_at, Some(now));
    assert_eq!(
        updates[0].refresh_options.next_refresh_at,
        Some(now + chrono::Duration::minutes(5))
    );

    tokio::time::sleep(5 * MINUTE).await;
    settle().await;
    assert_eq!(harness.updates().len(), 2);
    assert_eq!(harness.transport.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_source_never_reports() {
    let harness = Harness::new(vec![ScriptedTransport::ok(200, "sunny")]);
    harness.schedule(weather(1));

    assert!(harness.engine.cancel_refresh("weather"));

    tokio::time::sleep(10 * MINUTE).await;
    settle().await;

    assert!(harness.updates().is_empty());
    assert_eq!(harness.transport.call_count(), 0);
    assert_eq!(harness.engine.refresh_status("weather"), RefreshStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_failures_reschedule_until_breaker_opens() {
    let harness = Harness::new(vec![ScriptedTransport::ok(500, "boom")]);
    harness.schedule(weather(1));

    tokio::time::sleep(Duration::from_secs(1) + 2 * MINUTE + Duration::from_millis(100)).await;
    settle().await;

    let updates = harness.updates();
    assert_eq!(updates.len(), 3);
    assert!(updates.iter().all(|u| !u.outcome.is_success()));
    assert_eq!(updates[0].outcome.content(), "HTTP 500: boom");
    assert!(updates[2].outcome.content().starts_with("circuit open for 'weather'"));

    assert_eq!(harness.transport.call_count(), 2);
    assert!(matches!(
        harness.engine.refresh_status("weather"),
        RefreshStatus::Scheduled { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_now_and_manual_overlap() {
    let harness = Harness::new(vec![ScriptedTransport::ok(200, "sunny")]);
    let mut source = weather(30);
    source.refresh_options.skip_immediate_refresh = true;
    harness.schedule(source.clone());

    assert!(harness.engine.refresh_now("weather"));
    settle().await;
    assert_eq!(harness.updates().len(), 1);

    let manual = harness.engine.execute(&source, &RunOptions::test()).await;
    assert!(manual.is_ok());
    assert_eq!(harness.transport.call_count(), 2);
    assert!(!harness.engine.refresh_now("missing"));
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_execute_is_rejected() {
    let harness = Harness::new(vec![ScriptedTransport::ok(200, "sunny")]);
    harness.transport.set_delay(Duration::from_secs(2));
    let source = weather(1);
    let opts = RunOptions::test();

    let (first, second) = tokio::join!(
        harness.engine.execute(&source, &opts),
        harness.engine.execute(&source, &opts),
    );

    assert!(first.is_ok());
    assert_eq!(second, Err(ExecutionError::AlreadyRunning("weather".to_string())));
    assert_eq!(harness.transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_fire_skipped_during_manual_run() {
    let harness = Harness::new(vec![ScriptedTransport::ok(200, "sunny")]);
    harness.transport.set_delay(Duration::from_secs(5));
    let source = weather(1);
    harness.schedule(source.clone());

    // The manual run holds the source across the scheduled fire at 1s
    let manual = harness.engine.execute(&source, &RunOptions::test()).await;
    assert!(manual.is_ok());
    settle().await;
    assert!(harness.updates().is_empty());

    tokio::time::sleep(MINUTE + Duration::from_secs(10)).await;
    settle().await;
    assert_eq!(harness.updates().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_end_session_stops_all_timers() {
    let harness = Harness::new(vec![ScriptedTransport::ok(200, "x")]);
    harness.schedule(weather(1));
    harness.schedule(
        SourceDescriptor::new("news", "https://api.example.com/news")
            .with_refresh(RefreshOptions::every(2)),
    );
    assert_eq!(harness.engine.scheduled_count(), 2);

    harness.engine.end_session();
    assert_eq!(harness.engine.scheduled_count(), 0);

    tokio::time::sleep(10 * MINUTE).await;
    settle().await;
    assert!(harness.updates().is_empty());
}
