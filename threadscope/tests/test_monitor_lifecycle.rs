mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{ids, ring, RecordingListener, ScriptedProvider};
use threadscope::config::MonitorConfig;
use threadscope::detection::{DetectionInput, DetectionResult, Detector, DetectorMetadata};
use threadscope::domain::{DetectorError, MonitorError, RawThreadState, SnapshotBatch, ThreadId, ThreadState};
use threadscope::monitor::{Monitor, MonitorListener, MonitorState};

fn fast_config() -> MonitorConfig {
    MonitorConfig::default()
        .with_sampling_interval(Duration::from_millis(50))
        .with_alert_interval(Duration::from_millis(50))
}

struct FailingListener;

impl MonitorListener for FailingListener {
    fn name(&self) -> &str {
        "failing"
    }

    fn on_snapshot(&self, _batch: &SnapshotBatch) -> anyhow::Result<()> {
        anyhow::bail!("sink unavailable")
    }
}

struct PanickingListener;

impl MonitorListener for PanickingListener {
    fn name(&self) -> &str {
        "panicking"
    }

    fn on_snapshot(&self, _batch: &SnapshotBatch) -> anyhow::Result<()> {
        panic!("listener bug")
    }
}

/// Slow export sink: blocks in `on_snapshot`.
struct SlowListener(Duration);

impl MonitorListener for SlowListener {
    fn name(&self) -> &str {
        "slow"
    }

    fn on_snapshot(&self, _batch: &SnapshotBatch) -> anyhow::Result<()> {
        std::thread::sleep(self.0);
        Ok(())
    }
}

/// Blocks in `on_started`, keeping the monitor in STARTING.
struct SlowStartListener(Duration);

impl MonitorListener for SlowStartListener {
    fn name(&self) -> &str {
        "slow-start"
    }

    fn on_snapshot(&self, _batch: &SnapshotBatch) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_started(&self) -> anyhow::Result<()> {
        std::thread::sleep(self.0);
        Ok(())
    }
}

/// Every event in arrival order.
#[derive(Default)]
struct EventLog(Mutex<Vec<&'static str>>);

impl EventLog {
    fn events(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }
}

impl MonitorListener for EventLog {
    fn name(&self) -> &str {
        "event-log"
    }

    fn on_snapshot(&self, _batch: &SnapshotBatch) -> anyhow::Result<()> {
        self.0.lock().unwrap().push("snapshot");
        Ok(())
    }

    fn on_started(&self) -> anyhow::Result<()> {
        self.0.lock().unwrap().push("started");
        Ok(())
    }

    fn on_stopped(&self) -> anyhow::Result<()> {
        self.0.lock().unwrap().push("stopped");
        Ok(())
    }
}

struct PanickingDetector;

impl Detector for PanickingDetector {
    fn name(&self) -> &str {
        "PanickingDetector"
    }

    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata::new("PanickingDetector", "panics on every batch")
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn detect(&self, _input: &DetectionInput<'_>) -> Result<Vec<DetectionResult>, DetectorError> {
        panic!("detector bug")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_double_start_runs_one_sampling_loop() {
    let provider = Arc::new(ScriptedProvider::new(ring(2)));
    let config = fast_config().with_deadlock_detection(false);
    let monitor = Monitor::new(config, provider.clone()).unwrap();

    monitor.start().unwrap();
    monitor.start().unwrap();
    assert_eq!(monitor.state(), MonitorState::Running);

    tokio::time::sleep(Duration::from_millis(500)).await;
    monitor.stop().await;

    // One loop: first tick immediately, then one per 50ms
    let calls = provider.calls();
    assert!((3..=14).contains(&calls), "provider called {calls} times");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_bounded_with_slow_provider() {
    let provider =
        Arc::new(ScriptedProvider::new(ring(2)).with_delay(Duration::from_millis(1500)));
    let config = fast_config().with_shutdown_grace(Duration::from_millis(300));
    let monitor = Monitor::new(config, provider.clone()).unwrap();

    monitor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(provider.calls() >= 1, "provider call should be in flight");

    let began = Instant::now();
    monitor.stop().await;
    assert!(began.elapsed() < Duration::from_secs(1), "stop took {:?}", began.elapsed());
    assert_eq!(monitor.state(), MonitorState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_lets_in_flight_tick_publish() {
    // One tick only: the first fires at start, the next in a minute
    let config = MonitorConfig::default()
        .with_sampling_interval(Duration::from_secs(60))
        .with_deadlock_detection(false);
    let monitor = Monitor::new(config, Arc::new(ScriptedProvider::new(ring(2)))).unwrap();
    let log = Arc::new(EventLog::default());
    monitor.add_listener(Arc::new(SlowListener(Duration::from_millis(300))));
    monitor.add_listener(log.clone());

    monitor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let began = Instant::now();
    monitor.stop().await;
    let elapsed = began.elapsed();
    assert!(elapsed >= Duration::from_millis(100), "stop returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "stop took {elapsed:?}");
    assert_eq!(log.events(), vec!["started", "snapshot", "stopped"]);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(log.events(), vec!["started", "snapshot", "stopped"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_tick_never_follows_stopped() {
    let config = MonitorConfig::default()
        .with_sampling_interval(Duration::from_secs(60))
        .with_deadlock_detection(false)
        .with_shutdown_grace(Duration::from_millis(50));
    let monitor = Monitor::new(config, Arc::new(ScriptedProvider::new(ring(2)))).unwrap();
    let log = Arc::new(EventLog::default());
    monitor.add_listener(Arc::new(SlowListener(Duration::from_millis(800))));
    monitor.add_listener(log.clone());

    monitor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let began = Instant::now();
    monitor.stop().await;
    assert!(began.elapsed() < Duration::from_millis(500), "stop took {:?}", began.elapsed());
    assert_eq!(monitor.state(), MonitorState::Stopped);

    // The slow listener finishes long after stop; the tick must not go on
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(log.events(), vec!["started", "stopped"]);
    assert_eq!(monitor.stats().ticks_completed(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_during_start_stops_after_start_completes() {
    let monitor = Arc::new(
        Monitor::new(
            fast_config().with_deadlock_detection(false),
            Arc::new(ScriptedProvider::new(ring(2))),
        )
        .unwrap(),
    );
    let log = Arc::new(EventLog::default());
    monitor.add_listener(Arc::new(SlowStartListener(Duration::from_millis(300))));
    monitor.add_listener(log.clone());

    let starter = {
        let monitor = Arc::clone(&monitor);
        tokio::task::spawn_blocking(move || monitor.start())
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(monitor.state(), MonitorState::Starting);

    monitor.stop().await;
    starter.await.unwrap().unwrap();

    assert_eq!(monitor.state(), MonitorState::Stopped);
    let events = log.events();
    assert_eq!(events.first(), Some(&"started"));
    assert_eq!(events.last(), Some(&"stopped"));
}

#[tokio::test]
async fn test_stop_before_start_is_noop() {
    let monitor =
        Monitor::new(MonitorConfig::default(), Arc::new(ScriptedProvider::default())).unwrap();
    monitor.stop().await;
    monitor.stop().await;
    assert_eq!(monitor.state(), MonitorState::Stopped);
}

#[test]
fn test_start_outside_runtime_fails() {
    let monitor =
        Monitor::new(MonitorConfig::default(), Arc::new(ScriptedProvider::default())).unwrap();
    assert!(matches!(monitor.start(), Err(MonitorError::NoRuntime)));
    assert_eq!(monitor.state(), MonitorState::Stopped);
}

#[test]
fn test_invalid_config_rejected() {
    let config = MonitorConfig::default().with_deadlock_threshold(1.5);
    let result = Monitor::new(config, Arc::new(ScriptedProvider::default()));
    assert!(matches!(result, Err(MonitorError::Config(_))));
}

#[tokio::test]
async fn test_disabled_monitor_stays_stopped() {
    let provider = Arc::new(ScriptedProvider::default());
    let monitor =
        Monitor::new(fast_config().with_enabled(false), provider.clone()).unwrap();

    monitor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(monitor.state(), MonitorState::Stopped);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_listener_failures_are_isolated() {
    let threads = vec![
        RawThreadState::new(1, "pool-1-thread-1", ThreadState::Runnable),
        RawThreadState::new(2, "main", ThreadState::Runnable),
    ];
    let monitor = Monitor::new(fast_config(), Arc::new(ScriptedProvider::new(threads))).unwrap();
    let recorder = Arc::new(RecordingListener::default());

    monitor.add_listener(Arc::new(FailingListener));
    monitor.add_listener(Arc::new(PanickingListener));
    monitor.add_listener(recorder.clone());

    monitor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(220)).await;
    monitor.stop().await;

    assert!(recorder.snapshot_count() >= 2);
    assert!(monitor.stats().listener_failures() >= 4);
    assert_eq!(*recorder.lifecycle.lock().unwrap(), vec!["started", "stopped"]);

    let snapshots = recorder.snapshots.lock().unwrap();
    assert!(snapshots.windows(2).all(|w| w[0].sequence() < w[1].sequence()));
    assert_eq!(snapshots[0].async_threads(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_provider_failures_do_not_stop_sampling() {
    let provider = Arc::new(ScriptedProvider::new(ring(2)).failing_first(3));
    let monitor = Monitor::new(fast_config().with_deadlock_detection(false), provider).unwrap();
    let recorder = Arc::new(RecordingListener::default());
    monitor.add_listener(recorder.clone());

    monitor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    monitor.stop().await;

    assert_eq!(monitor.stats().provider_failures(), 3);
    assert!(monitor.stats().ticks_completed() >= 1);
    assert!(recorder.snapshot_count() >= 1);
    assert!(monitor.stats().snapshot_age().is_some());
}

#[tokio::test]
async fn test_panicking_detector_keeps_other_results() {
    let monitor = Monitor::new(MonitorConfig::default(), Arc::new(ScriptedProvider::new(ring(2))))
        .unwrap();
    monitor.registry().register(Arc::new(PanickingDetector));

    let batch = monitor.snapshot_now().await.unwrap();

    assert_eq!(batch.deadlocks().len(), 1);
    assert_eq!(batch.deadlocks()[0].thread_ids(), &ids(&[1, 2]));
    assert_eq!(monitor.stats().detector_failures(), 1);
}

#[tokio::test]
async fn test_snapshot_now_uses_provider_hint() {
    // Threads 11-13 are parked on locks with no recorded holder
    let mut threads = ring(2);
    threads.extend((11..=13).map(|id| {
        RawThreadState::new(id, format!("blind-{id}"), ThreadState::Blocked)
            .waiting_on(common::lock(id * 10), None)
    }));
    let provider = ScriptedProvider::new(threads).with_hint(&[11, 12, 13]);
    let monitor = Monitor::new(MonitorConfig::default(), Arc::new(provider)).unwrap();

    let batch = monitor.snapshot_now().await.unwrap();

    let cycle_ids: Vec<ThreadId> = batch.deadlocks().iter().map(|c| c.cycle_id()).collect();
    assert_eq!(cycle_ids, vec![ThreadId(1), ThreadId(11)]);
    assert_eq!(batch.deadlocks()[1].thread_ids(), &ids(&[11, 12, 13]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_alert_cadence_reports_cycles() {
    let monitor = Monitor::new(
        fast_config().with_sampling_interval(Duration::from_secs(60)),
        Arc::new(ScriptedProvider::new(ring(3))),
    )
    .unwrap();
    let recorder = Arc::new(RecordingListener::default());
    monitor.add_listener(recorder.clone());

    monitor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    monitor.stop().await;

    // Three-thread cycle scores 0.9, above the default 0.8 threshold
    assert!(recorder.alert_count() >= 1);
    assert_eq!(recorder.alerts.lock().unwrap()[0][0].len(), 3);
    assert!(monitor.stats().deadlock_alerts() >= 1);
}

#[tokio::test]
async fn test_start_checks_cpu_time_support_once() {
    let provider = Arc::new(ScriptedProvider::new(ring(2)));
    let monitor = Monitor::new(fast_config(), provider.clone()).unwrap();

    monitor.start().unwrap();
    monitor.start().unwrap();
    monitor.stop().await;

    assert_eq!(provider.cpu_time_checks(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_does_not_duplicate_detectors() {
    let monitor =
        Monitor::new(fast_config(), Arc::new(ScriptedProvider::new(ring(2)))).unwrap();

    monitor.start().unwrap();
    monitor.stop().await;
    monitor.start().unwrap();
    assert!(monitor.is_running());
    monitor.stop().await;

    assert_eq!(monitor.registry().len(), 2);
}
