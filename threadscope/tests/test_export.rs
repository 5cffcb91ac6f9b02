mod common;

use std::fs;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

use common::{ring, ScriptedProvider};
use tempfile::tempdir;
use threadscope::config::MonitorConfig;
use threadscope::domain::{Pid, ThreadId, ThreadState};
use threadscope::export::{ChannelListener, JsonLinesExporter, MonitorEvent};
use threadscope::monitor::{Monitor, MonitorListener};
use threadscope::provider::{ProcfsProvider, ThreadIntrospector};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_monitor_writes_json_lines_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("snapshots.jsonl");

    let config = MonitorConfig::default()
        .with_sampling_interval(Duration::from_millis(40))
        .with_alert_interval(Duration::from_millis(40));
    let monitor = Monitor::new(config, Arc::new(ScriptedProvider::new(ring(2)))).unwrap();
    monitor.add_listener(Arc::new(JsonLinesExporter::create(&path).unwrap()));

    monitor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    monitor.stop().await;

    let lines: Vec<serde_json::Value> = BufReader::new(fs::File::open(&path).unwrap())
        .lines()
        .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
        .collect();

    assert_eq!(lines.first().unwrap()["event"], "started");
    assert_eq!(lines.last().unwrap()["event"], "stopped");

    let snapshot = lines.iter().find(|l| l["event"] == "snapshot").unwrap();
    assert_eq!(snapshot["snapshot"]["total_threads"], 2);
    assert_eq!(snapshot["snapshot"]["threads"][0]["state"], "BLOCKED");
    assert_eq!(snapshot["snapshot"]["deadlocks"][0]["thread_ids"], serde_json::json!([1, 2]));

    assert!(lines.iter().any(|l| l["event"] == "deadlock_alert"));
}

#[test]
fn test_export_to_missing_directory_fails() {
    let dir = tempdir().unwrap();
    let result = JsonLinesExporter::create(&dir.path().join("missing").join("out.jsonl"));
    assert!(result.is_err());
}

#[tokio::test]
async fn test_channel_listener_forwards_snapshot() {
    let monitor =
        Monitor::new(MonitorConfig::default(), Arc::new(ScriptedProvider::new(ring(2)))).unwrap();
    let (listener, rx) = ChannelListener::bounded(8);

    let batch = monitor.snapshot_now().await.unwrap();
    listener.on_snapshot(&batch).unwrap();
    listener.on_deadlock_alert(batch.deadlocks()).unwrap();

    assert!(matches!(rx.try_recv().unwrap(), MonitorEvent::Snapshot(b) if b.total_threads() == 2));
    assert!(matches!(rx.try_recv().unwrap(), MonitorEvent::DeadlockAlert(c) if c.len() == 1));
    assert_eq!(listener.dropped(), 0);
}

/// Lay out `<root>/<pid>/task/<tid>/{comm,stat}` like procfs does.
fn fake_task(root: &std::path::Path, pid: i32, tid: u64, comm: &str, state: char, utime: u64) {
    let dir = root.join(pid.to_string()).join("task").join(tid.to_string());
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("comm"), format!("{comm}\n")).unwrap();
    fs::write(
        dir.join("stat"),
        format!("{tid} ({comm}) {state} 1 {pid} {pid} 0 -1 4194368 0 0 0 0 {utime} 10 0 0 20 0 4 0\n"),
    )
    .unwrap();
}

#[test]
fn test_procfs_provider_reads_task_tree() {
    let root = tempdir().unwrap();
    fake_task(root.path(), 300, 300, "java", 'S', 100);
    fake_task(root.path(), 300, 301, "pool-1-thread-1", 'R', 50);
    fake_task(root.path(), 300, 302, "GC task thread#", 'D', 0);
    fake_task(root.path(), 300, 303, "stopped-one", 't', 0);

    let provider = ProcfsProvider::with_root(Pid(300), root.path()).unwrap();
    let threads = provider.fetch_all().unwrap();

    assert_eq!(threads.len(), 4);
    assert_eq!(threads[1].name, "pool-1-thread-1");
    assert_eq!(threads[1].state, ThreadState::Runnable);
    assert_eq!(threads[2].state, ThreadState::Blocked);
    assert!(threads[3].suspended);
    assert!(threads.iter().all(|t| t.lock_name.is_none() && t.stack_frames.is_empty()));
    assert!(provider.supports_cpu_time());

    let subset = provider.fetch_ids(&[ThreadId(301), ThreadId(999)]).unwrap();
    assert_eq!(subset.len(), 1);
    assert_eq!(subset[0].id, ThreadId(301));
}

#[tokio::test]
async fn test_procfs_snapshot_filters_system_threads() {
    let root = tempdir().unwrap();
    fake_task(root.path(), 77, 77, "main", 'S', 0);
    fake_task(root.path(), 77, 78, "pool-2-thread-1", 'R', 0);
    fake_task(root.path(), 77, 79, "GC task thread#", 'S', 0);

    let provider = ProcfsProvider::with_root(Pid(77), root.path()).unwrap();
    let monitor = Monitor::new(MonitorConfig::default(), Arc::new(provider)).unwrap();
    let batch = monitor.snapshot_now().await.unwrap();

    assert_eq!(batch.total_threads(), 2);
    assert_eq!(batch.async_threads(), 1);
    assert!(batch.deadlocks().is_empty());
}
