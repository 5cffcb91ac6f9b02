//! Terminal rendering of monitor events

use std::fmt::Write as _;

use crate::domain::{DeadlockCycle, SnapshotBatch, ThreadState};

/// One summary line per snapshot.
pub fn format_snapshot(batch: &SnapshotBatch) -> String {
    let mut line = format!(
        "[#{}] threads={} runnable={} blocked={} waiting={} async={}",
        batch.sequence(),
        batch.total_threads(),
        batch.active_threads(),
        batch.threads_in_state(ThreadState::Blocked).count(),
        batch.threads_in_state(ThreadState::Waiting).count()
            + batch.threads_in_state(ThreadState::TimedWaiting).count(),
        batch.async_threads(),
    );
    if !batch.deadlocks().is_empty() {
        let _ = write!(line, " deadlocks={}", batch.deadlocks().len());
    }
    line
}

/// Async threads of a snapshot grouped under their category, one per line.
pub fn format_async_threads(batch: &SnapshotBatch) -> Vec<String> {
    let mut rows: Vec<(String, String)> = batch
        .async_thread_records()
        .map(|t| (t.async_thread_type().to_string(), format!("{} {}", t.id(), t.name())))
        .collect();
    rows.sort();
    rows.into_iter().map(|(kind, thread)| format!("  {kind:<18} {thread}")).collect()
}

/// Alert block for the deadlock cadence.
pub fn format_alert(cycles: &[DeadlockCycle]) -> Vec<String> {
    let mut lines = vec![format!("[DEADLOCK] {} cycle(s) detected", cycles.len())];
    lines.extend(cycles.iter().map(|cycle| format!("  {cycle}")));
    lines
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::SystemTime;

    use super::*;
    use crate::domain::{
        AsyncThreadType, RawThreadState, ThreadId, ThreadStateRecord,
    };

    fn record(id: u64, name: &str, state: ThreadState) -> ThreadStateRecord {
        ThreadStateRecord::from_raw(RawThreadState::new(id, name, state), 20, SystemTime::UNIX_EPOCH)
    }

    #[test]
    fn test_snapshot_line() {
        let threads = vec![
            Arc::new(record(1, "main", ThreadState::Runnable)),
            Arc::new(
                record(2, "pool-1-thread-1", ThreadState::Waiting)
                    .with_async_info(true, AsyncThreadType::ThreadPool),
            ),
            Arc::new(record(3, "db", ThreadState::Blocked)),
        ];
        let batch = SnapshotBatch::new(9, SystemTime::UNIX_EPOCH, threads, Vec::new());

        assert_eq!(
            format_snapshot(&batch),
            "[#9] threads=3 runnable=1 blocked=1 waiting=1 async=1"
        );
        assert_eq!(format_async_threads(&batch), vec!["  THREAD_POOL        TID:2 pool-1-thread-1"]);
    }

    #[test]
    fn test_alert_block() {
        let ids: BTreeSet<ThreadId> = [ThreadId(1), ThreadId(2)].into_iter().collect();
        let lines = format_alert(&[DeadlockCycle::new(ids, 0.8).unwrap()]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "[DEADLOCK] 1 cycle(s) detected");
        assert!(lines[1].contains("TID:1"));
    }
}
