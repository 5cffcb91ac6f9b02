//! Scripted providers and thread fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use threadscope::domain::{
    DeadlockCycle, LockRef, ProviderError, RawThreadState, SnapshotBatch, ThreadId, ThreadState,
    ThreadStateRecord,
};
use threadscope::monitor::MonitorListener;
use threadscope::provider::ThreadIntrospector;

/// In-memory provider returning a fixed thread list.
#[derive(Default)]
pub struct ScriptedProvider {
    threads: Vec<RawThreadState>,
    deadlock_hint: BTreeSet<ThreadId>,
    delay: Duration,
    /// The first `failures` calls fail
    failures: usize,
    calls: AtomicUsize,
    cpu_time_checks: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(threads: Vec<RawThreadState>) -> Self {
        Self { threads, ..Self::default() }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_first(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_hint(mut self, ids: &[u64]) -> Self {
        self.deadlock_hint = ids.iter().copied().map(ThreadId).collect();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn cpu_time_checks(&self) -> usize {
        self.cpu_time_checks.load(Ordering::SeqCst)
    }
}

impl ThreadIntrospector for ScriptedProvider {
    fn fetch_all(&self) -> Result<Vec<RawThreadState>, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if call < self.failures {
            return Err(ProviderError::Unavailable(format!("scripted failure {call}")));
        }
        Ok(self.threads.clone())
    }

    fn supports_cpu_time(&self) -> bool {
        self.cpu_time_checks.fetch_add(1, Ordering::SeqCst);
        false
    }

    fn find_deadlocked_thread_ids(&self) -> Result<BTreeSet<ThreadId>, ProviderError> {
        Ok(self.deadlock_hint.clone())
    }
}

/// Listener recording everything it receives.
#[derive(Default)]
pub struct RecordingListener {
    pub snapshots: Mutex<Vec<SnapshotBatch>>,
    pub alerts: Mutex<Vec<Vec<DeadlockCycle>>>,
    pub lifecycle: Mutex<Vec<&'static str>>,
}

impl RecordingListener {
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().unwrap().len()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }
}

impl MonitorListener for RecordingListener {
    fn name(&self) -> &str {
        "recording"
    }

    fn on_snapshot(&self, batch: &SnapshotBatch) -> anyhow::Result<()> {
        self.snapshots.lock().unwrap().push(batch.clone());
        Ok(())
    }

    fn on_deadlock_alert(&self, cycles: &[DeadlockCycle]) -> anyhow::Result<()> {
        self.alerts.lock().unwrap().push(cycles.to_vec());
        Ok(())
    }

    fn on_started(&self) -> anyhow::Result<()> {
        self.lifecycle.lock().unwrap().push("started");
        Ok(())
    }

    fn on_stopped(&self) -> anyhow::Result<()> {
        self.lifecycle.lock().unwrap().push("stopped");
        Ok(())
    }
}

pub fn lock(identity: u64) -> LockRef {
    LockRef::new("java.lang.Object", identity)
}

/// Thread `id` holding lock `id` and waiting on lock `waits_for`, owned by `waits_for`.
pub fn waiter(id: u64, waits_for: u64) -> RawThreadState {
    RawThreadState::new(id, format!("worker-{id}"), ThreadState::Blocked)
        .holding(lock(id))
        .waiting_on(lock(waits_for), Some(ThreadId(waits_for)))
}

/// Circular wait over ids `1..=n`.
pub fn ring(n: u64) -> Vec<RawThreadState> {
    (1..=n).map(|id| waiter(id, id % n + 1)).collect()
}

pub fn records(raw: Vec<RawThreadState>) -> Vec<Arc<ThreadStateRecord>> {
    raw.into_iter()
        .map(|t| Arc::new(ThreadStateRecord::from_raw(t, 20, SystemTime::UNIX_EPOCH)))
        .collect()
}

pub fn ids(values: &[u64]) -> BTreeSet<ThreadId> {
    values.iter().copied().map(ThreadId).collect()
}
