//! One sampling tick, end to end
//!
//! Everything here is synchronous and runs on a blocking-pool thread: fetch
//! raw state, filter and convert it, run the detectors, annotate, assemble
//! the batch and hand it to listeners.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use log::{debug, error, warn};

use super::listener::ListenerSet;
use super::stats::MonitorStats;
use crate::config::MonitorConfig;
use crate::detection::{DeadlockAnalyzer, DetectionInput, DetectorRegistry};
use crate::domain::{
    DeadlockCycle, ProviderError, RawThreadState, SnapshotBatch, ThreadId, ThreadStateRecord,
};
use crate::provider::ThreadIntrospector;

/// Name prefixes of host-runtime housekeeping threads, hidden unless
/// `include_system_threads` is set.
pub const SYSTEM_THREAD_PREFIXES: &[&str] = &[
    "GC task thread",
    "G1 ",
    "GC worker",
    "VM Thread",
    "VM Periodic Task Thread",
    "Reference Handler",
    "Finalizer",
    "Signal Dispatcher",
    "Attach Listener",
    "Common-Cleaner",
    "process reaper",
];

pub fn is_system_thread(name: &str) -> bool {
    SYSTEM_THREAD_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

pub(crate) struct Sampler {
    config: MonitorConfig,
    provider: Arc<dyn ThreadIntrospector>,
    registry: Arc<DetectorRegistry>,
    listeners: Arc<ListenerSet>,
    stats: Arc<MonitorStats>,
    alert_analyzer: DeadlockAnalyzer,
    sequence: AtomicU64,
}

impl Sampler {
    pub(crate) fn new(
        config: MonitorConfig,
        provider: Arc<dyn ThreadIntrospector>,
        registry: Arc<DetectorRegistry>,
        listeners: Arc<ListenerSet>,
        stats: Arc<MonitorStats>,
    ) -> Self {
        let alert_analyzer = DeadlockAnalyzer::from_config(&config.deadlock);
        Self {
            config,
            provider,
            registry,
            listeners,
            stats,
            alert_analyzer,
            sequence: AtomicU64::new(0),
        }
    }

    pub(crate) fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub(crate) fn listeners(&self) -> &ListenerSet {
        &self.listeners
    }

    pub(crate) fn stats(&self) -> &MonitorStats {
        &self.stats
    }

    pub(crate) fn provider(&self) -> &dyn ThreadIntrospector {
        self.provider.as_ref()
    }

    /// Sampling cadence body: snapshot, then publish.
    pub(crate) fn run_tick(&self) -> Result<(), ProviderError> {
        let window = self.listeners.window();
        let batch = self.take_snapshot()?;
        debug!(
            "Snapshot #{}: {} threads ({} runnable, {} async, {} deadlocks)",
            batch.sequence(),
            batch.total_threads(),
            batch.active_threads(),
            batch.async_threads(),
            batch.deadlocks().len()
        );
        let delivered = self.listeners.deliver_in(window, "snapshot", |l| l.on_snapshot(&batch));
        let Some(failures) = delivered else {
            debug!("Discarding snapshot #{} taken during shutdown", batch.sequence());
            return Ok(());
        };
        self.stats.record_listener_failures(failures);
        self.stats.record_tick();
        Ok(())
    }

    /// Alert cadence body: deadlock analysis only, surfaced as an alert.
    pub(crate) fn run_alert_tick(&self) -> Result<(), ProviderError> {
        let window = self.listeners.window();
        let cycles = self.detect_deadlocks()?;
        if cycles.is_empty() {
            return Ok(());
        }

        for cycle in &cycles {
            error!("DEADLOCK DETECTED: {cycle}");
        }
        let delivered =
            self.listeners.deliver_in(window, "deadlock alert", |l| l.on_deadlock_alert(&cycles));
        if let Some(failures) = delivered {
            self.stats.record_deadlock_alert();
            self.stats.record_listener_failures(failures);
        }
        Ok(())
    }

    /// Fetch, detect and assemble one batch without publishing it.
    pub(crate) fn take_snapshot(&self) -> Result<SnapshotBatch, ProviderError> {
        let timestamp = SystemTime::now();
        let threads = self.fetch_records(timestamp)?;
        let hint = self.deadlock_hint();

        let input = DetectionInput::new(&threads).with_deadlock_hint(hint.as_ref());
        let outcome = self.registry.run(&input);
        self.stats.record_detector_failures(outcome.failures.len() as u64);

        let annotated = threads.iter().map(|thread| outcome.annotate(thread)).collect();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(SnapshotBatch::new(sequence, timestamp, annotated, outcome.cycles))
    }

    fn detect_deadlocks(&self) -> Result<Vec<DeadlockCycle>, ProviderError> {
        let threads = self.fetch_records(SystemTime::now())?;
        let hint = self.deadlock_hint();
        Ok(self.alert_analyzer.analyze(&threads, hint.as_ref()))
    }

    fn fetch_records(
        &self,
        timestamp: SystemTime,
    ) -> Result<Vec<Arc<ThreadStateRecord>>, ProviderError> {
        let raw = self.provider.fetch_all()?;
        let fetched = raw.len();
        let records = self.convert(raw, timestamp);
        if records.len() < fetched {
            debug!("Kept {} of {fetched} threads after filtering", records.len());
        }
        Ok(records)
    }

    fn convert(&self, raw: Vec<RawThreadState>, timestamp: SystemTime) -> Vec<Arc<ThreadStateRecord>> {
        let sampling = &self.config.sampling;
        raw.into_iter()
            .filter(|t| sampling.include_system_threads || !is_system_thread(&t.name))
            .take(sampling.max_threads)
            .map(|t| Arc::new(ThreadStateRecord::from_raw(t, sampling.max_stack_depth, timestamp)))
            .collect()
    }

    fn deadlock_hint(&self) -> Option<BTreeSet<ThreadId>> {
        if !self.config.deadlock.enabled {
            return None;
        }
        match self.provider.find_deadlocked_thread_ids() {
            Ok(ids) if ids.is_empty() => None,
            Ok(ids) => Some(ids),
            Err(e) => {
                warn!("Deadlock hint unavailable, using full graph: {e}");
                None
            }
        }
    }
}
