//! Monitor counters
//!
//! Lock-free counters updated from the sampling and alert workers. Persistent
//! provider failure never surfaces as an error; it shows up here as a growing
//! [`MonitorStats::snapshot_age`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug)]
pub struct MonitorStats {
    created: Instant,
    ticks_completed: AtomicU64,
    provider_failures: AtomicU64,
    detector_failures: AtomicU64,
    listener_failures: AtomicU64,
    deadlock_alerts: AtomicU64,
    /// Nanoseconds after `created` of the last published snapshot, plus one (0 = never)
    last_snapshot: AtomicU64,
}

/// Point-in-time copy of [`MonitorStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub ticks_completed: u64,
    pub provider_failures: u64,
    pub detector_failures: u64,
    pub listener_failures: u64,
    pub deadlock_alerts: u64,
    pub snapshot_age_ms: Option<u64>,
}

impl Default for MonitorStats {
    fn default() -> Self {
        Self {
            created: Instant::now(),
            ticks_completed: AtomicU64::new(0),
            provider_failures: AtomicU64::new(0),
            detector_failures: AtomicU64::new(0),
            listener_failures: AtomicU64::new(0),
            deadlock_alerts: AtomicU64::new(0),
            last_snapshot: AtomicU64::new(0),
        }
    }
}

impl MonitorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks_completed(&self) -> u64 {
        self.ticks_completed.load(Ordering::Relaxed)
    }

    pub fn provider_failures(&self) -> u64 {
        self.provider_failures.load(Ordering::Relaxed)
    }

    pub fn detector_failures(&self) -> u64 {
        self.detector_failures.load(Ordering::Relaxed)
    }

    pub fn listener_failures(&self) -> u64 {
        self.listener_failures.load(Ordering::Relaxed)
    }

    pub fn deadlock_alerts(&self) -> u64 {
        self.deadlock_alerts.load(Ordering::Relaxed)
    }

    /// Time since the last published snapshot; `None` before the first one.
    pub fn snapshot_age(&self) -> Option<Duration> {
        match self.last_snapshot.load(Ordering::Acquire) {
            0 => None,
            stamp => {
                let at = self.created + Duration::from_nanos(stamp - 1);
                Some(at.elapsed())
            }
        }
    }

    #[allow(clippy::cast_possible_truncation)] // ages beyond u64 millis are not meaningful
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks_completed: self.ticks_completed(),
            provider_failures: self.provider_failures(),
            detector_failures: self.detector_failures(),
            listener_failures: self.listener_failures(),
            deadlock_alerts: self.deadlock_alerts(),
            snapshot_age_ms: self.snapshot_age().map(|age| age.as_millis() as u64),
        }
    }

    pub(crate) fn record_tick(&self) {
        self.ticks_completed.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(self.created.elapsed().as_nanos()).unwrap_or(u64::MAX - 1);
        self.last_snapshot.store(nanos + 1, Ordering::Release);
    }

    pub(crate) fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_detector_failures(&self, count: u64) {
        self.detector_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_listener_failures(&self, count: u64) {
        self.listener_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_deadlock_alert(&self) {
        self.deadlock_alerts.fetch_add(1, Ordering::Relaxed);
    }
}
