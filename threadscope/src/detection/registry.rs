//! Detector registry
//!
//! Holds the set of active detectors and runs them over a batch. A detector
//! that returns an error or panics loses only its own results for that tick.
//! Registration changes take effect on the next tick: a run clones the
//! current list up front and never holds the lock while detecting.

use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, warn};

use super::{
    AsyncClassifier, AsyncDetectionResult, DeadlockAnalyzer, DetectionInput, DetectionResult,
    Detector,
};
use crate::config::MonitorConfig;
use crate::domain::{DeadlockCycle, DetectorError, ThreadId, ThreadStateRecord};

/// Aggregated results of one registry run.
#[derive(Debug, Default)]
pub struct RegistryOutcome {
    /// Distinct cycles, ordered by cycle id
    pub cycles: Vec<DeadlockCycle>,
    pub classifications: HashMap<ThreadId, AsyncDetectionResult>,
    pub failures: Vec<DetectorError>,
}

impl RegistryOutcome {
    /// Copy of `thread` carrying its async classification, if it has one.
    ///
    /// Threads that were classified as not async (or not classified at all)
    /// keep their existing record.
    pub fn annotate(&self, thread: &Arc<ThreadStateRecord>) -> Arc<ThreadStateRecord> {
        match self.classifications.get(&thread.id()) {
            Some(result) if result.is_async => {
                Arc::new(thread.with_async_info(true, result.async_type))
            }
            _ => Arc::clone(thread),
        }
    }
}

#[derive(Default)]
pub struct DetectorRegistry {
    detectors: RwLock<Vec<Arc<dyn Detector>>>,
}

impl std::fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorRegistry").field("detectors", &self.names()).finish()
    }
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the built-in detectors enabled by `config`.
    ///
    /// A built-in whose name is already registered is left alone, so calling
    /// this again after a restart does not duplicate detectors.
    pub fn install_defaults(&self, config: &MonitorConfig) {
        if config.deadlock.enabled {
            self.register_if_absent(Arc::new(DeadlockAnalyzer::from_config(&config.deadlock)));
        }
        if config.async_detection.enabled {
            self.register_if_absent(Arc::new(AsyncClassifier::from_config(
                &config.async_detection,
            )));
        }
    }

    pub fn register(&self, detector: Arc<dyn Detector>) {
        debug!("Registering detector {}", detector.name());
        self.write().push(detector);
    }

    /// Remove every detector registered under `name`. Returns whether any was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut detectors = self.write();
        let before = detectors.len();
        detectors.retain(|d| d.name() != name);
        before != detectors.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|d| d.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().iter().any(|d| d.name() == name)
    }

    /// Run every enabled detector over `input` and aggregate by result kind.
    pub fn run(&self, input: &DetectionInput<'_>) -> RegistryOutcome {
        let detectors: Vec<Arc<dyn Detector>> = self.read().clone();
        let mut outcome = RegistryOutcome::default();
        let mut seen_cycles: BTreeSet<BTreeSet<ThreadId>> = BTreeSet::new();

        for detector in detectors.iter().filter(|d| d.is_enabled()) {
            let results = match run_isolated(detector.as_ref(), input) {
                Ok(results) => results,
                Err(e) => {
                    warn!("{e}");
                    outcome.failures.push(e);
                    continue;
                }
            };

            for result in results {
                match result {
                    DetectionResult::Deadlock(cycle) => {
                        if seen_cycles.insert(cycle.thread_ids().clone()) {
                            outcome.cycles.push(cycle);
                        }
                    }
                    DetectionResult::Async { thread_id, result } => {
                        outcome.classifications.insert(thread_id, result);
                    }
                }
            }
        }

        outcome.cycles.sort_by_key(DeadlockCycle::cycle_id);
        outcome
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn Detector>>> {
        self.detectors.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn Detector>>> {
        self.detectors.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn register_if_absent(&self, detector: Arc<dyn Detector>) {
        let mut detectors = self.write();
        if detectors.iter().any(|d| d.name() == detector.name()) {
            return;
        }
        debug!("Registering detector {}", detector.name());
        detectors.push(detector);
    }
}

fn run_isolated(
    detector: &dyn Detector,
    input: &DetectionInput<'_>,
) -> Result<Vec<DetectionResult>, DetectorError> {
    catch_unwind(AssertUnwindSafe(|| detector.detect(input)))
        .unwrap_or_else(|_| Err(DetectorError::Panicked(detector.name().to_string())))
}
