//! Detection engine
//!
//! Detectors are pure functions over one immutable batch of thread records.
//! Each implements the same [`Detector`] capability and returns tagged
//! [`DetectionResult`]s; the [`DetectorRegistry`] runs them uniformly and
//! aggregates results by variant, never by asking which detector produced them.
//!
//! - [`deadlock`]: wait-for graph construction and cycle analysis
//! - [`async_classifier`]: name/stack scoring and workload categorization
//! - [`registry`]: detector set, failure isolation, result aggregation

pub mod async_classifier;
pub mod deadlock;
pub mod registry;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;

use crate::domain::{DeadlockCycle, DetectorError, ThreadId, ThreadStateRecord};

pub use async_classifier::{AsyncClassifier, AsyncDetectionResult};
pub use deadlock::{cycle_confidence, DeadlockAnalyzer};
pub use registry::{DetectorRegistry, RegistryOutcome};

/// Version reported in detector metadata
pub const DETECTOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Identification of the detector that produced a result.
///
/// Carried on every classification so the classifier itself can be observed
/// (which version labelled a thread, and how it describes itself).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorMetadata {
    pub name: String,
    pub version: &'static str,
    /// When the detector instance was created
    pub timestamp: SystemTime,
    pub description: String,
}

impl DetectorMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: DETECTOR_VERSION,
            timestamp: SystemTime::now(),
            description: description.into(),
        }
    }
}

/// Everything a detector may look at during one tick.
#[derive(Debug, Clone, Copy)]
pub struct DetectionInput<'a> {
    pub threads: &'a [Arc<ThreadStateRecord>],
    /// Provider's own deadlocked-thread report, if it offered one
    pub deadlock_hint: Option<&'a BTreeSet<ThreadId>>,
}

impl<'a> DetectionInput<'a> {
    pub fn new(threads: &'a [Arc<ThreadStateRecord>]) -> Self {
        Self { threads, deadlock_hint: None }
    }

    #[must_use]
    pub fn with_deadlock_hint(mut self, hint: Option<&'a BTreeSet<ThreadId>>) -> Self {
        self.deadlock_hint = hint;
        self
    }
}

/// A single typed, confidence-scored verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionResult {
    Deadlock(DeadlockCycle),
    Async { thread_id: ThreadId, result: AsyncDetectionResult },
}

/// Uniform detector capability.
///
/// Implementations must be pure with respect to the batch: no mutation of the
/// records, no blocking, no state carried between calls that would make two
/// concurrent calls interfere.
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    fn metadata(&self) -> DetectorMetadata;

    fn is_enabled(&self) -> bool;

    /// Run over one batch.
    ///
    /// # Errors
    /// Returns a [`DetectorError`] when the detector cannot make sense of the
    /// batch. The registry logs it and keeps the other detectors' results.
    fn detect(&self, input: &DetectionInput<'_>) -> Result<Vec<DetectionResult>, DetectorError>;
}
