//! Async workload classification for sampled threads.
//!
//! # Scoring
//!
//! Three additive signals, accumulated in tenths so that threshold checks
//! are exact:
//!
//! | Signal                                   | Weight                  |
//! |------------------------------------------|-------------------------|
//! | Name contains an async token (any case)  | 0.4                     |
//! | Name contains a known framework name     | 0.3                     |
//! | Frame class contains an async fragment   | 0.1 per frame, max 0.3  |
//!
//! The total is capped at 1.0 and `is_async` means `confidence >= threshold`.
//!
//! # Categories
//!
//! Only async threads are categorized. Signals overlap (a reactor thread is
//! often also a pool worker), so the rules below are tried in a fixed order
//! and the first match wins:
//!
//! 1. Continuation-style futures → `CompletableFuture`
//! 2. Reactive-stream libraries → `ReactiveStreams`
//! 3. Pool / worker naming → `ThreadPool`
//! 4. Web server thread names → `WebServer`
//! 5. Scheduled / timer naming or scheduler frames → `ScheduledTask`
//! 6. Anything else → `OtherAsync`

use super::{DetectionInput, DetectionResult, Detector, DetectorMetadata};
use crate::config::AsyncConfig;
use crate::domain::{AsyncThreadType, DetectorError, ThreadStateRecord};

pub const DETECTOR_NAME: &str = "AsyncThreadDetector";

// =============================================================================
// CLASSIFICATION TABLES
// =============================================================================

/// Async-indicative tokens, matched case-insensitively against thread names
const NAME_TOKENS: &[&str] = &[
    "async",
    "completable",
    "future",
    "reactive",
    "reactor",
    "rx",
    "stream",
    "pool",
    "executor",
    "scheduled",
    "timer",
    "worker",
];

/// Thread names used by concrete async frameworks and executors.
///
/// Linux truncates thread names to 15 bytes, hence `tokio-runtime-w`.
const KNOWN_THREAD_NAMES: &[&str] = &[
    "ForkJoinPool",
    "CompletableFuture",
    "Reactor",
    "reactor-",
    "RxJava",
    "AsyncHttpClient",
    "Netty",
    "Tomcat",
    "Jetty",
    "Undertow",
    "Reactive",
    "WebFlux",
    "pool-",
    "tokio-runtime-w",
    "tokio-rt-worker",
    "rayon",
    "actix",
    "async-std",
];

/// Class name (or module path) fragments of async machinery
const ASYNC_CLASS_FRAGMENTS: &[&str] = &[
    "CompletableFuture",
    "Future",
    "Executor",
    "ThreadPool",
    "Scheduled",
    "Reactor",
    "Flux",
    "Mono",
    "Observable",
    "Single",
    "Maybe",
    "WebFlux",
    "Reactive",
    "Async",
    "NonBlocking",
    "tokio::runtime",
    "futures_util",
    "async_std",
    "rayon_core",
];

const CONTINUATION_MARKERS: &[&str] = &["CompletableFuture"];
const REACTIVE_NAME_MARKERS: &[&str] = &["Reactor", "RxJava", "reactor-"];
const REACTIVE_CLASS_MARKERS: &[&str] = &["Flux", "Mono", "Observable"];
const POOL_NAME_MARKERS: &[&str] = &["pool", "worker"];
const WEB_SERVER_NAME_MARKERS: &[&str] =
    &["Tomcat", "Jetty", "Netty", "Undertow", "http-nio", "actix-server"];
const SCHEDULED_NAME_MARKERS: &[&str] = &["scheduled", "timer"];
const SCHEDULED_CLASS_MARKERS: &[&str] =
    &["ScheduledExecutorService", "ScheduledThreadPoolExecutor", "tokio::time"];

const NAME_TOKEN_POINTS: u32 = 4;
const KNOWN_NAME_POINTS: u32 = 3;
const FRAME_POINTS: u32 = 1;
const FRAME_POINTS_CAP: u32 = 3;
const MAX_POINTS: u32 = 10;

// =============================================================================
// RESULT
// =============================================================================

/// Verdict for one thread.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncDetectionResult {
    pub is_async: bool,
    pub async_type: AsyncThreadType,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub metadata: DetectorMetadata,
}

// =============================================================================
// CLASSIFIER
// =============================================================================

#[derive(Debug, Clone)]
pub struct AsyncClassifier {
    enabled: bool,
    confidence_threshold: f64,
    metadata: DetectorMetadata,
}

impl Default for AsyncClassifier {
    fn default() -> Self {
        Self::new(true, crate::config::DEFAULT_ASYNC_THRESHOLD)
    }
}

impl AsyncClassifier {
    #[must_use]
    pub fn new(enabled: bool, confidence_threshold: f64) -> Self {
        Self {
            enabled,
            confidence_threshold,
            metadata: DetectorMetadata::new(
                DETECTOR_NAME,
                "Detects and categorizes async threads with confidence scoring",
            ),
        }
    }

    #[must_use]
    pub fn from_config(config: &AsyncConfig) -> Self {
        Self::new(config.enabled, config.confidence_threshold)
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Classify one thread. Pure: the same record always yields the same result.
    #[must_use]
    pub fn classify(&self, thread: &ThreadStateRecord) -> AsyncDetectionResult {
        if !self.enabled {
            return AsyncDetectionResult {
                is_async: false,
                async_type: AsyncThreadType::Unknown,
                confidence: 0.0,
                metadata: self.metadata.clone(),
            };
        }

        let confidence = f64::from(score_points(thread)) / f64::from(MAX_POINTS);
        let is_async = confidence >= self.confidence_threshold;
        let async_type = if is_async { categorize(thread) } else { AsyncThreadType::Unknown };

        AsyncDetectionResult { is_async, async_type, confidence, metadata: self.metadata.clone() }
    }
}

impl Detector for AsyncClassifier {
    fn name(&self) -> &str {
        DETECTOR_NAME
    }

    fn metadata(&self) -> DetectorMetadata {
        self.metadata.clone()
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn detect(&self, input: &DetectionInput<'_>) -> Result<Vec<DetectionResult>, DetectorError> {
        Ok(input
            .threads
            .iter()
            .map(|thread| DetectionResult::Async {
                thread_id: thread.id(),
                result: self.classify(thread),
            })
            .collect())
    }
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn score_points(thread: &ThreadStateRecord) -> u32 {
    let name = thread.name();
    let lowered = name.to_ascii_lowercase();
    let mut points = 0;

    if NAME_TOKENS.iter().any(|token| lowered.contains(token)) {
        points += NAME_TOKEN_POINTS;
    }

    if KNOWN_THREAD_NAMES.iter().any(|known| name.contains(known)) {
        points += KNOWN_NAME_POINTS;
    }

    let matching_frames = thread
        .stack_frames()
        .iter()
        .filter(|frame| ASYNC_CLASS_FRAGMENTS.iter().any(|f| frame.class_name.contains(f)))
        .take(FRAME_POINTS_CAP as usize)
        .count();
    #[allow(clippy::cast_possible_truncation)] // bounded by FRAME_POINTS_CAP
    {
        points += matching_frames as u32 * FRAME_POINTS;
    }

    points.min(MAX_POINTS)
}

fn categorize(thread: &ThreadStateRecord) -> AsyncThreadType {
    let name = thread.name();
    let lowered = name.to_ascii_lowercase();
    let name_has = |markers: &[&str]| markers.iter().any(|m| name.contains(m));
    let lowered_has = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));
    let stack_has = |markers: &[&str]| has_frame_class(thread, markers);

    if name_has(CONTINUATION_MARKERS) || stack_has(CONTINUATION_MARKERS) {
        AsyncThreadType::CompletableFuture
    } else if name_has(REACTIVE_NAME_MARKERS) || stack_has(REACTIVE_CLASS_MARKERS) {
        AsyncThreadType::ReactiveStreams
    } else if lowered_has(POOL_NAME_MARKERS) {
        AsyncThreadType::ThreadPool
    } else if name_has(WEB_SERVER_NAME_MARKERS) {
        AsyncThreadType::WebServer
    } else if lowered_has(SCHEDULED_NAME_MARKERS) || stack_has(SCHEDULED_CLASS_MARKERS) {
        AsyncThreadType::ScheduledTask
    } else {
        AsyncThreadType::OtherAsync
    }
}

fn has_frame_class(thread: &ThreadStateRecord, markers: &[&str]) -> bool {
    thread
        .stack_frames()
        .iter()
        .any(|frame| markers.iter().any(|m| frame.class_name.contains(m)))
}
