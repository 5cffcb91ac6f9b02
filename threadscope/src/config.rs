//! Monitor configuration
//!
//! A single immutable value built once by the host (or the CLI) and handed to
//! every component at construction time. Components never share a mutable
//! configuration object; changing a setting means building a new value with
//! one of the `with_*` helpers and a new monitor.
//!
//! Durations are (de)serialized as integer milliseconds so the value can be
//! loaded from any serde source the host prefers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

/// Default sampling cadence
pub const DEFAULT_SAMPLING_INTERVAL: Duration = Duration::from_secs(10);

/// Default cadence of the independent deadlock-alert task
pub const DEFAULT_ALERT_INTERVAL: Duration = Duration::from_secs(5);

/// How long `stop()` waits for in-flight ticks before aborting them
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_STACK_DEPTH: usize = 20;
pub const DEFAULT_MAX_THREADS: usize = 1000;
pub const DEFAULT_DEADLOCK_THRESHOLD: f64 = 0.8;
pub const DEFAULT_ASYNC_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Master switch; a disabled monitor ignores `start()`
    pub enabled: bool,
    pub sampling: SamplingConfig,
    pub deadlock: DeadlockConfig,
    #[serde(rename = "async")]
    pub async_detection: AsyncConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    #[serde(with = "duration_ms", rename = "interval_ms")]
    pub interval: Duration,
    pub max_stack_depth: usize,
    /// Threads beyond this count are dropped from a batch (after filtering)
    pub max_threads: usize,
    pub include_system_threads: bool,
    #[serde(with = "duration_ms", rename = "shutdown_grace_ms")]
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlockConfig {
    /// Registers the deadlock analyzer and the alert task
    pub enabled: bool,
    pub confidence_threshold: f64,
    #[serde(with = "duration_ms", rename = "alert_interval_ms")]
    pub alert_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncConfig {
    pub enabled: bool,
    pub confidence_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sampling: SamplingConfig::default(),
            deadlock: DeadlockConfig::default(),
            async_detection: AsyncConfig::default(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SAMPLING_INTERVAL,
            max_stack_depth: DEFAULT_MAX_STACK_DEPTH,
            max_threads: DEFAULT_MAX_THREADS,
            include_system_threads: false,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl Default for DeadlockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: DEFAULT_DEADLOCK_THRESHOLD,
            alert_interval: DEFAULT_ALERT_INTERVAL,
        }
    }
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self { enabled: true, confidence_threshold: DEFAULT_ASYNC_THRESHOLD }
    }
}

impl MonitorConfig {
    /// Check every field that would make the monitor misbehave at runtime.
    ///
    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_zero_interval("sampling.interval", self.sampling.interval)?;
        non_zero_interval("deadlock.alert_interval", self.deadlock.alert_interval)?;
        if self.sampling.max_stack_depth == 0 {
            return Err(ConfigError::ZeroLimit { field: "sampling.max_stack_depth" });
        }
        if self.sampling.max_threads == 0 {
            return Err(ConfigError::ZeroLimit { field: "sampling.max_threads" });
        }
        threshold("deadlock.confidence_threshold", self.deadlock.confidence_threshold)?;
        threshold("async.confidence_threshold", self.async_detection.confidence_threshold)?;
        Ok(())
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling.interval = interval;
        self
    }

    #[must_use]
    pub fn with_alert_interval(mut self, interval: Duration) -> Self {
        self.deadlock.alert_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_stack_depth(mut self, depth: usize) -> Self {
        self.sampling.max_stack_depth = depth;
        self
    }

    #[must_use]
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.sampling.max_threads = max_threads;
        self
    }

    #[must_use]
    pub fn with_include_system_threads(mut self, include: bool) -> Self {
        self.sampling.include_system_threads = include;
        self
    }

    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.sampling.shutdown_grace = grace;
        self
    }

    #[must_use]
    pub fn with_deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_deadlock_threshold(mut self, threshold: f64) -> Self {
        self.deadlock.confidence_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_async_detection(mut self, enabled: bool) -> Self {
        self.async_detection.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_async_threshold(mut self, threshold: f64) -> Self {
        self.async_detection.confidence_threshold = threshold;
        self
    }
}

fn non_zero_interval(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::ZeroInterval { field, value });
    }
    Ok(())
}

fn threshold(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ThresholdOutOfRange { field, value });
    }
    Ok(())
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)] // millisecond configs never approach u64::MAX
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
