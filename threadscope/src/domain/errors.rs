//! Structured error types for threadscope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! None of these ever escape the sampling loop: provider, detector and
//! listener failures are logged and counted, and the tick carries on.

use std::time::Duration;

use super::types::Pid;
use thiserror::Error;

/// Failure to obtain thread state from an introspection provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Thread dump unavailable: {0}")]
    Unavailable(String),

    #[error("Process {0} not found")]
    ProcessNotFound(Pid),

    #[error("Malformed thread entry {entry}: {reason}")]
    MalformedEntry { entry: String, reason: String },

    #[error("Provider call did not complete: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure inside a single detector. Isolated per detector by the registry.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Detector {detector} rejected the batch: {reason}")]
    InvalidBatch { detector: String, reason: String },

    #[error("Detector {0} panicked")]
    Panicked(String),
}

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Monitor must be started from within a tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero (got {value:?})")]
    ZeroInterval { field: &'static str, value: Duration },

    #[error("{field} must be within 0.0..=1.0 (got {value})")]
    ThresholdOutOfRange { field: &'static str, value: f64 },

    #[error("{field} must be at least 1")]
    ZeroLimit { field: &'static str },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write snapshot export: {0}")]
    WriteFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::ProcessNotFound(Pid(1234));
        assert_eq!(err.to_string(), "Process PID:1234 not found");
    }

    #[test]
    fn test_detector_error_names_detector() {
        let err = DetectorError::InvalidBatch {
            detector: "DeadlockDetector".to_string(),
            reason: "TID:4 appears more than once".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Detector DeadlockDetector rejected the batch: TID:4 appears more than once"
        );
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::ThresholdOutOfRange { field: "async.confidence_threshold", value: 1.5 };
        assert_eq!(err.to_string(), "async.confidence_threshold must be within 0.0..=1.0 (got 1.5)");
    }
}
