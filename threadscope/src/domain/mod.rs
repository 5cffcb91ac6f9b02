//! Domain model for threadscope
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling
//!
//! The thread-state data model itself lives in `threadscope-common` and is
//! re-exported here so callers only need one import path.

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use threadscope_common::{
    AsyncThreadType, DeadlockCycle, LockRef, RawThreadState, SnapshotBatch, StackFrame, ThreadId,
    ThreadState, ThreadStateRecord,
};
pub use types::Pid;

pub use errors::{ConfigError, DetectorError, ExportError, MonitorError, ProviderError};
