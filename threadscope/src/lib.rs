//! # threadscope - Thread State Sampling with Deadlock and Async Detection
//!
//! threadscope periodically samples the threads of a host runtime, looks for
//! circular lock waits, labels threads that carry async workloads, and hands
//! every annotated snapshot to registered listeners. It never stops the host:
//! provider, detector and listener failures are logged, counted and skipped.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Host runtime / process                       │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ ThreadIntrospector (fetch_all, hint)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Monitor (tokio)                           │
//! │                                                                 │
//! │  sampling cadence ─┐                      ┌─ alert cadence      │
//! │                    ▼                      ▼                     │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  filter +    │──▶│  Detector    │──▶│  annotate +  │         │
//! │  │  convert     │   │  Registry    │   │  batch       │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │                      │ deadlock │ async │     │                 │
//! └──────────────────────┴──────────┴───────┴─────┼─────────────────┘
//!                                                 │ on_snapshot / on_deadlock_alert
//!                                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │       Listeners: JSON Lines export, channel hand-off, ...       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`detection`]: wait-for cycle analysis, async classification, and the
//!   registry that runs detectors with per-detector failure isolation
//! - [`monitor`]: lifecycle state machine, the two periodic cadences,
//!   listener delivery and counters
//! - [`provider`]: the introspection capability and a Linux procfs provider
//! - [`export`]: listeners that write JSON Lines or forward over a channel
//! - [`config`]: immutable configuration value with validation
//! - [`cli`]: command-line arguments and terminal rendering
//! - [`domain`]: data model re-exports, newtypes and error types
//!
//! ## Typical Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use threadscope::config::MonitorConfig;
//! use threadscope::domain::Pid;
//! use threadscope::monitor::Monitor;
//! use threadscope::provider::ProcfsProvider;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let provider = Arc::new(ProcfsProvider::new(Pid(1234))?);
//! let monitor = Monitor::new(MonitorConfig::default(), provider)?;
//! monitor.start()?;
//! // ...
//! monitor.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod detection;
pub mod domain;
pub mod export;
pub mod monitor;
pub mod process_lookup;
pub mod provider;
