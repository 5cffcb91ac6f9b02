//! Monitor orchestration
//!
//! - [`orchestrator`]: lifecycle state machine and the two periodic cadences
//! - [`sampling`]: one tick from provider fetch to listener delivery
//! - [`listener`]: listener capability and isolated delivery
//! - [`stats`]: counters and snapshot staleness

pub mod listener;
pub mod orchestrator;
pub mod sampling;
pub mod stats;

pub use listener::{ListenerId, ListenerSet, MonitorListener};
pub use orchestrator::{Monitor, MonitorState};
pub use sampling::{is_system_thread, SYSTEM_THREAD_PREFIXES};
pub use stats::{MonitorStats, StatsSnapshot};
