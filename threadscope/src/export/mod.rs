//! Export listeners
//!
//! Ready-made [`MonitorListener`](crate::monitor::MonitorListener)
//! implementations that move monitor output somewhere else.
//!
//! - [`jsonl`]: one JSON object per line to any writer (file, socket, buffer)
//! - [`channel`]: bounded hand-off to a consumer thread

pub mod channel;
pub mod jsonl;

pub use channel::{ChannelListener, MonitorEvent};
pub use jsonl::JsonLinesExporter;
