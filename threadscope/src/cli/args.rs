//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::MonitorConfig;

#[derive(Parser, Debug)]
#[command(
    name = "threadscope",
    about = "Sample thread states of a running process, detect deadlocks and classify async threads",
    after_help = "\
EXAMPLES:
    threadscope my-app                         Auto-detect PID from process name
    threadscope --pid 1234                     Explicit PID
    threadscope --pid 1234 --export out.jsonl  Also write every snapshot as JSON Lines"
)]
pub struct Args {
    /// Process name to monitor (auto-detects PID)
    #[arg(value_name = "PROCESS")]
    pub process: Option<String>,

    /// Process ID to monitor
    #[arg(short, long)]
    pub pid: Option<i32>,

    /// Sampling interval in milliseconds
    #[arg(long, value_name = "MS", default_value = "1000")]
    pub interval: u64,

    /// Deadlock alert interval in milliseconds
    #[arg(long, value_name = "MS", default_value = "5000")]
    pub alert_interval: u64,

    /// Maximum stack frames kept per thread
    #[arg(long, default_value = "20")]
    pub max_depth: usize,

    /// Maximum threads per snapshot
    #[arg(long, default_value = "1000")]
    pub max_threads: usize,

    /// Keep runtime housekeeping threads (GC, finalizer, ...) in snapshots
    #[arg(long)]
    pub include_system: bool,

    /// Disable deadlock detection and alerts
    #[arg(long)]
    pub no_deadlock: bool,

    /// Disable async thread classification
    #[arg(long)]
    pub no_async: bool,

    /// Export every event as JSON Lines to FILE
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// List async threads under each snapshot line
    #[arg(long, conflicts_with = "quiet")]
    pub threads: bool,

    /// Suppress per-snapshot output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Monitor configuration described by these arguments.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::default()
            .with_sampling_interval(Duration::from_millis(self.interval))
            .with_alert_interval(Duration::from_millis(self.alert_interval))
            .with_max_stack_depth(self.max_depth)
            .with_max_threads(self.max_threads)
            .with_include_system_threads(self.include_system)
            .with_deadlock_detection(!self.no_deadlock)
            .with_async_detection(!self.no_async)
    }

    /// `None` when the run is unbounded.
    pub fn duration_limit(&self) -> Option<Duration> {
        (self.duration > 0).then(|| Duration::from_secs(self.duration))
    }
}
