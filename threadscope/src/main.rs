//! # threadscope - Main Entry Point
//!
//! Monitors one process through its `/proc` task entries:
//! - `threadscope <PROCESS>` or `threadscope --pid <PID>`: live summary per snapshot
//! - `--export out.jsonl`: additionally write every event as JSON Lines
//!
//! Runs until Ctrl+C, the `--duration` limit, or the target exiting.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use log::info;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use threadscope::cli::display::{format_alert, format_async_threads, format_snapshot};
use threadscope::cli::Args;
use threadscope::domain::Pid;
use threadscope::export::{ChannelListener, JsonLinesExporter, MonitorEvent};
use threadscope::monitor::Monitor;
use threadscope::process_lookup::{find_process_by_name, process_exists};
use threadscope::provider::ProcfsProvider;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

/// Events buffered between the monitor and the printer thread
const PRINTER_BACKLOG: usize = 64;

/// How often the main loop checks the stop conditions
const POLL_INTERVAL: Duration = Duration::from_millis(250);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") {
        EXIT_NOPERM
    } else if msg.contains("missing required argument") || msg.contains("invalid arguments") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Resolve the target PID from CLI arguments.
///
/// - `threadscope my-app` - find process by name
/// - `threadscope --pid 1234` - explicit PID
fn resolve_pid(args: &Args) -> Result<Pid> {
    if let Some(ref name) = args.process {
        if args.pid.is_some() {
            anyhow::bail!(
                "Cannot use PROCESS argument with --pid.\n\n\
                 Use either:\n  \
                 threadscope my-app              (auto-detect)\n  \
                 threadscope --pid 1234          (explicit PID)"
            );
        }
        return find_process_by_name(name);
    }

    if let Some(pid) = args.pid {
        return Ok(Pid(pid));
    }

    anyhow::bail!(
        "Missing required argument: PROCESS or --pid\n\n\
         Usage:\n  \
         threadscope my-app              Auto-detect PID\n  \
         threadscope --pid 1234          Explicit PID\n\n\
         Run 'threadscope --help' for more options"
    )
}

/// Print monitor events on a dedicated thread so terminal I/O never runs on
/// the monitor's workers. Exits when every sender is gone.
fn spawn_printer(events: Receiver<MonitorEvent>, quiet: bool, list_threads: bool) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in events {
            match event {
                MonitorEvent::Snapshot(batch) if !quiet => {
                    println!("{}", format_snapshot(&batch));
                    if list_threads {
                        for line in format_async_threads(&batch) {
                            println!("{line}");
                        }
                    }
                }
                MonitorEvent::DeadlockAlert(cycles) => {
                    for line in format_alert(&cycles) {
                        eprintln!("{line}");
                    }
                }
                MonitorEvent::Started | MonitorEvent::Stopped | MonitorEvent::Snapshot(_) => {}
            }
        }
    })
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    let pid = resolve_pid(&args)?;
    let config = args.monitor_config();
    config.validate().context("Invalid arguments")?;

    let provider =
        ProcfsProvider::new(pid).with_context(|| format!("Cannot monitor process {}", pid.0))?;

    if !quiet {
        println!("threadscope v{}", env!("CARGO_PKG_VERSION"));
        println!("pid: {}", pid.0);
        println!("interval: {:?}", config.sampling.interval);
    }

    let monitor = Monitor::new(config, Arc::new(provider))?;

    let (channel, events) = ChannelListener::bounded(PRINTER_BACKLOG);
    let channel = Arc::new(channel);
    monitor.add_listener(channel.clone());
    let printer = spawn_printer(events, quiet, args.threads);

    if let Some(ref export_path) = args.export {
        let exporter = JsonLinesExporter::create(export_path)
            .context("Failed to create export file")?;
        monitor.add_listener(Arc::new(exporter));
        if !quiet {
            println!("export: {}", export_path.display());
        }
    }

    monitor.start()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let duration_limit = args.duration_limit();
    let mut exit_reason = "interrupted";

    loop {
        if let Some(limit) = duration_limit {
            if started.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        if !process_exists(pid) {
            exit_reason = "process exited";
            break;
        }

        tokio::select! {
            () = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = &mut ctrl_c => break,
        }
    }

    info!("Stopping: {exit_reason}");
    monitor.stop().await;

    let stats = monitor.stats().snapshot();
    eprintln!(
        "\n{}: {:.1}s, {} snapshots, {} deadlock alerts (provider failures: {}, detector failures: {}, listener failures: {}, dropped: {})",
        exit_reason,
        started.elapsed().as_secs_f64(),
        stats.ticks_completed,
        stats.deadlock_alerts,
        stats.provider_failures,
        stats.detector_failures,
        stats.listener_failures,
        channel.dropped(),
    );

    // The printer exits once the last sender (held by the listeners) is dropped
    drop(channel);
    drop(monitor);
    printer.join().ok();

    Ok(())
}
