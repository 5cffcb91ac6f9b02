//! Resolve a target process id from a process name.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::domain::Pid;

/// A process whose name matched the search pattern.
#[derive(Debug)]
pub struct ProcessMatch {
    pub pid: Pid,
    pub command: String,
}

/// Find a single process by name.
///
/// Matches against the command name from `/proc/<pid>/comm` and the basename
/// of `argv[0]` from `/proc/<pid>/cmdline`. The calling process itself is
/// never a candidate.
///
/// # Errors
/// - No processes found
/// - Multiple processes found (ambiguous)
pub fn find_process_by_name(name: &str) -> Result<Pid> {
    let own_pid = std::process::id();
    let mut matches: Vec<ProcessMatch> = Vec::new();

    let proc_dir = fs::read_dir("/proc").context("Failed to read /proc")?;

    for entry in proc_dir.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if pid == own_pid {
            continue;
        }

        // Processes can exit while we iterate
        let Ok(command) = fs::read_to_string(format!("/proc/{pid}/comm")) else {
            continue;
        };
        let command = command.trim_end().to_string();
        let argv0 = fs::read(format!("/proc/{pid}/cmdline"))
            .ok()
            .and_then(|raw| first_arg(&raw))
            .unwrap_or_default();

        if is_match(&command, &argv0, name) {
            let Ok(pid) = i32::try_from(pid) else {
                continue;
            };
            matches.push(ProcessMatch { pid: Pid(pid), command });
        }
    }

    match matches.len() {
        0 => bail!(
            "No process matching '{name}' found.\n\
             Check running processes with: ps aux | grep {name}"
        ),
        1 => Ok(matches.remove(0).pid),
        _ => {
            let list: Vec<String> =
                matches.iter().map(|m| format!("  {} ({})", m.pid.0, m.command)).collect();
            bail!(
                "Multiple processes match '{name}':\n{}\n\n\
                 Specify PID explicitly: threadscope --pid <PID>",
                list.join("\n")
            )
        }
    }
}

/// Whether `/proc/<pid>` still exists.
pub fn process_exists(pid: Pid) -> bool {
    Path::new(&format!("/proc/{}", pid.0)).is_dir()
}

/// First NUL-separated argument of a cmdline blob.
fn first_arg(cmdline: &[u8]) -> Option<String> {
    let arg = cmdline.split(|&b| b == 0).next()?;
    if arg.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(arg).into_owned())
}

/// Check if a process matches the search pattern.
fn is_match(command: &str, argv0: &str, pattern: &str) -> bool {
    let argv0_basename = Path::new(argv0).file_name().and_then(|n| n.to_str()).unwrap_or("");
    let pattern_basename =
        Path::new(pattern).file_name().and_then(|n| n.to_str()).unwrap_or(pattern);

    command == pattern_basename
        || argv0_basename == pattern_basename
        // comm is capped at 15 bytes, so long names only match as a prefix
        || (command.len() == 15 && pattern_basename.starts_with(command))
        || command.contains(pattern)
        || argv0_basename.contains(pattern)
}
