//! Linux procfs provider
//!
//! Reads `/proc/<pid>/task/<tid>/{comm,stat}` for every thread of a process.
//! procfs carries no lock or stack information, so records from this
//! provider never have wait-for edges; they still feed the async classifier
//! (thread names) and CPU accounting.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;

use super::ThreadIntrospector;
use crate::domain::{Pid, ProviderError, RawThreadState, ThreadId, ThreadState};

const DEFAULT_PROC_ROOT: &str = "/proc";

/// Fallback when `sysconf(_SC_CLK_TCK)` fails; the value on every mainstream Linux target
const DEFAULT_CLOCK_TICKS: u64 = 100;

const NANOS_PER_SEC: u64 = 1_000_000_000;

// Offsets into the stat fields that follow the `(comm)` field, counted from
// the state field (field 3 in proc(5)).
const STAT_UTIME: usize = 11;
const STAT_STIME: usize = 12;
const STAT_PRIORITY: usize = 15;

#[derive(Debug, Clone)]
pub struct ProcfsProvider {
    pid: Pid,
    proc_root: PathBuf,
    clock_ticks: u64,
}

impl ProcfsProvider {
    /// Provider for a live process.
    ///
    /// # Errors
    /// Returns [`ProviderError::ProcessNotFound`] if `/proc/<pid>` does not exist.
    pub fn new(pid: Pid) -> Result<Self, ProviderError> {
        Self::with_root(pid, DEFAULT_PROC_ROOT)
    }

    /// Provider reading from a procfs-shaped tree rooted at `proc_root`.
    ///
    /// # Errors
    /// Returns [`ProviderError::ProcessNotFound`] if `<proc_root>/<pid>` does not exist.
    pub fn with_root(pid: Pid, proc_root: impl Into<PathBuf>) -> Result<Self, ProviderError> {
        let proc_root = proc_root.into();
        if !proc_root.join(pid.0.to_string()).is_dir() {
            return Err(ProviderError::ProcessNotFound(pid));
        }
        Ok(Self { pid, proc_root, clock_ticks: clock_ticks_per_second() })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Whether the target process is still present.
    pub fn is_alive(&self) -> bool {
        self.process_dir().is_dir()
    }

    fn process_dir(&self) -> PathBuf {
        self.proc_root.join(self.pid.0.to_string())
    }

    fn task_dir(&self) -> PathBuf {
        self.process_dir().join("task")
    }

    fn list_tids(&self) -> Result<Vec<u64>, ProviderError> {
        let entries = fs::read_dir(self.task_dir()).map_err(|e| self.map_process_error(e))?;
        let mut tids: Vec<u64> = entries
            .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok())
            .collect();
        tids.sort_unstable();
        Ok(tids)
    }

    /// `Ok(None)` when the thread exited between listing and reading.
    fn read_thread(&self, tid: u64) -> Result<Option<RawThreadState>, ProviderError> {
        let dir = self.task_dir().join(tid.to_string());

        let Some(stat) = read_optional(&dir.join("stat"))? else {
            return Ok(None);
        };
        let fields = parse_stat(tid, &stat)?;

        let Some((state, suspended)) = map_state(fields.state) else {
            debug!("Skipping TID {tid}: unknown scheduler state '{}'", fields.state);
            return Ok(None);
        };

        let name = match read_optional(&dir.join("comm"))? {
            Some(comm) => comm.trim_end_matches('\n').to_string(),
            None => fields.comm,
        };

        let mut raw = RawThreadState::new(tid, name, state)
            .with_cpu_time(
                ticks_to_nanos(fields.utime + fields.stime, self.clock_ticks),
                ticks_to_nanos(fields.utime, self.clock_ticks),
            );
        raw.priority = fields.priority;
        raw.suspended = suspended;
        Ok(Some(raw))
    }

    fn map_process_error(&self, err: io::Error) -> ProviderError {
        if err.kind() == io::ErrorKind::NotFound {
            ProviderError::ProcessNotFound(self.pid)
        } else {
            ProviderError::Io(err)
        }
    }
}

impl ThreadIntrospector for ProcfsProvider {
    fn fetch_all(&self) -> Result<Vec<RawThreadState>, ProviderError> {
        let mut threads = Vec::new();
        for tid in self.list_tids()? {
            if let Some(thread) = self.read_thread(tid)? {
                threads.push(thread);
            }
        }
        Ok(threads)
    }

    fn fetch_ids(&self, ids: &[ThreadId]) -> Result<Vec<RawThreadState>, ProviderError> {
        if !self.is_alive() {
            return Err(ProviderError::ProcessNotFound(self.pid));
        }
        let mut threads = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(thread) = self.read_thread(id.0)? {
                threads.push(thread);
            }
        }
        Ok(threads)
    }

    fn supports_cpu_time(&self) -> bool {
        true
    }
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

#[derive(Debug, PartialEq)]
struct StatFields {
    comm: String,
    state: char,
    utime: u64,
    stime: u64,
    priority: i32,
}

/// Parse one `/proc/<pid>/task/<tid>/stat` line.
///
/// Format: "tid (comm) state ppid ...". The comm may itself contain spaces
/// and parentheses, so fields are split after the last ')'.
fn parse_stat(tid: u64, line: &str) -> Result<StatFields, ProviderError> {
    let malformed = |reason: &str| ProviderError::MalformedEntry {
        entry: format!("task/{tid}/stat"),
        reason: reason.to_string(),
    };

    let open = line.find('(').ok_or_else(|| malformed("missing '('"))?;
    let close = line.rfind(')').ok_or_else(|| malformed("missing ')'"))?;
    if open >= close {
        return Err(malformed("unbalanced comm field"));
    }
    let comm = line[open + 1..close].to_string();

    let rest: Vec<&str> = line[close + 1..].split_whitespace().collect();
    if rest.len() <= STAT_PRIORITY {
        return Err(malformed("too few fields"));
    }

    let state = rest[0].chars().next().ok_or_else(|| malformed("empty state"))?;
    let number = |idx: usize, what: &str| -> Result<i64, ProviderError> {
        rest[idx].parse::<i64>().map_err(|_| malformed(&format!("invalid {what}")))
    };

    Ok(StatFields {
        comm,
        state,
        utime: u64::try_from(number(STAT_UTIME, "utime")?).unwrap_or(0),
        stime: u64::try_from(number(STAT_STIME, "stime")?).unwrap_or(0),
        priority: i32::try_from(number(STAT_PRIORITY, "priority")?).unwrap_or(0),
    })
}

/// Scheduler state letter → (state, suspended)
fn map_state(code: char) -> Option<(ThreadState, bool)> {
    match code {
        'R' => Some((ThreadState::Runnable, false)),
        'S' | 'I' | 'P' | 'W' => Some((ThreadState::Waiting, false)),
        'D' => Some((ThreadState::Blocked, false)),
        'T' | 't' => Some((ThreadState::Waiting, true)),
        'Z' | 'X' | 'x' => Some((ThreadState::Terminated, false)),
        _ => None,
    }
}

fn ticks_to_nanos(ticks: u64, clock_ticks: u64) -> u64 {
    ticks.saturating_mul(NANOS_PER_SEC) / clock_ticks.max(1)
}

/// Read a file that may legitimately disappear (the thread exited).
fn read_optional(path: &Path) -> Result<Option<String>, ProviderError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        // ESRCH surfaces when the task is torn down mid-read
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => Ok(None),
        Err(e) => Err(ProviderError::Io(e)),
    }
}

#[allow(unsafe_code)]
fn clock_ticks_per_second() -> u64 {
    // SAFETY: sysconf only reads a system constant and has no preconditions
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    u64::try_from(ticks).ok().filter(|&t| t > 0).unwrap_or(DEFAULT_CLOCK_TICKS)
}
