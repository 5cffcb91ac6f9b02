//! Domain types local to the monitor
//!
//! Newtype wrappers that keep OS-level identifiers apart from the
//! provider-level [`ThreadId`](threadscope_common::ThreadId).

use std::fmt;

/// Process ID of a monitored process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<i32> for Pid {
    fn from(pid: i32) -> Self {
        Pid(pid)
    }
}

impl From<Pid> for i32 {
    fn from(pid: Pid) -> Self {
        pid.0
    }
}
