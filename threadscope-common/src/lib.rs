//! # Shared Data Structures (Provider ↔ Detectors ↔ Listeners)
//!
//! Defines the thread-state data model shared between introspection providers,
//! the detection engine and snapshot listeners. This crate has no runtime
//! dependencies so that a provider for a new host runtime can be written
//! against it without pulling in the monitor's async stack.
//!
//! ## Key Types
//!
//! - [`RawThreadState`] - What a provider reports for one thread (mutable, plain data)
//! - [`ThreadStateRecord`] - Immutable, per-sample record built from a raw state
//! - [`DeadlockCycle`] - One wait-for cycle found in a batch
//! - [`SnapshotBatch`] - Everything one sampling tick produced
//!
//! ## Immutability
//!
//! A [`ThreadStateRecord`] is never mutated after construction. The same record
//! is read concurrently by every detector and by every listener, so
//! reclassification goes through [`ThreadStateRecord::with_async_info`], which
//! returns a new record.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

/// Stable numeric thread identifier, unique within one sample batch.
///
/// Ordered so that "the smallest id in a cycle" is well defined; that id is
/// the identity of a [`DeadlockCycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

impl From<u64> for ThreadId {
    fn from(id: u64) -> Self {
        ThreadId(id)
    }
}

/// Identity of a lock (monitor or synchronizer) as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LockRef {
    /// Type of the lock object (e.g. `java.lang.Object`, `std::sync::Mutex<T>`)
    pub class_name: String,
    /// Identity of the lock instance (identity hash, address, ...)
    pub identity: u64,
}

impl LockRef {
    pub fn new(class_name: impl Into<String>, identity: u64) -> Self {
        Self { class_name: class_name.into(), identity }
    }
}

impl fmt::Display for LockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:x}", self.class_name, self.identity)
    }
}

// ============================================================================
// Thread State
// ============================================================================

/// Execution state of a thread at the instant it was sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum ThreadState {
    #[default]
    New,
    Runnable,
    Blocked,
    Waiting,
    TimedWaiting,
    Terminated,
}

impl ThreadState {
    /// Returns true for the states in which a thread can be waiting on a lock.
    #[must_use]
    pub fn is_parked(self) -> bool {
        matches!(self, ThreadState::Blocked | ThreadState::Waiting | ThreadState::TimedWaiting)
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadState::New => "NEW",
            ThreadState::Runnable => "RUNNABLE",
            ThreadState::Blocked => "BLOCKED",
            ThreadState::Waiting => "WAITING",
            ThreadState::TimedWaiting => "TIMED_WAITING",
            ThreadState::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Workload category assigned by the async classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(rename_all = "SCREAMING_SNAKE_CASE")
)]
pub enum AsyncThreadType {
    /// Continuation-style async (completable futures and their executors)
    CompletableFuture,
    /// Reactive-stream operators (Reactor, RxJava, ...)
    ReactiveStreams,
    /// Generic pool / worker threads
    ThreadPool,
    /// Web server request threads
    WebServer,
    /// Scheduled or timer-driven tasks
    ScheduledTask,
    /// Async by signal, but no category matched
    OtherAsync,
    /// Not classified (or not async)
    #[default]
    Unknown,
}

impl fmt::Display for AsyncThreadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AsyncThreadType::CompletableFuture => "COMPLETABLE_FUTURE",
            AsyncThreadType::ReactiveStreams => "REACTIVE_STREAMS",
            AsyncThreadType::ThreadPool => "THREAD_POOL",
            AsyncThreadType::WebServer => "WEB_SERVER",
            AsyncThreadType::ScheduledTask => "SCHEDULED_TASK",
            AsyncThreadType::OtherAsync => "OTHER_ASYNC",
            AsyncThreadType::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// One frame of a sampled stack, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StackFrame {
    /// Declaring class (or module path for native Rust frames)
    pub class_name: String,
    pub method_name: String,
    pub file_name: Option<String>,
    pub line: Option<u32>,
}

impl StackFrame {
    pub fn new(class_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method_name: method_name.into(),
            file_name: None,
            line: None,
        }
    }

    #[must_use]
    pub fn at(mut self, file_name: impl Into<String>, line: u32) -> Self {
        self.file_name = Some(file_name.into());
        self.line = Some(line);
        self
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file_name, self.line) {
            (Some(file), Some(line)) => {
                write!(f, "{}.{}({file}:{line})", self.class_name, self.method_name)
            }
            (Some(file), None) => write!(f, "{}.{}({file})", self.class_name, self.method_name),
            _ => write!(f, "{}.{}(Unknown Source)", self.class_name, self.method_name),
        }
    }
}

// ============================================================================
// Provider Output
// ============================================================================

/// Thread state exactly as an introspection provider reports it.
///
/// Plain data with public fields: providers fill it in however their host
/// runtime allows. The monitor turns it into a [`ThreadStateRecord`].
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawThreadState {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    /// `None` when the provider does not support CPU time
    pub cpu_time_nanos: Option<u64>,
    pub user_time_nanos: Option<u64>,
    pub is_daemon: bool,
    pub priority: i32,
    pub in_native: bool,
    pub suspended: bool,
    /// Lock this thread is blocked or waiting on
    pub lock_name: Option<LockRef>,
    /// Holder of `lock_name`; `None` if unowned or unknown
    pub lock_owner_id: Option<ThreadId>,
    pub stack_frames: Vec<StackFrame>,
    /// Provider already cut the stack short
    pub stack_truncated: bool,
    pub locked_monitors: Vec<LockRef>,
    pub locked_synchronizers: Vec<LockRef>,
}

impl RawThreadState {
    pub fn new(id: u64, name: impl Into<String>, state: ThreadState) -> Self {
        Self { id: ThreadId(id), name: name.into(), state, ..Self::default() }
    }

    /// Mark this thread as waiting on `lock`, optionally held by `owner`.
    #[must_use]
    pub fn waiting_on(mut self, lock: LockRef, owner: Option<ThreadId>) -> Self {
        self.lock_name = Some(lock);
        self.lock_owner_id = owner;
        self
    }

    #[must_use]
    pub fn holding(mut self, lock: LockRef) -> Self {
        self.locked_monitors.push(lock);
        self
    }

    #[must_use]
    pub fn with_frames(mut self, frames: Vec<StackFrame>) -> Self {
        self.stack_frames = frames;
        self
    }

    #[must_use]
    pub fn with_cpu_time(mut self, cpu_time_nanos: u64, user_time_nanos: u64) -> Self {
        self.cpu_time_nanos = Some(cpu_time_nanos);
        self.user_time_nanos = Some(user_time_nanos);
        self
    }
}

// ============================================================================
// Thread State Record
// ============================================================================

/// Immutable observation of one thread at one instant.
///
/// Fields are private; the only way to change the classification is
/// [`with_async_info`](Self::with_async_info), which copies.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThreadStateRecord {
    id: ThreadId,
    name: String,
    state: ThreadState,
    cpu_time_nanos: Option<u64>,
    user_time_nanos: Option<u64>,
    is_daemon: bool,
    priority: i32,
    in_native: bool,
    suspended: bool,
    lock_name: Option<LockRef>,
    lock_owner_id: Option<ThreadId>,
    stack_frames: Vec<StackFrame>,
    stack_truncated: bool,
    locked_monitors: Vec<LockRef>,
    locked_synchronizers: Vec<LockRef>,
    timestamp: SystemTime,
    is_async_thread: bool,
    async_thread_type: AsyncThreadType,
}

impl ThreadStateRecord {
    /// Build a record from provider output, capping the stack at `max_stack_depth`.
    ///
    /// Frames beyond the cap are dropped and `stack_truncated` is set, so a
    /// capped stack is distinguishable from a genuinely short one.
    #[must_use]
    pub fn from_raw(raw: RawThreadState, max_stack_depth: usize, timestamp: SystemTime) -> Self {
        let RawThreadState {
            id,
            name,
            state,
            cpu_time_nanos,
            user_time_nanos,
            is_daemon,
            priority,
            in_native,
            suspended,
            lock_name,
            lock_owner_id,
            mut stack_frames,
            stack_truncated,
            locked_monitors,
            locked_synchronizers,
        } = raw;

        let capped = stack_frames.len() > max_stack_depth;
        if capped {
            stack_frames.truncate(max_stack_depth);
        }

        Self {
            id,
            name,
            state,
            cpu_time_nanos,
            user_time_nanos,
            is_daemon,
            priority,
            in_native,
            suspended,
            lock_name,
            lock_owner_id,
            stack_frames,
            stack_truncated: stack_truncated || capped,
            locked_monitors,
            locked_synchronizers,
            timestamp,
            is_async_thread: false,
            async_thread_type: AsyncThreadType::Unknown,
        }
    }

    /// Copy of this record with new classification results.
    #[must_use]
    pub fn with_async_info(&self, is_async: bool, async_type: AsyncThreadType) -> Self {
        Self { is_async_thread: is_async, async_thread_type: async_type, ..self.clone() }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn cpu_time_nanos(&self) -> Option<u64> {
        self.cpu_time_nanos
    }

    pub fn user_time_nanos(&self) -> Option<u64> {
        self.user_time_nanos
    }

    pub fn is_daemon(&self) -> bool {
        self.is_daemon
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn in_native(&self) -> bool {
        self.in_native
    }

    pub fn suspended(&self) -> bool {
        self.suspended
    }

    pub fn lock_name(&self) -> Option<&LockRef> {
        self.lock_name.as_ref()
    }

    pub fn lock_owner_id(&self) -> Option<ThreadId> {
        self.lock_owner_id
    }

    pub fn stack_frames(&self) -> &[StackFrame] {
        &self.stack_frames
    }

    /// True when frames were dropped by a depth cap.
    pub fn stack_truncated(&self) -> bool {
        self.stack_truncated
    }

    pub fn locked_monitors(&self) -> &[LockRef] {
        &self.locked_monitors
    }

    pub fn locked_synchronizers(&self) -> &[LockRef] {
        &self.locked_synchronizers
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn is_async_thread(&self) -> bool {
        self.is_async_thread
    }

    pub fn async_thread_type(&self) -> AsyncThreadType {
        self.async_thread_type
    }
}

// ============================================================================
// Detection Output
// ============================================================================

/// A wait-for cycle of at least two threads.
///
/// Created fresh on every detection pass. The identity is the smallest thread
/// id in the cycle, so the same logical cycle seen in two samples has the
/// same `cycle_id` without any state carried between passes.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeadlockCycle {
    cycle_id: ThreadId,
    thread_ids: BTreeSet<ThreadId>,
    confidence: f64,
}

impl DeadlockCycle {
    /// Returns `None` for fewer than two threads: a thread waiting on a lock
    /// it holds itself is not a deadlock cycle.
    #[must_use]
    pub fn new(thread_ids: BTreeSet<ThreadId>, confidence: f64) -> Option<Self> {
        if thread_ids.len() < 2 {
            return None;
        }
        let cycle_id = *thread_ids.first()?;
        Some(Self { cycle_id, thread_ids, confidence: confidence.clamp(0.0, 1.0) })
    }

    pub fn cycle_id(&self) -> ThreadId {
        self.cycle_id
    }

    pub fn thread_ids(&self) -> &BTreeSet<ThreadId> {
        &self.thread_ids
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn len(&self) -> usize {
        self.thread_ids.len()
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    pub fn is_empty(&self) -> bool {
        self.thread_ids.is_empty()
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.thread_ids.contains(&id)
    }
}

impl fmt::Display for DeadlockCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.thread_ids.iter().map(ToString::to_string).collect();
        write!(
            f,
            "cycle {} [{}] (confidence {:.2})",
            self.cycle_id,
            ids.join(" -> "),
            self.confidence
        )
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Everything one sampling tick produced.
///
/// Owned by the monitor until it is handed to listeners, which only ever see
/// it by shared reference for the duration of their callback.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SnapshotBatch {
    sequence: u64,
    timestamp: SystemTime,
    threads: Vec<Arc<ThreadStateRecord>>,
    deadlocks: Vec<DeadlockCycle>,
    total_threads: usize,
    active_threads: usize,
    async_threads: usize,
}

impl SnapshotBatch {
    #[must_use]
    pub fn new(
        sequence: u64,
        timestamp: SystemTime,
        threads: Vec<Arc<ThreadStateRecord>>,
        deadlocks: Vec<DeadlockCycle>,
    ) -> Self {
        let active_threads = threads.iter().filter(|t| t.state() == ThreadState::Runnable).count();
        let async_threads = threads.iter().filter(|t| t.is_async_thread()).count();
        Self {
            sequence,
            timestamp,
            total_threads: threads.len(),
            active_threads,
            async_threads,
            threads,
            deadlocks,
        }
    }

    /// Monotonic tick counter of the monitor that produced this batch
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn threads(&self) -> &[Arc<ThreadStateRecord>] {
        &self.threads
    }

    pub fn deadlocks(&self) -> &[DeadlockCycle] {
        &self.deadlocks
    }

    pub fn total_threads(&self) -> usize {
        self.total_threads
    }

    /// Threads in state RUNNABLE
    pub fn active_threads(&self) -> usize {
        self.active_threads
    }

    pub fn async_threads(&self) -> usize {
        self.async_threads
    }

    pub fn find(&self, id: ThreadId) -> Option<&ThreadStateRecord> {
        self.threads.iter().map(AsRef::as_ref).find(|t| t.id() == id)
    }

    pub fn threads_in_state(&self, state: ThreadState) -> impl Iterator<Item = &ThreadStateRecord> {
        self.threads.iter().map(AsRef::as_ref).filter(move |t| t.state() == state)
    }

    pub fn async_thread_records(&self) -> impl Iterator<Item = &ThreadStateRecord> {
        self.threads.iter().map(AsRef::as_ref).filter(|t| t.is_async_thread())
    }
}
