//! Snapshot listeners
//!
//! Listeners are called synchronously, in registration order, from the
//! monitor's blocking worker. Each call is isolated: an `Err` or a panic is
//! logged and counted, and delivery continues with the next listener.
//!
//! Tick output is published inside a window opened by `start()` and closed by
//! `stop()`. A tick remembers the window it started in and delivers nothing
//! once that window is closed, so a tick abandoned at shutdown can never
//! reach a listener after `on_stopped`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, warn};

use crate::domain::{DeadlockCycle, SnapshotBatch};

/// Receiver of monitor output.
pub trait MonitorListener: Send + Sync {
    /// Name used in failure logs
    fn name(&self) -> &str;

    /// Called once per sampling tick with the fully annotated batch.
    ///
    /// # Errors
    /// Any error is logged by the monitor; it never stops the tick.
    fn on_snapshot(&self, batch: &SnapshotBatch) -> anyhow::Result<()>;

    /// Called from the alert cadence whenever it finds at least one cycle.
    ///
    /// # Errors
    /// Any error is logged by the monitor.
    fn on_deadlock_alert(&self, _cycles: &[DeadlockCycle]) -> anyhow::Result<()> {
        Ok(())
    }

    /// # Errors
    /// Any error is logged by the monitor.
    fn on_started(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// # Errors
    /// Any error is logged by the monitor.
    fn on_stopped(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Handle returned by [`ListenerSet::add`], used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Entry = (ListenerId, Arc<dyn MonitorListener>);

/// Identifies one publication window. Odd values are open windows.
pub(crate) type Window = u64;

#[derive(Default)]
pub struct ListenerSet {
    next_id: AtomicU64,
    listeners: RwLock<Vec<Entry>>,
    window: AtomicU64,
    /// Windowed callbacks currently running
    in_flight: AtomicUsize,
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> =
            self.snapshot().iter().map(|(_, l)| l.name().to_string()).collect();
        f.debug_struct("ListenerSet").field("listeners", &names).finish()
    }
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn MonitorListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().unwrap_or_else(PoisonError::into_inner).push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(entry_id, _)| *entry_id != id);
        before != listeners.len()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke `callback` on every listener. Returns the number that failed.
    pub fn deliver<F>(&self, event: &str, callback: F) -> u64
    where
        F: Fn(&dyn MonitorListener) -> anyhow::Result<()>,
    {
        let mut failures = 0;
        for (_, listener) in self.snapshot() {
            if !invoke(listener.as_ref(), event, &callback) {
                failures += 1;
            }
        }
        failures
    }

    /// Like [`deliver`](Self::deliver), but only while `window` is still the
    /// open window. A window closing part-way stops delivery at the next
    /// listener. Returns `None` unless every listener was reached.
    pub(crate) fn deliver_in<F>(&self, window: Window, event: &str, callback: F) -> Option<u64>
    where
        F: Fn(&dyn MonitorListener) -> anyhow::Result<()>,
    {
        if !self.is_current(window) {
            return None;
        }

        let mut failures = 0;
        for (_, listener) in self.snapshot() {
            // Registered before the check, so close() either stops this call
            // or sees it in flight
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let open = self.is_current(window);
            if open && !invoke(listener.as_ref(), event, &callback) {
                failures += 1;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if !open {
                debug!("Window closed; dropping {event} before listener {}", listener.name());
                return None;
            }
        }
        Some(failures)
    }

    /// The current window, open or closed.
    pub(crate) fn window(&self) -> Window {
        self.window.load(Ordering::SeqCst)
    }

    /// Open a new publication window, or return the one already open.
    pub(crate) fn open(&self) -> Window {
        match self.window.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| {
            (w % 2 == 0).then_some(w + 1)
        }) {
            Ok(previous) => previous + 1,
            Err(current) => current,
        }
    }

    /// Close the open window. Callbacks already running finish; see
    /// [`in_flight`](Self::in_flight).
    pub(crate) fn close(&self) {
        self.window
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| (w % 2 == 1).then_some(w + 1))
            .ok();
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn is_current(&self, window: Window) -> bool {
        window % 2 == 1 && self.window.load(Ordering::SeqCst) == window
    }

    // Callbacks run without holding the lock so a listener may add or remove listeners
    fn snapshot(&self) -> Vec<Entry> {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Run one callback in isolation. Returns false if it failed or panicked.
fn invoke<F>(listener: &dyn MonitorListener, event: &str, callback: &F) -> bool
where
    F: Fn(&dyn MonitorListener) -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(|| callback(listener))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("Listener {} failed on {event}: {e:#}", listener.name());
            false
        }
        Err(_) => {
            warn!("Listener {} panicked on {event}", listener.name());
            false
        }
    }
}
