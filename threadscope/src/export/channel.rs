//! Bounded hand-off to a consumer thread
//!
//! Listeners run on the monitor's worker, so a slow consumer must never
//! stall a tick. When the channel is full the event is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::bail;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::debug;

use crate::domain::{DeadlockCycle, SnapshotBatch};
use crate::monitor::MonitorListener;

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Started,
    Snapshot(SnapshotBatch),
    DeadlockAlert(Vec<DeadlockCycle>),
    Stopped,
}

#[derive(Debug)]
pub struct ChannelListener {
    tx: Sender<MonitorEvent>,
    dropped: AtomicU64,
}

impl ChannelListener {
    /// Listener plus the receiving end of a channel holding at most `capacity` events.
    pub fn bounded(capacity: usize) -> (Self, Receiver<MonitorEvent>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx, dropped: AtomicU64::new(0) }, rx)
    }

    /// Events discarded because the consumer was behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send(&self, event: MonitorEvent) -> anyhow::Result<()> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Consumer lagging; dropped event ({dropped} total)");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => bail!("Consumer disconnected"),
        }
    }
}

impl MonitorListener for ChannelListener {
    fn name(&self) -> &str {
        "ChannelListener"
    }

    fn on_snapshot(&self, batch: &SnapshotBatch) -> anyhow::Result<()> {
        self.send(MonitorEvent::Snapshot(batch.clone()))
    }

    fn on_deadlock_alert(&self, cycles: &[DeadlockCycle]) -> anyhow::Result<()> {
        self.send(MonitorEvent::DeadlockAlert(cycles.to_vec()))
    }

    fn on_started(&self) -> anyhow::Result<()> {
        self.send(MonitorEvent::Started)
    }

    fn on_stopped(&self) -> anyhow::Result<()> {
        self.send(MonitorEvent::Stopped)
    }
}
