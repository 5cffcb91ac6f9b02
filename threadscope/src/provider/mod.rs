//! Introspection providers
//!
//! A provider turns whatever the host runtime exposes into [`RawThreadState`]
//! values. The monitor only ever talks to the [`ThreadIntrospector`] trait,
//! always from a blocking-pool thread, so implementations are free to do
//! synchronous I/O.
//!
//! - [`procfs`]: Linux `/proc/<pid>/task` reader for any process

pub mod procfs;

use std::collections::BTreeSet;

use crate::domain::{ProviderError, RawThreadState, ThreadId};

pub use procfs::ProcfsProvider;

/// Source of raw per-thread state.
///
/// Must be cheap to call repeatedly. Errors are caught per tick by the
/// monitor, logged, counted, and the tick is skipped.
pub trait ThreadIntrospector: Send + Sync + 'static {
    /// Every live thread of the target.
    ///
    /// # Errors
    /// Returns [`ProviderError`] when the dump cannot be taken at all.
    fn fetch_all(&self) -> Result<Vec<RawThreadState>, ProviderError>;

    /// Only the threads in `ids`; ids that no longer exist are omitted.
    ///
    /// # Errors
    /// Same conditions as [`fetch_all`](Self::fetch_all).
    fn fetch_ids(&self, ids: &[ThreadId]) -> Result<Vec<RawThreadState>, ProviderError> {
        let wanted: BTreeSet<ThreadId> = ids.iter().copied().collect();
        Ok(self.fetch_all()?.into_iter().filter(|t| wanted.contains(&t.id)).collect())
    }

    fn supports_cpu_time(&self) -> bool;

    /// Threads the host runtime itself reports as deadlocked.
    ///
    /// Used as a hint to seed the wait-for graph. Providers without such a
    /// facility keep the default empty set.
    ///
    /// # Errors
    /// Returns [`ProviderError`] when the host query fails.
    fn find_deadlocked_thread_ids(&self) -> Result<BTreeSet<ThreadId>, ProviderError> {
        Ok(BTreeSet::new())
    }
}
