//! Deadlock cycle analysis over a wait-for graph.
//!
//! # Graph Construction
//!
//! An edge `T1 → T2` means "T1 is parked on a lock held by T2". The holder is
//! taken from, in order:
//!
//! 1. `T1.lock_owner_id`, when the provider reported one
//! 2. the thread whose locked monitors or synchronizers contain `T1.lock_name`
//!
//! A lock with no known holder produces no edge. Terminated records and
//! owners absent from the batch produce no edge either: the analysis only
//! uses the records in hand, never live state.
//!
//! The provider may also name threads it already found deadlocked. That hint
//! only adds edges: hinted threads that are parked but have no holder in the
//! records are chained together in id order, so the provider's verdict shows
//! up as one cycle over them. Owner-linked cycles elsewhere in the batch are
//! always reported.
//!
//! # Cycle Search
//!
//! A thread waits on at most one lock, so every node has at most one outgoing
//! edge. The depth-first walk therefore follows a single chain from each
//! unvisited root, marking nodes `OnPath` as it goes. Reaching an `OnPath`
//! node closes a cycle; reaching a `Done` node ends the walk. All nodes on the
//! walked path become `Done` afterwards, so every node is entered once and a
//! pass is O(V + E).
//!
//! The visited marks are local to each call; the analyzer holds only its
//! configuration and can be shared between monitors.
//!
//! # Confidence
//!
//! A fixed size → confidence table: 4+ threads → 1.0, 3 → 0.9, 2 → 0.8.
//! Larger cycles are considered more certain; it is a detection-quality
//! heuristic, not a probability. Cycles below the configured threshold are
//! dropped.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, warn};

use super::{DetectionInput, DetectionResult, Detector, DetectorMetadata};
use crate::config::DeadlockConfig;
use crate::domain::{DeadlockCycle, DetectorError, LockRef, ThreadId, ThreadState, ThreadStateRecord};

pub const DETECTOR_NAME: &str = "DeadlockDetector";

/// Confidence assigned to a cycle of `size` threads.
#[must_use]
pub fn cycle_confidence(size: usize) -> f64 {
    match size {
        s if s >= 4 => 1.0,
        3 => 0.9,
        2 => 0.8,
        _ => 0.5,
    }
}

/// Wait-for graph cycle detector.
#[derive(Debug, Clone)]
pub struct DeadlockAnalyzer {
    enabled: bool,
    confidence_threshold: f64,
    metadata: DetectorMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnPath,
    Done,
}

impl Default for DeadlockAnalyzer {
    fn default() -> Self {
        Self::new(true, crate::config::DEFAULT_DEADLOCK_THRESHOLD)
    }
}

impl DeadlockAnalyzer {
    #[must_use]
    pub fn new(enabled: bool, confidence_threshold: f64) -> Self {
        Self {
            enabled,
            confidence_threshold,
            metadata: DetectorMetadata::new(
                DETECTOR_NAME,
                "Detects deadlock cycles with confidence scoring",
            ),
        }
    }

    #[must_use]
    pub fn from_config(config: &DeadlockConfig) -> Self {
        Self::new(config.enabled, config.confidence_threshold)
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Find every wait-for cycle of two or more threads in `threads`.
    ///
    /// `hint` names threads the provider already considers deadlocked; it
    /// seeds edges the records cannot supply and never hides other cycles.
    /// A batch with duplicate thread ids is treated as a partial dump and
    /// reports nothing.
    ///
    /// Never fails: an unusable batch degrades to "no cycles".
    #[must_use]
    pub fn analyze(
        &self,
        threads: &[Arc<ThreadStateRecord>],
        hint: Option<&BTreeSet<ThreadId>>,
    ) -> Vec<DeadlockCycle> {
        if !self.enabled {
            return Vec::new();
        }
        self.try_analyze(threads, hint).unwrap_or_else(|duplicate| {
            warn!("Thread batch lists {duplicate} twice; skipping deadlock analysis");
            Vec::new()
        })
    }

    /// Full analysis, or the first repeated id when the batch is unusable.
    fn try_analyze(
        &self,
        threads: &[Arc<ThreadStateRecord>],
        hint: Option<&BTreeSet<ThreadId>>,
    ) -> Result<Vec<DeadlockCycle>, ThreadId> {
        let index = index_by_id(threads)?;
        let mut edges = wait_for_edges(threads, &index);
        if let Some(hinted) = hint.filter(|h| !h.is_empty()) {
            let seeded = link_hinted(&mut edges, &index, hinted);
            if seeded > 0 {
                debug!("Provider hint seeded {seeded} wait-for edges");
            }
        }
        Ok(self.cycles_over(&edges))
    }

    fn cycles_over(&self, edges: &BTreeMap<ThreadId, ThreadId>) -> Vec<DeadlockCycle> {
        let mut cycles: Vec<DeadlockCycle> = find_cycles(edges)
            .into_iter()
            .filter_map(|members| {
                let confidence = cycle_confidence(members.len());
                DeadlockCycle::new(members, confidence)
            })
            .filter(|cycle| cycle.confidence() >= self.confidence_threshold)
            .collect();
        cycles.sort_by_key(DeadlockCycle::cycle_id);
        cycles
    }
}

impl Detector for DeadlockAnalyzer {
    fn name(&self) -> &str {
        DETECTOR_NAME
    }

    fn metadata(&self) -> DetectorMetadata {
        self.metadata.clone()
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn detect(&self, input: &DetectionInput<'_>) -> Result<Vec<DetectionResult>, DetectorError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        let cycles = self.try_analyze(input.threads, input.deadlock_hint).map_err(|duplicate| {
            DetectorError::InvalidBatch {
                detector: DETECTOR_NAME.to_string(),
                reason: format!("{duplicate} appears more than once"),
            }
        })?;
        Ok(cycles.into_iter().map(DetectionResult::Deadlock).collect())
    }
}

// =============================================================================
// GRAPH CONSTRUCTION
// =============================================================================

/// Map id → record, or the first id that repeats.
fn index_by_id(
    threads: &[Arc<ThreadStateRecord>],
) -> Result<HashMap<ThreadId, &ThreadStateRecord>, ThreadId> {
    let mut index = HashMap::with_capacity(threads.len());
    for thread in threads {
        if index.insert(thread.id(), thread.as_ref()).is_some() {
            return Err(thread.id());
        }
    }
    Ok(index)
}

fn wait_for_edges(
    threads: &[Arc<ThreadStateRecord>],
    index: &HashMap<ThreadId, &ThreadStateRecord>,
) -> BTreeMap<ThreadId, ThreadId> {
    let mut holders: HashMap<&LockRef, ThreadId> = HashMap::new();
    for thread in threads.iter().filter(|t| t.state() != ThreadState::Terminated) {
        for lock in thread.locked_monitors().iter().chain(thread.locked_synchronizers()) {
            holders.entry(lock).or_insert(thread.id());
        }
    }

    let mut edges = BTreeMap::new();
    for thread in threads {
        if thread.state() == ThreadState::Terminated {
            continue;
        }
        let Some(lock) = thread.lock_name() else {
            continue;
        };
        let Some(owner) = thread.lock_owner_id().or_else(|| holders.get(lock).copied()) else {
            continue;
        };
        let owner_alive =
            index.get(&owner).is_some_and(|rec| rec.state() != ThreadState::Terminated);
        if owner_alive {
            edges.insert(thread.id(), owner);
        }
    }
    edges
}

/// Chain hinted, parked threads that have no outgoing edge into a ring.
/// Returns the number of edges added.
fn link_hinted(
    edges: &mut BTreeMap<ThreadId, ThreadId>,
    index: &HashMap<ThreadId, &ThreadStateRecord>,
    hinted: &BTreeSet<ThreadId>,
) -> usize {
    let unresolved: Vec<ThreadId> = hinted
        .iter()
        .copied()
        .filter(|id| !edges.contains_key(id))
        .filter(|id| index.get(id).is_some_and(|rec| rec.state().is_parked()))
        .collect();
    if unresolved.len() < 2 {
        return 0;
    }

    for (i, &from) in unresolved.iter().enumerate() {
        edges.insert(from, unresolved[(i + 1) % unresolved.len()]);
    }
    unresolved.len()
}

// =============================================================================
// CYCLE SEARCH
// =============================================================================

/// Node sets of every cycle reachable in `edges`, self-loops included.
fn find_cycles(edges: &BTreeMap<ThreadId, ThreadId>) -> Vec<BTreeSet<ThreadId>> {
    let mut marks: HashMap<ThreadId, Mark> = HashMap::with_capacity(edges.len());
    let mut cycles = Vec::new();

    for &root in edges.keys() {
        if marks.contains_key(&root) {
            continue;
        }

        let mut path: Vec<ThreadId> = Vec::new();
        let mut node = root;
        loop {
            match marks.get(&node) {
                Some(Mark::OnPath) => {
                    if let Some(start) = path.iter().position(|&n| n == node) {
                        cycles.push(path[start..].iter().copied().collect());
                    }
                    break;
                }
                Some(Mark::Done) => break,
                None => {
                    marks.insert(node, Mark::OnPath);
                    path.push(node);
                    match edges.get(&node) {
                        Some(&next) => node = next,
                        None => break,
                    }
                }
            }
        }

        for visited in path {
            marks.insert(visited, Mark::Done);
        }
    }

    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawThreadState;
    use std::time::SystemTime;

    fn lock(n: u64) -> LockRef {
        LockRef::new("java.lang.Object", n)
    }

    fn record(raw: RawThreadState) -> Arc<ThreadStateRecord> {
        Arc::new(ThreadStateRecord::from_raw(raw, 20, SystemTime::UNIX_EPOCH))
    }

    /// Thread `id` holds lock `id` and waits on lock `waits_for` held by thread `waits_for`.
    fn waiter(id: u64, waits_for: u64) -> Arc<ThreadStateRecord> {
        record(
            RawThreadState::new(id, format!("worker-{id}"), ThreadState::Blocked)
                .holding(lock(id))
                .waiting_on(lock(waits_for), Some(ThreadId(waits_for))),
        )
    }

    #[test]
    fn test_confidence_table() {
        assert!((cycle_confidence(2) - 0.8).abs() < f64::EPSILON);
        assert!((cycle_confidence(3) - 0.9).abs() < f64::EPSILON);
        assert!((cycle_confidence(4) - 1.0).abs() < f64::EPSILON);
        assert!((cycle_confidence(12) - 1.0).abs() < f64::EPSILON);
        assert!((cycle_confidence(1) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_find_cycles_visits_tail_once() {
        // 1 -> 2 -> 3 -> 2, 4 -> 3
        let edges: BTreeMap<ThreadId, ThreadId> = [(1, 2), (2, 3), (3, 2), (4, 3)]
            .into_iter()
            .map(|(a, b)| (ThreadId(a), ThreadId(b)))
            .collect();
        let cycles = find_cycles(&edges);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0], [ThreadId(2), ThreadId(3)].into_iter().collect());
    }

    #[test]
    fn test_owner_resolved_from_locked_monitors() {
        // Owner ids unknown, but each thread reports the monitor it holds.
        let threads = vec![
            record(
                RawThreadState::new(10, "a", ThreadState::Blocked)
                    .holding(lock(1))
                    .waiting_on(lock(2), None),
            ),
            record(
                RawThreadState::new(11, "b", ThreadState::Blocked)
                    .holding(lock(2))
                    .waiting_on(lock(1), None),
            ),
        ];
        let cycles = DeadlockAnalyzer::default().analyze(&threads, None);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].cycle_id(), ThreadId(10));
    }

    #[test]
    fn test_terminated_owner_breaks_cycle() {
        let gone = RawThreadState::new(2, "gone", ThreadState::Terminated)
            .holding(lock(2))
            .waiting_on(lock(1), Some(ThreadId(1)));
        let threads = vec![waiter(1, 2), record(gone)];
        assert!(DeadlockAnalyzer::default().analyze(&threads, None).is_empty());
    }

    #[test]
    fn test_duplicate_ids_degrade_to_empty() {
        let threads = vec![waiter(1, 2), waiter(2, 1), waiter(2, 1)];
        assert!(DeadlockAnalyzer::default().analyze(&threads, None).is_empty());
    }

    #[test]
    fn test_hint_keeps_cycles_outside_hint() {
        let threads = vec![waiter(1, 2), waiter(2, 1), waiter(5, 6), waiter(6, 7), waiter(7, 5)];
        let hint: BTreeSet<ThreadId> = [ThreadId(5), ThreadId(6), ThreadId(7)].into_iter().collect();
        let cycles = DeadlockAnalyzer::default().analyze(&threads, Some(&hint));

        let cycle_ids: Vec<ThreadId> = cycles.iter().map(DeadlockCycle::cycle_id).collect();
        assert_eq!(cycle_ids, vec![ThreadId(1), ThreadId(5)]);
    }

    #[test]
    fn test_hint_links_threads_without_owner_info() {
        // Parked on locks nobody is recorded as holding
        let blind = |id: u64| {
            record(
                RawThreadState::new(id, format!("blind-{id}"), ThreadState::Blocked)
                    .waiting_on(lock(100 + id), None),
            )
        };
        let threads = vec![waiter(1, 2), waiter(2, 1), blind(8), blind(9)];
        assert_eq!(DeadlockAnalyzer::default().analyze(&threads, None).len(), 1);

        let hint: BTreeSet<ThreadId> = [ThreadId(8), ThreadId(9)].into_iter().collect();
        let cycles = DeadlockAnalyzer::default().analyze(&threads, Some(&hint));
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[1].thread_ids(), &hint);
    }

    #[test]
    fn test_hint_ignores_running_threads() {
        let running = record(RawThreadState::new(8, "busy", ThreadState::Runnable));
        let threads = vec![running, record(RawThreadState::new(9, "idle", ThreadState::Waiting))];
        let hint: BTreeSet<ThreadId> = [ThreadId(8), ThreadId(9)].into_iter().collect();
        assert!(DeadlockAnalyzer::default().analyze(&threads, Some(&hint)).is_empty());
    }

    #[test]
    fn test_detect_rejects_duplicate_ids() {
        let threads = vec![waiter(1, 2), waiter(2, 1), waiter(2, 1)];
        let result = DeadlockAnalyzer::default().detect(&DetectionInput::new(&threads));
        assert!(matches!(result, Err(DetectorError::InvalidBatch { .. })));
    }

    #[test]
    fn test_hint_without_cycle_keeps_owner_cycles() {
        let idle = record(RawThreadState::new(9, "idle", ThreadState::Waiting));
        let threads = vec![waiter(1, 2), waiter(2, 1), idle];
        let hint: BTreeSet<ThreadId> = [ThreadId(9)].into_iter().collect();
        let cycles = DeadlockAnalyzer::default().analyze(&threads, Some(&hint));
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].cycle_id(), ThreadId(1));
    }

    #[test]
    fn test_threshold_drops_small_cycles() {
        let threads = vec![waiter(1, 2), waiter(2, 1), waiter(3, 4), waiter(4, 5), waiter(5, 3)];
        let cycles = DeadlockAnalyzer::new(true, 0.85).analyze(&threads, None);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 3);
    }

    #[test]
    fn test_disabled_reports_nothing() {
        let threads = vec![waiter(1, 2), waiter(2, 1)];
        assert!(DeadlockAnalyzer::new(false, 0.8).analyze(&threads, None).is_empty());
    }
}
