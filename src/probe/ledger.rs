use crate::probe::{ProbeProgress, ProbeStatus, TrackedProbe};
use alloy::primitives::TxHash;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

#[derive(Default)]
struct LedgerState {
    in_flight: Vec<Arc<TrackedProbe>>,
    done: VecDeque<Arc<TrackedProbe>>,
    /// Done probes drained into reports or evicted by the done bound.
    archived: u64,
    /// Highest inclusion block seen so far, including probes whose watcher already
    /// moved them to done.
    highest_inclusion: u64,
}

impl LedgerState {
    fn push_done(&mut self, probe: Arc<TrackedProbe>, capacity: usize) {
        while self.done.len() >= capacity {
            if self.done.pop_front().is_none() {
                break;
            }
            self.archived = self.archived.saturating_add(1);
        }
        self.done.push_back(probe);
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub head: u64,
    /// Terminal probes moved to done.
    pub completed: usize,
    /// Stale sequenced probes cancelled and moved to done.
    pub cancelled: usize,
    pub highest_inclusion: u64,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.completed == 0 && self.cancelled == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub in_flight: Vec<(TxHash, ProbeProgress)>,
    pub done: Vec<(TxHash, ProbeProgress)>,
    pub archived: u64,
}

impl LedgerSnapshot {
    pub fn by_status(&self) -> BTreeMap<ProbeStatus, usize> {
        let mut counts = BTreeMap::new();
        for (_, progress) in self.in_flight.iter().chain(self.done.iter()) {
            *counts.entry(progress.status).or_insert(0) += 1;
        }
        counts
    }
}

/// Registry of in-flight and done probes behind one lock.
///
/// A registered probe is in exactly one of the two collections. Moving a probe to done
/// happens once, either when its watcher finishes or during reconciliation.
pub struct LifecycleLedger {
    state: StdMutex<LedgerState>,
    done_capacity: usize,
}

impl LifecycleLedger {
    pub fn new(done_capacity: usize) -> Self {
        Self {
            state: StdMutex::new(LedgerState::default()),
            done_capacity: done_capacity.max(1),
        }
    }

    fn lock_state(&self, label: &str) -> MutexGuard<'_, LedgerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(
                    "[LEDGER] ledger lock poisoned in {}; recovering guard state.",
                    label
                );
                poisoned.into_inner()
            }
        }
    }

    pub fn register(&self, probe: Arc<TrackedProbe>) {
        let mut state = self.lock_state("register");
        state.in_flight.push(probe);
    }

    /// Probes ever registered, including drained and evicted ones.
    pub fn probe_count(&self) -> u64 {
        let state = self.lock_state("probe_count");
        (state.in_flight.len() + state.done.len()) as u64 + state.archived
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock_state("in_flight_len").in_flight.len()
    }

    pub fn done_len(&self) -> usize {
        self.lock_state("done_len").done.len()
    }

    pub fn archived(&self) -> u64 {
        self.lock_state("archived").archived
    }

    pub fn in_flight(&self) -> Vec<Arc<TrackedProbe>> {
        self.lock_state("in_flight").in_flight.clone()
    }

    pub fn contains_in_flight(&self, id: TxHash) -> bool {
        self.lock_state("contains_in_flight")
            .in_flight
            .iter()
            .any(|p| p.id() == id)
    }

    /// Moves a terminal probe from in-flight to done. Returns false when the probe is not
    /// in flight (already moved) or not yet terminal.
    pub fn complete(&self, id: TxHash) -> bool {
        let mut state = self.lock_state("complete");
        let Some(idx) = state
            .in_flight
            .iter()
            .position(|p| p.id() == id && p.status().is_terminal())
        else {
            return false;
        };
        let probe = state.in_flight.swap_remove(idx);
        state.highest_inclusion = state.highest_inclusion.max(probe.progress().inclusion_block);
        state.push_done(probe, self.done_capacity);
        true
    }

    /// Per-head reconciliation.
    ///
    /// Terminal probes move to done. Sequenced probes whose submission block is older than
    /// the newest inclusion seen (in flight or already completed) can no longer land in order; they are
    /// cancelled and moved to done. Their watchers still finish forfeiture and record the
    /// final status on the probe itself.
    pub fn reconcile(&self, head: u64) -> ReconcileOutcome {
        let mut state = self.lock_state("reconcile");
        let progress: Vec<ProbeProgress> = state.in_flight.iter().map(|p| p.progress()).collect();
        let highest_inclusion = progress
            .iter()
            .map(|p| p.inclusion_block)
            .max()
            .unwrap_or(0)
            .max(state.highest_inclusion);
        state.highest_inclusion = highest_inclusion;

        let mut outcome = ReconcileOutcome {
            head,
            highest_inclusion,
            ..ReconcileOutcome::default()
        };
        let in_flight = std::mem::take(&mut state.in_flight);
        for (probe, p) in in_flight.into_iter().zip(progress) {
            if p.status.is_terminal() {
                outcome.completed += 1;
                state.push_done(probe, self.done_capacity);
            } else if p.status == ProbeStatus::Sequenced && p.submission_block < highest_inclusion {
                probe.request_cancel(head);
                tracing::info!(
                    "[LEDGER] cancelling stale probe at head {}: submission {} < inclusion {} ({})",
                    head,
                    p.submission_block,
                    highest_inclusion,
                    probe.txs.outer_hash
                );
                outcome.cancelled += 1;
                state.push_done(probe, self.done_capacity);
            } else {
                state.in_flight.push(probe);
            }
        }
        outcome
    }

    /// Cancels every in-flight probe without moving it; watchers complete them.
    pub fn cancel_all(&self, head: u64) -> usize {
        let state = self.lock_state("cancel_all");
        state
            .in_flight
            .iter()
            .filter(|p| p.request_cancel(head))
            .count()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.lock_state("snapshot");
        LedgerSnapshot {
            in_flight: state
                .in_flight
                .iter()
                .map(|p| (p.id(), p.progress()))
                .collect(),
            done: state.done.iter().map(|p| (p.id(), p.progress())).collect(),
            archived: state.archived,
        }
    }

    /// Hands the settled part of the done set to a report; drained probes count as archived.
    ///
    /// Probes cancelled by reconciliation sit in done while their watcher is still
    /// forfeiting. They stay until the watcher records their terminal status.
    pub fn drain_done(&self) -> Vec<Arc<TrackedProbe>> {
        let mut state = self.lock_state("drain_done");
        let (settled, unsettled): (VecDeque<_>, VecDeque<_>) =
            state.done.drain(..).partition(|p| p.status().is_terminal());
        state.done = unsettled;
        state.archived = state.archived.saturating_add(settled.len() as u64);
        Vec::from(settled)
    }
}
