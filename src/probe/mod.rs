//! Probe lifecycle: one encrypted transaction tied to a trigger block, tracked from signing
//! through sequencing and inclusion (or cancellation).

pub mod forfeit;
pub mod ledger;
pub mod submitter;
pub mod watcher;

use crate::account::Account;
use crate::shutter::IdentityPrefix;
use alloy::primitives::{Address, TxHash};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use ledger::{LedgerSnapshot, LifecycleLedger, ReconcileOutcome};
pub use submitter::ProbeSubmitter;
pub use watcher::ProbeWatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProbeStatus {
    /// Inner tx encrypted, outer tx signed and broadcast.
    Signed,
    /// Outer tx mined by the sequencer contract.
    Sequenced,
    /// Inner tx decrypted and included.
    Included,
    /// Outer tx never mined before deadline or cancellation.
    NotSequenced,
    /// Sequenced, but the inner tx never landed.
    NotIncluded,
    /// Status could not be assessed (failed receipt, client failure).
    SystemFailure,
}

impl ProbeStatus {
    pub const ALL: [ProbeStatus; 6] = [
        Self::Signed,
        Self::Sequenced,
        Self::Included,
        Self::NotSequenced,
        Self::NotIncluded,
        Self::SystemFailure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Signed => "Signed",
            Self::Sequenced => "Sequenced",
            Self::Included => "Included",
            Self::NotSequenced => "NotSequenced",
            Self::NotIncluded => "NotIncluded",
            Self::SystemFailure => "SystemFailure",
        }
    }

    pub fn is_terminal(self) -> bool {
        match self {
            Self::Signed | Self::Sequenced => false,
            Self::Included | Self::NotSequenced | Self::NotIncluded | Self::SystemFailure => true,
        }
    }

    pub fn can_transition_to(self, next: ProbeStatus) -> bool {
        matches!(
            (self, next),
            (Self::Signed, Self::Sequenced)
                | (Self::Signed, Self::NotSequenced)
                | (Self::Signed, Self::SystemFailure)
                | (Self::Sequenced, Self::Included)
                | (Self::Sequenced, Self::NotIncluded)
                | (Self::Sequenced, Self::SystemFailure)
        )
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-phase deadlines. The inclusion phase must outlast the submission phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimeouts {
    pub submission: Duration,
    pub inclusion: Duration,
    pub forfeit: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            submission: Duration::from_secs(300),
            inclusion: Duration::from_secs(1_200),
            forfeit: Duration::from_secs(300),
        }
    }
}

/// Mutable part of a probe. Block numbers are 0 until observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeProgress {
    pub status: ProbeStatus,
    pub submission_block: u64,
    pub inclusion_block: u64,
    pub cancel_block: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal probe transition {from} -> {to}")]
pub struct TransitionError {
    pub from: ProbeStatus,
    pub to: ProbeStatus,
}

/// Idempotent cancellation bound to one probe.
#[derive(Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    requested_at: AtomicU64,
}

impl CancelHandle {
    /// Requests cancellation at chain height `head`. Only the first request is recorded.
    pub fn cancel(&self, head: u64) -> bool {
        let first = self
            .requested_at
            .compare_exchange(0, head.max(1), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        self.token.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn requested_at(&self) -> Option<u64> {
        match self.requested_at.load(Ordering::SeqCst) {
            0 => None,
            head => Some(head),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Hashes and nonces of the two transactions making up a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTransactions {
    pub inner_hash: TxHash,
    pub inner_nonce: u64,
    pub outer_hash: TxHash,
    pub outer_nonce: u64,
}

pub struct TrackedProbe {
    pub trigger_block: u64,
    pub prefix: IdentityPrefix,
    /// Address whose identity the inner tx is encrypted to (the submit account).
    pub sender: Address,
    /// Account that signed the inner tx and owns its nonce.
    pub account: Arc<Account>,
    pub txs: ProbeTransactions,
    progress: StdMutex<ProbeProgress>,
    cancel: CancelHandle,
}

impl TrackedProbe {
    pub fn new(
        trigger_block: u64,
        sender: Address,
        account: Arc<Account>,
        txs: ProbeTransactions,
    ) -> Self {
        Self {
            trigger_block,
            prefix: IdentityPrefix::from_block_number(trigger_block),
            sender,
            account,
            txs,
            progress: StdMutex::new(ProbeProgress {
                status: ProbeStatus::Signed,
                submission_block: 0,
                inclusion_block: 0,
                cancel_block: 0,
            }),
            cancel: CancelHandle::default(),
        }
    }

    pub fn id(&self) -> TxHash {
        self.txs.outer_hash
    }

    fn lock_progress(&self) -> MutexGuard<'_, ProbeProgress> {
        match self.progress.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(
                    "[PROBE] progress lock poisoned for outer={:#x}; recovering guard state.",
                    self.txs.outer_hash
                );
                poisoned.into_inner()
            }
        }
    }

    pub fn progress(&self) -> ProbeProgress {
        *self.lock_progress()
    }

    pub fn status(&self) -> ProbeStatus {
        self.lock_progress().status
    }

    fn transition(
        &self,
        next: ProbeStatus,
        apply: impl FnOnce(&mut ProbeProgress),
    ) -> Result<(), TransitionError> {
        let mut progress = self.lock_progress();
        if !progress.status.can_transition_to(next) {
            return Err(TransitionError {
                from: progress.status,
                to: next,
            });
        }
        progress.status = next;
        apply(&mut progress);
        Ok(())
    }

    pub fn mark_sequenced(&self, block: u64) -> Result<(), TransitionError> {
        self.transition(ProbeStatus::Sequenced, |p| p.submission_block = block)
    }

    pub fn mark_included(&self, block: u64) -> Result<(), TransitionError> {
        self.transition(ProbeStatus::Included, |p| p.inclusion_block = block)
    }

    /// Moves to a failure state, recording the cancel block when one was observed.
    pub fn mark_failed(
        &self,
        status: ProbeStatus,
        cancel_block: Option<u64>,
    ) -> Result<(), TransitionError> {
        if matches!(status, ProbeStatus::Sequenced | ProbeStatus::Included) {
            return Err(TransitionError {
                from: self.status(),
                to: status,
            });
        }
        self.transition(status, |p| {
            if let Some(block) = cancel_block {
                p.cancel_block = block;
            }
        })
    }

    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    pub fn request_cancel(&self, head: u64) -> bool {
        self.cancel.cancel(head)
    }
}

impl fmt::Debug for TrackedProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedProbe")
            .field("trigger_block", &self.trigger_block)
            .field("txs", &self.txs)
            .field("progress", &self.progress())
            .finish()
    }
}

impl fmt::Display for TrackedProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.progress();
        write!(
            f,
            "status={} trigger={} sequenced={} outer={:#x} (nonce {}) included={} inner={:#x} (nonce {}) cancel={}",
            p.status,
            self.trigger_block,
            p.submission_block,
            self.txs.outer_hash,
            self.txs.outer_nonce,
            p.inclusion_block,
            self.txs.inner_hash,
            self.txs.inner_nonce,
            p.cancel_block
        )
    }
}
