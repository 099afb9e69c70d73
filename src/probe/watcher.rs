use crate::chain::{ChainGateway, HeadTracker, ReceiptSummary};
use crate::error::{Result, RpcError};
use crate::probe::forfeit::{forfeit_nonce, ForfeitOutcome};
use crate::probe::{LifecycleLedger, ProbeStatus, ProbeTimeouts, TrackedProbe};
use alloy::primitives::TxHash;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Consecutive receipt lookups allowed to fail before a probe is written off.
const RECEIPT_ERROR_BUDGET: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Receipt(ReceiptSummary),
    Cancelled,
    DeadlineExceeded,
}

impl WaitOutcome {
    /// Block of a successful receipt, if the wait ended with one.
    pub fn landed_at(&self) -> Option<u64> {
        match self {
            Self::Receipt(receipt) if receipt.success => Some(receipt.block_number),
            _ => None,
        }
    }
}

/// Polls for `hash`'s receipt once per new head until it appears, `deadline` passes or
/// `cancel` fires.
pub async fn wait_for_receipt(
    gateway: &dyn ChainGateway,
    hash: TxHash,
    heads: &mut watch::Receiver<u64>,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<WaitOutcome> {
    let mut failures = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }
        match gateway.transaction_receipt(hash).await {
            Ok(Some(receipt)) => return Ok(WaitOutcome::Receipt(receipt)),
            Ok(None) => failures = 0,
            Err(err) => {
                failures += 1;
                tracing::warn!(
                    "[PROBE] receipt lookup for {:#x} failed ({}/{}): {}",
                    hash,
                    failures,
                    RECEIPT_ERROR_BUDGET,
                    err
                );
                if failures >= RECEIPT_ERROR_BUDGET {
                    return Err(err);
                }
            }
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(WaitOutcome::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Ok(WaitOutcome::DeadlineExceeded),
            changed = heads.changed() => {
                if changed.is_err() {
                    return Err(RpcError::HeadFeedClosed.into());
                }
            }
        }
    }
}

/// Drives one probe from `Signed` to a terminal status.
#[derive(Clone)]
pub struct ProbeWatcher {
    gateway: Arc<dyn ChainGateway>,
    ledger: Arc<LifecycleLedger>,
    heads: HeadTracker,
    timeouts: ProbeTimeouts,
    chain_id: u64,
}

enum Phase {
    Submission,
    Inclusion,
}

impl ProbeWatcher {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        ledger: Arc<LifecycleLedger>,
        heads: HeadTracker,
        timeouts: ProbeTimeouts,
        chain_id: u64,
    ) -> Self {
        Self {
            gateway,
            ledger,
            heads,
            timeouts,
            chain_id,
        }
    }

    /// Watches `probe` to completion and moves it to done.
    pub async fn run(self, probe: Arc<TrackedProbe>) -> ProbeStatus {
        let status = self.watch(&probe).await;
        let moved = self.ledger.complete(probe.id());
        tracing::info!(
            "[PROBE] {}{}",
            probe,
            if moved { "" } else { " (already reconciled)" }
        );
        status
    }

    async fn watch(&self, probe: &TrackedProbe) -> ProbeStatus {
        let mut heads = self.heads.subscribe();

        let deadline = Instant::now() + self.timeouts.submission;
        let outcome = wait_for_receipt(
            self.gateway.as_ref(),
            probe.txs.outer_hash,
            &mut heads,
            deadline,
            probe.cancel_handle().token(),
        )
        .await;
        match self.resolve(probe, Phase::Submission, outcome).await {
            Some(terminal) => return terminal,
            None => {
                tracing::info!(
                    "[PROBE] sequenced trigger={} outer={:#x} block={}",
                    probe.trigger_block,
                    probe.txs.outer_hash,
                    probe.progress().submission_block
                );
            }
        }

        let deadline = Instant::now() + self.timeouts.inclusion;
        let outcome = wait_for_receipt(
            self.gateway.as_ref(),
            probe.txs.inner_hash,
            &mut heads,
            deadline,
            probe.cancel_handle().token(),
        )
        .await;
        match self.resolve(probe, Phase::Inclusion, outcome).await {
            Some(terminal) => terminal,
            None => probe.status(),
        }
    }

    /// Applies one phase's outcome. Returns the terminal status, or `None` when the probe
    /// advanced to the next phase.
    async fn resolve(
        &self,
        probe: &TrackedProbe,
        phase: Phase,
        outcome: Result<WaitOutcome>,
    ) -> Option<ProbeStatus> {
        let (timed_out_status, label) = match phase {
            Phase::Submission => (ProbeStatus::NotSequenced, "outer"),
            Phase::Inclusion => (ProbeStatus::NotIncluded, "inner"),
        };

        // Cancellation wins over anything observed during the wait.
        if probe.cancel_handle().is_cancelled() {
            let at = probe
                .cancel_handle()
                .requested_at()
                .unwrap_or_else(|| self.heads.latest());
            if let Some(block) = outcome.as_ref().ok().and_then(WaitOutcome::landed_at) {
                tracing::warn!(
                    "[PROBE] {} tx observed included at block {} after cancellation at head {}; recording {} ({})",
                    label,
                    block,
                    at,
                    timed_out_status,
                    probe.txs.outer_hash
                );
            }
            self.forfeit(probe).await;
            return Some(self.settle(probe, timed_out_status, Some(at)));
        }

        match outcome {
            Ok(WaitOutcome::Receipt(receipt)) if receipt.success => {
                let advanced = match phase {
                    Phase::Submission => probe.mark_sequenced(receipt.block_number),
                    Phase::Inclusion => probe.mark_included(receipt.block_number),
                };
                if let Err(err) = advanced {
                    tracing::error!("[PROBE] {} ({})", err, probe.txs.outer_hash);
                    return Some(probe.status());
                }
                match phase {
                    Phase::Submission => None,
                    Phase::Inclusion => Some(ProbeStatus::Included),
                }
            }
            Ok(WaitOutcome::Receipt(receipt)) => {
                tracing::warn!(
                    "[PROBE] {} tx failed in block {} (trigger={})",
                    label,
                    receipt.block_number,
                    probe.trigger_block
                );
                self.forfeit(probe).await;
                Some(self.settle(probe, ProbeStatus::SystemFailure, None))
            }
            Ok(WaitOutcome::Cancelled) | Ok(WaitOutcome::DeadlineExceeded) => {
                let at = self.heads.latest();
                tracing::warn!(
                    "[PROBE] {} receipt not seen before deadline (trigger={}, head={})",
                    label,
                    probe.trigger_block,
                    at
                );
                self.forfeit(probe).await;
                Some(self.settle(probe, timed_out_status, Some(at)))
            }
            Err(err) => {
                tracing::warn!(
                    "[PROBE] lost track of {} tx (trigger={}): {}",
                    label,
                    probe.trigger_block,
                    err
                );
                self.forfeit(probe).await;
                Some(self.settle(probe, ProbeStatus::SystemFailure, None))
            }
        }
    }

    fn settle(&self, probe: &TrackedProbe, status: ProbeStatus, cancel_block: Option<u64>) -> ProbeStatus {
        if let Err(err) = probe.mark_failed(status, cancel_block) {
            tracing::error!("[PROBE] {} ({})", err, probe.txs.outer_hash);
        }
        probe.status()
    }

    async fn forfeit(&self, probe: &TrackedProbe) {
        let mut heads = self.heads.subscribe();
        let outcome = forfeit_nonce(
            self.gateway.as_ref(),
            probe.account.as_ref(),
            probe.txs.inner_nonce,
            self.chain_id,
            &mut heads,
            self.timeouts.forfeit,
        )
        .await;
        match outcome {
            Ok(ForfeitOutcome::Confirmed { hash, block }) => tracing::info!(
                "[FORFEIT] nonce {} of {:#x} burned by {:#x} in block {}",
                probe.txs.inner_nonce,
                probe.account.address(),
                hash,
                block
            ),
            Ok(ForfeitOutcome::NonceAlreadyUsed) => tracing::info!(
                "[FORFEIT] nonce {} of {:#x} already used; inner tx {:#x} probably landed",
                probe.txs.inner_nonce,
                probe.account.address(),
                probe.txs.inner_hash
            ),
            Err(err) => tracing::warn!(
                "[FORFEIT] nonce {} of {:#x} not forfeited: {}",
                probe.txs.inner_nonce,
                probe.account.address(),
                err
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_successful_receipts_count_as_landed() {
        let landed = WaitOutcome::Receipt(ReceiptSummary {
            success: true,
            block_number: 106,
        });
        let reverted = WaitOutcome::Receipt(ReceiptSummary {
            success: false,
            block_number: 106,
        });
        assert_eq!(landed.landed_at(), Some(106));
        assert_eq!(reverted.landed_at(), None);
        assert_eq!(WaitOutcome::Cancelled.landed_at(), None);
        assert_eq!(WaitOutcome::DeadlineExceeded.landed_at(), None);
    }
}
