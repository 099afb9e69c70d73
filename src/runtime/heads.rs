use crate::chain::{ChainGateway, HeadTracker};
use crate::error::{Result, RpcError};
use crate::probe::{LifecycleLedger, ReconcileOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Publishes one head and reconciles the ledger against it. Stale or repeated heights are
/// ignored and return `None`.
pub fn on_new_head(
    heads: &HeadTracker,
    ledger: &LifecycleLedger,
    head: u64,
) -> Option<ReconcileOutcome> {
    if !heads.publish(head) {
        return None;
    }
    let outcome = ledger.reconcile(head);
    if !outcome.is_noop() {
        tracing::info!(
            "[LEDGER] head {}: {} completed, {} cancelled (highest inclusion {}), {} in flight",
            head,
            outcome.completed,
            outcome.cancelled,
            outcome.highest_inclusion,
            ledger.in_flight_len()
        );
    }
    Some(outcome)
}

/// Runs the head feed until `cancel` fires. A closed feed is returned as an error so the
/// caller can shut the run down.
pub async fn run_head_feed(
    gateway: Arc<dyn ChainGateway>,
    heads: HeadTracker,
    ledger: Arc<LifecycleLedger>,
    poll: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut feed = gateway.subscribe_heads(poll).await?;
    tracing::info!("[HEADS] head feed started at {}", heads.latest());
    loop {
        let head = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = feed.recv() => match next {
                Some(head) => head,
                None => return Err(RpcError::HeadFeedClosed.into()),
            },
        };
        tracing::debug!("[HEADS] new head {}", head);
        on_new_head(&heads, &ledger, head);
    }
}
