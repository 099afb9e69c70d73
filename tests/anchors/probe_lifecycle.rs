use crate::anchor_utils::{fast_timeouts, tracked_probe, MockChain, CHAIN_ID};
use alloy::consensus::Transaction;
use shutter_probe::chain::{ChainGateway, HeadTracker};
use shutter_probe::probe::{LifecycleLedger, ProbeStatus, ProbeWatcher, TrackedProbe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

struct Harness {
    chain: Arc<MockChain>,
    ledger: Arc<LifecycleLedger>,
    heads: HeadTracker,
    watcher: ProbeWatcher,
}

fn harness(head: u64) -> Harness {
    let chain = MockChain::new(head);
    let ledger = Arc::new(LifecycleLedger::new(64));
    let heads = HeadTracker::new(head);
    let gateway: Arc<dyn ChainGateway> = chain.clone();
    let watcher = ProbeWatcher::new(gateway, ledger.clone(), heads.clone(), fast_timeouts(), CHAIN_ID);
    Harness {
        chain,
        ledger,
        heads,
        watcher,
    }
}

impl Harness {
    fn spawn(&self, probe: &Arc<TrackedProbe>) -> JoinHandle<ProbeStatus> {
        self.ledger.register(probe.clone());
        tokio::spawn(self.watcher.clone().run(probe.clone()))
    }

    /// Publishes a fresh head every 20ms so watchers re-poll.
    fn tick_heads(&self, from: u64) -> JoinHandle<()> {
        let heads = self.heads.clone();
        tokio::spawn(async move {
            let mut head = from;
            loop {
                tokio::time::sleep(Duration::from_millis(20)).await;
                head += 1;
                heads.publish(head);
            }
        })
    }
}

async fn wait_for_status(probe: &TrackedProbe, status: ProbeStatus) {
    for _ in 0..100 {
        if probe.status() == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("probe never reached {status}, still {}", probe.status());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_outer_receipt_sequences_probe_then_inner_receipt_includes_it() {
    let h = harness(100);
    let probe = tracked_probe(100, 1, 0);
    h.chain.set_receipt(probe.txs.outer_hash, true, 101);
    let task = h.spawn(&probe);

    wait_for_status(&probe, ProbeStatus::Sequenced).await;
    let p = probe.progress();
    assert_eq!(p.submission_block, 101);
    assert_eq!(p.inclusion_block, 0);
    assert!(h.ledger.contains_in_flight(probe.id()));

    h.chain.set_receipt(probe.txs.inner_hash, true, 103);
    h.heads.publish(103);

    let status = task.await.expect("watcher joins");
    assert_eq!(status, ProbeStatus::Included);
    let p = probe.progress();
    assert_eq!((p.submission_block, p.inclusion_block), (101, 103));
    assert_eq!(h.ledger.in_flight_len(), 0);
    assert_eq!(h.ledger.done_len(), 1);
    assert!(h.chain.forfeits().is_empty(), "included probes keep their nonce");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_inner_receipt_ends_not_included_and_forfeits_nonce() {
    let h = harness(100);
    h.chain.confirm_forfeits_at(110);
    let probe = tracked_probe(100, 2, 7);
    h.chain.set_receipt(probe.txs.outer_hash, true, 101);

    let status = h.spawn(&probe).await.expect("watcher joins");
    assert_eq!(status, ProbeStatus::NotIncluded);
    let p = probe.progress();
    assert_eq!(p.submission_block, 101);
    assert_eq!(p.inclusion_block, 0);
    assert_eq!(p.cancel_block, 100);

    let forfeits = h.chain.forfeits();
    assert_eq!(forfeits.len(), 1);
    assert_eq!(forfeits[0].nonce(), 7);
    assert_eq!(forfeits[0].to(), Some(probe.account.address()));
    assert_eq!(h.ledger.done_len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_outer_receipt_ends_not_sequenced() {
    let h = harness(200);
    h.chain.confirm_forfeits_at(205);
    let probe = tracked_probe(200, 3, 4);

    let status = h.spawn(&probe).await.expect("watcher joins");
    assert_eq!(status, ProbeStatus::NotSequenced);
    let p = probe.progress();
    assert_eq!(p.submission_block, 0);
    assert_eq!(p.cancel_block, 200);
    assert_eq!(h.chain.forfeits().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_outer_receipt_is_a_system_failure() {
    let h = harness(300);
    h.chain.confirm_forfeits_at(302);
    let probe = tracked_probe(300, 4, 0);
    h.chain.set_receipt(probe.txs.outer_hash, false, 301);

    let status = h.spawn(&probe).await.expect("watcher joins");
    assert_eq!(status, ProbeStatus::SystemFailure);
    assert_eq!(probe.progress().submission_block, 0);
    assert_eq!(h.chain.forfeits().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_receipt_errors_exhaust_budget() {
    let h = harness(400);
    h.chain.confirm_forfeits_at(410);
    let probe = tracked_probe(400, 5, 0);
    h.chain.fail_receipt_lookups(probe.txs.outer_hash, 3);
    let ticker = h.tick_heads(400);

    let status = h.spawn(&probe).await.expect("watcher joins");
    ticker.abort();
    assert_eq!(status, ProbeStatus::SystemFailure);
    assert_eq!(h.chain.forfeits().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transient_receipt_error_is_retried() {
    let h = harness(500);
    let probe = tracked_probe(500, 6, 0);
    h.chain.fail_receipt_lookups(probe.txs.outer_hash, 1);
    h.chain.set_receipt(probe.txs.outer_hash, true, 501);
    h.chain.set_receipt(probe.txs.inner_hash, true, 502);
    let ticker = h.tick_heads(500);

    let status = h.spawn(&probe).await.expect("watcher joins");
    ticker.abort();
    assert_eq!(status, ProbeStatus::Included);
    assert_eq!(probe.progress().submission_block, 501);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_is_idempotent_and_wins_over_deadline() {
    let h = harness(600);
    h.chain.confirm_forfeits_at(603);
    let probe = tracked_probe(600, 7, 2);
    let task = h.spawn(&probe);

    assert!(probe.request_cancel(602));
    assert!(!probe.request_cancel(650));

    let status = task.await.expect("watcher joins");
    assert_eq!(status, ProbeStatus::NotSequenced);
    assert_eq!(probe.progress().cancel_block, 602);
    assert_eq!(h.chain.forfeits().len(), 1);
    assert!(!probe.request_cancel(660));
    assert_eq!(probe.status(), ProbeStatus::NotSequenced);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelling_sequenced_probe_ends_not_included() {
    let h = harness(700);
    h.chain.confirm_forfeits_at(705);
    let probe = tracked_probe(700, 8, 0);
    h.chain.set_receipt(probe.txs.outer_hash, true, 701);
    let task = h.spawn(&probe);

    wait_for_status(&probe, ProbeStatus::Sequenced).await;
    probe.request_cancel(704);

    let status = task.await.expect("watcher joins");
    assert_eq!(status, ProbeStatus::NotIncluded);
    let p = probe.progress();
    assert_eq!((p.submission_block, p.cancel_block), (701, 704));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_forfeit_still_settles_probe() {
    let h = harness(800);
    let probe = tracked_probe(800, 9, 0);
    h.chain.reject_sends("nonce too low");

    let status = h.spawn(&probe).await.expect("watcher joins");
    assert_eq!(status, ProbeStatus::NotSequenced);
    assert!(h.chain.sent().is_empty());
    assert_eq!(h.ledger.done_len(), 1);
}
