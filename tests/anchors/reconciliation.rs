use crate::anchor_utils::{tracked_probe, MockChain, CHAIN_ID};
use shutter_probe::chain::{ChainGateway, HeadTracker};
use shutter_probe::error::{ProbeError, RpcError};
use shutter_probe::probe::{LifecycleLedger, ProbeStatus, ProbeTimeouts, ProbeWatcher, TrackedProbe};
use shutter_probe::runtime::continuous::shutdown_watchers;
use shutter_probe::runtime::heads::{on_new_head, run_head_feed};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

fn patient_timeouts() -> ProbeTimeouts {
    ProbeTimeouts {
        submission: Duration::from_secs(5),
        inclusion: Duration::from_secs(10),
        forfeit: Duration::from_millis(500),
    }
}

async fn wait_for_status(probe: &TrackedProbe, status: ProbeStatus) {
    for _ in 0..200 {
        if probe.status() == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("probe never reached {status}, still {}", probe.status());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_later_inclusion_cancels_older_sequenced_probe() {
    let chain = MockChain::new(104);
    chain.confirm_forfeits_at(108);
    let gateway: Arc<dyn ChainGateway> = chain.clone();
    let ledger = Arc::new(LifecycleLedger::new(64));
    let heads = HeadTracker::new(104);
    let watcher = ProbeWatcher::new(gateway, ledger.clone(), heads.clone(), patient_timeouts(), CHAIN_ID);
    let tracker = TaskTracker::new();

    let older = tracked_probe(99, 1, 0);
    let newer = tracked_probe(104, 2, 0);
    chain.set_receipt(older.txs.outer_hash, true, 100);
    chain.set_receipt(newer.txs.outer_hash, true, 105);
    chain.set_receipt(newer.txs.inner_hash, true, 106);
    for probe in [&older, &newer] {
        ledger.register(probe.clone());
        tracker.spawn(watcher.clone().run(probe.clone()));
    }

    wait_for_status(&older, ProbeStatus::Sequenced).await;
    wait_for_status(&newer, ProbeStatus::Included).await;

    let outcome = on_new_head(&heads, &ledger, 107).expect("fresh head");
    assert_eq!(outcome.cancelled, 1);
    assert_eq!(outcome.highest_inclusion, 106);
    assert_eq!(older.cancel_handle().requested_at(), Some(107));
    assert!(!newer.cancel_handle().is_cancelled());
    assert!(!ledger.contains_in_flight(older.id()));
    let early = ledger.drain_done();
    assert!(early.iter().all(|p| p.status().is_terminal()));

    tracker.close();
    tracker.wait().await;
    let p = older.progress();
    assert_eq!(p.status, ProbeStatus::NotIncluded);
    assert_eq!((p.submission_block, p.cancel_block), (100, 107));
    assert_eq!(chain.forfeits().len(), 1);
    assert_eq!(ledger.in_flight_len(), 0);
    assert_eq!(ledger.probe_count(), 2);

    let mut tally = shutter_probe::stats::tally_by_status(&early);
    for (status, n) in shutter_probe::stats::tally_by_status(&ledger.drain_done()) {
        *tally.entry(status).or_insert(0) += n;
    }
    assert_eq!(tally.get(&ProbeStatus::Included), Some(&1));
    assert_eq!(tally.get(&ProbeStatus::NotIncluded), Some(&1));
    assert_eq!(tally.get(&ProbeStatus::Sequenced), None);
    assert_eq!(ledger.done_len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_cancels_and_settles_every_probe() {
    let chain = MockChain::new(300);
    chain.confirm_forfeits_at(301);
    let gateway: Arc<dyn ChainGateway> = chain.clone();
    let ledger = Arc::new(LifecycleLedger::new(64));
    let heads = HeadTracker::new(300);
    let watcher = ProbeWatcher::new(gateway, ledger.clone(), heads.clone(), patient_timeouts(), CHAIN_ID);
    let tracker = TaskTracker::new();

    let waiting = tracked_probe(290, 3, 0);
    let sequenced = tracked_probe(291, 4, 0);
    chain.set_receipt(sequenced.txs.outer_hash, true, 295);
    for probe in [&waiting, &sequenced] {
        ledger.register(probe.clone());
        tracker.spawn(watcher.clone().run(probe.clone()));
    }
    wait_for_status(&sequenced, ProbeStatus::Sequenced).await;

    shutdown_watchers(&ledger, &heads, &tracker).await;
    assert_eq!(waiting.status(), ProbeStatus::NotSequenced);
    assert_eq!(sequenced.status(), ProbeStatus::NotIncluded);
    assert_eq!(waiting.progress().cancel_block, 300);
    assert_eq!(chain.forfeits().len(), 2);
    assert_eq!(ledger.in_flight_len(), 0);
    assert!(ledger.reconcile(300).is_noop());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_head_feed_reconciles_and_reports_closed_feed() {
    let chain = MockChain::new(50);
    let gateway: Arc<dyn ChainGateway> = chain.clone();
    let ledger = Arc::new(LifecycleLedger::new(8));
    let heads = HeadTracker::new(50);
    let done = tracked_probe(40, 5, 0);
    done.mark_failed(ProbeStatus::SystemFailure, None)
        .expect("signed -> system failure");
    ledger.register(done.clone());

    let feed = tokio::spawn(run_head_feed(
        gateway,
        heads.clone(),
        ledger.clone(),
        Duration::from_millis(10),
        CancellationToken::new(),
    ));
    for _ in 0..200 {
        chain.push_head(51).await;
        if heads.latest() == 51 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(heads.latest(), 51);
    assert_eq!(ledger.done_len(), 1);

    chain.close_head_feeds();
    let ended = feed.await.expect("feed task joins");
    assert!(matches!(ended, Err(ProbeError::Net(RpcError::HeadFeedClosed))));
}
