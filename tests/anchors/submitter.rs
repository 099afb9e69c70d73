use crate::anchor_utils::{fast_timeouts, MockChain, StubEncryption, CHAIN_ID};
use alloy::consensus::{Transaction, TxEnvelope};
use alloy::eips::eip2718::Decodable2718;
use alloy::primitives::{address, Address, U256};
use alloy::sol_types::SolCall;
use shutter_probe::account::{Account, AccountPool};
use shutter_probe::chain::{ChainGateway, HeadTracker};
use shutter_probe::probe::submitter::SubmitSettings;
use shutter_probe::probe::{LifecycleLedger, ProbeStatus, ProbeSubmitter, ProbeWatcher};
use shutter_probe::runtime::continuous::shutdown_watchers;
use shutter_probe::shutter::contracts::ISequencer;
use shutter_probe::shutter::{EncryptionService, IdentityPrefix};
use std::sync::Arc;
use tokio_util::task::TaskTracker;

const SEQUENCER: Address = address!("5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e");

struct Rig {
    chain: Arc<MockChain>,
    ledger: Arc<LifecycleLedger>,
    heads: HeadTracker,
    pool: AccountPool,
    submit_account: Arc<Account>,
    submitter: ProbeSubmitter,
}

fn rig(accounts: usize, encryption: StubEncryption) -> Rig {
    let chain = MockChain::new(100);
    let gateway: Arc<dyn ChainGateway> = chain.clone();
    let ledger = Arc::new(LifecycleLedger::new(64));
    let heads = HeadTracker::new(100);
    let pool = AccountPool::new((0..accounts).map(|_| Arc::new(Account::generate())).collect())
        .expect("non-empty pool");
    let submit_account = Arc::new(Account::generate());
    let watcher = ProbeWatcher::new(
        gateway.clone(),
        ledger.clone(),
        heads.clone(),
        fast_timeouts(),
        CHAIN_ID,
    );
    let encryption: Arc<dyn EncryptionService> = Arc::new(encryption);
    let submitter = ProbeSubmitter::new(
        gateway,
        encryption,
        pool.clone(),
        submit_account.clone(),
        ledger.clone(),
        watcher,
        TaskTracker::new(),
        SubmitSettings {
            chain_id: CHAIN_ID,
            sequencer: SEQUENCER,
            keyper_set_lookahead: 1,
        },
    );
    Rig {
        chain,
        ledger,
        heads,
        pool,
        submit_account,
        submitter,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_submit_registers_probe_and_consumes_one_nonce_per_account() {
    let rig = rig(1, StubEncryption::default());
    rig.chain.confirm_forfeits_at(101);
    let probe_account = rig.pool.accounts()[0].clone();

    let probe = rig.submitter.submit(120).await.expect("submit");
    assert_eq!(probe.status(), ProbeStatus::Signed);
    assert_eq!(probe.trigger_block, 120);
    assert_eq!(probe.sender, rig.submit_account.address());
    assert_eq!(probe.prefix, IdentityPrefix::from_block_number(120));
    assert_eq!((probe.txs.inner_nonce, probe.txs.outer_nonce), (0, 0));
    assert_eq!(probe_account.current_nonce(), 1);
    assert_eq!(rig.submit_account.current_nonce(), 1);
    assert_eq!(rig.ledger.probe_count(), 1);
    assert!(rig.ledger.contains_in_flight(probe.id()));

    let sent = rig.chain.sent();
    assert_eq!(sent.len(), 1, "only the outer tx is broadcast");
    let outer = &sent[0];
    assert_eq!(*outer.tx_hash(), probe.txs.outer_hash);
    assert_eq!(outer.to(), Some(SEQUENCER));
    assert_eq!(outer.nonce(), 0);
    assert!(outer.value() > U256::ZERO, "outer tx prepays the inner gas");

    let call = ISequencer::submitEncryptedTransactionCall::abi_decode(outer.input(), true)
        .expect("sequencer calldata");
    assert_eq!(call.eon, 1);
    assert_eq!(call.identityPrefix, probe.prefix.0);
    let mut plaintext = &call.encryptedTransaction[8..];
    let inner = TxEnvelope::decode_2718(&mut plaintext).expect("inner tx");
    assert_eq!(*inner.tx_hash(), probe.txs.inner_hash);
    assert_eq!(inner.to(), Some(rig.submit_account.address()));
    assert_eq!(inner.value(), U256::from(120u64));
    assert_eq!(inner.nonce(), 0);

    shutdown_watchers(&rig.ledger, &rig.heads, rig.submitter.tracker()).await;
    assert_eq!(probe.status(), ProbeStatus::NotSequenced);
    assert_eq!(rig.ledger.in_flight_len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_broadcast_releases_nonces_and_registers_nothing() {
    let rig = rig(1, StubEncryption::default());
    rig.chain.reject_sends("insufficient funds for gas * price + value");

    let err = rig.submitter.submit(130).await.expect_err("broadcast fails");
    assert!(err.to_string().contains("insufficient funds"), "{err}");
    assert_eq!(rig.ledger.probe_count(), 0);
    assert_eq!(rig.pool.accounts()[0].current_nonce(), 0);
    assert_eq!(rig.submit_account.current_nonce(), 0);
    assert!(rig.submitter.tracker().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_encryption_failure_sends_nothing() {
    let rig = rig(1, StubEncryption::failing());

    assert!(rig.submitter.submit(140).await.is_err());
    assert!(rig.chain.sent().is_empty());
    assert_eq!(rig.ledger.probe_count(), 0);
    assert_eq!(rig.pool.accounts()[0].current_nonce(), 0);
    assert_eq!(rig.submit_account.current_nonce(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_probes_rotate_through_account_pool() {
    let rig = rig(2, StubEncryption::default());
    rig.chain.confirm_forfeits_at(101);

    let first = rig.submitter.submit(150).await.expect("first");
    let second = rig.submitter.submit(151).await.expect("second");
    let third = rig.submitter.submit(152).await.expect("third");
    assert_ne!(first.account.address(), second.account.address());
    assert_eq!(first.account.address(), third.account.address());
    assert_eq!(third.txs.inner_nonce, 1);
    assert_eq!(
        [first.txs.outer_nonce, second.txs.outer_nonce, third.txs.outer_nonce],
        [0, 1, 2]
    );

    shutdown_watchers(&rig.ledger, &rig.heads, rig.submitter.tracker()).await;
    let counts = rig.ledger.snapshot().by_status();
    assert_eq!(counts.get(&ProbeStatus::NotSequenced), Some(&3));
    assert_eq!(rig.chain.forfeits().len(), 3);
}
