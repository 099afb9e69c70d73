use crate::anchor_utils::MockChain;
use alloy::primitives::{address, Address};
use rusqlite::{params, Connection};
use shutter_probe::chain::ChainGateway;
use shutter_probe::runtime::continuous::ReportWindow;
use shutter_probe::stats::analytics::AnalyticsStore;
use shutter_probe::stats::{
    BlockCache, SqliteAnalyticsStore, StatsCollector, StatsTargets, Submission,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const SEQUENCER: Address = address!("5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e5e");
const SUBMIT: Address = address!("a11ce0000000000000000000000000000000a11c");

fn temp_path(prefix: &str, ext: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!("{prefix}_{nanos}.{ext}"))
}

/// Two probes: trigger 150 sequenced at 151 and included at 154, trigger 160 sequenced at
/// 161 and never included. A foreign sender's submission must be ignored.
fn seeded_chain() -> Arc<MockChain> {
    let chain = MockChain::new(200);
    chain.add_submission_log(SEQUENCER, SUBMIT, 150, 151);
    chain.add_submission_log(SEQUENCER, SUBMIT, 160, 161);
    chain.add_submission_log(SEQUENCER, Address::repeat_byte(0x99), 170, 171);
    chain.add_transfer(154, SUBMIT, 150);
    chain.add_transfer(155, Address::repeat_byte(0x77), 160);
    chain
}

fn collector(
    chain: Arc<MockChain>,
    analytics: Option<Arc<dyn AnalyticsStore>>,
    folder: PathBuf,
) -> StatsCollector {
    let gateway: Arc<dyn ChainGateway> = chain;
    StatsCollector::new(
        gateway,
        analytics,
        StatsTargets {
            sequencer: SEQUENCER,
            submit_address: SUBMIT,
            deposit_contract: None,
        },
        Arc::new(BlockCache::new(1_000)),
        folder,
    )
}

fn seed_observer_blocks(path: &PathBuf, from: u64, to: u64) {
    let conn = Connection::open(path).expect("observer db");
    for n in from..=to {
        let slot = n + 1_000;
        conn.execute(
            "INSERT INTO block (block_number, slot, block_timestamp) VALUES (?1, ?2, ?3)",
            params![n as i64, slot as i64, (n * 5) as i64],
        )
        .expect("block");
        conn.execute(
            "INSERT INTO proposer_duties (slot, validator_index, public_key) VALUES (?1, ?2, ?3)",
            params![slot as i64, n as i64, format!("0x{:096x}", n)],
        )
        .expect("duty");
        let status = if n % 2 == 0 { "active_ongoing" } else { "exited_unslashed" };
        conn.execute(
            "INSERT INTO validator_status (validator_index, status) VALUES (?1, ?2)",
            params![n as i64, status],
        )
        .expect("status");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_report_matches_successes_to_submissions() {
    let folder = temp_path("probe_report", "d");
    let collector = collector(seeded_chain(), None, folder.clone());

    let report = collector.collect(140, 200, &[]).await.expect("report");
    assert_eq!(report.submissions, 2);
    assert_eq!(report.matched.delays, vec![3.0]);
    assert_eq!(
        report.matched.failed,
        vec![Submission {
            trigger: 160,
            sequenced: 161
        }]
    );
    assert!((report.matched.fail_pct() - 50.0).abs() < 1e-9);
    assert!(report.triggers.is_none());
    assert!(report.blames.is_empty());

    let text = report.to_string();
    assert!(text.contains("found 2 shutter test tx in block range[140:200] (unknown triggers)"));
    assert!(text.contains("fails 1 (50.00%)"));
    assert!(text.contains("delay max 3 min 3 avg 3.00 median 3.00"));

    let written = collector.write_report(&report).expect("write report");
    let on_disk = std::fs::read_to_string(&written).expect("read report");
    assert_eq!(on_disk, text);
    assert!(written.extension().is_some_and(|ext| ext == "blame"));
    let _ = std::fs::remove_dir_all(folder);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_report_with_observer_data_blames_failed_probe() {
    let db = temp_path("probe_observer", "db");
    let store = SqliteAnalyticsStore::open(&db).expect("open observer db");
    seed_observer_blocks(&db, 140, 200);
    let analytics: Arc<dyn AnalyticsStore> = Arc::new(store);
    let collector = collector(seeded_chain(), Some(analytics), temp_path("probe_blame", "d"));

    let report = collector.collect(140, 200, &[]).await.expect("report");
    let triggers = report.triggers.clone().expect("observer triggers");
    assert_eq!(triggers.len(), 30);
    assert_eq!(triggers.first(), Some(&140));
    assert_eq!(triggers.last(), Some(&198));
    assert!(!report.missed.contains(&150));
    assert!(!report.missed.contains(&160));
    assert_eq!(report.missed.len(), 28);
    assert_eq!(report.shutterized_pct(), Some(50.0));

    assert_eq!(report.blames.len(), 1);
    let blame = &report.blames[0];
    assert_eq!((blame.trigger_block, blame.submit_block), (160, 161));
    let target = blame.target.as_ref().expect("next shutterized block");
    assert_eq!(target.block_number, 162);
    assert_eq!(target.validator_index, 162);
    assert!(blame.key.is_none());

    let text = report.to_string();
    assert!(text.contains("(30 triggers)"));
    assert!(text.contains("shutterized blocks 50.00%"));
    assert!(text.contains("NO DECRYPTION KEY SEEN"));
    let _ = std::fs::remove_file(db);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_priming_fills_block_cache_after_first_report() {
    let chain = seeded_chain();
    let collector = collector(chain.clone(), None, temp_path("probe_prime", "d"));
    assert_eq!(collector.prime(200).await.expect("prime"), 0, "cold cache is left alone");

    collector.collect(140, 150, &[]).await.expect("report");
    assert_eq!(collector.cache().max_key(), 149, "report ranges exclude their end block");

    let found = collector.prime(160).await.expect("prime");
    assert_eq!(found, 1, "transfer at 154 names trigger 150");
    assert_eq!(collector.cache().max_key(), 160);

    let report = collector.collect(150, 200, &[]).await.expect("report");
    assert_eq!(report.matched.delays, vec![3.0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_consecutive_windows_count_boundary_block_once() {
    let chain = MockChain::new(300);
    chain.add_submission_log(SEQUENCER, SUBMIT, 200, 200);
    chain.add_transfer(200, SUBMIT, 196);
    let collector = collector(chain, None, temp_path("probe_windows", "d"));

    let mut window = ReportWindow::new(100, 100);
    let (a_start, a_end) = window.close_at(200).expect("first window");
    let (b_start, b_end) = window.close_at(300).expect("second window");
    assert_eq!(a_end, b_start);

    let a = collector.collect(a_start, a_end, &[]).await.expect("first report");
    let b = collector.collect(b_start, b_end, &[]).await.expect("second report");
    assert_eq!(a.submissions + b.submissions, 1);
    assert_eq!(b.matched.failed, vec![Submission { trigger: 200, sequenced: 200 }]);

    let first = collector.collect_successes(a_start, a_end).await.expect("successes");
    let second = collector.collect_successes(b_start, b_end).await.expect("successes");
    assert!(first.is_empty());
    assert_eq!(second.len(), 1);
    assert_eq!((second[0].trigger, second[0].included), (196, 200));
}
