//! Reporting pass over a block range.
//!
//! Submissions come from the sequencer's `TransactionSubmitted` logs, inclusions from
//! transfers to the submit account whose value names the trigger block. Failed probes are
//! blamed on the next shutterized proposer when an analytics store is configured.

pub mod analytics;
pub mod blame;
pub mod block_cache;
pub mod summary;

use crate::chain::ChainGateway;
use crate::error::{AnalyticsError, Result};
use crate::probe::{ProbeStatus, TrackedProbe};
use crate::shutter::contracts::{decode_transaction_submitted, transaction_submitted_filter};
use crate::stats::analytics::{AnalyticsStore, StatusRatios};
use crate::stats::blame::{blame_submission, ValidatorBlame};
use crate::stats::summary::{
    match_submissions, missed_triggers, shutterized_pct, trigger_in_range, MatchResult,
};
use alloy::primitives::Address;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub use analytics::SqliteAnalyticsStore;
pub use block_cache::BlockCache;
pub use summary::{DelaySummary, Submission, Success};

const LOG_SCAN_CHUNK_BLOCKS: u64 = 2_000;

#[derive(Debug, Clone, Copy)]
pub struct StatsTargets {
    pub sequencer: Address,
    pub submit_address: Address,
    pub deposit_contract: Option<Address>,
}

pub struct StatsCollector {
    gateway: Arc<dyn ChainGateway>,
    analytics: Option<Arc<dyn AnalyticsStore>>,
    targets: StatsTargets,
    cache: Arc<BlockCache>,
    blame_folder: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StatsReport {
    pub start: u64,
    pub end: u64,
    pub submissions: usize,
    pub matched: MatchResult,
    /// Shutterized blocks in `[start, end)`; `None` without an analytics store.
    pub triggers: Option<Vec<u64>>,
    pub missed: Vec<u64>,
    pub status: Option<StatusRatios>,
    pub blames: Vec<ValidatorBlame>,
    /// Terminal statuses of the ledger's done probes drained for this report.
    pub tally: BTreeMap<ProbeStatus, usize>,
}

impl StatsReport {
    pub fn shutterized_pct(&self) -> Option<f64> {
        self.triggers
            .as_ref()
            .map(|t| shutterized_pct(t.len(), self.start, self.end))
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "found {} shutter test tx in block range[{}:{}] ({} triggers)",
            self.submissions,
            self.start,
            self.end,
            self.triggers
                .as_ref()
                .map(|t| t.len().to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )?;
        if let Some(status) = &self.status {
            write!(f, "{}", status)?;
        }
        match self.shutterized_pct() {
            Some(pct) => writeln!(f, "shutterized blocks {:3.2}%", pct)?,
            None => writeln!(f, "shutterized blocks unknown")?,
        }
        writeln!(
            f,
            "fails {} ({:3.2}%)",
            self.matched.failed.len(),
            self.matched.fail_pct()
        )?;
        if self.triggers.is_some() {
            writeln!(f, "missed triggers {}: {:?}", self.missed.len(), self.missed)?;
        }
        match self.matched.delay_summary() {
            Some(delays) => writeln!(f, "{}", delays)?,
            None => writeln!(f, "delay n/a (no matched probes)")?,
        }
        if !self.tally.is_empty() {
            let parts: Vec<String> = self
                .tally
                .iter()
                .map(|(status, n)| format!("{}={}", status, n))
                .collect();
            writeln!(f, "ledger {}", parts.join(" "))?;
        }
        for blame in &self.blames {
            writeln!(f, "{}", blame)?;
        }
        Ok(())
    }
}

pub fn tally_by_status(probes: &[Arc<TrackedProbe>]) -> BTreeMap<ProbeStatus, usize> {
    let mut tally = BTreeMap::new();
    for probe in probes {
        *tally.entry(probe.status()).or_insert(0) += 1;
    }
    tally
}

impl StatsCollector {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        analytics: Option<Arc<dyn AnalyticsStore>>,
        targets: StatsTargets,
        cache: Arc<BlockCache>,
        blame_folder: PathBuf,
    ) -> Self {
        Self {
            gateway,
            analytics,
            targets,
            cache,
            blame_folder,
        }
    }

    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    /// Submissions sequenced in `[start, end)`.
    pub async fn collect_submissions(&self, start: u64, end: u64) -> Result<Vec<Submission>> {
        let mut submissions = Vec::new();
        let Some(last) = end.checked_sub(1).filter(|last| *last >= start) else {
            return Ok(submissions);
        };
        let mut from = start;
        while from <= last {
            let to = from.saturating_add(LOG_SCAN_CHUNK_BLOCKS - 1).min(last);
            let filter = transaction_submitted_filter(self.targets.sequencer, from, to);
            for log in self.gateway.logs(&filter).await? {
                let Some(event) = decode_transaction_submitted(&log) else {
                    continue;
                };
                if event.sender != self.targets.submit_address {
                    continue;
                }
                let trigger = event.identity_prefix.block_number();
                if trigger_in_range(trigger, start, end) {
                    submissions.push(Submission {
                        trigger,
                        sequenced: event.block_number,
                    });
                }
            }
            if to == u64::MAX {
                break;
            }
            from = to + 1;
        }
        Ok(submissions)
    }

    /// Successes included in `[start, end)`, served from the block cache where possible.
    pub async fn collect_successes(&self, start: u64, end: u64) -> Result<Vec<Success>> {
        let mut successes = Vec::new();
        let mut misses = 0u64;
        for block in start..end {
            if let Some(found) = self.cache.load(block) {
                successes.extend(found);
                continue;
            }
            misses += 1;
            let found: Vec<Success> = self
                .gateway
                .transfers_in_block(block)
                .await?
                .into_iter()
                .filter(|t| t.to == self.targets.submit_address)
                .filter_map(|t| {
                    u64::try_from(t.value).ok().map(|trigger| Success {
                        trigger,
                        included: block,
                    })
                })
                .collect();
            successes.extend(found.iter().copied());
            self.cache.store(block, found);
        }
        if misses > 1 {
            tracing::debug!("[STATS] block cache missed {} block(s) in {}..{}", misses, start, end);
        }
        Ok(successes)
    }

    /// Scans the blocks after the newest cached one up to and including `head`. Does nothing
    /// until the first report has seeded the cache.
    pub async fn prime(&self, head: u64) -> Result<usize> {
        let newest = self.cache.max_key();
        if newest == 0 || newest >= head {
            return Ok(0);
        }
        let found = self.collect_successes(newest + 1, head.saturating_add(1)).await?;
        Ok(found.len())
    }

    /// Report over the half-open range `[start, end)`. Consecutive windows that share a
    /// boundary never count a block twice.
    pub async fn collect(
        &self,
        start: u64,
        end: u64,
        drained: &[Arc<TrackedProbe>],
    ) -> Result<StatsReport> {
        if end <= start {
            return Err(AnalyticsError::EmptyRange { start, end }.into());
        }
        let successes = self.collect_successes(start, end).await?;
        let submissions = self.collect_submissions(start, end).await?;
        tracing::info!(
            "[STATS] {}..{}: {} submission(s), {} success(es)",
            start,
            end,
            submissions.len(),
            successes.len()
        );
        let matched = match_submissions(&submissions, &successes);

        let mut report = StatsReport {
            start,
            end,
            submissions: submissions.len(),
            matched,
            triggers: None,
            missed: Vec::new(),
            status: None,
            blames: Vec::new(),
            tally: tally_by_status(drained),
        };

        let Some(analytics) = self.analytics.as_ref() else {
            return Ok(report);
        };
        let triggers = analytics.shutterized_blocks(start, end - 1).await?;
        report.missed = missed_triggers(&triggers, &submissions);
        report.triggers = Some(triggers);
        match analytics
            .status_ratios(self.targets.submit_address, start, end - 1)
            .await
        {
            Ok(ratios) => report.status = Some(ratios),
            Err(err) => tracing::warn!("[STATS] status ratios unavailable: {}", err),
        }

        for failed in report.matched.failed.clone() {
            let blame = match blame_submission(
                analytics.as_ref(),
                self.gateway.as_ref(),
                self.targets.deposit_contract,
                self.targets.submit_address,
                failed,
            )
            .await
            {
                Ok(blame) => blame,
                Err(err) => {
                    tracing::warn!(
                        "[STATS] blame lookup for trigger {} failed: {}",
                        failed.trigger,
                        err
                    );
                    ValidatorBlame::new(failed, self.targets.submit_address)
                }
            };
            report.blames.push(blame);
        }
        Ok(report)
    }

    /// Writes `report` to `<blame folder>/<unix seconds>.blame`.
    pub fn write_report(&self, report: &StatsReport) -> Result<PathBuf> {
        write_report_file(&self.blame_folder, report)
    }
}

pub fn write_report_file(folder: &Path, report: &StatsReport) -> Result<PathBuf> {
    std::fs::create_dir_all(folder)
        .map_err(|e| AnalyticsError::Report(format!("{}: {}", folder.display(), e)))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = folder.join(format!("{}.blame", stamp));
    std::fs::write(&path, report.to_string())
        .map_err(|e| AnalyticsError::Report(format!("{}: {}", path.display(), e)))?;
    tracing::info!("[STATS] report written to {}", path.display());
    Ok(path)
}
