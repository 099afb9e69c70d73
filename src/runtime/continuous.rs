//! Continuous mode: triggers in, probes out, until shutdown.

use crate::chain::HeadTracker;
use crate::error::{Result, RpcError, SetupError};
use crate::probe::{LifecycleLedger, ProbeSubmitter};
use crate::runtime::heads::run_head_feed;
use crate::runtime::setup::ProbeContext;
use crate::runtime::triggers::{run_head_triggers, run_observer_triggers, TriggerMode};
use crate::stats::StatsCollector;
use crate::utils::error::compact_error_message;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const TRIGGER_QUEUE_CAPACITY: usize = 64;
const LOG_ERR_MAX_LEN: usize = 220;

pub async fn run_continuous(ctx: ProbeContext, shutdown: CancellationToken) -> Result<()> {
    let pool = ctx.prepare_accounts().await?;
    let tracker = TaskTracker::new();
    let submitter = ctx.submitter(pool, tracker.clone())?;

    // The head feed outlives the other tasks so watchers can finish forfeiting on shutdown.
    let feed_cancel = CancellationToken::new();
    let tasks_cancel = shutdown.child_token();

    let mut head_feed = tokio::spawn(run_head_feed(
        ctx.gateway.clone(),
        ctx.heads.clone(),
        ctx.ledger.clone(),
        ctx.config.head_poll,
        feed_cancel.clone(),
    ));

    let (trigger_tx, mut trigger_rx) = mpsc::channel(TRIGGER_QUEUE_CAPACITY);
    match ctx.config.trigger_mode {
        TriggerMode::Observer => {
            let analytics = ctx.analytics.clone().ok_or_else(|| {
                SetupError::MissingConfig("observer triggers need an analytics store".to_string())
            })?;
            tokio::spawn(run_observer_triggers(
                analytics,
                ctx.config.observer_poll,
                trigger_tx,
                tasks_cancel.clone(),
            ));
        }
        TriggerMode::Head => {
            tokio::spawn(run_head_triggers(
                ctx.heads.subscribe(),
                ctx.config.head_trigger_interval,
                trigger_tx,
                tasks_cancel.clone(),
            ));
        }
    }
    tracing::info!(
        "[SETUP] continuous mode: triggers={} accounts={} report_every={} blocks",
        ctx.config.trigger_mode.as_str(),
        ctx.config.num_accounts,
        ctx.config.report_every_blocks
    );

    if ctx.config.report_every_blocks > 0 {
        tokio::spawn(run_periodic_reports(
            ctx.collector.clone(),
            ctx.ledger.clone(),
            ctx.heads.clone(),
            ctx.config.report_every_blocks,
            tasks_cancel.clone(),
        ));
    }

    let mut feed_result: Option<Result<()>> = None;
    loop {
        tokio::select! {
            _ = tasks_cancel.cancelled() => break,
            joined = &mut head_feed => {
                feed_result = Some(match joined {
                    Ok(result) => result,
                    Err(err) => Err(RpcError::Transport(format!("head feed task: {err}")).into()),
                });
                break;
            }
            trigger = trigger_rx.recv() => match trigger {
                Some(trigger) => submit_one(&submitter, trigger).await,
                None => break,
            },
        }
    }

    tasks_cancel.cancel();
    shutdown_watchers(&ctx.ledger, &ctx.heads, submitter.tracker()).await;
    feed_cancel.cancel();
    if feed_result.is_none() {
        if let Ok(Err(err)) = head_feed.await {
            tracing::warn!("[HEADS] head feed ended with error: {}", err);
        }
    }

    let snapshot = ctx.ledger.snapshot();
    tracing::info!(
        "[LEDGER] final: {} probe(s), by status {:?}",
        ctx.ledger.probe_count(),
        snapshot.by_status()
    );
    feed_result.unwrap_or(Ok(()))
}

async fn submit_one(submitter: &ProbeSubmitter, trigger: u64) {
    if let Err(err) = submitter.submit(trigger).await {
        tracing::warn!(
            "[SUBMIT] probe for trigger {} failed: {}",
            trigger,
            compact_error_message(&err.to_string(), LOG_ERR_MAX_LEN)
        );
    }
}

/// Cancels every in-flight probe and waits for its watcher to finish forfeiting.
pub async fn shutdown_watchers(ledger: &LifecycleLedger, heads: &HeadTracker, tracker: &TaskTracker) {
    let cancelled = ledger.cancel_all(heads.latest());
    tracing::info!(
        "[PROBE] shutdown: cancelled {} in-flight probe(s), waiting for {} watcher(s)",
        cancelled,
        tracker.len()
    );
    tracker.close();
    tracker.wait().await;
    ledger.reconcile(heads.latest());
}

/// Keeps the block cache warm and writes a report every `every` blocks.
pub async fn run_periodic_reports(
    collector: Arc<StatsCollector>,
    ledger: Arc<LifecycleLedger>,
    heads: HeadTracker,
    every: u64,
    cancel: CancellationToken,
) {
    let mut rx = heads.subscribe();
    let mut window = ReportWindow::new(heads.latest(), every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        let head = *rx.borrow_and_update();
        if let Err(err) = collector.prime(head).await {
            tracing::debug!("[STATS] cache priming at {} failed: {}", head, err);
        }
        let Some((window_start, window_end)) = window.close_at(head) else {
            continue;
        };
        let drained = ledger.drain_done();
        match collector.collect(window_start, window_end, &drained).await {
            Ok(report) => {
                tracing::info!("[STATS] report {}..{}\n{}", window_start, window_end, report);
                if let Err(err) = collector.write_report(&report) {
                    tracing::warn!("[STATS] report not written: {}", err);
                }
            }
            Err(err) => tracing::warn!(
                "[STATS] report {}..{} skipped: {}",
                window_start,
                window_end,
                compact_error_message(&err.to_string(), LOG_ERR_MAX_LEN)
            ),
        }
    }
}

/// Consecutive half-open report windows `[start, end)` following the head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    start: u64,
    every: u64,
}

impl ReportWindow {
    pub fn new(start: u64, every: u64) -> Self {
        Self {
            start,
            every: every.max(1),
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Closes the current window at `head` once it spans `every` blocks. The next window
    /// starts at `head`, which the closed one excludes.
    pub fn close_at(&mut self, head: u64) -> Option<(u64, u64)> {
        if head < self.start.saturating_add(self.every) {
            return None;
        }
        let closed = (self.start, head);
        self.start = head;
        Some(closed)
    }
}
