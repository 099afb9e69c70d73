//! Trigger sources. Each feed emits block numbers a probe should be tied to.

use crate::stats::analytics::{AnalyticsStore, ShutterBlock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Poll the observer database for blocks the keypers released keys for.
    Observer,
    /// Trigger on every N-th chain head.
    Head,
}

impl TriggerMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "observer" => Some(Self::Observer),
            "head" | "heads" => Some(Self::Head),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Observer => "observer",
            Self::Head => "head",
        }
    }
}

/// Tracks the newest shutter block timestamp the observer feed has handed out.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObserverCursor {
    last_timestamp: i64,
}

impl ObserverCursor {
    pub fn new(last_timestamp: i64) -> Self {
        Self { last_timestamp }
    }

    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    /// Takes the newest block of a poll and moves the cursor past it. Older blocks in the
    /// same poll are skipped and only logged.
    pub fn advance(&mut self, blocks: &[ShutterBlock]) -> Option<ShutterBlock> {
        let newest = blocks.last()?.clone();
        if blocks.len() > 1 {
            tracing::warn!(
                "[TRIGGER] observer feed skipped {} shutter block(s) before {}",
                blocks.len() - 1,
                newest.block_number
            );
        }
        self.last_timestamp = self.last_timestamp.max(newest.timestamp);
        Some(newest)
    }
}

/// Lets every `every`-th head through.
#[derive(Debug, Clone, Copy)]
pub struct HeadTriggerGate {
    every: u64,
    seen: u64,
}

impl HeadTriggerGate {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            seen: 0,
        }
    }

    pub fn on_head(&mut self, head: u64) -> Option<u64> {
        self.seen += 1;
        if self.seen % self.every == 0 {
            Some(head)
        } else {
            None
        }
    }
}

pub async fn run_observer_triggers(
    analytics: Arc<dyn AnalyticsStore>,
    poll: Duration,
    out: mpsc::Sender<u64>,
    cancel: CancellationToken,
) {
    let start = match analytics.latest_shutter_timestamp().await {
        Ok(ts) => ts.unwrap_or(0),
        Err(err) => {
            tracing::warn!("[TRIGGER] latest shutter timestamp unavailable, starting from 0: {}", err);
            0
        }
    };
    let mut cursor = ObserverCursor::new(start);
    tracing::info!("[TRIGGER] observer feed starting after ts {}", start);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(poll) => {}
        }
        let blocks = match analytics.shutter_blocks_since(cursor.last_timestamp()).await {
            Ok(blocks) => blocks,
            Err(err) => {
                tracing::warn!("[TRIGGER] observer poll failed: {}", err);
                continue;
            }
        };
        let Some(block) = cursor.advance(&blocks) else {
            continue;
        };
        tracing::info!(
            "[TRIGGER] new shutter block {} (slot {}, {} key(s))",
            block.block_number,
            block.slot,
            block.key_count
        );
        if out.send(block.block_number).await.is_err() {
            return;
        }
    }
}

pub async fn run_head_triggers(
    mut heads: watch::Receiver<u64>,
    every: u64,
    out: mpsc::Sender<u64>,
    cancel: CancellationToken,
) {
    let mut gate = HeadTriggerGate::new(every);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = heads.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        let head = *heads.borrow_and_update();
        if let Some(trigger) = gate.on_head(head) {
            if out.send(trigger).await.is_err() {
                return;
            }
        }
    }
}
