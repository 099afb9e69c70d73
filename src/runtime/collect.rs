use crate::error::Result;
use crate::runtime::setup::ProbeContext;
use crate::stats::StatsReport;
use std::path::PathBuf;

/// One report over `[start, end)`, written to the blame folder.
pub async fn run_collect(ctx: &ProbeContext, start: u64, end: u64) -> Result<(StatsReport, PathBuf)> {
    tracing::info!("[STATS] collecting block range {}..{}", start, end);
    let report = ctx.collector.collect(start, end, &[]).await?;
    let path = ctx.collector.write_report(&report)?;
    Ok((report, path))
}
