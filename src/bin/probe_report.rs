//! One-shot report over `PROBE_COLLECT_START..PROBE_COLLECT_END`.
//!
//! Exit codes: 0 when no probe failed, 1 when some did, 2 when the report could not be built.

use shutter_probe::runtime::args::collect_range_from_env;
use shutter_probe::runtime::{run_collect, ProbeContext};
use shutter_probe::utils::config::Config;

#[tokio::main]
async fn main() {
    shutter_probe::utils::env_guard::harden_env_setup();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let (start, end) = match collect_range_from_env() {
        Ok(range) => range,
        Err(err) => {
            eprintln!("[STATS] {err}");
            std::process::exit(2);
        }
    };
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("[STATS] config: {err}");
            std::process::exit(2);
        }
    };
    let ctx = match ProbeContext::connect(config).await {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("[STATS] setup: {err}");
            std::process::exit(2);
        }
    };
    let (report, path) = match run_collect(&ctx, start, end).await {
        Ok(done) => done,
        Err(err) => {
            eprintln!("[STATS] report failed: {err}");
            std::process::exit(2);
        }
    };

    print!("{report}");
    println!(
        "[STATS] range={}..{} submissions={} fails={} fail_pct={:.2} file={}",
        start,
        end,
        report.submissions,
        report.matched.failed.len(),
        report.matched.fail_pct(),
        path.display()
    );
    if report.matched.failed.is_empty() {
        std::process::exit(0);
    }
    std::process::exit(1);
}
