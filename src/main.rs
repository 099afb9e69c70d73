//! Probe binary: continuous submission or a one-shot report, selected by `PROBE_MODE`.

use shutter_probe::runtime::{parse_runtime_args, run_collect, run_continuous, ProbeContext, RunMode};
use shutter_probe::utils::config::Config;
use tokio_util::sync::CancellationToken;

fn explain_config(config: &Config) {
    println!("[CONFIG] rpc={} ws={}", config.rpc_url, config.ws_url.as_deref().unwrap_or("-"));
    println!(
        "[CONFIG] sequencer={:#x} keyper_set_manager={:#x} key_broadcast={:#x} deposit={}",
        config.contracts.sequencer,
        config.contracts.keyper_set_manager,
        config.contracts.key_broadcast,
        config
            .contracts
            .deposit
            .map(|a| format!("{a:#x}"))
            .unwrap_or_else(|| "-".to_string())
    );
    println!(
        "[CONFIG] accounts={} pk_file={} min_funding_wei={}",
        config.num_accounts,
        config.pk_file.display(),
        config.min_funding_wei
    );
    println!(
        "[CONFIG] timeouts submission={}s inclusion={}s forfeit={}s lookahead={}",
        config.timeouts.submission.as_secs(),
        config.timeouts.inclusion.as_secs(),
        config.timeouts.forfeit.as_secs(),
        config.keyper_set_lookahead
    );
    println!(
        "[CONFIG] triggers={} analytics={} blame_folder={} report_every={}",
        config.trigger_mode.as_str(),
        config
            .analytics_db_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string()),
        config.blame_folder.display(),
        config.report_every_blocks
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let runtime_args = parse_runtime_args()?;

    // Validate environment files and load defaults before runtime initialization.
    shutter_probe::utils::env_guard::harden_env_setup();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        println!("[STARTUP] RUST_LOG invalid or unset; defaulting to 'info'");
        tracing_subscriber::EnvFilter::new("info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load()?;
    if runtime_args.explain_config {
        explain_config(&config);
    }
    tracing::info!("[STARTUP] mode={}", runtime_args.mode.as_str());

    let ctx = ProbeContext::connect(config).await?;
    match runtime_args.mode {
        RunMode::Continuous => {
            let shutdown = CancellationToken::new();
            let signal = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        tracing::info!("[STARTUP] interrupt received; draining probes");
                        signal.cancel();
                    }
                    Err(err) => tracing::warn!("[STARTUP] no interrupt handler: {}", err),
                }
            });
            run_continuous(ctx, shutdown).await?;
        }
        RunMode::Collect { start, end } => {
            let (report, path) = run_collect(&ctx, start, end).await?;
            println!("{report}");
            println!("[STATS] written to {}", path.display());
        }
    }
    Ok(())
}
