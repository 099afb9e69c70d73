use crate::utils::config::parse_bool_flag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Submit probes against the live trigger feed until interrupted.
    Continuous,
    /// Produce one report for `[start, end)` and exit.
    Collect { start: u64, end: u64 },
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::Collect { .. } => "collect",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RuntimeArgs {
    pub mode: RunMode,
    pub explain_config: bool,
}

fn parse_block_var(name: &str) -> anyhow::Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            let trimmed = raw.trim();
            let parsed = trimmed.parse::<u64>().map_err(|err| {
                anyhow::anyhow!("invalid {} '{}': {} (set a block number)", name, trimmed, err)
            })?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Reads the collect range from `PROBE_COLLECT_START` / `PROBE_COLLECT_END`.
pub fn collect_range_from_env() -> anyhow::Result<(u64, u64)> {
    let start = parse_block_var("PROBE_COLLECT_START")?;
    let end = parse_block_var("PROBE_COLLECT_END")?;
    match (start, end) {
        (Some(start), Some(end)) if end > start => Ok((start, end)),
        (Some(start), Some(end)) => Err(anyhow::anyhow!(
            "PROBE_COLLECT_END ({}) must be greater than PROBE_COLLECT_START ({})",
            end,
            start
        )),
        _ => Err(anyhow::anyhow!(
            "collect mode needs PROBE_COLLECT_START and PROBE_COLLECT_END"
        )),
    }
}

fn parse_mode_from_env() -> anyhow::Result<RunMode> {
    let raw = std::env::var("PROBE_MODE").unwrap_or_default();
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "continuous" => Ok(RunMode::Continuous),
        "collect" => {
            let (start, end) = collect_range_from_env()?;
            Ok(RunMode::Collect { start, end })
        }
        other => Err(anyhow::anyhow!(
            "invalid PROBE_MODE '{}' (expected continuous or collect)",
            other
        )),
    }
}

fn parse_runtime_args_from_iter<I, S>(args: I) -> anyhow::Result<RuntimeArgs>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let supplied_args = args
        .into_iter()
        .map(|arg| arg.as_ref().to_string())
        .collect::<Vec<_>>();
    if !supplied_args.is_empty() {
        let joined = supplied_args.join(" ");
        return Err(anyhow::anyhow!(
            "CLI arguments are disabled in this build. Configure .env keys instead (PROBE_MODE, PROBE_COLLECT_START, PROBE_COLLECT_END, PROBE_EXPLAIN_CONFIG). Received args: {}",
            joined
        ));
    }

    let mode = parse_mode_from_env()?;
    let explain_config = std::env::var("PROBE_EXPLAIN_CONFIG")
        .ok()
        .and_then(|raw| parse_bool_flag(&raw))
        .unwrap_or(false);

    Ok(RuntimeArgs {
        mode,
        explain_config,
    })
}

pub fn parse_runtime_args() -> anyhow::Result<RuntimeArgs> {
    parse_runtime_args_from_iter(std::env::args().skip(1))
}

#[cfg(test)]
mod tests {
    use super::{collect_range_from_env, parse_runtime_args_from_iter, RunMode};
    use crate::utils::config::tests::env_lock;

    fn clear_mode_env() {
        for key in [
            "PROBE_MODE",
            "PROBE_COLLECT_START",
            "PROBE_COLLECT_END",
            "PROBE_EXPLAIN_CONFIG",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn runtime_args_default_to_continuous() {
        let _guard = env_lock().lock().expect("env lock");
        clear_mode_env();
        let parsed =
            parse_runtime_args_from_iter(Vec::<&str>::new()).expect("parse should succeed");
        assert_eq!(parsed.mode, RunMode::Continuous);
        assert!(!parsed.explain_config);
        clear_mode_env();
    }

    #[test]
    fn collect_mode_reads_block_range() {
        let _guard = env_lock().lock().expect("env lock");
        clear_mode_env();
        std::env::set_var("PROBE_MODE", "Collect");
        std::env::set_var("PROBE_COLLECT_START", "100");
        std::env::set_var("PROBE_COLLECT_END", "250");
        std::env::set_var("PROBE_EXPLAIN_CONFIG", "yes");

        let parsed =
            parse_runtime_args_from_iter(Vec::<&str>::new()).expect("parse should succeed");
        assert_eq!(parsed.mode, RunMode::Collect { start: 100, end: 250 });
        assert!(parsed.explain_config);
        clear_mode_env();
    }

    #[test]
    fn collect_mode_rejects_missing_or_inverted_range() {
        let _guard = env_lock().lock().expect("env lock");
        clear_mode_env();
        std::env::set_var("PROBE_MODE", "collect");
        assert!(parse_runtime_args_from_iter(Vec::<&str>::new()).is_err());

        std::env::set_var("PROBE_COLLECT_START", "300");
        std::env::set_var("PROBE_COLLECT_END", "200");
        let err = collect_range_from_env().expect_err("inverted range");
        assert!(err.to_string().contains("must be greater"));

        std::env::set_var("PROBE_COLLECT_END", "abc");
        let err = collect_range_from_env().expect_err("bad number");
        assert!(err.to_string().contains("invalid PROBE_COLLECT_END"));
        clear_mode_env();
    }

    #[test]
    fn runtime_args_reject_unknown_mode_and_cli_flags() {
        let _guard = env_lock().lock().expect("env lock");
        clear_mode_env();
        std::env::set_var("PROBE_MODE", "graffiti");
        assert!(parse_runtime_args_from_iter(Vec::<&str>::new()).is_err());
        clear_mode_env();

        let err =
            parse_runtime_args_from_iter(vec!["--mode", "collect"]).expect_err("parse should fail");
        assert!(
            err.to_string().contains("CLI arguments are disabled"),
            "unexpected error message: {}",
            err
        );
        clear_mode_env();
    }
}
