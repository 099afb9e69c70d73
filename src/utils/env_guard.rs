use std::fs;
use std::path::Path;

const REQUIRED_KEYS: [&str; 5] = [
    "PROBE_RPC_URL",
    "PROBE_SUBMIT_PRIVATE_KEY",
    "PROBE_SEQUENCER_ADDRESS",
    "PROBE_KEYPER_SET_MANAGER_ADDRESS",
    "PROBE_KEY_BROADCAST_ADDRESS",
];

fn write_minimal_env_template(file: &mut fs::File) -> std::io::Result<()> {
    use std::io::Write;
    writeln!(file, "# Shutter probe configuration")?;
    writeln!(file)?;
    writeln!(file, "PROBE_RPC_URL=\"http://127.0.0.1:8545\"")?;
    writeln!(file, "PROBE_WS_URL=\"ws://127.0.0.1:8546\"")?;
    writeln!(file, "PROBE_SUBMIT_PRIVATE_KEY=\"CHANGE_ME\"")?;
    writeln!(file, "PROBE_SEQUENCER_ADDRESS=\"0x0000000000000000000000000000000000000000\"")?;
    writeln!(file, "PROBE_KEYPER_SET_MANAGER_ADDRESS=\"0x0000000000000000000000000000000000000000\"")?;
    writeln!(file, "PROBE_KEY_BROADCAST_ADDRESS=\"0x0000000000000000000000000000000000000000\"")?;
    writeln!(file, "PROBE_ENCRYPTION_SERVICE_URL=\"http://127.0.0.1:8700\"")?;
    writeln!(file, "PROBE_ANALYTICS_DB_PATH=\"./observer.sqlite\"")?;
    writeln!(file)?;
    writeln!(file, "RUST_LOG=\"info,shutter_probe=info\"")?;
    Ok(())
}

/// Parses `KEY=value` lines, skipping comments and keys already present in the environment.
fn parse_env_lines(content: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };

        let value_no_comment = value.split('#').next().unwrap_or("").trim();
        let parsed = if value_no_comment.len() >= 2
            && ((value_no_comment.starts_with('"') && value_no_comment.ends_with('"'))
                || (value_no_comment.starts_with('\'') && value_no_comment.ends_with('\'')))
        {
            &value_no_comment[1..value_no_comment.len() - 1]
        } else {
            value_no_comment
        };
        out.push((key.trim().to_string(), parsed.to_string()));
    }
    out
}

fn load_dot_env() {
    let path = Path::new(".env");
    if !path.exists() {
        return;
    }

    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[ENV] Failed to read .env: {}", e);
            return;
        }
    };

    for (key, value) in parse_env_lines(&content) {
        if std::env::var_os(&key).is_some() {
            continue;
        }
        std::env::set_var(key, value);
    }
}

fn ensure_env_example_exists() {
    let env_example = Path::new(".env.example");
    if !env_example.exists() {
        if let Ok(mut file) = fs::File::create(env_example) {
            let _ = write_minimal_env_template(&mut file);
        }
    }
}

pub fn harden_env_setup() {
    ensure_env_example_exists();
    load_dot_env();
    for key in REQUIRED_KEYS {
        if std::env::var(key).is_err() {
            eprintln!("[ENV] WARN: {} is not set", key);
        }
    }
}
