use crate::error::{Result, SetupError};
use crate::probe::ProbeTimeouts;
use crate::runtime::triggers::TriggerMode;
use crate::utils::hex::{clean_hex, parse_address, to_u256};
use alloy::primitives::{Address, U256};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_NUM_ACCOUNTS: usize = 6;
/// 0.5 ETH
const DEFAULT_MIN_FUNDING_WEI: u128 = 500_000_000_000_000_000;
const DEFAULT_SUBMISSION_TIMEOUT_SECS: u64 = 300;
const DEFAULT_INCLUSION_TIMEOUT_SECS: u64 = 1_200;
const DEFAULT_FORFEIT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_KEYPER_SET_LOOKAHEAD: u64 = 2;
const DEFAULT_OBSERVER_POLL_MS: u64 = 5_000;
const DEFAULT_HEAD_POLL_MS: u64 = 5_000;
const DEFAULT_BLOCK_CACHE_RETENTION: u64 = 50_000;
const DEFAULT_LEDGER_DONE_CAPACITY: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    pub sequencer: Address,
    pub keyper_set_manager: Address,
    pub key_broadcast: Address,
    pub deposit: Option<Address>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_url: String,
    pub ws_url: Option<String>,
    pub submit_private_key: String,
    pub pk_file: PathBuf,
    pub contracts: ContractAddresses,
    pub encryption_service_url: Option<String>,
    pub analytics_db_path: Option<PathBuf>,
    pub blame_folder: PathBuf,
    pub num_accounts: usize,
    pub min_funding_wei: U256,
    pub timeouts: ProbeTimeouts,
    pub keyper_set_lookahead: u64,
    pub trigger_mode: TriggerMode,
    pub head_trigger_interval: u64,
    pub observer_poll: Duration,
    pub head_poll: Duration,
    pub report_every_blocks: u64,
    pub block_cache_retention: u64,
    pub ledger_done_capacity: usize,
}

fn validate_http_url(name: &str, raw: &str) -> Result<()> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        SetupError::InvalidConfig(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SetupError::InvalidConfig(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))
        .into()),
    }
}

fn validate_ws_url(name: &str, raw: &str) -> Result<()> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        SetupError::InvalidConfig(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(SetupError::InvalidConfig(format!(
            "{name} must use ws(s) scheme, got `{other}`"
        ))
        .into()),
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required_address(name: &str) -> Result<Address> {
    let raw = optional_var(name)
        .ok_or_else(|| SetupError::MissingConfig(format!("{name} must be set")))?;
    parse_address(name, &raw).ok_or_else(|| {
        SetupError::InvalidConfig(format!("{name} must be a 0x-prefixed address, got `{raw}`"))
            .into()
    })
}

fn load_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .map(|v| v.clamp(min, max))
        .unwrap_or(default)
}

pub fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let rpc_url = optional_var("PROBE_RPC_URL")
            .ok_or_else(|| SetupError::MissingConfig("PROBE_RPC_URL must be set".to_string()))?;
        validate_http_url("PROBE_RPC_URL", &rpc_url)?;
        let ws_url = optional_var("PROBE_WS_URL");
        if let Some(url) = ws_url.as_deref() {
            validate_ws_url("PROBE_WS_URL", url)?;
        }

        let submit_private_key = optional_var("PROBE_SUBMIT_PRIVATE_KEY").ok_or_else(|| {
            SetupError::MissingConfig("PROBE_SUBMIT_PRIVATE_KEY must be set".to_string())
        })?;
        let trimmed = clean_hex(&submit_private_key);
        let hexish = !trimmed.is_empty()
            && trimmed.len() % 2 == 0
            && trimmed.as_bytes().iter().all(|b| b.is_ascii_hexdigit());
        if !hexish {
            return Err(SetupError::InvalidConfig(
                "PROBE_SUBMIT_PRIVATE_KEY must be hex (optionally 0x-prefixed)".to_string(),
            )
            .into());
        }

        let contracts = ContractAddresses {
            sequencer: required_address("PROBE_SEQUENCER_ADDRESS")?,
            keyper_set_manager: required_address("PROBE_KEYPER_SET_MANAGER_ADDRESS")?,
            key_broadcast: required_address("PROBE_KEY_BROADCAST_ADDRESS")?,
            deposit: match optional_var("PROBE_DEPOSIT_CONTRACT_ADDRESS") {
                Some(_) => Some(required_address("PROBE_DEPOSIT_CONTRACT_ADDRESS")?),
                None => None,
            },
        };

        let encryption_service_url = optional_var("PROBE_ENCRYPTION_SERVICE_URL");
        if let Some(url) = encryption_service_url.as_deref() {
            validate_http_url("PROBE_ENCRYPTION_SERVICE_URL", url)?;
        }
        let analytics_db_path = optional_var("PROBE_ANALYTICS_DB_PATH").map(PathBuf::from);

        let min_funding_wei = match optional_var("PROBE_MIN_FUNDING_WEI") {
            Some(raw) => to_u256(&raw).ok_or_else(|| {
                SetupError::InvalidConfig(format!(
                    "PROBE_MIN_FUNDING_WEI must be a wei amount, got `{raw}`"
                ))
            })?,
            None => U256::from(DEFAULT_MIN_FUNDING_WEI),
        };

        let timeouts = ProbeTimeouts {
            submission: Duration::from_secs(load_u64(
                "PROBE_SUBMISSION_TIMEOUT_SECS",
                DEFAULT_SUBMISSION_TIMEOUT_SECS,
                10,
                86_400,
            )),
            inclusion: Duration::from_secs(load_u64(
                "PROBE_INCLUSION_TIMEOUT_SECS",
                DEFAULT_INCLUSION_TIMEOUT_SECS,
                10,
                86_400,
            )),
            forfeit: Duration::from_secs(load_u64(
                "PROBE_FORFEIT_TIMEOUT_SECS",
                DEFAULT_FORFEIT_TIMEOUT_SECS,
                10,
                86_400,
            )),
        };
        if timeouts.inclusion <= timeouts.submission {
            return Err(SetupError::InvalidConfig(format!(
                "PROBE_INCLUSION_TIMEOUT_SECS ({}s) must exceed PROBE_SUBMISSION_TIMEOUT_SECS ({}s)",
                timeouts.inclusion.as_secs(),
                timeouts.submission.as_secs()
            ))
            .into());
        }

        let trigger_mode = match optional_var("PROBE_TRIGGER_MODE") {
            Some(raw) => TriggerMode::parse(&raw).ok_or_else(|| {
                SetupError::InvalidConfig(format!(
                    "PROBE_TRIGGER_MODE must be `observer` or `head`, got `{raw}`"
                ))
            })?,
            None if analytics_db_path.is_some() => TriggerMode::Observer,
            None => TriggerMode::Head,
        };
        if trigger_mode == TriggerMode::Observer && analytics_db_path.is_none() {
            return Err(SetupError::MissingConfig(
                "PROBE_TRIGGER_MODE=observer requires PROBE_ANALYTICS_DB_PATH".to_string(),
            )
            .into());
        }

        Ok(Self {
            rpc_url,
            ws_url,
            submit_private_key,
            pk_file: optional_var("PROBE_PK_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("pk.hex")),
            contracts,
            encryption_service_url,
            analytics_db_path,
            blame_folder: optional_var("PROBE_BLAME_FOLDER")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            num_accounts: load_u64("PROBE_NUM_ACCOUNTS", DEFAULT_NUM_ACCOUNTS as u64, 1, 256)
                as usize,
            min_funding_wei,
            timeouts,
            keyper_set_lookahead: load_u64(
                "PROBE_KEYPER_SET_LOOKAHEAD",
                DEFAULT_KEYPER_SET_LOOKAHEAD,
                0,
                64,
            ),
            trigger_mode,
            head_trigger_interval: load_u64("PROBE_HEAD_TRIGGER_INTERVAL", 1, 1, 10_000),
            observer_poll: Duration::from_millis(load_u64(
                "PROBE_OBSERVER_POLL_MS",
                DEFAULT_OBSERVER_POLL_MS,
                250,
                600_000,
            )),
            head_poll: Duration::from_millis(load_u64(
                "PROBE_HEAD_POLL_MS",
                DEFAULT_HEAD_POLL_MS,
                250,
                600_000,
            )),
            report_every_blocks: load_u64("PROBE_REPORT_EVERY_BLOCKS", 0, 0, 1_000_000),
            block_cache_retention: load_u64(
                "PROBE_BLOCK_CACHE_RETENTION",
                DEFAULT_BLOCK_CACHE_RETENTION,
                16,
                10_000_000,
            ),
            ledger_done_capacity: load_u64(
                "PROBE_LEDGER_DONE_CAPACITY",
                DEFAULT_LEDGER_DONE_CAPACITY as u64,
                1,
                1_000_000,
            ) as usize,
        })
    }

    pub fn require_encryption_service_url(&self) -> Result<&str> {
        self.encryption_service_url.as_deref().ok_or_else(|| {
            SetupError::MissingConfig(
                "PROBE_ENCRYPTION_SERVICE_URL must be set for continuous mode".to_string(),
            )
            .into()
        })
    }
}
