use crate::error::RpcError;
use crate::utils::error::compact_error_message;
use std::fmt::Display;
use std::future::Future;
use tokio::time::{sleep, timeout, Duration};

pub const RPC_ERR_MAX_LEN: usize = 260;
const RPC_CALL_TIMEOUT_MS: u64 = 10_000;
const RETRY_BASE_MS: u64 = 100;
const RETRY_CAP_MS: u64 = 1_800;
const RATE_LIMIT_BASE_MS: u64 = 1_000;
const RATE_LIMIT_CAP_MS: u64 = 30_000;

pub fn rpc_call_timeout_ms() -> u64 {
    std::env::var("PROBE_RPC_CALL_TIMEOUT_MS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|v| (250..=120_000).contains(v))
        .unwrap_or(RPC_CALL_TIMEOUT_MS)
}

pub fn is_retryable_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    let non_retryable = [
        "method not found",
        "-32601",
        "invalid params",
        "-32602",
        "execution reverted",
        "revert",
        "nonce too low",
        "insufficient funds",
        "parse error",
        "-32700",
    ];
    !non_retryable.iter().any(|needle| msg.contains(needle))
}

pub fn is_rate_limited_rpc_error(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("429")
        || msg.contains("rate limit")
        || msg.contains("too many requests")
        || msg.contains("compute units per second")
        || msg.contains("throughput")
}

pub fn bounded_exponential_backoff_ms(base_ms: u64, streak: u32, cap_ms: u64) -> u64 {
    if base_ms == 0 {
        return 0;
    }
    let clamped = streak.min(8);
    base_ms
        .saturating_mul(1u64 << clamped)
        .min(cap_ms.max(base_ms))
}

fn retry_backoff_ms(attempt: usize, rate_limited: bool) -> u64 {
    if rate_limited {
        bounded_exponential_backoff_ms(RATE_LIMIT_BASE_MS, attempt as u32, RATE_LIMIT_CAP_MS)
    } else {
        bounded_exponential_backoff_ms(RETRY_BASE_MS, attempt as u32, RETRY_CAP_MS)
    }
}

/// Runs `op` under the per-call timeout, retrying transient failures with bounded backoff.
pub async fn run_with_retry<T, E, Op, Fut>(
    retries: usize,
    context: &str,
    mut op: Op,
) -> Result<T, RpcError>
where
    E: Display,
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = retries.max(1);
    let timeout_ms = rpc_call_timeout_ms();
    let mut attempt = 1usize;

    loop {
        let (message, rate_limited) =
            match timeout(Duration::from_millis(timeout_ms), op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => {
                    let message = compact_error_message(&err.to_string(), RPC_ERR_MAX_LEN);
                    if !is_retryable_rpc_error(&message) {
                        return Err(RpcError::Transport(format!("{context}: {message}")));
                    }
                    let rate_limited = is_rate_limited_rpc_error(&message);
                    (message, rate_limited)
                }
                Err(_) => (format!("timed out after {timeout_ms}ms"), false),
            };

        if attempt >= max_attempts {
            return Err(RpcError::Transport(format!(
                "{context} failed on attempt {attempt}/{max_attempts}: {message}"
            )));
        }
        tracing::debug!(
            "[RPC] {} attempt {}/{} failed: {}",
            context,
            attempt,
            max_attempts,
            message
        );
        sleep(Duration::from_millis(retry_backoff_ms(attempt, rate_limited))).await;
        attempt += 1;
    }
}
