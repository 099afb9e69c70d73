use crate::account::{Account, AccountPool};
use crate::chain::{ChainGateway, GasPolicy};
use crate::error::{Result, SetupError};
use alloy::network::TransactionBuilder;
use alloy::primitives::{TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const TRANSFER_GAS_LIMIT: u64 = 21_000;
const FUNDING_POLL_MS: u64 = 2_000;

/// Amount to send so `balance` reaches `target`, or `None` when the account is at least half
/// funded.
pub fn funding_shortfall(balance: U256, target: U256) -> Option<U256> {
    let missing = target.saturating_sub(balance);
    if missing > target / U256::from(2u64) {
        Some(missing)
    } else {
        None
    }
}

async fn wait_for_success(
    gateway: &dyn ChainGateway,
    hash: TxHash,
    deadline: Instant,
) -> Result<u64> {
    loop {
        if let Some(receipt) = gateway.transaction_receipt(hash).await? {
            if !receipt.success {
                return Err(SetupError::Funding(format!("transfer {hash:#x} reverted")).into());
            }
            return Ok(receipt.block_number);
        }
        if Instant::now() >= deadline {
            return Err(SetupError::Funding(format!(
                "transfer {hash:#x} not mined before deadline"
            ))
            .into());
        }
        sleep(Duration::from_millis(FUNDING_POLL_MS)).await;
    }
}

/// Tops up every under-funded probe account from `funder` and waits for the transfers.
pub async fn fund_accounts(
    gateway: &dyn ChainGateway,
    funder: &Account,
    pool: &AccountPool,
    target: U256,
    chain_id: u64,
    timeout: Duration,
) -> Result<usize> {
    let mut pending = Vec::new();
    for account in pool.accounts() {
        let balance = gateway.balance_of(account.address()).await?;
        let Some(missing) = funding_shortfall(balance, target) else {
            tracing::info!(
                "[SETUP] probe account {:#x} funded (balance={} wei)",
                account.address(),
                balance
            );
            continue;
        };

        let gas = GasPolicy::Default.resolve(gateway).await?;
        let nonce = funder.use_nonce();
        let tx = TransactionRequest::default()
            .with_to(account.address())
            .with_value(missing)
            .with_chain_id(chain_id)
            .with_nonce(nonce)
            .with_gas_limit(TRANSFER_GAS_LIMIT)
            .with_max_fee_per_gas(gas.max_fee_per_gas)
            .with_max_priority_fee_per_gas(gas.max_priority_fee_per_gas);
        let signed = match funder.sign(tx).await {
            Ok(signed) => signed,
            Err(err) => {
                funder.release_nonce(nonce);
                return Err(err);
            }
        };
        let hash = match gateway.send_transaction(&signed).await {
            Ok(hash) => hash,
            Err(err) => {
                funder.release_nonce(nonce);
                return Err(SetupError::Funding(format!(
                    "funding {:#x} failed: {err}",
                    account.address()
                ))
                .into());
            }
        };
        tracing::info!(
            "[SETUP] funding {:#x} with {} wei (nonce={}, tx={:#x})",
            account.address(),
            missing,
            nonce,
            hash
        );
        pending.push(hash);
    }

    let deadline = Instant::now() + timeout;
    for hash in &pending {
        let block = wait_for_success(gateway, *hash, deadline).await?;
        tracing::info!("[SETUP] funding tx {:#x} mined in block {}", hash, block);
    }
    if !pending.is_empty() {
        funder.sync_nonce(gateway).await?;
    }
    Ok(pending.len())
}
