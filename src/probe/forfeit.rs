//! Nonce forfeiture: replace a stuck inner transaction with a 1 wei self-transfer so the
//! account's nonce sequence keeps moving.

use crate::account::bootstrap::TRANSFER_GAS_LIMIT;
use crate::account::Account;
use crate::chain::{ChainGateway, GasPolicy};
use crate::error::{Result, RpcError};
use crate::probe::watcher::{wait_for_receipt, WaitOutcome};
use crate::utils::error::is_stale_nonce_error;
use alloy::network::TransactionBuilder;
use alloy::primitives::{TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForfeitOutcome {
    Confirmed { hash: TxHash, block: u64 },
    /// The node rejected the nonce as used, so the original transaction got there first.
    NonceAlreadyUsed,
}

pub fn forfeit_request(account: &Account, nonce: u64, chain_id: u64, max_fee: u128, tip: u128) -> TransactionRequest {
    TransactionRequest::default()
        .with_to(account.address())
        .with_value(U256::from(1u64))
        .with_chain_id(chain_id)
        .with_nonce(nonce)
        .with_gas_limit(TRANSFER_GAS_LIMIT)
        .with_max_fee_per_gas(max_fee)
        .with_max_priority_fee_per_gas(tip)
}

pub async fn forfeit_nonce(
    gateway: &dyn ChainGateway,
    account: &Account,
    nonce: u64,
    chain_id: u64,
    heads: &mut watch::Receiver<u64>,
    timeout: Duration,
) -> Result<ForfeitOutcome> {
    let result = broadcast_and_wait(gateway, account, nonce, chain_id, heads, timeout).await;
    if let Err(err) = account.sync_nonce(gateway).await {
        tracing::warn!(
            "[FORFEIT] nonce resync for {:#x} failed: {}",
            account.address(),
            err
        );
    }
    result
}

async fn broadcast_and_wait(
    gateway: &dyn ChainGateway,
    account: &Account,
    nonce: u64,
    chain_id: u64,
    heads: &mut watch::Receiver<u64>,
    timeout: Duration,
) -> Result<ForfeitOutcome> {
    let gas = GasPolicy::HighPriority.resolve(gateway).await?;
    let signed = account
        .sign(forfeit_request(
            account,
            nonce,
            chain_id,
            gas.max_fee_per_gas,
            gas.max_priority_fee_per_gas,
        ))
        .await?;
    let hash = match gateway.send_transaction(&signed).await {
        Ok(hash) => hash,
        Err(err) if is_stale_nonce_error(&err.to_string()) => {
            return Ok(ForfeitOutcome::NonceAlreadyUsed)
        }
        Err(err) => return Err(err),
    };
    tracing::debug!(
        "[FORFEIT] sent {:#x} for nonce {} of {:#x}",
        hash,
        nonce,
        account.address()
    );

    let never = CancellationToken::new();
    match wait_for_receipt(gateway, hash, heads, Instant::now() + timeout, &never).await? {
        WaitOutcome::Receipt(receipt) if receipt.success => Ok(ForfeitOutcome::Confirmed {
            hash,
            block: receipt.block_number,
        }),
        WaitOutcome::Receipt(receipt) => Err(RpcError::Rejected(format!(
            "forfeit tx {hash:#x} failed in block {}",
            receipt.block_number
        ))
        .into()),
        WaitOutcome::Cancelled | WaitOutcome::DeadlineExceeded => Err(RpcError::Timeout {
            waited_ms: timeout.as_millis() as u64,
            context: format!("forfeit tx {hash:#x}"),
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::forfeit_request;
    use crate::account::Account;
    use alloy::primitives::{TxKind, U256};

    #[test]
    fn forfeit_is_a_one_wei_self_transfer_at_the_stuck_nonce() {
        let account = Account::generate();
        let req = forfeit_request(&account, 12, 100, 50, 5);
        assert_eq!(req.to, Some(TxKind::Call(account.address())));
        assert_eq!(req.value, Some(U256::from(1u64)));
        assert_eq!(req.nonce, Some(12));
        assert_eq!(req.gas, Some(21_000));
        assert_eq!(req.max_fee_per_gas, Some(50));
        assert_eq!(req.max_priority_fee_per_gas, Some(5));
    }
}
