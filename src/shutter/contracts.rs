use crate::chain::ChainGateway;
use crate::error::{EncryptionError, Result, RpcError};
use crate::shutter::IdentityPrefix;
use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::{SolCall, SolEvent};

alloy::sol! {
    interface ISequencer {
        event TransactionSubmitted(
            uint64 eon,
            bytes32 identityPrefix,
            address sender,
            bytes encryptedTransaction,
            uint256 gasLimit
        );

        function submitEncryptedTransaction(
            uint64 eon,
            bytes32 identityPrefix,
            bytes calldata encryptedTransaction,
            uint256 gasLimit
        ) external payable;
    }

    interface IKeyperSetManager {
        function getKeyperSetIndexByBlock(uint64 blockNumber) external view returns (uint64 index);
    }

    interface IKeyBroadcastContract {
        function getEonKey(uint64 eon) external view returns (bytes memory key);
    }

    interface IDepositContract {
        function validatorWithdrawalCredentials(bytes calldata pubkey) external view returns (bytes32 credentials);
    }
}

pub fn submit_encrypted_transaction_calldata(
    eon: u64,
    prefix: IdentityPrefix,
    ciphertext: Bytes,
    gas_limit: u64,
) -> Bytes {
    ISequencer::submitEncryptedTransactionCall {
        eon,
        identityPrefix: prefix.0,
        encryptedTransaction: ciphertext,
        gasLimit: U256::from(gas_limit),
    }
    .abi_encode()
    .into()
}

pub async fn keyper_set_index_for_block(
    gateway: &dyn ChainGateway,
    keyper_set_manager: Address,
    block: u64,
) -> Result<u64> {
    let data = IKeyperSetManager::getKeyperSetIndexByBlockCall { blockNumber: block }.abi_encode();
    let raw = gateway.call(keyper_set_manager, data.into()).await?;
    let decoded =
        <IKeyperSetManager::getKeyperSetIndexByBlockCall as SolCall>::abi_decode_returns(
            raw.as_ref(),
            true,
        )
        .map_err(|e| RpcError::Call {
            call: "getKeyperSetIndexByBlock",
            reason: e.to_string(),
        })?;
    Ok(decoded.index)
}

pub async fn eon_key(gateway: &dyn ChainGateway, key_broadcast: Address, eon: u64) -> Result<Bytes> {
    let data = IKeyBroadcastContract::getEonKeyCall { eon }.abi_encode();
    let raw = gateway.call(key_broadcast, data.into()).await?;
    let decoded = <IKeyBroadcastContract::getEonKeyCall as SolCall>::abi_decode_returns(
        raw.as_ref(),
        true,
    )
    .map_err(|e| RpcError::Call {
        call: "getEonKey",
        reason: e.to_string(),
    })?;
    if decoded.key.is_empty() {
        return Err(EncryptionError::MissingEonKey(eon).into());
    }
    Ok(decoded.key)
}

pub async fn withdrawal_credentials(
    gateway: &dyn ChainGateway,
    deposit_contract: Address,
    validator_pubkey: Bytes,
) -> Result<B256> {
    let data = IDepositContract::validatorWithdrawalCredentialsCall {
        pubkey: validator_pubkey,
    }
    .abi_encode();
    let raw = gateway.call(deposit_contract, data.into()).await?;
    let decoded =
        <IDepositContract::validatorWithdrawalCredentialsCall as SolCall>::abi_decode_returns(
            raw.as_ref(),
            true,
        )
        .map_err(|e| RpcError::Call {
            call: "validatorWithdrawalCredentials",
            reason: e.to_string(),
        })?;
    Ok(decoded.credentials)
}

/// A decoded `TransactionSubmitted` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransaction {
    pub eon: u64,
    pub identity_prefix: IdentityPrefix,
    pub sender: Address,
    pub gas_limit: U256,
    pub block_number: u64,
    pub tx_hash: Option<TxHash>,
}

pub fn transaction_submitted_filter(sequencer: Address, from_block: u64, to_block: u64) -> Filter {
    Filter::new()
        .address(sequencer)
        .event_signature(ISequencer::TransactionSubmitted::SIGNATURE_HASH)
        .from_block(from_block)
        .to_block(to_block)
}

pub fn decode_transaction_submitted(log: &Log) -> Option<SubmittedTransaction> {
    let block_number = log.block_number?;
    let event = ISequencer::TransactionSubmitted::decode_log_data(log.data(), true).ok()?;
    Some(SubmittedTransaction {
        eon: event.eon,
        identity_prefix: IdentityPrefix(event.identityPrefix),
        sender: event.sender,
        gas_limit: event.gasLimit,
        block_number,
        tx_hash: log.transaction_hash,
    })
}
