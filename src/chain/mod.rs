//! Chain access for the probe.
//!
//! Everything the lifecycle tracker needs from an RPC node goes through [`ChainGateway`],
//! so the watcher and submitter can run against an in-memory chain in tests.

pub mod alloy_gateway;
pub mod gas;
pub mod heads;

use crate::error::Result;
use alloy::consensus::TxEnvelope;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

pub use alloy_gateway::AlloyGateway;
pub use gas::{GasPolicy, GasQuote};
pub use heads::HeadTracker;

/// Minimal receipt view: did the transaction succeed, and in which block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptSummary {
    pub success: bool,
    pub block_number: u64,
}

/// A value transfer observed in a block body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub hash: TxHash,
    pub from: Address,
    pub to: Address,
    pub value: U256,
}

#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;
    async fn head_height(&self) -> Result<u64>;
    /// Stream of new head heights. The feed ends when the receiver is dropped.
    async fn subscribe_heads(&self, poll_interval: Duration) -> Result<mpsc::Receiver<u64>>;
    async fn nonce_of(&self, account: Address) -> Result<u64>;
    async fn balance_of(&self, account: Address) -> Result<U256>;
    async fn suggest_gas_price(&self) -> Result<u128>;
    async fn suggest_gas_tip_cap(&self) -> Result<u128>;
    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64>;
    async fn send_transaction(&self, tx: &TxEnvelope) -> Result<TxHash>;
    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<ReceiptSummary>>;
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>>;
    async fn transfers_in_block(&self, block: u64) -> Result<Vec<Transfer>>;
}
