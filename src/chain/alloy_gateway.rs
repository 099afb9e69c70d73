use crate::chain::{ChainGateway, ReceiptSummary, Transfer};
use crate::error::{Result, RpcError};
use crate::utils::error::compact_error_message;
use crate::utils::rpc::{run_with_retry, RPC_ERR_MAX_LEN};
use alloy::consensus::{Transaction as _, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{ReceiptResponse, TransactionBuilder};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter, Log, TransactionRequest};
use alloy::transports::http::Http;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

pub type HttpProvider = RootProvider<Http<Client>>;

const READ_RETRIES: usize = 3;
const HEAD_CHANNEL_CAPACITY: usize = 64;
const WS_CONNECT_TIMEOUT_MS: u64 = 10_000;

fn compact_error(err: impl std::fmt::Display) -> String {
    compact_error_message(&err.to_string(), RPC_ERR_MAX_LEN)
}

/// [`ChainGateway`] over an HTTP JSON-RPC provider, with an optional WebSocket head feed.
#[derive(Clone)]
pub struct AlloyGateway {
    provider: Arc<HttpProvider>,
    ws_url: Option<String>,
}

impl AlloyGateway {
    pub fn connect(rpc_url: &str, ws_url: Option<String>) -> Result<Self> {
        let url = rpc_url
            .parse::<reqwest::Url>()
            .map_err(|e| RpcError::InvalidUrl {
                url: rpc_url.to_string(),
                reason: e.to_string(),
            })?;
        let provider = ProviderBuilder::new().on_http(url);
        Ok(Self {
            provider: Arc::new(provider),
            ws_url,
        })
    }

    pub fn provider(&self) -> Arc<HttpProvider> {
        self.provider.clone()
    }

    async fn spawn_ws_feed(&self, ws_url: &str, tx: mpsc::Sender<u64>) -> Result<()> {
        let provider = match tokio::time::timeout(
            Duration::from_millis(WS_CONNECT_TIMEOUT_MS),
            ProviderBuilder::new().on_ws(alloy::transports::ws::WsConnect::new(ws_url)),
        )
        .await
        {
            Ok(Ok(p)) => p,
            Ok(Err(err)) => {
                return Err(RpcError::Transport(format!(
                    "WS connection to {ws_url} failed: {}",
                    compact_error(err)
                ))
                .into())
            }
            Err(_) => {
                return Err(RpcError::Timeout {
                    waited_ms: WS_CONNECT_TIMEOUT_MS,
                    context: format!("WS connection to {ws_url}"),
                }
                .into())
            }
        };
        let sub = provider
            .subscribe_blocks()
            .await
            .map_err(|e| RpcError::Transport(format!("subscribe_blocks: {}", compact_error(e))))?;

        tokio::spawn(async move {
            let _keepalive = provider;
            let mut stream = sub.into_stream();
            while let Some(block) = stream.next().await {
                if tx.send(block.number).await.is_err() {
                    return;
                }
            }
            tracing::warn!("[HEADS] WS head subscription ended");
        });
        Ok(())
    }

    fn spawn_poll_feed(&self, poll_interval: Duration, tx: mpsc::Sender<u64>) {
        let provider = self.provider.clone();
        tokio::spawn(async move {
            let mut last = 0u64;
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.is_closed() {
                    return;
                }
                match provider.get_block_number().await {
                    Ok(head) if head > last => {
                        last = head;
                        if tx.send(head).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!("[HEADS] head poll failed: {}", compact_error(err));
                    }
                }
            }
        });
    }
}

#[async_trait]
impl ChainGateway for AlloyGateway {
    async fn chain_id(&self) -> Result<u64> {
        let provider = self.provider.clone();
        Ok(run_with_retry(READ_RETRIES, "eth_chainId", || {
            let p = provider.clone();
            async move { p.get_chain_id().await }
        })
        .await?)
    }

    async fn head_height(&self) -> Result<u64> {
        let provider = self.provider.clone();
        Ok(run_with_retry(READ_RETRIES, "eth_blockNumber", || {
            let p = provider.clone();
            async move { p.get_block_number().await }
        })
        .await?)
    }

    async fn subscribe_heads(&self, poll_interval: Duration) -> Result<mpsc::Receiver<u64>> {
        let (tx, rx) = mpsc::channel(HEAD_CHANNEL_CAPACITY);
        if let Some(ws_url) = self.ws_url.as_deref() {
            match self.spawn_ws_feed(ws_url, tx.clone()).await {
                Ok(()) => return Ok(rx),
                Err(err) => {
                    tracing::warn!(
                        "[HEADS] WS head feed unavailable, falling back to polling every {}ms: {}",
                        poll_interval.as_millis(),
                        err
                    );
                }
            }
        }
        self.spawn_poll_feed(poll_interval, tx);
        Ok(rx)
    }

    async fn nonce_of(&self, account: Address) -> Result<u64> {
        let provider = self.provider.clone();
        Ok(run_with_retry(
            READ_RETRIES,
            &format!("eth_getTransactionCount({account:#x})"),
            || {
                let p = provider.clone();
                async move { p.get_transaction_count(account).await }
            },
        )
        .await?)
    }

    async fn balance_of(&self, account: Address) -> Result<U256> {
        let provider = self.provider.clone();
        Ok(run_with_retry(
            READ_RETRIES,
            &format!("eth_getBalance({account:#x})"),
            || {
                let p = provider.clone();
                async move { p.get_balance(account).await }
            },
        )
        .await?)
    }

    async fn suggest_gas_price(&self) -> Result<u128> {
        let provider = self.provider.clone();
        Ok(run_with_retry(READ_RETRIES, "eth_gasPrice", || {
            let p = provider.clone();
            async move { p.get_gas_price().await }
        })
        .await?)
    }

    async fn suggest_gas_tip_cap(&self) -> Result<u128> {
        let provider = self.provider.clone();
        Ok(run_with_retry(READ_RETRIES, "eth_maxPriorityFeePerGas", || {
            let p = provider.clone();
            async move { p.get_max_priority_fee_per_gas().await }
        })
        .await?)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        let provider = self.provider.clone();
        Ok(run_with_retry(READ_RETRIES, "eth_estimateGas", || {
            let p = provider.clone();
            let req = tx.clone();
            async move { p.estimate_gas(&req).await }
        })
        .await?)
    }

    async fn send_transaction(&self, tx: &TxEnvelope) -> Result<TxHash> {
        let encoded = tx.encoded_2718();
        // Broadcast exactly once; a retried send could race a replacement.
        let pending = self
            .provider
            .send_raw_transaction(&encoded)
            .await
            .map_err(|e| RpcError::Rejected(compact_error(e)))?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<ReceiptSummary>> {
        let receipt = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| RpcError::Transport(format!("eth_getTransactionReceipt: {}", compact_error(e))))?;
        Ok(receipt.and_then(|r| {
            r.block_number().map(|block_number| ReceiptSummary {
                success: r.status(),
                block_number,
            })
        }))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let provider = self.provider.clone();
        Ok(run_with_retry(READ_RETRIES, &format!("eth_call({to:#x})"), || {
            let p = provider.clone();
            let req = TransactionRequest::default()
                .with_to(to)
                .with_input(data.clone());
            async move { p.call(&req).await }
        })
        .await?)
    }

    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>> {
        let provider = self.provider.clone();
        Ok(run_with_retry(READ_RETRIES, "eth_getLogs", || {
            let p = provider.clone();
            let f = filter.clone();
            async move { p.get_logs(&f).await }
        })
        .await?)
    }

    async fn transfers_in_block(&self, block: u64) -> Result<Vec<Transfer>> {
        let provider = self.provider.clone();
        let body = run_with_retry(
            READ_RETRIES,
            &format!("eth_getBlockByNumber({block})"),
            || {
                let p = provider.clone();
                async move {
                    p.get_block_by_number(block.into(), BlockTransactionsKind::Full)
                        .await
                }
            },
        )
        .await?;
        let Some(body) = body else {
            return Err(RpcError::Transport(format!("block {block} not found")).into());
        };
        let Some(txs) = body.transactions.as_transactions() else {
            return Ok(Vec::new());
        };
        Ok(txs
            .iter()
            .filter_map(|tx| {
                tx.to().map(|to| Transfer {
                    hash: *tx.inner.tx_hash(),
                    from: tx.from,
                    to,
                    value: tx.value(),
                })
            })
            .collect())
    }
}
