use crate::account::bootstrap::TRANSFER_GAS_LIMIT;
use crate::account::{Account, AccountPool};
use crate::chain::{ChainGateway, GasPolicy, GasQuote};
use crate::error::Result;
use crate::probe::{LifecycleLedger, ProbeTransactions, ProbeWatcher, TrackedProbe};
use crate::shutter::contracts::submit_encrypted_transaction_calldata;
use crate::shutter::{random_sigma, EncryptionService, EonKey, IdentityPrefix};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, U256};
use alloy::rpc::types::TransactionRequest;
use std::sync::Arc;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone, Copy)]
pub struct SubmitSettings {
    pub chain_id: u64,
    pub sequencer: Address,
    pub keyper_set_lookahead: u64,
}

/// Builds, encrypts and submits probes, then hands each one to its own watcher task.
pub struct ProbeSubmitter {
    gateway: Arc<dyn ChainGateway>,
    encryption: Arc<dyn EncryptionService>,
    accounts: AccountPool,
    submit_account: Arc<Account>,
    ledger: Arc<LifecycleLedger>,
    watcher: ProbeWatcher,
    tracker: TaskTracker,
    settings: SubmitSettings,
}

struct Quotes {
    eon: EonKey,
    inner_gas: GasQuote,
    outer_gas: GasQuote,
}

impl ProbeSubmitter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        encryption: Arc<dyn EncryptionService>,
        accounts: AccountPool,
        submit_account: Arc<Account>,
        ledger: Arc<LifecycleLedger>,
        watcher: ProbeWatcher,
        tracker: TaskTracker,
        settings: SubmitSettings,
    ) -> Self {
        Self {
            gateway,
            encryption,
            accounts,
            submit_account,
            ledger,
            watcher,
            tracker,
            settings,
        }
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Submits one probe for `trigger_block`.
    ///
    /// Any failure aborts before the probe is registered, and the nonces reserved for it are
    /// handed back.
    pub async fn submit(&self, trigger_block: u64) -> Result<Arc<TrackedProbe>> {
        let account = self.accounts.next_account(self.ledger.probe_count());
        tracing::info!(
            "[SUBMIT] new probe for trigger {} from {:#x}",
            trigger_block,
            account.address()
        );

        let quotes = Quotes {
            inner_gas: GasPolicy::Min1Gwei.resolve(self.gateway.as_ref()).await?,
            eon: self
                .encryption
                .current_eon(self.settings.keyper_set_lookahead)
                .await?,
            outer_gas: GasPolicy::HighPriority.resolve(self.gateway.as_ref()).await?,
        };

        let inner_nonce = account.use_nonce();
        let outer_nonce = self.submit_account.use_nonce();
        let txs = match self
            .build_and_send(&account, trigger_block, inner_nonce, outer_nonce, &quotes)
            .await
        {
            Ok(txs) => txs,
            Err(err) => {
                let outer_released = self.submit_account.release_nonce(outer_nonce);
                let inner_released = account.release_nonce(inner_nonce);
                tracing::warn!(
                    "[SUBMIT] probe for trigger {} aborted (released outer nonce: {}, inner nonce: {}): {}",
                    trigger_block,
                    outer_released,
                    inner_released,
                    err
                );
                return Err(err);
            }
        };

        let probe = Arc::new(TrackedProbe::new(
            trigger_block,
            self.submit_account.address(),
            account,
            txs,
        ));
        self.ledger.register(probe.clone());
        self.tracker.spawn(self.watcher.clone().run(probe.clone()));
        tracing::info!(
            "[SUBMIT] probe registered trigger={} eon={} outer={:#x} (nonce {}) inner={:#x} (nonce {})",
            trigger_block,
            quotes.eon.eon,
            txs.outer_hash,
            txs.outer_nonce,
            txs.inner_hash,
            txs.inner_nonce
        );
        Ok(probe)
    }

    async fn build_and_send(
        &self,
        account: &Account,
        trigger_block: u64,
        inner_nonce: u64,
        outer_nonce: u64,
        quotes: &Quotes,
    ) -> Result<ProbeTransactions> {
        let submit_address = self.submit_account.address();
        let inner_request = TransactionRequest::default()
            .with_to(submit_address)
            .with_value(U256::from(trigger_block))
            .with_chain_id(self.settings.chain_id)
            .with_nonce(inner_nonce)
            .with_gas_limit(TRANSFER_GAS_LIMIT)
            .with_max_fee_per_gas(quotes.inner_gas.max_fee_per_gas)
            .with_max_priority_fee_per_gas(quotes.inner_gas.max_priority_fee_per_gas);
        let inner = account.sign(inner_request).await?;
        let inner_hash = *inner.tx_hash();

        let prefix = IdentityPrefix::from_block_number(trigger_block);
        let identity = prefix.identity(submit_address);
        let ciphertext = self
            .encryption
            .encrypt(&inner.encoded_2718(), &quotes.eon, &identity, random_sigma())
            .await?;

        // The sequencer charges the inner tx's gas budget up front.
        let gas_budget = U256::from(TRANSFER_GAS_LIMIT)
            .saturating_mul(U256::from(quotes.inner_gas.max_fee_per_gas));
        let calldata = submit_encrypted_transaction_calldata(
            quotes.eon.eon,
            prefix,
            ciphertext,
            TRANSFER_GAS_LIMIT,
        );
        let mut outer_request = TransactionRequest::default()
            .with_from(submit_address)
            .with_to(self.settings.sequencer)
            .with_input(calldata)
            .with_value(gas_budget)
            .with_chain_id(self.settings.chain_id)
            .with_nonce(outer_nonce)
            .with_max_fee_per_gas(quotes.outer_gas.max_fee_per_gas)
            .with_max_priority_fee_per_gas(quotes.outer_gas.max_priority_fee_per_gas);
        let outer_gas_limit = self.gateway.estimate_gas(&outer_request).await?;
        outer_request.set_gas_limit(outer_gas_limit);
        let outer = self.submit_account.sign(outer_request).await?;

        let outer_hash = self.gateway.send_transaction(&outer).await?;

        Ok(ProbeTransactions {
            inner_hash,
            inner_nonce,
            outer_hash,
            outer_nonce,
        })
    }
}
