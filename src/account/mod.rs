pub mod bootstrap;
pub mod keyfile;

use crate::chain::ChainGateway;
use crate::error::{Result, SetupError};
use crate::utils::hex::clean_hex;
use alloy::consensus::TxEnvelope;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::Address;
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A signing account with an exclusively owned nonce counter.
///
/// Nonces handed out by [`Account::use_nonce`] are strictly increasing. The counter only ever
/// moves backwards through [`Account::release_nonce`], and only for the most recent nonce.
pub struct Account {
    signer: PrivateKeySigner,
    wallet: EthereumWallet,
    address: Address,
    nonce: AtomicU64,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("nonce", &self.current_nonce())
            .finish()
    }
}

impl Account {
    pub fn from_signer(signer: PrivateKeySigner) -> Self {
        let address = signer.address();
        let wallet = EthereumWallet::from(signer.clone());
        Self {
            signer,
            wallet,
            address,
            nonce: AtomicU64::new(0),
        }
    }

    pub fn from_private_key(raw: &str) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(clean_hex(raw))
            .map_err(|e| SetupError::InvalidConfig(format!("invalid private key: {e}")))?;
        Ok(Self::from_signer(signer))
    }

    pub fn generate() -> Self {
        Self::from_signer(PrivateKeySigner::random())
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signer.to_bytes())
    }

    pub fn current_nonce(&self) -> u64 {
        self.nonce.load(Ordering::SeqCst)
    }

    /// Returns the current nonce and advances the counter.
    pub fn use_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::SeqCst)
    }

    /// Gives back `nonce` if it is still the most recently issued one.
    ///
    /// Used when a transaction was signed but never broadcast.
    pub fn release_nonce(&self, nonce: u64) -> bool {
        self.nonce
            .compare_exchange(
                nonce.saturating_add(1),
                nonce,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Moves the counter forward to `chain_nonce`; never lowers it.
    pub fn advance_nonce_to(&self, chain_nonce: u64) -> u64 {
        let prev = self.nonce.fetch_max(chain_nonce, Ordering::SeqCst);
        prev.max(chain_nonce)
    }

    pub async fn sync_nonce(&self, gateway: &dyn ChainGateway) -> Result<u64> {
        let chain_nonce = gateway.nonce_of(self.address).await?;
        let local = self.advance_nonce_to(chain_nonce);
        tracing::debug!(
            "[ACCOUNT] nonce sync {:#x}: chain={} local={}",
            self.address,
            chain_nonce,
            local
        );
        Ok(local)
    }

    pub async fn sign(&self, tx: TransactionRequest) -> Result<TxEnvelope> {
        tx.with_from(self.address)
            .build(&self.wallet)
            .await
            .map_err(|e| SetupError::Signing(e.to_string()).into())
    }
}

/// Fixed set of probe accounts used round-robin.
#[derive(Debug, Clone)]
pub struct AccountPool {
    accounts: Vec<Arc<Account>>,
}

impl AccountPool {
    pub fn new(accounts: Vec<Arc<Account>>) -> Result<Self> {
        if accounts.is_empty() {
            return Err(SetupError::InvalidConfig("account pool is empty".to_string()).into());
        }
        Ok(Self { accounts })
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn accounts(&self) -> &[Arc<Account>] {
        &self.accounts
    }

    pub fn next_account(&self, probe_count: u64) -> Arc<Account> {
        let idx = (probe_count % self.accounts.len() as u64) as usize;
        self.accounts[idx].clone()
    }

    pub async fn sync_nonces(&self, gateway: &dyn ChainGateway) -> Result<()> {
        for account in &self.accounts {
            account.sync_nonce(gateway).await?;
        }
        Ok(())
    }
}
