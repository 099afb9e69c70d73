pub mod cipher;
pub mod contracts;
pub mod identity;

use crate::error::Result;
use alloy::primitives::{Bytes, B256};
use async_trait::async_trait;

pub use cipher::ShutterEncryption;
pub use identity::{IdentityPrefix, IdentityPreimage};

/// Eon index and its broadcast public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EonKey {
    pub eon: u64,
    pub public_key: Bytes,
}

/// Threshold-encryption service. The cipher itself is opaque to the probe.
#[async_trait]
pub trait EncryptionService: Send + Sync {
    /// Eon key that will be active `lookahead` blocks past the current head.
    async fn current_eon(&self, lookahead: u64) -> Result<EonKey>;

    async fn encrypt(
        &self,
        plaintext: &[u8],
        key: &EonKey,
        identity: &IdentityPreimage,
        sigma: B256,
    ) -> Result<Bytes>;
}

/// Fresh encryption randomness for one probe.
pub fn random_sigma() -> B256 {
    B256::from(rand::random::<[u8; 32]>())
}
