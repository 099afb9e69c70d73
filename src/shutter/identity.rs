use alloy::primitives::{Address, B256};
use std::fmt;

pub const IDENTITY_PREFIX_LEN: usize = 32;
pub const IDENTITY_PREIMAGE_LEN: usize = IDENTITY_PREFIX_LEN + 20;

/// 32-byte identity prefix whose first 8 bytes carry the trigger block, little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityPrefix(pub B256);

impl IdentityPrefix {
    pub fn from_block_number(block: u64) -> Self {
        let mut raw = [0u8; IDENTITY_PREFIX_LEN];
        raw[..8].copy_from_slice(&block.to_le_bytes());
        Self(B256::from(raw))
    }

    pub fn block_number(&self) -> u64 {
        let mut le = [0u8; 8];
        le.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(le)
    }

    /// Identity the keypers release a key for: prefix followed by the submitting address.
    pub fn identity(&self, sender: Address) -> IdentityPreimage {
        let mut raw = [0u8; IDENTITY_PREIMAGE_LEN];
        raw[..IDENTITY_PREFIX_LEN].copy_from_slice(self.0.as_slice());
        raw[IDENTITY_PREFIX_LEN..].copy_from_slice(sender.as_slice());
        IdentityPreimage(raw)
    }
}

impl From<B256> for IdentityPrefix {
    fn from(raw: B256) -> Self {
        Self(raw)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentityPreimage([u8; IDENTITY_PREIMAGE_LEN]);

impl IdentityPreimage {
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        let fixed: [u8; IDENTITY_PREIMAGE_LEN] = raw.try_into().ok()?;
        Some(Self(fixed))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn prefix(&self) -> IdentityPrefix {
        IdentityPrefix(B256::from_slice(&self.0[..IDENTITY_PREFIX_LEN]))
    }

    pub fn sender(&self) -> Address {
        Address::from_slice(&self.0[IDENTITY_PREFIX_LEN..])
    }
}

impl fmt::Debug for IdentityPreimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPreimage(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for IdentityPreimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}
