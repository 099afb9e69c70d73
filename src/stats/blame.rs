use crate::chain::ChainGateway;
use crate::error::Result;
use crate::shutter::contracts::withdrawal_credentials;
use crate::shutter::IdentityPrefix;
use crate::stats::analytics::{AnalyticsStore, BlameTarget, DecryptionKeyRow};
use crate::stats::summary::Submission;
use crate::utils::hex::clean_hex;
use alloy::primitives::{Address, Bytes};
use std::fmt;

/// Who was expected to include a failed probe, and what the keypers released for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorBlame {
    pub trigger_block: u64,
    pub submit_block: u64,
    pub sender: Address,
    pub target: Option<BlameTarget>,
    pub withdrawal: Option<Address>,
    pub key: Option<DecryptionKeyRow>,
    /// Slots a key for the trigger's prefix showed up in; only looked up when `key` is empty.
    pub key_seen_in_slots: Vec<u64>,
}

impl ValidatorBlame {
    pub fn new(submission: Submission, sender: Address) -> Self {
        Self {
            trigger_block: submission.trigger,
            submit_block: submission.sequenced,
            sender,
            target: None,
            withdrawal: None,
            key: None,
            key_seen_in_slots: Vec::new(),
        }
    }

    pub fn prefix(&self) -> IdentityPrefix {
        IdentityPrefix::from_block_number(self.trigger_block)
    }

    /// Milliseconds between the target block and the keypers' release.
    pub fn key_delay_ms(&self) -> Option<i64> {
        let target = self.target.as_ref()?;
        let key = self.key.as_ref()?;
        Some(key.created_at_ms - target.timestamp.saturating_mul(1_000))
    }
}

impl fmt::Display for ValidatorBlame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(target) = &self.target else {
            writeln!(f, "triggered\t: {}", self.trigger_block)?;
            writeln!(f, "submitted\t: {}", self.submit_block)?;
            return writeln!(f, "NO SHUTTERIZED BLOCK AFTER SUBMISSION");
        };
        writeln!(f, "validator id\t: {}", target.validator_index)?;
        writeln!(f, "public key\t: {}", target.public_key)?;
        match self.withdrawal {
            Some(addr) => writeln!(f, "withdrawal\t: {:#x}", addr)?,
            None => writeln!(f, "withdrawal\t: unknown")?,
        }
        writeln!(f, "triggered\t: {}", self.trigger_block)?;
        writeln!(f, "submitted\t: {}", self.submit_block)?;
        writeln!(f, "target block\t: {}", target.block_number)?;
        writeln!(f, "target slot\t: {}", target.slot)?;
        writeln!(f, "target ts\t: {}", target.timestamp_utc)?;

        match &self.key {
            None => {
                writeln!(f, "NO DECRYPTION KEY SEEN")?;
                writeln!(f, "identity preimage:")?;
                writeln!(f, "prefix\t{}", hex::encode(self.prefix().0.as_slice()))?;
                writeln!(f, "sender\t{}", hex::encode(self.sender.as_slice()))?;
                if !self.key_seen_in_slots.is_empty() {
                    writeln!(f, "key seen in slots\t: {:?}", self.key_seen_in_slots)?;
                }
                Ok(())
            }
            Some(key) => {
                if let Some(delay) = self.key_delay_ms() {
                    writeln!(f, "ts (key-target)\t: {}ms", delay)?;
                }
                match key.tx_hash {
                    Some(hash) => writeln!(f, "decrypted tx\t: {:#x}", hash)?,
                    None => writeln!(f, "decrypted tx\t: none")?,
                }
                writeln!(f, "decryption key:")?;
                writeln!(f, "first seen\t: {}", key.created_at_utc)?;
                writeln!(f, "tx pointer\t: {}", key.tx_pointer)?;
                writeln!(f, "eon\t: {}", key.eon)?;
                writeln!(f, "identity preimage:")?;
                match key.preimage() {
                    Some(preimage) => {
                        writeln!(f, "prefix\t{}", hex::encode(preimage.prefix().0.as_slice()))?;
                        writeln!(f, "sender\t{}", hex::encode(preimage.sender().as_slice()))
                    }
                    None => writeln!(f, "raw\t{}", hex::encode(&key.identity_preimage)),
                }
            }
        }
    }
}

/// Builds the blame entry for one failed submission.
///
/// A missing deposit contract or a failing credentials call only leaves `withdrawal` empty.
pub async fn blame_submission(
    analytics: &dyn AnalyticsStore,
    gateway: &dyn ChainGateway,
    deposit_contract: Option<Address>,
    sender: Address,
    submission: Submission,
) -> Result<ValidatorBlame> {
    let mut blame = ValidatorBlame::new(submission, sender);
    let Some(target) = analytics.next_shutterized_block_after(submission.sequenced).await? else {
        return Ok(blame);
    };

    if let Some(deposit) = deposit_contract {
        match proposer_withdrawal(gateway, deposit, &target.public_key).await {
            Ok(addr) => blame.withdrawal = Some(addr),
            Err(err) => tracing::warn!(
                "[STATS] withdrawal credentials for validator {} unavailable: {}",
                target.validator_index,
                err
            ),
        }
    }

    blame.key = analytics
        .decryption_keys_for_slot(target.slot)
        .await?
        .into_iter()
        .find(|row| row.matches(sender, submission.trigger));
    if blame.key.is_none() {
        blame.key_seen_in_slots = analytics.slots_for_prefix(blame.prefix()).await?;
    }
    blame.target = Some(target);
    Ok(blame)
}

async fn proposer_withdrawal(
    gateway: &dyn ChainGateway,
    deposit: Address,
    public_key: &str,
) -> Result<Address> {
    let raw = hex::decode(clean_hex(public_key)).map_err(|e| {
        crate::error::AnalyticsError::Report(format!("bad proposer key {public_key}: {e}"))
    })?;
    let credentials = withdrawal_credentials(gateway, deposit, Bytes::from(raw)).await?;
    Ok(Address::from_slice(&credentials[12..]))
}
