use alloy::primitives::{Address, U256};
use std::str::FromStr;

/// Clean a hex string by removing "0x" prefix and whitespace
pub fn clean_hex(s: &str) -> &str {
    let s = s.trim();
    if let Some(stripped) = s.strip_prefix("0x") {
        stripped
    } else {
        s
    }
}

/// True when `s` is exactly one 32-byte secret written as 64 hex characters.
pub fn is_private_key_token(s: &str) -> bool {
    let cleaned = clean_hex(s);
    cleaned.len() == 64 && cleaned.bytes().all(|b| b.is_ascii_hexdigit())
}

pub fn parse_address(name: &str, raw: &str) -> Option<Address> {
    let trimmed = raw.trim();
    match Address::from_str(trimmed) {
        Ok(addr) => Some(addr),
        Err(err) => {
            tracing::warn!("[ENV] {} is not a valid address `{}`: {}", name, trimmed, err);
            None
        }
    }
}

/// Parse a decimal or 0x-prefixed wei amount.
pub fn to_u256(s: &str) -> Option<U256> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(hex) = s.strip_prefix("0x") {
        return U256::from_str_radix(hex, 16).ok();
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return U256::from_str_radix(s, 10).ok();
    }
    None
}
