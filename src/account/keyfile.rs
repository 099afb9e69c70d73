//! Append-only private key file for probe accounts.
//!
//! Each line holds `hex(private key) hex(address)`. Only 64-hex-character tokens are read
//! back as keys, so the address column is ignored on load.

use crate::account::Account;
use crate::error::{Result, SetupError};
use crate::utils::hex::is_private_key_token;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

fn key_file_error(path: &Path, reason: impl std::fmt::Display) -> SetupError {
    SetupError::KeyFile {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

pub fn read_private_keys(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| key_file_error(path, e))?;
    Ok(content
        .split_whitespace()
        .filter(|token| is_private_key_token(token))
        .map(str::to_string)
        .collect())
}

pub fn append_accounts(path: &Path, accounts: &[&Account]) -> Result<()> {
    if accounts.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| key_file_error(path, e))?;
    for account in accounts {
        writeln!(file, "{} {:#x}", account.private_key_hex(), account.address())
            .map_err(|e| key_file_error(path, e))?;
    }
    file.sync_all().map_err(|e| key_file_error(path, e))?;
    Ok(())
}

/// Loads up to `count` accounts from the key file, generating and appending the rest.
pub fn load_or_create_accounts(path: &Path, count: usize) -> Result<Vec<Account>> {
    let keys = read_private_keys(path)?;
    let mut accounts = Vec::with_capacity(count);
    for key in keys.iter().take(count) {
        accounts.push(Account::from_private_key(key)?);
    }
    let existing = accounts.len();
    while accounts.len() < count {
        accounts.push(Account::generate());
    }
    let generated: Vec<&Account> = accounts[existing..].iter().collect();
    append_accounts(path, &generated)?;
    if !generated.is_empty() {
        tracing::info!(
            "[SETUP] generated {} probe account(s), appended to {}",
            generated.len(),
            path.display()
        );
    }
    Ok(accounts)
}
