//! Read access to the observer's analytics database.
//!
//! The observer indexes blocks, proposer duties, validator status and every decryption key
//! the keypers release. The probe only reads from it: for trigger discovery, shutterized
//! block counts, blame lookups and the observer's own tx status breakdown.

use crate::error::{AnalyticsError, Result};
use crate::shutter::{IdentityPreimage, IdentityPrefix};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use rusqlite::ffi::ErrorCode;
use rusqlite::{params, Connection, OptionalExtension};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ACTIVE_VALIDATOR_STATUS: &str = "active_ongoing";
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%f";

/// Tables mirrored from the observer. Created on open so an empty file is a valid store.
pub const OBSERVER_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS block (
        block_number INTEGER PRIMARY KEY NOT NULL,
        block_hash BLOB,
        slot INTEGER NOT NULL,
        block_timestamp INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_block_slot ON block(slot);

    CREATE TABLE IF NOT EXISTS proposer_duties (
        slot INTEGER PRIMARY KEY NOT NULL,
        validator_index INTEGER NOT NULL,
        public_key TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS validator_status (
        validator_index INTEGER PRIMARY KEY NOT NULL,
        status TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS decryption_keys_message (
        slot INTEGER PRIMARY KEY NOT NULL,
        instance_id INTEGER NOT NULL DEFAULT 0,
        eon INTEGER NOT NULL,
        tx_pointer INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS decryption_key (
        id INTEGER PRIMARY KEY NOT NULL,
        eon INTEGER NOT NULL,
        identity_preimage BLOB NOT NULL,
        key BLOB
    );
    CREATE INDEX IF NOT EXISTS idx_decryption_key_preimage ON decryption_key(identity_preimage);

    CREATE TABLE IF NOT EXISTS decryption_keys_message_decryption_key (
        decryption_keys_message_slot INTEGER NOT NULL,
        key_index INTEGER NOT NULL,
        decryption_key_id INTEGER NOT NULL,
        PRIMARY KEY (decryption_keys_message_slot, key_index)
    );

    CREATE TABLE IF NOT EXISTS decrypted_tx (
        id INTEGER PRIMARY KEY NOT NULL,
        slot INTEGER NOT NULL,
        tx_index INTEGER NOT NULL,
        tx_hash BLOB,
        tx_status TEXT NOT NULL,
        decryption_key_id INTEGER NOT NULL
    );
"#;

/// A slot the keypers released decryption keys for, joined to its block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutterBlock {
    pub block_number: u64,
    pub slot: u64,
    pub timestamp: i64,
    pub key_count: u64,
}

/// The first block proposed by an active validator after a failed probe was sequenced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlameTarget {
    pub block_number: u64,
    pub slot: u64,
    pub validator_index: u64,
    pub timestamp: i64,
    pub timestamp_utc: String,
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionKeyRow {
    pub identity_preimage: Vec<u8>,
    pub tx_pointer: i64,
    pub eon: i64,
    pub created_at_ms: i64,
    pub created_at_utc: String,
    /// Hash the observer recorded for the decrypted tx, when it saw one.
    pub tx_hash: Option<B256>,
}

impl DecryptionKeyRow {
    pub fn preimage(&self) -> Option<IdentityPreimage> {
        IdentityPreimage::from_slice(&self.identity_preimage)
    }

    /// True when this key was released for `sender`'s identity at `trigger`.
    pub fn matches(&self, sender: Address, trigger: u64) -> bool {
        self.preimage()
            .map(|p| p.sender() == sender && p.prefix().block_number() == trigger)
            .unwrap_or(false)
    }
}

/// The observer's classification of decrypted txs sent by one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusRatios {
    pub known: u64,
    pub shielded: u64,
    pub unshielded: u64,
    pub not_included: u64,
    pub pending: u64,
}

impl StatusRatios {
    fn pct(&self, n: u64) -> f64 {
        crate::stats::summary::percent(n, self.known)
    }
}

impl fmt::Display for StatusRatios {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} tx found by observer", self.known)?;
        for (label, n) in [
            ("shielded", self.shielded),
            ("unshielded", self.unshielded),
            ("not included", self.not_included),
            ("still pending", self.pending),
        ] {
            writeln!(f, "{:3.2}% {} ({}/{})", self.pct(n), label, n, self.known)?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    /// Blocks in `[start, end]` proposed by active validators.
    async fn shutterized_blocks(&self, start: u64, end: u64) -> Result<Vec<u64>>;

    async fn next_shutterized_block_after(&self, block: u64) -> Result<Option<BlameTarget>>;

    async fn decryption_keys_for_slot(&self, slot: u64) -> Result<Vec<DecryptionKeyRow>>;

    /// Slots whose keys message carried a key for any identity with `prefix`.
    async fn slots_for_prefix(&self, prefix: IdentityPrefix) -> Result<Vec<u64>>;

    async fn status_ratios(&self, sender: Address, start: u64, end: u64) -> Result<StatusRatios>;

    /// Timestamp of the newest block the keypers released keys for.
    async fn latest_shutter_timestamp(&self) -> Result<Option<i64>>;

    /// Shutter blocks strictly newer than `timestamp`, oldest slot first.
    async fn shutter_blocks_since(&self, timestamp: i64) -> Result<Vec<ShutterBlock>>;
}

/// SQLite-backed store. Every query opens its own connection on the blocking pool, so a
/// locked database never stalls the runtime workers that drive watchers and the head feed.
pub struct SqliteAnalyticsStore {
    path: PathBuf,
}

impl SqliteAnalyticsStore {
    /// Opens the store and creates missing tables. Blocking; runs once during setup.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        run_query(&path, "ensure_schema", |conn| conn.execute_batch(OBSERVER_SCHEMA))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_connection<T, F>(&self, query: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || run_query(&path, query, op))
            .await
            .map_err(|err| AnalyticsError::Unavailable(format!("{query} task: {err}")))?
    }
}

fn run_query<T, F>(path: &Path, query: &'static str, op: F) -> Result<T>
where
    F: Fn(&Connection) -> rusqlite::Result<T>,
{
    let max_attempts = 4u32;
    let mut last_err = String::new();
    for attempt in 1..=max_attempts {
        let conn = Connection::open(path).map_err(|err| {
            AnalyticsError::Unavailable(format!("{}: {}", path.display(), err))
        })?;
        conn.busy_timeout(Duration::from_millis(2_000))?;
        match op(&conn) {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_err = err.to_string();
                if is_sqlite_locked_error(&err) && attempt < max_attempts {
                    continue;
                }
                break;
            }
        }
    }
    Err(AnalyticsError::Query {
        query,
        reason: last_err,
    }
    .into())
}

fn is_sqlite_locked_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => matches!(
            code.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

fn as_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn as_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl AnalyticsStore for SqliteAnalyticsStore {
    async fn shutterized_blocks(&self, start: u64, end: u64) -> Result<Vec<u64>> {
        self.with_connection("shutterized_blocks", move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT b.block_number
                FROM block AS b
                    LEFT JOIN proposer_duties AS p ON p.slot = b.slot
                    LEFT JOIN validator_status AS s ON s.validator_index = p.validator_index
                WHERE b.block_number >= ?1
                  AND b.block_number <= ?2
                  AND s.status = ?3
                ORDER BY b.block_number ASC
                "#,
            )?;
            let rows = stmt.query_map(
                params![as_i64(start), as_i64(end), ACTIVE_VALIDATOR_STATUS],
                |row| row.get::<_, i64>(0),
            )?;
            rows.map(|r| r.map(as_u64)).collect()
        })
        .await
    }

    async fn next_shutterized_block_after(&self, block: u64) -> Result<Option<BlameTarget>> {
        self.with_connection("next_shutterized_block_after", move |conn| {
            conn.query_row(
                r#"
                SELECT b.block_number,
                       b.slot,
                       v.validator_index,
                       b.block_timestamp,
                       strftime(?3, b.block_timestamp, 'unixepoch'),
                       p.public_key
                FROM block AS b
                    LEFT JOIN proposer_duties AS p ON p.slot = b.slot
                    LEFT JOIN validator_status AS v ON v.validator_index = p.validator_index
                WHERE v.status = ?2
                  AND b.block_number > ?1
                ORDER BY b.block_number ASC
                LIMIT 1
                "#,
                params![as_i64(block), ACTIVE_VALIDATOR_STATUS, TS_FORMAT],
                |row| {
                    Ok(BlameTarget {
                        block_number: as_u64(row.get(0)?),
                        slot: as_u64(row.get(1)?),
                        validator_index: as_u64(row.get(2)?),
                        timestamp: row.get(3)?,
                        timestamp_utc: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                        public_key: row.get(5)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn decryption_keys_for_slot(&self, slot: u64) -> Result<Vec<DecryptionKeyRow>> {
        self.with_connection("decryption_keys_for_slot", move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT k.identity_preimage,
                       d.tx_pointer,
                       d.eon,
                       d.created_at,
                       strftime(?2, d.created_at / 1000.0, 'unixepoch'),
                       t.tx_hash
                FROM decryption_keys_message_decryption_key AS dkmdk
                    LEFT JOIN decryption_key AS k ON dkmdk.decryption_key_id = k.id
                    LEFT JOIN decryption_keys_message AS d
                        ON d.slot = dkmdk.decryption_keys_message_slot
                    LEFT JOIN decrypted_tx AS t ON t.decryption_key_id = k.id
                WHERE dkmdk.decryption_keys_message_slot = ?1
                ORDER BY dkmdk.key_index ASC
                "#,
            )?;
            let rows = stmt.query_map(params![as_i64(slot), TS_FORMAT], |row| {
                let tx_hash: Option<Vec<u8>> = row.get(5)?;
                Ok(DecryptionKeyRow {
                    identity_preimage: row.get::<_, Option<Vec<u8>>>(0)?.unwrap_or_default(),
                    tx_pointer: row.get::<_, Option<i64>>(1)?.unwrap_or_default(),
                    eon: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
                    created_at_ms: row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
                    created_at_utc: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    tx_hash: tx_hash
                        .filter(|raw| raw.len() == 32)
                        .map(|raw| B256::from_slice(&raw)),
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn slots_for_prefix(&self, prefix: IdentityPrefix) -> Result<Vec<u64>> {
        self.with_connection("slots_for_prefix", move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT DISTINCT dkmdk.decryption_keys_message_slot
                FROM decryption_key AS k
                    JOIN decryption_keys_message_decryption_key AS dkmdk
                        ON k.id = dkmdk.decryption_key_id
                WHERE substr(k.identity_preimage, 1, 32) = ?1
                ORDER BY dkmdk.decryption_keys_message_slot ASC
                "#,
            )?;
            let rows = stmt.query_map(params![prefix.0.as_slice()], |row| row.get::<_, i64>(0))?;
            rows.map(|r| r.map(as_u64)).collect()
        })
        .await
    }

    async fn status_ratios(&self, sender: Address, start: u64, end: u64) -> Result<StatusRatios> {
        let sender_hex = hex::encode(sender.as_slice());
        self.with_connection("status_ratios", move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT dt.tx_status, COUNT(*)
                FROM decryption_key AS dk
                    JOIN decrypted_tx AS dt ON dt.decryption_key_id = dk.id
                    JOIN block AS b ON b.slot = dt.slot
                WHERE lower(substr(hex(dk.identity_preimage), 65)) = ?1
                  AND b.block_number BETWEEN ?2 AND ?3
                GROUP BY dt.tx_status
                "#,
            )?;
            let rows = stmt.query_map(
                params![sender_hex, as_i64(start), as_i64(end)],
                |row| Ok((row.get::<_, String>(0)?, as_u64(row.get(1)?))),
            )?;
            let mut ratios = StatusRatios::default();
            for row in rows {
                let (status, count) = row?;
                ratios.known += count;
                match status.as_str() {
                    "shielded inclusion" => ratios.shielded += count,
                    "unshielded inclusion" => ratios.unshielded += count,
                    "not included" => ratios.not_included += count,
                    "pending" => ratios.pending += count,
                    _ => {}
                }
            }
            Ok(ratios)
        })
        .await
    }

    async fn latest_shutter_timestamp(&self) -> Result<Option<i64>> {
        self.with_connection("latest_shutter_timestamp", move |conn| {
            conn.query_row(
                r#"
                SELECT max(b.block_timestamp)
                FROM decryption_keys_message_decryption_key AS d
                    JOIN block AS b ON d.decryption_keys_message_slot = b.slot
                "#,
                [],
                |row| row.get::<_, Option<i64>>(0),
            )
        })
        .await
    }

    async fn shutter_blocks_since(&self, timestamp: i64) -> Result<Vec<ShutterBlock>> {
        self.with_connection("shutter_blocks_since", move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT b.block_number,
                       d.decryption_keys_message_slot,
                       max(b.block_timestamp),
                       COUNT(*)
                FROM decryption_keys_message_decryption_key AS d
                    JOIN block AS b ON d.decryption_keys_message_slot = b.slot
                WHERE b.block_timestamp > ?1
                GROUP BY d.decryption_keys_message_slot, b.block_number
                ORDER BY d.decryption_keys_message_slot ASC
                "#,
            )?;
            let rows = stmt.query_map(params![timestamp], |row| {
                Ok(ShutterBlock {
                    block_number: as_u64(row.get(0)?),
                    slot: as_u64(row.get(1)?),
                    timestamp: row.get(2)?,
                    key_count: as_u64(row.get(3)?),
                })
            })?;
            rows.collect()
        })
        .await
    }
}
