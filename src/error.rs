use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("setup error: {0}")]
    Setup(#[from] SetupError),
    #[error("network error: {0}")]
    Net(#[from] RpcError),
    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),
    #[error("analytics error: {0}")]
    Analytics(#[from] AnalyticsError),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("contract call `{call}` failed: {reason}")]
    Call { call: &'static str, reason: String },
    #[error("head feed closed")]
    HeadFeedClosed,
    #[error("{context} timed out after {waited_ms}ms")]
    Timeout { waited_ms: u64, context: String },
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("missing required configuration: {0}")]
    MissingConfig(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("key file `{path}`: {reason}")]
    KeyFile { path: String, reason: String },
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("account funding failed: {0}")]
    Funding(String),
}

#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("no eon key published for eon {0}")]
    MissingEonKey(u64),
    #[error("encryption service unavailable: {0}")]
    Service(String),
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("analytics store unavailable: {0}")]
    Unavailable(String),
    #[error("analytics query `{query}` failed: {reason}")]
    Query { query: &'static str, reason: String },
    #[error("report io failed: {0}")]
    Report(String),
    #[error("empty block range {start}..{end}")]
    EmptyRange { start: u64, end: u64 },
}

impl From<rusqlite::Error> for AnalyticsError {
    fn from(err: rusqlite::Error) -> Self {
        AnalyticsError::Unavailable(err.to_string())
    }
}

impl From<rusqlite::Error> for ProbeError {
    fn from(err: rusqlite::Error) -> Self {
        ProbeError::Analytics(err.into())
    }
}
