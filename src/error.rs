use thiserror::Error;

/// Crate-wide error type.
///
/// Connection-class database errors are detected separately in `db` and
/// retried there; everything that reaches a task loop through this type is
/// considered fatal for that task.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("base58 decode error: {0}")]
    Base58(#[from] bs58::decode::Error),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        IndexerError::Invariant(msg.into())
    }
}

impl From<config::ConfigError> for IndexerError {
    fn from(e: config::ConfigError) -> Self {
        IndexerError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IndexerError>;
