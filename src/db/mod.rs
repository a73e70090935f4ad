/// MySQL store for the derived dataset.
///
/// One pool shared by every task. Statements run through parameterized
/// queries or `QueryBuilder` bulk inserts; every public operation retries
/// connection-class errors under a bounded budget, everything else surfaces
/// to the owning task.
pub mod addr;
pub mod block;
pub mod counter;
pub mod gas;
pub mod nep5;
pub mod tx;

use std::future::Future;
use std::time::Duration;

use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use tracing::warn;

use crate::config;
use crate::error::{IndexerError, Result};

/// Attempts per operation when the connection keeps failing.
const CONN_RETRY_BUDGET: u32 = 8;
const RECONNECT_PAUSE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Store {
    pool: MySqlPool,
}

impl Store {
    /// Connects to the configured database.
    pub async fn connect() -> Result<Store> {
        let pool = MySqlPoolOptions::new()
            .max_connections(20)
            .connect(&config::db_conn_str())
            .await?;
        Ok(Store { pool })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

/// Recognizes errors worth a reconnect-and-retry: transport failures, pool
/// exhaustion, and the server-side shutdown/read-only conditions the
/// original deployment kept running through.
pub fn is_conn_err(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db) => {
            let msg = db.message();
            msg.ends_with("operation timed out")
                || msg.ends_with("Server shutdown in progress")
                || msg.starts_with("Error 1290")
                || db.code().as_deref() == Some("1290")
        }
        other => {
            let msg = other.to_string();
            msg.ends_with("operation timed out") || msg.ends_with("Server shutdown in progress")
        }
    }
}

/// Runs `op` until it succeeds or fails with a non-connection error; up to
/// [`CONN_RETRY_BUDGET`] connection errors are absorbed with a pause in
/// between.
pub async fn retry_on_conn_err<T, F, Fut>(op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(IndexerError::Db(ref e)) if is_conn_err(e) && attempts < CONN_RETRY_BUDGET => {
                attempts += 1;
                warn!(
                    attempts,
                    error = %e,
                    "database connection error, waiting before retry"
                );
                tokio::time::sleep(RECONNECT_PAUSE).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_conn_err_classification() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(is_conn_err(&io));
        assert!(is_conn_err(&sqlx::Error::PoolTimedOut));
        assert!(is_conn_err(&sqlx::Error::PoolClosed));
        assert!(!is_conn_err(&sqlx::Error::RowNotFound));
    }

    #[tokio::test]
    async fn test_retry_passes_through_non_conn_errors() {
        let result: Result<()> = retry_on_conn_err(|| async {
            Err(IndexerError::invariant("boom"))
        })
        .await;
        assert!(matches!(result, Err(IndexerError::Invariant(_))));
    }

    #[tokio::test]
    async fn test_retry_returns_success() {
        let result = retry_on_conn_err(|| async { Ok(42) }).await.unwrap();
        assert_eq!(result, 42);
    }
}
