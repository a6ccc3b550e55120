//! Retrying connect.
//!
//! Opens and verifies a pool, sleeping `retry_delay` between failed
//! attempts, for at most `retries + 1` attempts. The whole sequence is
//! bounded by `connect_timeout` when it is non-zero.

use parking_lot::Mutex;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::error::ConnectError;
use super::options::{ConnectionOptions, SynchronousMode};
use super::pool::{DatabasePool, PoolHandle};

/// Resolve `options` into a verified pool.
#[instrument(skip(options), fields(
    dsn = %options.dsn(),
    retries = options.retries(),
    connect_timeout_ms = options.connect_timeout().as_millis() as u64,
))]
pub async fn connect(options: &ConnectionOptions) -> Result<PoolHandle, ConnectError> {
    options.validate()?;
    let connect_options = build_connect_options(options)?;

    let attempts = AtomicU32::new(0);
    let last_error = Mutex::new(None::<String>);
    let attempt_loop = retry_open(options, connect_options, &attempts, &last_error);

    let pool = if options.connect_timeout().is_zero() {
        attempt_loop.await?
    } else {
        match tokio::time::timeout(options.connect_timeout(), attempt_loop).await {
            Ok(result) => result?,
            Err(_) => {
                let err = ConnectError::DeadlineExceeded {
                    attempts: attempts.load(Ordering::SeqCst),
                    timeout: options.connect_timeout(),
                    last_error: last_error.lock().take(),
                };
                warn!(error = %err, "giving up on database");
                return Err(err);
            }
        }
    };

    info!(
        attempts = attempts.load(Ordering::SeqCst),
        max_connections = options.max_connections(),
        "Database pool connected"
    );
    Ok(Arc::new(DatabasePool::new(pool, options.clone())))
}

async fn retry_open(
    options: &ConnectionOptions,
    connect_options: SqliteConnectOptions,
    attempts: &AtomicU32,
    last_error: &Mutex<Option<String>>,
) -> Result<SqlitePool, ConnectError> {
    let max_attempts = options.retries().saturating_add(1);

    loop {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;

        match open(options, connect_options.clone()).await {
            Ok(pool) => return Ok(pool),
            Err(source) if attempt >= max_attempts => {
                warn!(attempt, error = %source, "connect attempts exhausted");
                return Err(ConnectError::Exhausted {
                    attempts: attempt,
                    source,
                });
            }
            Err(error) => {
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = options.retry_delay().as_millis() as u64,
                    %error,
                    "connect attempt failed, retrying"
                );
                *last_error.lock() = Some(error.to_string());
                tokio::time::sleep(options.retry_delay()).await;
            }
        }
    }
}

async fn open(
    options: &ConnectionOptions,
    connect_options: SqliteConnectOptions,
) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .min_connections(options.min_connections())
        .max_connections(options.max_connections())
        .acquire_timeout(options.acquire_timeout())
        .idle_timeout(options.idle_timeout())
        .max_lifetime(options.max_lifetime())
        .connect_with(connect_options)
        .await?;

    if let Err(error) = sqlx::query("SELECT 1").fetch_one(&pool).await {
        pool.close().await;
        return Err(error);
    }

    Ok(pool)
}

fn build_connect_options(options: &ConnectionOptions) -> Result<SqliteConnectOptions, ConnectError> {
    let mut connect_options = SqliteConnectOptions::from_str(options.dsn())
        .map_err(|e| ConnectError::InvalidOptions(e.to_string()))?
        .create_if_missing(options.create_if_missing())
        .busy_timeout(options.busy_timeout());

    if options.wal_mode() {
        connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
    }

    connect_options = match options.synchronous() {
        SynchronousMode::Off => connect_options.synchronous(SqliteSynchronous::Off),
        SynchronousMode::Normal => connect_options.synchronous(SqliteSynchronous::Normal),
        SynchronousMode::Full => connect_options.synchronous(SqliteSynchronous::Full),
        SynchronousMode::Extra => connect_options.synchronous(SqliteSynchronous::Extra),
    };

    Ok(connect_options)
}
