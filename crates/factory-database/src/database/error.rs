use std::time::Duration;
use thiserror::Error;

/// Why a [`QueryContext`](crate::QueryContext) is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Failure to establish a verified pool.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Invalid connection options: {0}")]
    InvalidOptions(String),

    #[error("Failed to connect after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error(
        "Connect deadline of {timeout:?} exceeded after {attempts} attempt(s){}",
        last_error.as_deref().map(|e| format!(", last error: {e}")).unwrap_or_default()
    )]
    DeadlineExceeded {
        attempts: u32,
        timeout: Duration,
        last_error: Option<String>,
    },
}

impl ConnectError {
    /// Number of connect attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::InvalidOptions(_) => 0,
            Self::Exhausted { attempts, .. } | Self::DeadlineExceeded { attempts, .. } => *attempts,
        }
    }
}

/// Why a registry lookup missed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    /// Nothing was ever registered under the name.
    NotRegistered,
    /// Registration was attempted and failed with this message.
    Failed(String),
}

/// Lookup of a name with no usable pool behind it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", match reason {
    MissReason::NotRegistered => format!("database {name:?} is not registered"),
    MissReason::Failed(cause) => format!("database {name:?} failed to register: {cause}"),
})]
pub struct RegistryMissError {
    pub name: String,
    pub reason: MissReason,
}

/// Failure of a single `exec`/`query` call.
///
/// Driver errors are carried unmodified so callers can inspect them.
#[derive(Debug, Error)]
pub enum StatementError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Statement canceled: context canceled")]
    Canceled,

    #[error("Statement canceled: context deadline exceeded")]
    DeadlineExceeded,
}

// SQLite primary result codes for lock contention.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

impl StatementError {
    /// True for lock-wait, busy and deadlock class errors, which a caller
    /// may resolve by re-running the whole transaction.
    pub fn is_conflict(&self) -> bool {
        let Self::Database(sqlx::Error::Database(db)) = self else {
            return false;
        };

        if let Some(code) = db.code().and_then(|c| c.parse::<i32>().ok()) {
            // extended codes carry the primary code in the low byte
            if matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED) {
                return true;
            }
        }

        let message = db.message().to_lowercase();
        message.contains("deadlock") || message.contains("database is locked")
    }

    /// True when the bound context ended the statement.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }
}

impl From<ContextError> for StatementError {
    fn from(error: ContextError) -> Self {
        match error {
            ContextError::Canceled => Self::Canceled,
            ContextError::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// Outcome of a failed transaction run.
///
/// `Work` carries the unit of work's own error untouched.
#[derive(Debug, Error)]
pub enum TransactionError<E> {
    #[error("Failed to begin transaction: {0}")]
    Begin(#[source] StatementError),

    #[error(transparent)]
    Work(E),

    #[error("Rollback failed ({rollback}) after: {work}")]
    Rollback {
        #[source]
        work: E,
        rollback: StatementError,
    },

    #[error("Failed to commit transaction: {0}")]
    Commit(#[source] StatementError),
}

impl<E> TransactionError<E> {
    /// The unit of work's error, if the work failed.
    pub fn work_error(&self) -> Option<&E> {
        match self {
            Self::Work(work) | Self::Rollback { work, .. } => Some(work),
            _ => None,
        }
    }

    /// Consume into the unit of work's error, if the work failed.
    pub fn into_work_error(self) -> Option<E> {
        match self {
            Self::Work(work) | Self::Rollback { work, .. } => Some(work),
            _ => None,
        }
    }
}

impl<E> TransactionError<E>
where
    E: std::error::Error + 'static,
{
    /// True if any statement error in the chain is a lock conflict.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Begin(err) | Self::Commit(err) => err.is_conflict(),
            Self::Work(work) | Self::Rollback { work, .. } => chain_has_conflict(work),
        }
    }
}

fn chain_has_conflict(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if let Some(statement) = err.downcast_ref::<StatementError>() {
            if statement.is_conflict() {
                return true;
            }
        }
        current = err.source();
    }
    false
}

/// Internal profiler failures. Logged, never returned from a statement.
#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("Failed to write profile: {0}")]
    Write(#[from] std::io::Error),
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: std::path::PathBuf },

    #[error("failed to read config: {source}")]
    Read {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid YAML at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    Parse { line: Option<usize>, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("environment variable not found: {var}")]
    EnvVarNotFound { var: String },
}

/// Umbrella error for application code that mixes the operations above.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Registry(#[from] RegistryMissError),

    #[error(transparent)]
    Statement(#[from] StatementError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
