use factory_common_log::spans::{database_span, record_error};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{error, info, Instrument};

use super::connector::connect;
use super::error::{ConnectError, MissReason, RegistryMissError, StatementError};
use super::options::ConnectionOptions;
use super::pool::PoolHandle;

#[derive(Debug, Clone)]
enum Entry {
    Ready(PoolHandle),
    Failed(String),
}

/// Named database pools
///
/// Each name maps to the outcome of its latest registration. Registering a
/// name again replaces what was there.
#[derive(Debug, Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect `options` and store the outcome under `name`.
    ///
    /// A failed connect is stored too, so later lookups can report why the
    /// name is unusable.
    pub async fn register(
        &self,
        name: impl Into<String>,
        options: &ConnectionOptions,
    ) -> Result<PoolHandle, ConnectError> {
        let name = name.into();
        let span = database_span(&name, "register");
        let outcome = connect(options).instrument(span.clone()).await;
        let _entered = span.enter();

        match outcome {
            Ok(pool) => {
                self.entries
                    .write()
                    .insert(name.clone(), Entry::Ready(pool.clone()));
                info!(database = %name, "Database registered");
                Ok(pool)
            }
            Err(err) => {
                record_error(&err);
                error!(database = %name, error = %err, "Database registration failed");
                self.entries
                    .write()
                    .insert(name, Entry::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    /// Store an already connected pool under `name`.
    pub fn insert(&self, name: impl Into<String>, pool: PoolHandle) {
        self.entries.write().insert(name.into(), Entry::Ready(pool));
    }

    pub fn get(&self, name: &str) -> Option<PoolHandle> {
        match self.entries.read().get(name) {
            Some(Entry::Ready(pool)) => Some(pool.clone()),
            _ => None,
        }
    }

    pub fn try_get(&self, name: &str) -> Result<PoolHandle, RegistryMissError> {
        let reason = match self.entries.read().get(name) {
            Some(Entry::Ready(pool)) => return Ok(pool.clone()),
            Some(Entry::Failed(cause)) => MissReason::Failed(cause.clone()),
            None => MissReason::NotRegistered,
        };
        Err(RegistryMissError {
            name: name.to_string(),
            reason,
        })
    }

    /// Lookup for code where a missing database is a programming error.
    ///
    /// # Panics
    ///
    /// If `name` was never registered or its registration failed. Use
    /// [`Registry::try_get`] where a miss is recoverable.
    #[track_caller]
    pub fn must_get(&self, name: &str) -> PoolHandle {
        match self.try_get(name) {
            Ok(pool) => pool,
            Err(miss) => panic!("{miss}"),
        }
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Forget `name`, returning its pool if it had one. The pool is not closed.
    pub fn remove(&self, name: &str) -> Option<PoolHandle> {
        match self.entries.write().remove(name) {
            Some(Entry::Ready(pool)) => Some(pool),
            _ => None,
        }
    }

    /// Health check every connected pool
    pub async fn health_check_all(&self) -> Vec<(String, Result<(), StatementError>)> {
        let mut results = Vec::new();
        for (name, pool) in self.ready() {
            let result = pool.health_check().await;
            results.push((name, result));
        }
        results
    }

    /// Close every connected pool
    pub async fn close_all(&self) {
        for (_, pool) in self.ready() {
            pool.close().await;
        }
        info!("All database pools closed");
    }

    // Snapshot taken so no lock is held across an await.
    fn ready(&self) -> Vec<(String, PoolHandle)> {
        let mut ready: Vec<_> = self
            .entries
            .read()
            .iter()
            .filter_map(|(name, entry)| match entry {
                Entry::Ready(pool) => Some((name.clone(), pool.clone())),
                Entry::Failed(_) => None,
            })
            .collect();
        ready.sort_by(|a, b| a.0.cmp(&b.0));
        ready
    }
}

lazy_static::lazy_static! {
    /// Process-wide registry.
    pub static ref DATABASES: Registry = Registry::new();
}

/// [`Registry::register`] on [`DATABASES`].
pub async fn register(
    name: impl Into<String>,
    options: &ConnectionOptions,
) -> Result<PoolHandle, ConnectError> {
    DATABASES.register(name, options).await
}

/// [`Registry::get`] on [`DATABASES`].
pub fn get(name: &str) -> Option<PoolHandle> {
    DATABASES.get(name)
}

/// [`Registry::try_get`] on [`DATABASES`].
pub fn try_get(name: &str) -> Result<PoolHandle, RegistryMissError> {
    DATABASES.try_get(name)
}

/// [`Registry::must_get`] on [`DATABASES`].
///
/// # Panics
///
/// As [`Registry::must_get`].
#[track_caller]
pub fn must_get(name: &str) -> PoolHandle {
    DATABASES.must_get(name)
}
