use sqlx::sqlite::SqlitePool;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

use super::context::QueryContext;
use super::error::StatementError;
use super::handle::ScopedHandle;
use super::options::ConnectionOptions;
use super::profiler::{Profiler, ProfilerContext};

/// Shared reference to a connected pool.
pub type PoolHandle = Arc<DatabasePool>;

/// A verified connection pool plus the options and default profiler it was
/// created with.
pub struct DatabasePool {
    pool: SqlitePool,
    options: ConnectionOptions,
    profiler: Option<Arc<dyn Profiler>>,
}

impl DatabasePool {
    pub(crate) fn new(pool: SqlitePool, options: ConnectionOptions) -> Self {
        let profiler = options.profiler().build();
        Self {
            pool,
            options,
            profiler,
        }
    }

    /// Handle bound to a background context and the default profiler.
    pub fn handle(self: &Arc<Self>) -> ScopedHandle {
        ScopedHandle::new(self.clone(), QueryContext::background(), self.profiler.clone())
    }

    /// Handle bound to `ctx` and the default profiler.
    pub fn with_context(self: &Arc<Self>, ctx: QueryContext) -> ScopedHandle {
        self.handle().with_context(ctx)
    }

    /// Get a reference to the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Profiler selected by the options, if any.
    pub fn profiler(&self) -> Option<&Arc<dyn Profiler>> {
        self.profiler.as_ref()
    }

    /// Flush the default profiler, returning what it had buffered.
    pub fn flush_profiler(&self) -> Vec<ProfilerContext> {
        self.profiler
            .as_ref()
            .map(|profiler| profiler.flush())
            .unwrap_or_default()
    }

    /// Perform health check
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), StatementError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max_connections: self.options.max_connections(),
        }
    }

    /// Close the pool gracefully
    #[instrument(skip(self))]
    pub async fn close(&self) {
        info!("Closing database pool");
        self.pool.close().await;
    }

    /// Check if pool is closed
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

impl fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabasePool")
            .field("options", &self.options)
            .field("profiler", &self.profiler)
            .field("stats", &self.stats())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
    pub max_connections: u32,
}

impl PoolStats {
    pub fn in_use(&self) -> usize {
        (self.size as usize).saturating_sub(self.idle)
    }

    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            return 0.0;
        }
        self.in_use() as f64 / self.max_connections as f64
    }
}
