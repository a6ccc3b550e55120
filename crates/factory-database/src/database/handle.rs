//! Per-request handles onto a shared pool.

use factory_common_log::spans::{statement_span, Timer};
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{FromRow, Sqlite};
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

use super::context::QueryContext;
use super::error::StatementError;
use super::pool::PoolHandle;
use super::profiler::{Profiler, ProfilerContext};
use super::value::{bind_values, Value};

/// A pool bound to one request's context and profiler.
///
/// Cheap to clone. Configuring a handle returns a new one and never touches
/// the pool or the handle it came from.
#[derive(Clone)]
pub struct ScopedHandle {
    pool: PoolHandle,
    ctx: QueryContext,
    profiler: Option<Arc<dyn Profiler>>,
}

impl ScopedHandle {
    pub(crate) fn new(
        pool: PoolHandle,
        ctx: QueryContext,
        profiler: Option<Arc<dyn Profiler>>,
    ) -> Self {
        Self { pool, ctx, profiler }
    }

    pub fn with_context(&self, ctx: QueryContext) -> Self {
        Self {
            ctx,
            ..self.clone()
        }
    }

    pub fn with_profiler(&self, profiler: Arc<dyn Profiler>) -> Self {
        Self {
            profiler: Some(profiler),
            ..self.clone()
        }
    }

    pub fn without_profiler(&self) -> Self {
        Self {
            profiler: None,
            ..self.clone()
        }
    }

    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }

    pub fn context(&self) -> &QueryContext {
        &self.ctx
    }

    pub fn profiler(&self) -> Option<&Arc<dyn Profiler>> {
        self.profiler.as_ref()
    }

    /// Execute a statement that returns no rows.
    #[track_caller]
    pub fn exec<'a>(
        &'a self,
        sql: &'a str,
        args: &'a [Value],
    ) -> impl Future<Output = Result<SqliteQueryResult, StatementError>> + Send + 'a {
        let caller = Location::caller();
        let query = bind_values!(sqlx::query::<Sqlite>(sql), args);
        let pool = self.pool.pool();
        let statement = async move {
            let mut tx = pool.begin().await?;
            let done = query.execute(&mut *tx).await?;
            Ok::<_, sqlx::Error>((tx, done))
        };
        self.autocommit(sql, args, caller, statement)
    }

    /// Fetch every row.
    #[track_caller]
    pub fn query<'a>(
        &'a self,
        sql: &'a str,
        args: &'a [Value],
    ) -> impl Future<Output = Result<Vec<SqliteRow>, StatementError>> + Send + 'a {
        let caller = Location::caller();
        let query = bind_values!(sqlx::query::<Sqlite>(sql), args);
        let pool = self.pool.pool();
        let statement = async move {
            let mut tx = pool.begin().await?;
            let rows = query.fetch_all(&mut *tx).await?;
            Ok::<_, sqlx::Error>((tx, rows))
        };
        self.autocommit(sql, args, caller, statement)
    }

    /// Fetch exactly one row; no row is `RowNotFound`.
    #[track_caller]
    pub fn query_row<'a>(
        &'a self,
        sql: &'a str,
        args: &'a [Value],
    ) -> impl Future<Output = Result<SqliteRow, StatementError>> + Send + 'a {
        let caller = Location::caller();
        let query = bind_values!(sqlx::query::<Sqlite>(sql), args);
        let pool = self.pool.pool();
        let statement = async move {
            let mut tx = pool.begin().await?;
            let row = query.fetch_one(&mut *tx).await?;
            Ok::<_, sqlx::Error>((tx, row))
        };
        self.autocommit(sql, args, caller, statement)
    }

    /// Fetch every row mapped into `T`.
    #[track_caller]
    pub fn select<'a, T>(
        &'a self,
        sql: &'a str,
        args: &'a [Value],
    ) -> impl Future<Output = Result<Vec<T>, StatementError>> + Send + 'a
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin + 'a,
    {
        let caller = Location::caller();
        let query = bind_values!(sqlx::query_as::<Sqlite, T>(sql), args);
        let pool = self.pool.pool();
        let statement = async move {
            let mut tx = pool.begin().await?;
            let rows = query.fetch_all(&mut *tx).await?;
            Ok::<_, sqlx::Error>((tx, rows))
        };
        self.autocommit(sql, args, caller, statement)
    }

    /// Fetch at most one row mapped into `T`.
    #[track_caller]
    pub fn get<'a, T>(
        &'a self,
        sql: &'a str,
        args: &'a [Value],
    ) -> impl Future<Output = Result<Option<T>, StatementError>> + Send + 'a
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin + 'a,
    {
        let caller = Location::caller();
        let query = bind_values!(sqlx::query_as::<Sqlite, T>(sql), args);
        let pool = self.pool.pool();
        let statement = async move {
            let mut tx = pool.begin().await?;
            let row = query.fetch_optional(&mut *tx).await?;
            Ok::<_, sqlx::Error>((tx, row))
        };
        self.autocommit(sql, args, caller, statement)
    }

    fn autocommit<'a, T, F>(
        &'a self,
        sql: &'a str,
        args: &'a [Value],
        caller: &'static Location<'static>,
        statement: F,
    ) -> impl Future<Output = Result<T, StatementError>> + Send + 'a
    where
        T: Send + 'a,
        F: Future<Output = Result<(ImplicitTx, T), sqlx::Error>> + Send + 'a,
    {
        let profiler = self.profiler.as_ref();
        commit_implicit(run_statement(&self.ctx, profiler, sql, args, caller, statement))
    }
}

impl fmt::Debug for ScopedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedHandle")
            .field("pool", &self.pool)
            .field("ctx", &self.ctx)
            .field("profiler", &self.profiler)
            .finish()
    }
}

type ImplicitTx = sqlx::Transaction<'static, Sqlite>;

/// Commit the implicit transaction a handle statement ran in.
///
/// Every handle statement runs inside its own `BEGIN`. Dropping an abandoned
/// statement drops its transaction, which queues a rollback behind it on the
/// same connection, so a canceled statement never commits. The commit is not
/// raced against the context.
async fn commit_implicit<T>(
    statement: impl Future<Output = Result<(ImplicitTx, T), StatementError>>,
) -> Result<T, StatementError> {
    let (tx, value) = statement.await?;
    if let Err(error) = tx.commit().await {
        debug!(%error, "implicit commit failed");
        return Err(error.into());
    }
    Ok(value)
}

/// Run one driver future under `ctx`, then report it to `profiler`.
///
/// The driver future is dropped unpolled when `ctx` is already done, and
/// dropped mid-flight when `ctx` ends first. Profiler failures are logged
/// and never change the returned result.
pub(crate) async fn run_statement<T, F>(
    ctx: &QueryContext,
    profiler: Option<&Arc<dyn Profiler>>,
    sql: &str,
    args: &[Value],
    caller: &'static Location<'static>,
    statement: F,
) -> Result<T, StatementError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    let timer = Timer::start("statement");

    let result = async {
        if let Some(reason) = ctx.err() {
            return Err(StatementError::from(reason));
        }
        tokio::select! {
            biased;
            reason = ctx.done() => Err(StatementError::from(reason)),
            result = statement => result.map_err(StatementError::from),
        }
    }
    .instrument(statement_span(sql))
    .await;

    let elapsed = timer.elapsed();
    if let Err(error) = &result {
        debug!(%error, elapsed_us = elapsed.as_micros() as u64, "statement failed");
    }

    if let Some(profiler) = profiler {
        let profile = ProfilerContext::new(sql, args.to_vec(), elapsed)
            .with_caller(format!("{}:{}", caller.file(), caller.line()));
        if let Err(error) = profiler.post(&profile) {
            warn!(profiler = profiler.name(), %error, "profiler post failed");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connector::connect;
    use crate::database::options::ConnectionOptions;
    use crate::database::profiler::MemoryProfiler;
    use crate::args;
    use sqlx::Row;

    async fn memory_pool() -> PoolHandle {
        let pool = connect(&ConnectionOptions::in_memory()).await.unwrap();
        pool.handle()
            .exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)", &[])
            .await
            .unwrap();
        pool
    }

    #[derive(Debug, sqlx::FromRow, PartialEq)]
    struct User {
        id: i64,
        name: String,
    }

    #[tokio::test]
    async fn test_statements() {
        let pool = memory_pool().await;
        let db = pool.handle();

        let done = db
            .exec("INSERT INTO users (id, name) VALUES (?, ?), (?, ?)", &args![1, "ann", 2, "bob"])
            .await
            .unwrap();
        assert_eq!(done.rows_affected(), 2);

        let rows = db.query("SELECT id FROM users ORDER BY id", &[]).await.unwrap();
        assert_eq!(rows.len(), 2);

        let row = db
            .query_row("SELECT name FROM users WHERE id = ?", &args![2])
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("name"), "bob");

        let users: Vec<User> = db.select("SELECT id, name FROM users ORDER BY id", &[]).await.unwrap();
        assert_eq!(users[0], User { id: 1, name: "ann".into() });

        let missing: Option<User> = db
            .get("SELECT id, name FROM users WHERE id = ?", &args![99])
            .await
            .unwrap();
        assert!(missing.is_none());

        let missing = db
            .query_row("SELECT name FROM users WHERE id = ?", &args![99])
            .await;
        assert!(matches!(missing, Err(StatementError::Database(sqlx::Error::RowNotFound))));
    }

    #[tokio::test]
    async fn test_profiler_records_caller() {
        let pool = memory_pool().await;
        let profiler = Arc::new(MemoryProfiler::new());
        let db = pool.handle().with_profiler(profiler.clone());

        db.exec("INSERT INTO users (id, name) VALUES (?, ?)", &args![7, "eve"])
            .await
            .unwrap();

        let log = profiler.snapshot();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].query(), "INSERT INTO users (id, name) VALUES (?, ?)");
        assert_eq!(log[0].args(), &args![7, "eve"][..]);
        let caller = log[0].caller().unwrap();
        assert!(caller.starts_with(file!()), "caller tag {caller:?}");
    }

    #[tokio::test]
    async fn test_configuring_leaves_original_alone() {
        let pool = memory_pool().await;
        let profiler: Arc<dyn Profiler> = Arc::new(MemoryProfiler::new());
        let base = pool.handle();

        let (ctx, _cancel) = QueryContext::background().with_cancel();
        let scoped = base.with_context(ctx.with_value("request", 42u32)).with_profiler(profiler);

        assert!(base.profiler().is_none());
        assert!(base.context().value::<u32>("request").is_none());
        assert_eq!(scoped.context().value::<u32>("request"), Some(&42));
        assert!(scoped.profiler().is_some());
        assert!(scoped.without_profiler().profiler().is_none());
        assert!(Arc::ptr_eq(base.pool(), scoped.pool()));
    }

    #[tokio::test]
    async fn test_cancelled_context_fails_fast_and_is_profiled() {
        let pool = memory_pool().await;
        let profiler = Arc::new(MemoryProfiler::new());
        let (ctx, cancel) = QueryContext::background().with_cancel();
        let db = pool.with_context(ctx).with_profiler(profiler.clone());

        cancel.cancel();
        let err = db.exec("INSERT INTO users (id, name) VALUES (1, 'x')", &[]).await.unwrap_err();
        assert!(matches!(err, StatementError::Canceled));
        assert_eq!(profiler.len(), 1);

        let count: (i64,) = pool
            .handle()
            .get("SELECT COUNT(*) FROM users", &[])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(count.0, 0);
    }
}
