//! Transaction runner.
//!
//! [`ScopedHandle::transaction`] begins a transaction, hands it to a unit
//! of work, then commits on `Ok` and rolls back on `Err` or panic. Conflicts
//! are reported, never retried here.

use futures_util::FutureExt;
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{FromRow, Sqlite};
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, Location};
use std::sync::Arc;
use tracing::{debug, error};

use super::context::QueryContext;
use super::error::{StatementError, TransactionError};
use super::handle::{run_statement, ScopedHandle};
use super::profiler::Profiler;
use super::value::{bind_values, Value};

pub use futures_util::future::BoxFuture;

/// An open transaction, bound to the context and profiler of the handle
/// that started it.
///
/// Statements run in program order on the single transaction connection.
pub struct Transaction {
    tx: sqlx::Transaction<'static, Sqlite>,
    ctx: QueryContext,
    profiler: Option<Arc<dyn Profiler>>,
}

impl Transaction {
    async fn begin(handle: &ScopedHandle) -> Result<Self, StatementError> {
        let ctx = handle.context().clone();
        if let Some(reason) = ctx.err() {
            return Err(reason.into());
        }

        let tx = tokio::select! {
            biased;
            reason = ctx.done() => return Err(reason.into()),
            tx = handle.pool().pool().begin() => tx?,
        };
        debug!("transaction started");

        Ok(Self {
            tx,
            ctx,
            profiler: handle.profiler().cloned(),
        })
    }

    async fn commit(self) -> Result<(), StatementError> {
        self.tx.commit().await?;
        debug!("transaction committed");
        Ok(())
    }

    async fn rollback(self) -> Result<(), StatementError> {
        match self.tx.rollback().await {
            Ok(()) => {
                debug!("transaction rolled back");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "transaction rollback failed");
                Err(err.into())
            }
        }
    }

    pub fn context(&self) -> &QueryContext {
        &self.ctx
    }

    #[track_caller]
    pub fn exec<'a>(
        &'a mut self,
        sql: &'a str,
        args: &'a [Value],
    ) -> impl Future<Output = Result<SqliteQueryResult, StatementError>> + Send + 'a {
        let caller = Location::caller();
        let statement = bind_values!(sqlx::query::<Sqlite>(sql), args)
            .execute(&mut *self.tx);
        run_statement(&self.ctx, self.profiler.as_ref(), sql, args, caller, statement)
    }

    #[track_caller]
    pub fn query<'a>(
        &'a mut self,
        sql: &'a str,
        args: &'a [Value],
    ) -> impl Future<Output = Result<Vec<SqliteRow>, StatementError>> + Send + 'a {
        let caller = Location::caller();
        let statement = bind_values!(sqlx::query::<Sqlite>(sql), args)
            .fetch_all(&mut *self.tx);
        run_statement(&self.ctx, self.profiler.as_ref(), sql, args, caller, statement)
    }

    #[track_caller]
    pub fn query_row<'a>(
        &'a mut self,
        sql: &'a str,
        args: &'a [Value],
    ) -> impl Future<Output = Result<SqliteRow, StatementError>> + Send + 'a {
        let caller = Location::caller();
        let statement = bind_values!(sqlx::query::<Sqlite>(sql), args)
            .fetch_one(&mut *self.tx);
        run_statement(&self.ctx, self.profiler.as_ref(), sql, args, caller, statement)
    }

    #[track_caller]
    pub fn select<'a, T>(
        &'a mut self,
        sql: &'a str,
        args: &'a [Value],
    ) -> impl Future<Output = Result<Vec<T>, StatementError>> + Send + 'a
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin + 'a,
    {
        let caller = Location::caller();
        let statement = bind_values!(sqlx::query_as::<Sqlite, T>(sql), args)
            .fetch_all(&mut *self.tx);
        run_statement(&self.ctx, self.profiler.as_ref(), sql, args, caller, statement)
    }

    #[track_caller]
    pub fn get<'a, T>(
        &'a mut self,
        sql: &'a str,
        args: &'a [Value],
    ) -> impl Future<Output = Result<Option<T>, StatementError>> + Send + 'a
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin + 'a,
    {
        let caller = Location::caller();
        let statement = bind_values!(sqlx::query_as::<Sqlite, T>(sql), args)
            .fetch_optional(&mut *self.tx);
        run_statement(&self.ctx, self.profiler.as_ref(), sql, args, caller, statement)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("ctx", &self.ctx)
            .field("profiler", &self.profiler)
            .finish_non_exhaustive()
    }
}

impl ScopedHandle {
    /// Run `work` inside a transaction.
    ///
    /// ```no_run
    /// # use factory_database::{args, PoolHandle, StatementError, TransactionError};
    /// # async fn transfer(pool: PoolHandle) -> Result<(), TransactionError<StatementError>> {
    /// pool.handle()
    ///     .transaction(|tx| {
    ///         Box::pin(async move {
    ///             tx.exec("UPDATE accounts SET balance = balance - 10 WHERE id = ?", &args![1]).await?;
    ///             tx.exec("UPDATE accounts SET balance = balance + 10 WHERE id = ?", &args![2]).await?;
    ///             Ok(())
    ///         })
    ///     })
    ///     .await
    /// # }
    /// ```
    ///
    /// The work's own error comes back as [`TransactionError::Work`]
    /// untouched. If the context ended while the work ran, the transaction is
    /// rolled back instead of committed and the result is
    /// [`TransactionError::Commit`] with the context's reason, or
    /// [`TransactionError::Rollback`] carrying that reason as the work error
    /// when the rollback fails too.
    ///
    /// If the work panics the transaction is rolled back and the panic
    /// resumes. A rollback failure on that path is logged at `error`, as
    /// there is no value left to carry it.
    pub async fn transaction<T, E, F>(&self, work: F) -> Result<T, TransactionError<E>>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T, E>>,
        E: From<StatementError>,
    {
        let mut tx = Transaction::begin(self)
            .await
            .map_err(TransactionError::Begin)?;

        let outcome = AssertUnwindSafe(work(&mut tx)).catch_unwind().await;

        match outcome {
            Ok(Ok(value)) => match tx.ctx.err() {
                Some(reason) => {
                    debug!(%reason, "context done before commit, rolling back");
                    match tx.rollback().await {
                        Ok(()) => Err(TransactionError::Commit(reason.into())),
                        Err(rollback) => Err(TransactionError::Rollback {
                            work: E::from(StatementError::from(reason)),
                            rollback,
                        }),
                    }
                }
                None => tx.commit().await.map(|()| value).map_err(TransactionError::Commit),
            },
            Ok(Err(work)) => match tx.rollback().await {
                Ok(()) => Err(TransactionError::Work(work)),
                Err(rollback) => Err(TransactionError::Rollback { work, rollback }),
            },
            Err(panic) => {
                // logged inside `rollback`; the panic takes precedence
                let _ = tx.rollback().await;
                std::panic::resume_unwind(panic)
            }
        }
    }
}
