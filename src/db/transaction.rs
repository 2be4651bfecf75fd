//! Transaction runner.
//!
//! [`with_transaction`] begins a SERIALIZABLE transaction, hands the unit of
//! work a [`Tx`] capability, and resolves to exactly one of commit or
//! rollback. A panicking unit of work is rolled back before the panic is
//! resumed, with a [`DbError::RollbackOnFault`] as its payload.

use crate::context::CallContext;
use crate::db::macros::impl_tx_dispatch;
use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::pool::DbPool;
use crate::db::scan;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, ExecResult, PreparedStatement, Record, Records, Value};
use crate::impl_db_dispatch;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use sqlx::{Executor, MySql, Postgres, Sqlite, Statement, Transaction};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, warn};

/// Database-specific transaction wrapper.
pub(crate) enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

/// Transactional capability handed to a unit of work.
///
/// Bound to one connection for the lifetime of the transaction. Commit and
/// rollback are decided by [`with_transaction`], never by the unit of work.
pub struct Tx {
    pub(crate) inner: DbTransaction,
    id: String,
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("id", &self.id)
            .field("db_type", &self.db_type())
            .finish()
    }
}

impl Tx {
    async fn begin(ctx: &CallContext, pool: &DbPool) -> DbResult<Self> {
        let inner = ctx
            .run("begin", async {
                let tx = impl_db_dispatch!(pool, {
                    // Session isolation is set when the pool connects.
                    MySql(p) => DbTransaction::MySql(p.begin().await?),
                    Postgres(p) => {
                        let mut tx = p.begin().await?;
                        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                            .execute(&mut *tx)
                            .await?;
                        DbTransaction::Postgres(tx)
                    },
                    // SQLite transactions are always serializable.
                    SQLite(p) => DbTransaction::SQLite(p.begin().await?),
                });
                Ok::<_, sqlx::Error>(tx)
            })
            .await
            .map_err(DbError::begin)?;

        Ok(Self {
            inner,
            id: generate_transaction_id(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn db_type(&self) -> DatabaseType {
        match self.inner {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Execute a statement that returns no rows.
    pub async fn exec(
        &mut self,
        ctx: &CallContext,
        sql: &str,
        args: &[Value],
    ) -> DbResult<ExecResult> {
        debug!(transaction_id = %self.id, sql = %sql, "Executing statement");
        let result = impl_tx_dispatch!(&mut self.inner, {
            MySql(t) => {
                let query = args.iter().fold(sqlx::query(sql), bind_mysql_param);
                ctx.run("exec", query.execute(&mut **t))
                    .await
                    .map(|r| ExecResult {
                        rows_affected: r.rows_affected(),
                        last_insert_id: i64::try_from(r.last_insert_id())
                            .ok()
                            .filter(|id| *id > 0),
                    })
            },
            Postgres(t) => {
                let query = args.iter().fold(sqlx::query(sql), bind_postgres_param);
                ctx.run("exec", query.execute(&mut **t))
                    .await
                    .map(|r| ExecResult {
                        rows_affected: r.rows_affected(),
                        last_insert_id: None,
                    })
            },
            SQLite(t) => {
                let query = args.iter().fold(sqlx::query(sql), bind_sqlite_param);
                ctx.run("exec", query.execute(&mut **t))
                    .await
                    .map(|r| ExecResult {
                        rows_affected: r.rows_affected(),
                        last_insert_id: Some(r.last_insert_rowid()),
                    })
            },
        });
        result.map_err(DbError::query_exec)
    }

    /// Prepare a statement on this transaction's connection and describe its columns.
    pub async fn prepare(&mut self, ctx: &CallContext, sql: &str) -> DbResult<PreparedStatement> {
        let db_type = self.db_type();
        let columns = impl_tx_dispatch!(&mut self.inner, {
            MySql(t) => {
                let stmt = ctx.run("prepare", (&mut **t).prepare(sql))
                    .await
                    .map_err(DbError::query_exec)?;
                scan::describe_columns(stmt.columns(), db_type)
            },
            Postgres(t) => {
                let stmt = ctx.run("prepare", (&mut **t).prepare(sql))
                    .await
                    .map_err(DbError::query_exec)?;
                scan::describe_columns(stmt.columns(), db_type)
            },
            SQLite(t) => {
                let stmt = ctx.run("prepare", (&mut **t).prepare(sql))
                    .await
                    .map_err(DbError::query_exec)?;
                scan::describe_columns(stmt.columns(), db_type)
            },
        });
        Ok(PreparedStatement {
            sql: sql.to_string(),
            columns,
        })
    }

    /// Run a query and scan every row. See [`scan::query_all`].
    pub async fn query(
        &mut self,
        ctx: &CallContext,
        sql: &str,
        args: &[Value],
    ) -> DbResult<Records> {
        scan::query_all(ctx, self, sql, args).await
    }

    /// Run a query and scan only the first row. See [`scan::query_one`].
    pub async fn query_row(
        &mut self,
        ctx: &CallContext,
        sql: &str,
        args: &[Value],
    ) -> DbResult<Record> {
        scan::query_one(ctx, self, sql, args).await
    }

    async fn commit(self, ctx: &CallContext) -> DbResult<()> {
        let result = match self.inner {
            DbTransaction::MySql(tx) => ctx.run("commit", tx.commit()).await,
            DbTransaction::Postgres(tx) => ctx.run("commit", tx.commit()).await,
            DbTransaction::SQLite(tx) => ctx.run("commit", tx.commit()).await,
        };
        result.map_err(DbError::commit)
    }

    /// Not bounded by the context: a rollback must run even after a deadline.
    /// It gets [`ROLLBACK_TIMEOUT`] of its own instead.
    async fn rollback(self) -> DbResult<()> {
        let rollback = async move {
            match self.inner {
                DbTransaction::MySql(tx) => tx.rollback().await,
                DbTransaction::Postgres(tx) => tx.rollback().await,
                DbTransaction::SQLite(tx) => tx.rollback().await,
            }
        };
        bounded_rollback(rollback, ROLLBACK_TIMEOUT).await
    }
}

/// Time a rollback may take before the connection is given up on.
pub const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

async fn bounded_rollback<F>(rollback: F, limit: Duration) -> DbResult<()>
where
    F: Future<Output = Result<(), sqlx::Error>>,
{
    match tokio::time::timeout(limit, rollback).await {
        Ok(result) => result.map_err(DbError::from),
        Err(_) => Err(DbError::timeout("rollback", limit)),
    }
}

/// Run `work` inside a SERIALIZABLE transaction.
///
/// - `work` returns `Ok`: the transaction is committed; a commit failure is
///   returned as [`DbError::Commit`].
/// - `work` returns `Err`: the transaction is rolled back and the error is
///   returned unchanged, or joined with the rollback failure as
///   [`DbError::RollbackOnError`].
/// - `work` panics: the transaction is rolled back, then the panic resumes
///   with a [`DbError::RollbackOnFault`] payload carrying the panic message
///   and any rollback failure.
///
/// Nothing is retried. Serialization failures surface as errors for which
/// [`DbError::is_retryable`] returns true.
///
/// # Example
///
/// ```ignore
/// let names = with_transaction(&ctx, &pool, |ctx, tx| {
///     Box::pin(async move {
///         tx.exec(ctx, "UPDATE users SET seen = 1", &[]).await?;
///         let rows = tx.query(ctx, "SELECT name FROM users", &[]).await?;
///         Ok(rows.map(|r| r.string("name")).collect::<Vec<_>>())
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<T, F>(ctx: &CallContext, pool: &DbPool, work: F) -> DbResult<T>
where
    F: for<'t> FnOnce(&'t CallContext, &'t mut Tx) -> BoxFuture<'t, DbResult<T>>,
{
    let mut tx = Tx::begin(ctx, pool).await?;
    let transaction_id = tx.id.clone();
    debug!(
        transaction_id = %transaction_id,
        db_type = %tx.db_type(),
        "Transaction started"
    );

    let outcome = AssertUnwindSafe(async { work(ctx, &mut tx).await })
        .catch_unwind()
        .await;

    match outcome {
        Err(payload) => {
            let fault = panic_message(payload.as_ref());
            warn!(
                transaction_id = %transaction_id,
                fault = %fault,
                "Unit of work panicked, rolling back"
            );
            let rollback = tx.rollback().await.err();
            if let Some(err) = &rollback {
                warn!(transaction_id = %transaction_id, error = %err, "Rollback failed");
            }
            std::panic::resume_unwind(Box::new(DbError::rollback_on_fault(fault, rollback)))
        }
        Ok(Err(err)) => match tx.rollback().await {
            Ok(()) => {
                debug!(transaction_id = %transaction_id, error = %err, "Transaction rolled back");
                Err(err)
            }
            Err(rollback) => {
                warn!(
                    transaction_id = %transaction_id,
                    error = %err,
                    rollback_error = %rollback,
                    "Rollback failed"
                );
                Err(DbError::rollback_on_error(err, rollback))
            }
        },
        Ok(Ok(value)) => {
            tx.commit(ctx).await?;
            debug!(transaction_id = %transaction_id, "Transaction committed");
            Ok(value)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(err) = payload.downcast_ref::<DbError>() {
        err.to_string()
    } else {
        "unknown panic".to_string()
    }
}

/// Generate a unique transaction ID.
fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
