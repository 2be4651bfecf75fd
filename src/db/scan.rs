//! Schema-less row scanning.
//!
//! A query runs in three phases: the statement is prepared to describe its
//! columns, the row cursor is opened, and each row is decoded column by
//! column into a [`Record`]. The cursor is released exactly once on every
//! path: explicitly after the scan loop (discarding unread rows), or by drop
//! when a row fails to decode.

use crate::context::CallContext;
use crate::db::macros::impl_tx_dispatch;
use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::transaction::Tx;
use crate::db::types::{self, categorize_type, scan_category};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnDescriptor, DatabaseType, Record, Records, Value};
use futures_util::TryStreamExt;
use futures_util::stream::BoxStream;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use std::collections::HashSet;
use tracing::debug;

/// Run `sql` and return only the first row.
///
/// Rows after the first are never decoded. Fails with [`DbError::NotFound`]
/// when the query matches nothing.
pub async fn query_one(
    ctx: &CallContext,
    tx: &mut Tx,
    sql: &str,
    args: &[Value],
) -> DbResult<Record> {
    run_query(ctx, tx, sql, args, ScanMode::First)
        .await?
        .into_iter()
        .next()
        .ok_or(DbError::NotFound)
}

/// Run `sql` and return every row, in the order the driver returned them.
pub async fn query_all(
    ctx: &CallContext,
    tx: &mut Tx,
    sql: &str,
    args: &[Value],
) -> DbResult<Records> {
    run_query(ctx, tx, sql, args, ScanMode::All)
        .await
        .map(Records::new)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanMode {
    First,
    All,
}

async fn run_query(
    ctx: &CallContext,
    tx: &mut Tx,
    sql: &str,
    args: &[Value],
    mode: ScanMode,
) -> DbResult<Vec<Record>> {
    let db_type = tx.db_type();
    debug!(transaction_id = %tx.id(), sql = %sql, "Running query");

    impl_tx_dispatch!(&mut tx.inner, {
        MySql(t) => {
            let stmt = ctx.run("query", (&mut **t).prepare(sql))
                .await
                .map_err(DbError::query_exec)?;
            let columns = describe_columns(stmt.columns(), db_type);
            let query = args.iter().fold(sqlx::query(sql), bind_mysql_param);
            scan_rows(ctx, query.fetch(&mut **t), &columns, mode).await
        },
        Postgres(t) => {
            let stmt = ctx.run("query", (&mut **t).prepare(sql))
                .await
                .map_err(DbError::query_exec)?;
            let columns = describe_columns(stmt.columns(), db_type);
            let query = args.iter().fold(sqlx::query(sql), bind_postgres_param);
            scan_rows(ctx, query.fetch(&mut **t), &columns, mode).await
        },
        SQLite(t) => {
            let stmt = ctx.run("query", (&mut **t).prepare(sql))
                .await
                .map_err(DbError::query_exec)?;
            let columns = describe_columns(stmt.columns(), db_type);
            let query = args.iter().fold(sqlx::query(sql), bind_sqlite_param);
            scan_rows(ctx, query.fetch(&mut **t), &columns, mode).await
        },
    })
}

/// Build column descriptors from a prepared statement.
///
/// Names are not required to be unique (`SELECT * FROM a JOIN b` repeats
/// `id`); the record keeps the value of the last column with a given name.
pub(crate) fn describe_columns<C: Column>(
    columns: &[C],
    db_type: DatabaseType,
) -> Vec<ColumnDescriptor> {
    let mut seen = HashSet::with_capacity(columns.len());
    columns
        .iter()
        .map(|col| {
            let name = col.name().to_string();
            if !seen.insert(name.clone()) {
                debug!(column = %name, "Duplicate column name, last value wins");
            }
            let type_name = col.type_info().name().to_string();
            let category = categorize_type(&type_name, db_type);
            ColumnDescriptor {
                name,
                type_name,
                category,
            }
        })
        .collect()
}

async fn scan_rows<R: ScanRow>(
    ctx: &CallContext,
    stream: BoxStream<'_, Result<R, sqlx::Error>>,
    columns: &[ColumnDescriptor],
    mode: ScanMode,
) -> DbResult<Vec<Record>> {
    let mut cursor = RowCursor::new(stream);
    let mut next = cursor.open(ctx).await.map_err(DbError::query_exec)?;

    let mut records = Vec::new();
    while let Some(row) = next {
        records.push(row.scan_record(columns)?);
        if mode == ScanMode::First {
            break;
        }
        next = cursor.next_row(ctx).await;
    }

    cursor.release(ctx).await.map_err(DbError::cursor_release)?;
    if let Some(err) = cursor.take_err() {
        return Err(DbError::iteration(err));
    }
    Ok(records)
}

// =============================================================================
// Row Cursor
// =============================================================================

/// Forward-only cursor over a row stream.
///
/// A fault while advancing is held back until the cursor has been released,
/// so that release always happens first.
struct RowCursor<'c, R> {
    stream: Option<BoxStream<'c, Result<R, sqlx::Error>>>,
    deferred: Option<DbError>,
}

impl<'c, R> RowCursor<'c, R> {
    fn new(stream: BoxStream<'c, Result<R, sqlx::Error>>) -> Self {
        Self {
            stream: Some(stream),
            deferred: None,
        }
    }

    /// Wait for the server's first response and return the first row, if any.
    async fn open(&mut self, ctx: &CallContext) -> DbResult<Option<R>> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        match ctx.run("query", stream.try_next()).await {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.stream = None;
                Ok(None)
            }
            Err(e) => {
                self.stream = None;
                Err(e)
            }
        }
    }

    async fn next_row(&mut self, ctx: &CallContext) -> Option<R> {
        let stream = self.stream.as_mut()?;
        match ctx.run("fetch", stream.try_next()).await {
            Ok(Some(row)) => Some(row),
            Ok(None) => {
                self.stream = None;
                None
            }
            Err(e) => {
                self.stream = None;
                self.deferred = Some(e);
                None
            }
        }
    }

    /// Read and discard unread rows, then drop the stream.
    async fn release(&mut self, ctx: &CallContext) -> DbResult<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        let discarded = ctx
            .run("release", async {
                let mut discarded = 0_u64;
                while stream.try_next().await?.is_some() {
                    discarded += 1;
                }
                Ok::<_, sqlx::Error>(discarded)
            })
            .await?;
        if discarded > 0 {
            debug!(discarded, "Discarded unread rows");
        }
        Ok(())
    }

    fn take_err(&mut self) -> Option<DbError> {
        self.deferred.take()
    }
}

// =============================================================================
// Row Scanning
// =============================================================================

/// Decode a driver row into a [`Record`].
pub(crate) trait ScanRow: Row {
    /// Decode one value, choosing the scan target from the type the driver
    /// reports for it in this row.
    fn scan_column(&self, idx: usize, column: &ColumnDescriptor) -> Result<Value, sqlx::Error>;

    fn scan_record(&self, columns: &[ColumnDescriptor]) -> DbResult<Record> {
        if self.len() != columns.len() {
            return Err(DbError::column_describe(format!(
                "row has {} columns but the statement describes {}",
                self.len(),
                columns.len()
            )));
        }
        columns
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                self.scan_column(idx, column)
                    .map(|value| (column.name.clone(), value))
                    .map_err(|e| DbError::row_scan(&column.name, DbError::from(e)))
            })
            .collect()
    }
}

impl ScanRow for MySqlRow {
    fn scan_column(&self, idx: usize, column: &ColumnDescriptor) -> Result<Value, sqlx::Error> {
        let raw = self.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let native = raw.type_info().name().to_string();
        let category = scan_category(DatabaseType::MySQL, column.category, &native);
        types::mysql::decode_column(self, idx, &native, category)
    }
}

impl ScanRow for PgRow {
    fn scan_column(&self, idx: usize, column: &ColumnDescriptor) -> Result<Value, sqlx::Error> {
        let raw = self.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let native = raw.type_info().name().to_string();
        let category = scan_category(DatabaseType::PostgreSQL, column.category, &native);
        types::postgres::decode_column(self, idx, &native, category)
    }
}

impl ScanRow for SqliteRow {
    fn scan_column(&self, idx: usize, column: &ColumnDescriptor) -> Result<Value, sqlx::Error> {
        let raw = self.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        // SQLite reports the storage class of this particular value.
        let native = raw.type_info().name().to_string();
        let runtime = categorize_type(&native, DatabaseType::SQLite);
        let category = scan_category(DatabaseType::SQLite, column.category, &native);
        types::sqlite::decode_column(self, idx, runtime, category)
    }
}
