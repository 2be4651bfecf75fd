//! Connection pool initialization.
//!
//! Pools are database-specific (MySqlPool, PgPool, SqlitePool) to keep full
//! type support. Opening a pool performs exactly one connectivity check; a
//! pool that fails it is closed before the error is returned.

use crate::config::PoolConfig;
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{DatabaseType, redact_connection_string};
use sqlx::{
    Connection, Executor, MySqlPool, PgPool, SqlitePool, mysql::MySqlConnectOptions,
    mysql::MySqlPoolOptions, postgres::PgConnectOptions, postgres::PgPoolOptions,
    sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Database-specific connection pool (avoids AnyPool limitations).
///
/// Cloning is cheap and shares the underlying connections.
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.close().await,
            Postgres(pool) => pool.close().await,
            SQLite(pool) => pool.close().await,
        })
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.is_closed(),
            Postgres(pool) => pool.is_closed(),
            SQLite(pool) => pool.is_closed(),
        })
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// Open a pool and verify the database is reachable.
///
/// Idle connections are kept up to `max_open_connections`. A zero lifetime
/// means connections are never recycled for age.
///
/// For MySQL every pooled session is switched to SERIALIZABLE when it
/// connects. That applies to all use of the returned pool, including
/// queries run outside [`with_transaction`](crate::with_transaction).
pub async fn open(
    driver_name: &str,
    data_source_name: &str,
    max_open_connections: u32,
    max_connection_lifetime: Duration,
    ping_timeout: Duration,
) -> DbResult<DbPool> {
    let config =
        PoolConfig::from_durations(max_open_connections, max_connection_lifetime, ping_timeout);
    open_with(driver_name, data_source_name, &config).await
}

/// Open a MySQL pool with conservative defaults: 25 connections, a
/// 5 minute lifetime and a 5 second ping.
///
/// Sessions of the returned pool run at SERIALIZABLE isolation for every
/// statement, not only inside [`with_transaction`](crate::with_transaction).
pub async fn mysql_open(data_source_name: &str) -> DbResult<DbPool> {
    open_with("mysql", data_source_name, &PoolConfig::default()).await
}

/// Same as [`open`] with the knobs bundled in a [`PoolConfig`].
pub async fn open_with(
    driver_name: &str,
    data_source_name: &str,
    config: &PoolConfig,
) -> DbResult<DbPool> {
    config
        .validate()
        .map_err(|msg| DbError::connection_open(DbError::invalid_input(msg)))?;

    let db_type = DatabaseType::from_driver_name(driver_name).ok_or_else(|| {
        DbError::connection_open(DbError::invalid_input(format!(
            "Unknown driver '{}'; expected one of mysql, postgres, sqlite",
            driver_name
        )))
    })?;

    let pool = create_pool(db_type, data_source_name, config)?;
    info!(
        db_type = %db_type,
        url = %redact_connection_string(data_source_name),
        max_connections = config.max_open_connections,
        "Opening database pool"
    );

    let ping_timeout = config.ping_timeout();
    let outcome = tokio::time::timeout(ping_timeout, ping(&pool)).await;
    let cause = match outcome {
        Ok(Ok(())) => {
            info!(db_type = %db_type, "Database pool ready");
            return Ok(pool);
        }
        Ok(Err(e)) => e,
        Err(_) => DbError::timeout("ping", ping_timeout),
    };

    warn!(db_type = %db_type, error = %cause, "Database ping failed, closing pool");
    pool.close().await;
    Err(DbError::ping(cause))
}

/// Build the pool without connecting; the first connection is made by the ping.
fn create_pool(
    db_type: DatabaseType,
    data_source_name: &str,
    config: &PoolConfig,
) -> DbResult<DbPool> {
    let max_lifetime = config.max_lifetime();

    match db_type {
        DatabaseType::MySQL => {
            let options = MySqlConnectOptions::from_str(data_source_name)
                .map_err(|e| DbError::connection_open(connection_error(db_type, e)))?
                .charset("utf8mb4");

            let pool = MySqlPoolOptions::new()
                .min_connections(0)
                .max_connections(config.max_open_connections)
                .max_lifetime(max_lifetime)
                .idle_timeout(None::<Duration>)
                // MySQL only honors isolation per session or per next transaction.
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        conn.execute("SET SESSION TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                            .await?;
                        Ok(())
                    })
                })
                .connect_lazy_with(options);
            Ok(DbPool::MySql(pool))
        }
        DatabaseType::PostgreSQL => {
            let options = PgConnectOptions::from_str(data_source_name)
                .map_err(|e| DbError::connection_open(connection_error(db_type, e)))?;

            let pool = PgPoolOptions::new()
                .min_connections(0)
                .max_connections(config.max_open_connections)
                .max_lifetime(max_lifetime)
                .idle_timeout(None::<Duration>)
                .connect_lazy_with(options);
            Ok(DbPool::Postgres(pool))
        }
        DatabaseType::SQLite => {
            let options = SqliteConnectOptions::from_str(data_source_name)
                .map_err(|e| DbError::connection_open(connection_error(db_type, e)))?;

            let pool = SqlitePoolOptions::new()
                .min_connections(0)
                .max_connections(config.max_open_connections)
                .max_lifetime(max_lifetime)
                .idle_timeout(None::<Duration>)
                .connect_lazy_with(options);
            Ok(DbPool::SQLite(pool))
        }
    }
}

async fn ping(pool: &DbPool) -> DbResult<()> {
    let db_type = pool.db_type();
    let result = impl_db_dispatch!(pool, {
        MySql(p) => ping_one(p).await,
        Postgres(p) => ping_one(p).await,
        SQLite(p) => ping_one(p).await,
    });
    result.map_err(|e| connection_error(db_type, e))
}

async fn ping_one<DB: sqlx::Database>(pool: &sqlx::Pool<DB>) -> Result<(), sqlx::Error> {
    let mut conn = pool.acquire().await?;
    conn.ping().await?;
    debug!("Database ping succeeded");
    Ok(())
}

/// Wrap a connection failure with a helpful suggestion.
fn connection_error(db_type: DatabaseType, error: sqlx::Error) -> DbError {
    let suggestion = connection_suggestion(db_type, &error);
    DbError::driver(format!("Failed to connect: {}", error), suggestion, error)
}

fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and password in the connection string".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    format!(
        "Verify the connection string format: {}",
        db_type.example_url()
    )
}
