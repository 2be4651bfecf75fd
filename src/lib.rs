//! sqlm
//!
//! A thin layer over sqlx connection pools (SQLite, PostgreSQL, MySQL) that
//! runs units of work in SERIALIZABLE transactions and scans arbitrary query
//! results into dynamically-typed records.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, PoolConfig};
pub use context::CallContext;
pub use db::{DbPool, Tx, mysql_open, open, open_with, query_all, query_one, with_transaction};
pub use error::{DbError, DbResult};
pub use models::{Record, Records, Value};
