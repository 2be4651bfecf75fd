//! Database access layer.
//!
//! This module provides:
//! - Connection pool initialization with a bounded connectivity check
//! - The transaction runner and its `Tx` capability
//! - Schema-less row scanning into records
//! - Type mappings and parameter binding
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod scan;
pub mod transaction;
pub mod types;

pub use pool::{DbPool, mysql_open, open, open_with};
pub use scan::{query_all, query_one};
pub use transaction::{Tx, with_transaction};
pub use types::TypeCategory;
