//! Data models for sqlm.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod record;

// Re-export commonly used types
pub use connection::{DatabaseType, redact_connection_string};
pub use query::{ColumnDescriptor, ExecResult, PreparedStatement};
pub use record::{Record, Records, Value};
