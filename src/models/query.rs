//! Query-related data models.
//!
//! This module defines the metadata and results produced by statements run
//! through a transaction.

use crate::db::types::TypeCategory;
use serde::Serialize;

/// Metadata for one result column, reported by the driver at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Native type name as reported by the driver (e.g. `INT8`, `VARCHAR`).
    pub type_name: String,
    pub category: TypeCategory,
}

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Only reported by MySQL and SQLite.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}

/// A statement prepared on the transaction's connection.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedStatement {
    pub sql: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl PreparedStatement {
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}
