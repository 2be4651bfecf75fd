//! Scan-target selection and value decoding.
//!
//! # Architecture
//!
//! Scanning a column is a two-phase process:
//! 1. `TypeCategory` classifies the driver-reported native type of the value
//!    into one of a fixed set of representable categories
//! 2. Database-specific decoders read the value into the matching [`Value`]
//!    variant
//!
//! Classification is by exact type name, so an unfamiliar type falls through
//! to `Text` rather than being misread by a substring match.

use crate::models::{DatabaseType, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use sqlx::Row;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{ColumnIndex, Decode, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Scan target category for a column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Timestamp,
    Null,
}

/// Classify a native type name into a scan category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let upper = type_name.trim().to_uppercase();
    match db {
        DatabaseType::PostgreSQL => match upper.as_str() {
            "INT2" | "INT4" | "INT8" | "OID" => TypeCategory::Integer,
            "FLOAT4" | "FLOAT8" => TypeCategory::Float,
            "BOOL" => TypeCategory::Boolean,
            "BYTEA" => TypeCategory::Binary,
            "TIMESTAMP" | "TIMESTAMPTZ" | "DATE" => TypeCategory::Timestamp,
            "VOID" | "NULL" => TypeCategory::Null,
            _ => TypeCategory::Text,
        },
        DatabaseType::MySQL => match upper.trim_end_matches(" UNSIGNED") {
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => TypeCategory::Integer,
            "FLOAT" | "DOUBLE" => TypeCategory::Float,
            "BOOLEAN" => TypeCategory::Boolean,
            "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
                TypeCategory::Binary
            }
            "DATETIME" | "TIMESTAMP" | "DATE" => TypeCategory::Timestamp,
            "NULL" => TypeCategory::Null,
            _ => TypeCategory::Text,
        },
        DatabaseType::SQLite => match upper.as_str() {
            "INTEGER" | "INT" | "BIGINT" | "SMALLINT" | "TINYINT" | "MEDIUMINT" => {
                TypeCategory::Integer
            }
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" | "DECIMAL" => TypeCategory::Float,
            "BOOLEAN" | "BOOL" => TypeCategory::Boolean,
            "BLOB" => TypeCategory::Binary,
            "DATETIME" | "TIMESTAMP" | "DATE" => TypeCategory::Timestamp,
            "NULL" => TypeCategory::Null,
            _ => TypeCategory::Text,
        },
    }
}

/// Pick the scan target for one value.
///
/// `native` is the type the driver reports for the value in this row. SQLite
/// reports the storage class there, so the column's declared category is used
/// to recover booleans and timestamps stored as integers or text.
pub fn scan_category(db: DatabaseType, declared: TypeCategory, native: &str) -> TypeCategory {
    let runtime = categorize_type(native, db);
    match db {
        DatabaseType::SQLite => match (runtime, declared) {
            (TypeCategory::Integer, TypeCategory::Boolean) => TypeCategory::Boolean,
            (
                TypeCategory::Integer | TypeCategory::Float | TypeCategory::Text,
                TypeCategory::Timestamp,
            ) => TypeCategory::Timestamp,
            _ => runtime,
        },
        _ => runtime,
    }
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Read a value as text, or as its raw wire bytes when the driver has no
/// string decoding for the native type, such as arrays or intervals.
fn text_or_raw<'r, R>(row: &'r R, idx: usize) -> Result<Value, sqlx::Error>
where
    R: Row,
    usize: ColumnIndex<R>,
    String: Decode<'r, R::Database> + Type<R::Database>,
    Vec<u8>: Decode<'r, R::Database>,
{
    match row.try_get::<String, _>(idx) {
        Ok(text) => Ok(Value::Text(text)),
        Err(sqlx::Error::ColumnDecode { .. }) => {
            Ok(bytes_to_value(row.try_get_unchecked::<Vec<u8>, _>(idx)?))
        }
        Err(e) => Err(e),
    }
}

fn bytes_to_value(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(text) => Value::Text(text),
        Err(e) => Value::Binary(e.into_bytes()),
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// MySQL DECIMAL values read as their exact text form.
///
/// The MySQL protocol sends decimals as strings, so no precision is lost.
#[derive(Debug)]
struct RawDecimal(String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        ty.name().eq_ignore_ascii_case("DECIMAL")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

pub(crate) mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        native: &str,
        category: TypeCategory,
    ) -> Result<Value, sqlx::Error> {
        match category {
            TypeCategory::Null => Ok(Value::Null),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Boolean => Ok(Value::Bool(row.try_get::<bool, _>(idx)?)),
            TypeCategory::Binary => Ok(Value::Binary(row.try_get::<Vec<u8>, _>(idx)?)),
            TypeCategory::Timestamp => decode_timestamp(row, idx, native),
            TypeCategory::Text => decode_text(row, idx, native),
        }
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Ok(Value::Int(v));
        }
        let unsigned = row.try_get::<u64, _>(idx)?;
        i64::try_from(unsigned)
            .map(Value::Int)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
        if let Ok(v) = row.try_get::<f64, _>(idx) {
            return Ok(Value::Float(v));
        }
        Ok(Value::Float(f64::from(row.try_get::<f32, _>(idx)?)))
    }

    fn decode_timestamp(row: &MySqlRow, idx: usize, native: &str) -> Result<Value, sqlx::Error> {
        let ts = match native {
            "TIMESTAMP" => row.try_get::<DateTime<Utc>, _>(idx)?,
            "DATE" => midnight_utc(row.try_get::<NaiveDate, _>(idx)?),
            _ => row.try_get::<NaiveDateTime, _>(idx)?.and_utc(),
        };
        Ok(Value::Timestamp(ts))
    }

    fn decode_text(row: &MySqlRow, idx: usize, native: &str) -> Result<Value, sqlx::Error> {
        let text = match native {
            "DECIMAL" => row.try_get::<RawDecimal, _>(idx)?.0,
            "JSON" => row.try_get::<serde_json::Value, _>(idx)?.to_string(),
            "TIME" => row.try_get::<NaiveTime, _>(idx)?.to_string(),
            _ => return text_or_raw(row, idx),
        };
        Ok(Value::Text(text))
    }
}

pub(crate) mod postgres {
    use super::*;
    use sqlx::postgres::types::Oid;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        native: &str,
        category: TypeCategory,
    ) -> Result<Value, sqlx::Error> {
        match category {
            TypeCategory::Null => Ok(Value::Null),
            TypeCategory::Integer => decode_integer(row, idx, native),
            TypeCategory::Float => decode_float(row, idx, native),
            TypeCategory::Boolean => Ok(Value::Bool(row.try_get::<bool, _>(idx)?)),
            TypeCategory::Binary => Ok(Value::Binary(row.try_get::<Vec<u8>, _>(idx)?)),
            TypeCategory::Timestamp => decode_timestamp(row, idx, native),
            TypeCategory::Text => decode_text(row, idx, native),
        }
    }

    fn decode_integer(row: &PgRow, idx: usize, native: &str) -> Result<Value, sqlx::Error> {
        let v = match native {
            "INT2" => i64::from(row.try_get::<i16, _>(idx)?),
            "INT4" => i64::from(row.try_get::<i32, _>(idx)?),
            "OID" => i64::from(row.try_get::<Oid, _>(idx)?.0),
            _ => row.try_get::<i64, _>(idx)?,
        };
        Ok(Value::Int(v))
    }

    fn decode_float(row: &PgRow, idx: usize, native: &str) -> Result<Value, sqlx::Error> {
        let v = match native {
            "FLOAT4" => f64::from(row.try_get::<f32, _>(idx)?),
            _ => row.try_get::<f64, _>(idx)?,
        };
        Ok(Value::Float(v))
    }

    fn decode_timestamp(row: &PgRow, idx: usize, native: &str) -> Result<Value, sqlx::Error> {
        let ts = match native {
            "TIMESTAMPTZ" => row.try_get::<DateTime<Utc>, _>(idx)?,
            "DATE" => midnight_utc(row.try_get::<NaiveDate, _>(idx)?),
            _ => row.try_get::<NaiveDateTime, _>(idx)?.and_utc(),
        };
        Ok(Value::Timestamp(ts))
    }

    fn decode_text(row: &PgRow, idx: usize, native: &str) -> Result<Value, sqlx::Error> {
        // NUMERIC travels in binary form, so it cannot be read as a string.
        let text = match native {
            "NUMERIC" => row.try_get::<sqlx::types::Decimal, _>(idx)?.to_string(),
            "JSON" | "JSONB" => row.try_get::<serde_json::Value, _>(idx)?.to_string(),
            "UUID" => row.try_get::<sqlx::types::Uuid, _>(idx)?.to_string(),
            "TIME" => row.try_get::<NaiveTime, _>(idx)?.to_string(),
            _ => return text_or_raw(row, idx),
        };
        Ok(Value::Text(text))
    }
}

pub(crate) mod sqlite {
    use super::*;

    /// `runtime` is the storage class category, used when a declared
    /// timestamp column holds something chrono cannot parse.
    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        runtime: TypeCategory,
        category: TypeCategory,
    ) -> Result<Value, sqlx::Error> {
        match category {
            TypeCategory::Null => Ok(Value::Null),
            TypeCategory::Integer => Ok(Value::Int(row.try_get::<i64, _>(idx)?)),
            TypeCategory::Float => Ok(Value::Float(row.try_get::<f64, _>(idx)?)),
            TypeCategory::Boolean => Ok(Value::Bool(row.try_get::<bool, _>(idx)?)),
            TypeCategory::Binary => Ok(Value::Binary(row.try_get::<Vec<u8>, _>(idx)?)),
            TypeCategory::Text => Ok(Value::Text(row.try_get::<String, _>(idx)?)),
            TypeCategory::Timestamp => {
                if let Ok(v) = row.try_get::<NaiveDateTime, _>(idx) {
                    return Ok(Value::Timestamp(v.and_utc()));
                }
                if let Ok(v) = row.try_get::<NaiveDate, _>(idx) {
                    return Ok(Value::Timestamp(midnight_utc(v)));
                }
                match runtime {
                    TypeCategory::Timestamp => Err(sqlx::Error::Decode(
                        format!("column {} holds an unparseable timestamp", idx).into(),
                    )),
                    other => decode_column(row, idx, other, other),
                }
            }
        }
    }
}
