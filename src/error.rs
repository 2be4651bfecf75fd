//! Error types for sqlm.
//!
//! Every failure surfaces as a single [`DbError`]. Leaf variants describe the
//! underlying cause (driver error, deadline, cancellation); stage variants wrap
//! a cause with the step that failed (opening, pinging, beginning, scanning...)
//! so the whole chain stays reachable through [`std::error::Error::source`].

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    // -------------------------------------------------------------------------
    // Causes
    // -------------------------------------------------------------------------
    #[error("{message}")]
    Driver {
        message: String,
        suggestion: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Canceled: {operation}")]
    Canceled { operation: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// Failure raised by caller code inside a unit of work.
    #[error("{source}")]
    Work {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // -------------------------------------------------------------------------
    // Pool initialization
    // -------------------------------------------------------------------------
    #[error("Failed to open database: {source}")]
    ConnectionOpen { source: Box<DbError> },

    #[error("Failed to ping database: {source}")]
    Ping { source: Box<DbError> },

    // -------------------------------------------------------------------------
    // Transaction lifecycle
    // -------------------------------------------------------------------------
    #[error("Failed to begin transaction: {source}")]
    Begin { source: Box<DbError> },

    #[error("Failed to commit transaction: {source}")]
    Commit { source: Box<DbError> },

    /// The unit of work failed and so did the rollback that followed.
    #[error("{error} (rollback also failed: {rollback})")]
    RollbackOnError {
        #[source]
        error: Box<DbError>,
        rollback: Box<DbError>,
    },

    /// The unit of work panicked. Carried as the payload of the re-raised panic.
    #[error("Transaction aborted by panic: {fault}{}", rollback_suffix(.rollback))]
    RollbackOnFault {
        fault: String,
        #[source]
        rollback: Option<Box<DbError>>,
    },

    // -------------------------------------------------------------------------
    // Row scanning
    // -------------------------------------------------------------------------
    #[error("Query execution failed: {source}")]
    QueryExec { source: Box<DbError> },

    #[error("Column description failed: {message}")]
    ColumnDescribe { message: String },

    #[error("Row scan failed on column '{column}': {source}")]
    RowScan { column: String, source: Box<DbError> },

    #[error("Cursor release failed: {source}")]
    CursorRelease { source: Box<DbError> },

    #[error("Row iteration failed: {source}")]
    Iteration { source: Box<DbError> },

    #[error("No rows returned")]
    NotFound,
}

fn rollback_suffix(rollback: &Option<Box<DbError>>) -> String {
    match rollback {
        Some(err) => format!(" (rollback also failed: {})", err),
        None => String::new(),
    }
}

impl DbError {
    /// Create a driver error with a helpful suggestion.
    pub fn driver(
        message: impl Into<String>,
        suggestion: impl Into<String>,
        source: sqlx::Error,
    ) -> Self {
        Self::Driver {
            message: message.into(),
            suggestion: suggestion.into(),
            source,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a cancellation error.
    pub fn canceled(operation: impl Into<String>) -> Self {
        Self::Canceled {
            operation: operation.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Wrap a caller-defined error returned from a unit of work.
    pub fn work(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Work {
            source: source.into(),
        }
    }

    pub fn connection_open(cause: DbError) -> Self {
        Self::ConnectionOpen {
            source: Box::new(cause),
        }
    }

    pub fn ping(cause: DbError) -> Self {
        Self::Ping {
            source: Box::new(cause),
        }
    }

    pub fn begin(cause: DbError) -> Self {
        Self::Begin {
            source: Box::new(cause),
        }
    }

    pub fn commit(cause: DbError) -> Self {
        Self::Commit {
            source: Box::new(cause),
        }
    }

    pub fn rollback_on_error(error: DbError, rollback: DbError) -> Self {
        Self::RollbackOnError {
            error: Box::new(error),
            rollback: Box::new(rollback),
        }
    }

    pub fn rollback_on_fault(fault: impl Into<String>, rollback: Option<DbError>) -> Self {
        Self::RollbackOnFault {
            fault: fault.into(),
            rollback: rollback.map(Box::new),
        }
    }

    pub fn query_exec(cause: DbError) -> Self {
        Self::QueryExec {
            source: Box::new(cause),
        }
    }

    pub fn column_describe(message: impl Into<String>) -> Self {
        Self::ColumnDescribe {
            message: message.into(),
        }
    }

    pub fn row_scan(column: impl Into<String>, cause: DbError) -> Self {
        Self::RowScan {
            column: column.into(),
            source: Box::new(cause),
        }
    }

    pub fn cursor_release(cause: DbError) -> Self {
        Self::CursorRelease {
            source: Box::new(cause),
        }
    }

    pub fn iteration(cause: DbError) -> Self {
        Self::Iteration {
            source: Box::new(cause),
        }
    }

    /// The error wrapped by a stage variant, if any.
    ///
    /// For joined rollback errors this is the original failure.
    pub fn cause(&self) -> Option<&DbError> {
        match self {
            Self::ConnectionOpen { source }
            | Self::Ping { source }
            | Self::Begin { source }
            | Self::Commit { source }
            | Self::QueryExec { source }
            | Self::RowScan { source, .. }
            | Self::CursorRelease { source }
            | Self::Iteration { source } => Some(source),
            Self::RollbackOnError { error, .. } => Some(error),
            Self::RollbackOnFault { rollback, .. } => rollback.as_deref(),
            _ => None,
        }
    }

    /// Follow stage wrappers down to the innermost cause.
    pub fn root_cause(&self) -> &DbError {
        let mut current = self;
        while let Some(next) = current.cause() {
            current = next;
        }
        current
    }

    /// The failure returned by the unit of work, for joined rollback errors.
    pub fn original(&self) -> Option<&DbError> {
        match self {
            Self::RollbackOnError { error, .. } => Some(error),
            _ => None,
        }
    }

    /// The rollback failure carried by a joined error, if one occurred.
    pub fn rollback_error(&self) -> Option<&DbError> {
        match self {
            Self::RollbackOnError { rollback, .. } => Some(rollback),
            Self::RollbackOnFault { rollback, .. } => rollback.as_deref(),
            _ => None,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self.root_cause() {
            Self::Driver { suggestion, .. } => Some(suggestion),
            Self::ColumnDescribe { .. } => {
                Some("The result shape changed after the statement was described; retry the query")
            }
            _ => None,
        }
    }

    /// SQLSTATE (or vendor code) reported by the server, if any.
    pub fn sql_state(&self) -> Option<String> {
        match self.root_cause() {
            Self::Driver { source, .. } => source
                .as_database_error()
                .and_then(|db_err| db_err.code())
                .map(|code| code.into_owned()),
            _ => None,
        }
    }

    /// Check if this error reports that a single-row query matched nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Self::NotFound)
    }

    /// Check if this error is retryable.
    ///
    /// Nothing in this crate retries; the flag lets callers decide. Serialization
    /// failures and deadlocks (SQLSTATE 40001/40P01) are the expected outcome of
    /// SERIALIZABLE transactions under contention.
    pub fn is_retryable(&self) -> bool {
        if let Some(state) = self.sql_state() {
            return matches!(state.as_str(), "40001" | "40P01");
        }
        match self.root_cause() {
            Self::Timeout { .. } => true,
            Self::Driver { source, .. } => {
                matches!(source, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
            }
            _ => false,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let (message, suggestion) = match &err {
            sqlx::Error::Configuration(msg) => (
                format!("Configuration error: {}", msg),
                "Check the connection string format and credentials".to_string(),
            ),
            sqlx::Error::Database(db_err) => {
                let message = match db_err.code() {
                    Some(code) => format!("{} (SQLSTATE: {})", db_err.message(), code),
                    None => db_err.message().to_string(),
                };
                (
                    message,
                    "Check the SQL syntax and referenced objects".to_string(),
                )
            }
            sqlx::Error::RowNotFound => (
                "No rows returned".to_string(),
                "Verify the query conditions match existing data".to_string(),
            ),
            sqlx::Error::PoolTimedOut => (
                "Timed out acquiring a connection from the pool".to_string(),
                "Increase max open connections or shorten transactions".to_string(),
            ),
            sqlx::Error::PoolClosed => (
                "Connection pool is closed".to_string(),
                "Open a new pool".to_string(),
            ),
            sqlx::Error::Io(io_err) => (
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status".to_string(),
            ),
            sqlx::Error::Tls(tls_err) => (
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates".to_string(),
            ),
            sqlx::Error::Protocol(msg) => (
                format!("Protocol error: {}", msg),
                "Check database server compatibility".to_string(),
            ),
            sqlx::Error::TypeNotFound { type_name } => (
                format!("Type not found: {}", type_name),
                "Check that the type exists in the target database".to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => (
                format!("Column not found: {}", col),
                "Check the column names selected by the query".to_string(),
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => (
                format!("Column index {} out of bounds (len: {})", index, len),
                "The row shape changed while it was being read".to_string(),
            ),
            sqlx::Error::ColumnDecode { index, source } => (
                format!("Failed to decode column {}: {}", index, source),
                "Cast the column to a supported type in the query".to_string(),
            ),
            sqlx::Error::Decode(source) => (
                format!("Decode error: {}", source),
                "Cast the column to a supported type in the query".to_string(),
            ),
            sqlx::Error::WorkerCrashed => (
                "Database worker crashed".to_string(),
                "Open a new pool".to_string(),
            ),
            _ => (
                format!("Database error: {}", err),
                "Check database driver configuration".to_string(),
            ),
        };
        DbError::driver(message, suggestion, err)
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
