//! Database dispatch macros for reducing code duplication.
//!
//! The macros expand to plain `match` statements over the per-database enums,
//! so each arm is monomorphized against the concrete sqlx driver.

/// Generate match arms over `DbPool` variants.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => ping_one(p).await,
///     Postgres(p) => ping_one(p).await,
///     SQLite(p) => ping_one(p).await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Generate match arms over `DbTransaction` variants.
macro_rules! impl_tx_dispatch {
    ($tx:expr, { $($variant:ident($t:ident) => $body:expr),+ $(,)? }) => {
        match $tx {
            $(
                $crate::db::transaction::DbTransaction::$variant($t) => $body,
            )+
        }
    };
}

pub use impl_db_dispatch;
pub(crate) use impl_tx_dispatch;
