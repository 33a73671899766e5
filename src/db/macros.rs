//! Per-driver expansion for the sqlx-backed enums.

/// Run the same expression against whichever sqlx driver `$value` wraps.
///
/// `$enum` names a driver enum from [`crate::db::pool`] (`DbPool` or
/// `Handle`). The body is repeated for MySQL, PostgreSQL and SQLite with the
/// inner value bound to `$bind`, so it must type-check for each driver.
/// Variants without a driver go to the trailing fallback arm.
///
/// ```ignore
/// each_driver!(handle, Handle, conn => conn.detach().close().await, Handle::Shared => Ok(()))
/// ```
macro_rules! each_driver {
    ($value:expr, $enum:ident, $bind:ident => $body:expr $(, $other:pat => $fallback:expr)? $(,)?) => {
        match $value {
            $crate::db::pool::$enum::MySql($bind) => $body,
            $crate::db::pool::$enum::Postgres($bind) => $body,
            $crate::db::pool::$enum::SQLite($bind) => $body,
            $($other => $fallback,)?
        }
    };
}

pub(crate) use each_driver;
