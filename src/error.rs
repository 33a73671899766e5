//! Error types for polydb.
//!
//! Every backend error is normalized into [`DbError`] before it reaches the
//! caller. Variants carry enough context (pool, table, native code) for the
//! caller to decide whether to retry; this crate never retries on its own.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// A connection could not be borrowed from the pool or the backend is unreachable.
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    /// The backend rejected a statement or native call.
    #[error("Database error: {message}")]
    Database {
        message: String,
        /// SQLSTATE for relational backends, error type for native APIs
        code: Option<String>,
        suggestion: String,
    },

    #[error("Record already exists in {table}")]
    RecordExists { table: String },

    /// A table or column is only known from declarations, not from the backend.
    #[error("Schema mismatch: {message} (object: {object})")]
    SchemaMismatch { message: String, object: String },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Pool not found: {pool}")]
    PoolNotFound { pool: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with an optional native code.
    pub fn database(
        message: impl Into<String>,
        code: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            code,
            suggestion: suggestion.into(),
        }
    }

    pub fn record_exists(table: impl Into<String>) -> Self {
        Self::RecordExists {
            table: table.into(),
        }
    }

    pub fn schema_mismatch(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
            object: object.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn pool_not_found(pool: impl Into<String>) -> Self {
        Self::PoolNotFound { pool: pool.into() }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Native error code, if the backend reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// True for unique-key violations reported by any relational backend.
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            Self::RecordExists { .. } => true,
            // 23505 postgres, 23000 mysql, 2067/1555 sqlite extended codes
            Self::Database { code, message, .. } => {
                matches!(code.as_deref(), Some("23505" | "23000" | "2067" | "1555"))
                    || message.contains("UNIQUE constraint failed")
            }
            _ => false,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reopen the pool")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::schema_mismatch(
                format!("Type not found: {}", type_name),
                type_name.to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema_mismatch(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

impl From<sled::Error> for DbError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Io(io_err) => DbError::connection(
                format!("sled I/O error: {}", io_err),
                "Check that the data directory exists and is writable",
            ),
            other => DbError::storage(format!("sled: {}", other)),
        }
    }
}

impl From<redb::Error> for DbError {
    fn from(err: redb::Error) -> Self {
        DbError::storage(format!("redb: {}", err))
    }
}

impl From<reqwest::Error> for DbError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DbError::timeout("http request", 0)
        } else if err.is_connect() {
            DbError::connection(
                format!("HTTP connect error: {}", err),
                "Check the endpoint URL and network connectivity",
            )
        } else {
            DbError::database(format!("HTTP error: {}", err), None, "Check the request")
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::invalid_input(format!("JSON error: {}", err))
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
