//! Data models for polydb.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod options;
pub mod request;
pub mod schema;
pub mod value;

// Re-export commonly used types
pub use connection::{BackendKind, PoolConfig, PoolConfigError};
pub use options::{CheckData, DEFAULT_COUNT, MAX_COUNT, Options, SortKey};
pub use request::{Input, Op, QueryOutput, Request, RequestBody, ResultInfo, SqlStatement, Token};
pub use schema::{
    ColumnEntry, ColumnInfo, ColumnMap, ColumnSpec, DbType, TableIntrospection, TableSchema,
    TableSpec,
};
pub use value::{Row, Value, row_from_json, row_to_json};
