//! Pool runtime.
//!
//! This module provides the machinery every backend shares:
//! - The `Pool` capability trait and the borrow/return lifecycle
//! - Request execution with metrics, row hooks, redaction and cache invalidation
//! - Schema cache and relational catalog introspection
//! - Type mappings and parameter binding for the sqlx drivers
//! - A per-driver expansion macro over the sqlx enums
//! - Pool registry and the embedded database file watcher

#[macro_use]
pub mod macros;
pub mod cache;
pub mod executor;
pub mod hooks;
pub mod introspect;
pub mod metrics;
pub mod params;
pub mod pool;
pub mod registry;
pub mod schema;
pub mod types;
pub mod watch;

pub use cache::{Cache, LocalCache, cache_key};
pub use executor::QueryExecutor;
pub use hooks::{RowHook, RowHooks};
pub use metrics::PoolMetrics;
pub use pool::{Connection, DbPool, Handle, NonePool, Pool, PoolCore, PutStrategy};
pub use registry::{NONE_POOL, Registry};
pub use schema::SchemaCache;
pub use watch::FileWatcher;
