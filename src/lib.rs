//! polydb library
//!
//! One set of logical operations (get, select, add, put, update, incr,
//! replace, del and schema management) over SQLite, PostgreSQL, MySQL,
//! DynamoDB, Cassandra and embedded key-value stores.

pub mod adapters;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod geo;
pub mod models;
pub mod sql;

pub use config::Config;
pub use engine::Db;
pub use error::{DbError, DbResult};
