//! Backend adapters.
//!
//! Each adapter implements [`Pool`] for one family of stores:
//! - `sql`: SQLite, PostgreSQL and MySQL through sqlx
//! - `dynamodb`: item store over HTTP or in process
//! - `cassandra`: column-family store through a CQL session
//! - `kv`: embedded ordered key-value files (sled, redb)

pub mod cassandra;
pub mod dynamodb;
pub mod kv;
pub mod predicate;
pub mod sql;

use crate::db::pool::{NonePool, Pool};
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, Options, PoolConfig, Row};
use std::sync::Arc;

/// Open the pool described by `config`.
pub async fn open(config: &PoolConfig) -> DbResult<Arc<dyn Pool>> {
    config
        .pool_options
        .validate()
        .map_err(|e| DbError::invalid_input(format!("Pool '{}': {}", config.name, e)))?;
    let pool: Arc<dyn Pool> = match config.kind {
        BackendKind::SQLite | BackendKind::PostgreSQL | BackendKind::MySQL => {
            Arc::new(sql::SqlPool::connect(config).await?)
        }
        BackendKind::DynamoDB => Arc::new(dynamodb::DynamoPool::connect(config)?),
        BackendKind::Cassandra => open_cassandra(config).await?,
        BackendKind::Sled => Arc::new(kv::KvPool::new(
            &config.name,
            BackendKind::Sled,
            kv::sled::SledStore::open(config.location())?,
            &config.pool_options,
        )?),
        BackendKind::Redb => Arc::new(kv::KvPool::new(
            &config.name,
            BackendKind::Redb,
            kv::redb::RedbStore::open(config.location())?,
            &config.pool_options,
        )?),
        BackendKind::None => Arc::new(NonePool::new(&config.name)?),
    };
    Ok(pool)
}

#[cfg(feature = "cassandra")]
async fn open_cassandra(config: &PoolConfig) -> DbResult<Arc<dyn Pool>> {
    let client = cassandra::scylla::ScyllaClient::connect(config).await?;
    Ok(Arc::new(cassandra::CqlPool::new(
        &config.name,
        Arc::new(client),
        &config.pool_options,
    )?))
}

#[cfg(not(feature = "cassandra"))]
async fn open_cassandra(config: &PoolConfig) -> DbResult<Arc<dyn Pool>> {
    Err(DbError::invalid_input(format!(
        "Pool '{}': Cassandra support is not compiled in (enable the `cassandra` feature)",
        config.name
    )))
}

/// Columns of `row` that schemaless stores persist: no empty or `_` names,
/// no `skip_columns`, no nulls under `skip_null`.
pub(crate) fn writable(row: &Row, options: &Options) -> Row {
    row.iter()
        .filter(|(name, value)| {
            !name.is_empty()
                && !name.starts_with('_')
                && !options.skip_columns.contains(name)
                && !(options.skip_null && value.is_null())
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Apply the `select` projection to a fetched row.
pub(crate) fn project(mut row: Row, options: &Options) -> Row {
    if !options.select.is_empty() {
        row.retain(|name, _| options.select.contains(name));
    }
    row
}
