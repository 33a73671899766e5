//! Pool registry.
//!
//! Holds every open pool by name, the table → pool pinning and the default
//! pool. Built once at startup and shared through [`crate::engine::Db`].

use crate::adapters;
use crate::db::pool::{NonePool, Pool};
use crate::error::{DbError, DbResult};
use crate::models::{Options, PoolConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Name under which the fallback pool is always reachable.
pub const NONE_POOL: &str = "none";

#[derive(Debug, Clone)]
pub struct Registry {
    pools: Arc<RwLock<HashMap<String, Arc<dyn Pool>>>>,
    /// Table name → pool name
    tables: Arc<RwLock<HashMap<String, String>>>,
    default: Arc<RwLock<Option<String>>>,
    none: Arc<dyn Pool>,
}

impl Registry {
    pub fn new() -> DbResult<Self> {
        Ok(Self {
            pools: Arc::new(RwLock::new(HashMap::new())),
            tables: Arc::new(RwLock::new(HashMap::new())),
            default: Arc::new(RwLock::new(None)),
            none: Arc::new(NonePool::new(NONE_POOL)?),
        })
    }

    /// Open a pool from its configuration and register it.
    pub async fn open(&self, config: PoolConfig) -> DbResult<Arc<dyn Pool>> {
        // Early check for existing pool
        if self.exists(&config.name).await {
            return Err(duplicate(&config.name));
        }

        info!(
            pool = %config.name,
            backend = %config.kind,
            url = %config.masked_connection_string(),
            "Opening pool"
        );
        let pool = adapters::open(&config).await?;
        self.register(Arc::clone(&pool)).await?;
        info!(pool = %config.name, "Pool opened");
        Ok(pool)
    }

    /// Register an already constructed pool.
    pub async fn register(&self, pool: Arc<dyn Pool>) -> DbResult<()> {
        let name = pool.name().to_string();
        // Re-check after async work; close the duplicate outside of the lock
        let rejected = {
            let mut pools = self.pools.write().await;
            if name == NONE_POOL || pools.contains_key(&name) {
                Some(pool)
            } else {
                pools.insert(name.clone(), pool);
                None
            }
        };
        if let Some(pool) = rejected {
            pool.close().await;
            return Err(duplicate(&name));
        }
        debug!(pool = %name, "Pool registered");
        Ok(())
    }

    /// Route `table` to `pool`.
    pub async fn pin(&self, table: impl Into<String>, pool: impl Into<String>) {
        self.tables.write().await.insert(table.into(), pool.into());
    }

    pub async fn set_default(&self, pool: impl Into<String>) {
        *self.default.write().await = Some(pool.into());
    }

    pub async fn default_name(&self) -> Option<String> {
        self.default.read().await.clone()
    }

    pub async fn exists(&self, name: &str) -> bool {
        name == NONE_POOL || self.pools.read().await.contains_key(name)
    }

    pub async fn get(&self, name: &str) -> DbResult<Arc<dyn Pool>> {
        if name == NONE_POOL {
            return Ok(Arc::clone(&self.none));
        }
        self.pools
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::pool_not_found(name))
    }

    /// Pool for an operation: `options.pool`, then the pool the table is
    /// pinned to, then the default pool, then the none pool.
    pub async fn resolve(&self, options: &Options, table: &str) -> DbResult<Arc<dyn Pool>> {
        if let Some(name) = options.pool.as_deref() {
            return self.get(name).await;
        }
        let pinned = self.tables.read().await.get(table).cloned();
        if let Some(name) = pinned {
            return self.get(&name).await;
        }
        match self.default_name().await {
            Some(name) => self.get(&name).await,
            None => Ok(Arc::clone(&self.none)),
        }
    }

    /// Tables pinned to `pool`.
    pub async fn pinned_tables(&self, pool: &str) -> Vec<String> {
        let mut tables: Vec<String> = self
            .tables
            .read()
            .await
            .iter()
            .filter(|(_, p)| p.as_str() == pool)
            .map(|(t, _)| t.clone())
            .collect();
        tables.sort();
        tables
    }

    /// Registered pools, sorted by name.
    pub async fn pools(&self) -> Vec<Arc<dyn Pool>> {
        let mut pools: Vec<Arc<dyn Pool>> = self.pools.read().await.values().cloned().collect();
        pools.sort_by(|a, b| a.name().cmp(b.name()));
        pools
    }

    pub async fn names(&self) -> Vec<String> {
        self.pools().await.iter().map(|p| p.name().to_string()).collect()
    }

    /// Close every pool and clear the registry.
    pub async fn close_all(&self) {
        let drained: Vec<(String, Arc<dyn Pool>)> = self.pools.write().await.drain().collect();
        for (name, pool) in drained {
            info!(pool = %name, "Closing pool");
            pool.close().await;
        }
        info!("All pools closed");
    }
}

fn duplicate(name: &str) -> DbError {
    DbError::connection(
        format!("Pool '{}' already exists", name),
        "Use a different pool name",
    )
}
