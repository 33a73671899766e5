//! Read-through cache collaborator for `get` with `cached`.

use crate::error::DbResult;
use crate::models::{Row, Value};
use async_trait::async_trait;
use dashmap::DashMap;

/// Key/value cache consulted by cached reads and invalidated by writes.
#[async_trait]
pub trait Cache: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> DbResult<Option<Row>>;
    async fn put(&self, key: &str, row: Row) -> DbResult<()>;
    async fn delete(&self, key: &str) -> DbResult<()>;
    /// Drop every key starting with `prefix`.
    async fn clear(&self, prefix: &str) -> DbResult<()>;
}

/// `<prefix or table>:<key value>:<key value>...`
pub fn cache_key(table: &str, keys: &[String], row: &Row, prefix: Option<&str>) -> String {
    let mut key = prefix.unwrap_or(table).to_string();
    for name in keys {
        key.push(':');
        key.push_str(&row.get(name).map(Value::to_text).unwrap_or_default());
    }
    key
}

/// In-process cache.
#[derive(Debug, Default)]
pub struct LocalCache {
    entries: DashMap<String, Row>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for LocalCache {
    async fn get(&self, key: &str) -> DbResult<Option<Row>> {
        Ok(self.entries.get(key).map(|r| r.value().clone()))
    }

    async fn put(&self, key: &str, row: Row) -> DbResult<()> {
        self.entries.insert(key.to_string(), row);
        Ok(())
    }

    async fn delete(&self, key: &str) -> DbResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> DbResult<()> {
        self.entries.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}
