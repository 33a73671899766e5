//! sled-backed [`KvStore`]: one sled `Tree` per table.

use super::KvStore;
use crate::error::DbResult;
use std::path::Path;

#[derive(Debug)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open or create the store directory at `path`.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Store removed on drop.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    fn tree(&self, table: &str) -> DbResult<sled::Tree> {
        Ok(self.db.open_tree(table)?)
    }
}

impl KvStore for SledStore {
    fn get(&self, table: &str, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        Ok(self.tree(table)?.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.tree(table)?.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, table: &str, key: &[u8]) -> DbResult<bool> {
        Ok(self.tree(table)?.remove(key)?.is_some())
    }

    fn range(
        &self,
        table: &str,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let tree = self.tree(table)?;
        let iter = match end {
            Some(end) if end <= start => return Ok(Vec::new()),
            Some(end) => tree.range(start..end),
            None => tree.range(start..),
        };
        let mut result = Vec::new();
        for item in iter.take(limit) {
            let (k, v) = item?;
            result.push((k.to_vec(), v.to_vec()));
        }
        Ok(result)
    }

    fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
