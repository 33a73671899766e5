//! redb-backed [`KvStore`]: one redb table per table name in a single file.
//!
//! Reads use read transactions; a table that was never written reads as
//! empty. Writes commit one write transaction per call.

use super::KvStore;
use crate::error::{DbError, DbResult};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, TableError};
use std::path::{Path, PathBuf};
use tracing::debug;

fn storage(e: impl Into<redb::Error>) -> DbError {
    DbError::from(e.into())
}

fn definition(table: &str) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
    TableDefinition::new(table)
}

pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").field("path", &self.path).finish()
    }
}

impl RedbStore {
    /// Open or create the database file at `path`, creating parent
    /// directories.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DbError::connection(
                    format!("Failed to create {}: {}", parent.display(), e),
                    "Check that the data directory is writable",
                )
            })?;
        }
        let db = Database::create(&path).map_err(|e| {
            DbError::connection(
                format!("Failed to open redb at {}: {}", path.display(), e),
                "Check that the file is not locked by another process",
            )
        })?;
        debug!(path = %path.display(), "Opened redb store");
        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KvStore for RedbStore {
    fn get(&self, table: &str, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(storage)?;
        let table = match txn.open_table(definition(table)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(storage(e)),
        };
        Ok(table
            .get(key)
            .map_err(storage)?
            .map(|v| v.value().to_vec()))
    }

    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> DbResult<()> {
        let txn = self.db.begin_write().map_err(storage)?;
        {
            let mut table = txn.open_table(definition(table)).map_err(storage)?;
            table.insert(key, value).map_err(storage)?;
        }
        txn.commit().map_err(storage)?;
        Ok(())
    }

    fn delete(&self, table: &str, key: &[u8]) -> DbResult<bool> {
        let txn = self.db.begin_write().map_err(storage)?;
        let existed = {
            let mut table = txn.open_table(definition(table)).map_err(storage)?;
            table.remove(key).map_err(storage)?.is_some()
        };
        txn.commit().map_err(storage)?;
        Ok(existed)
    }

    fn range(
        &self,
        table: &str,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(storage)?;
        let table = match txn.open_table(definition(table)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(storage(e)),
        };
        let iter = match end {
            Some(end) if end <= start => return Ok(Vec::new()),
            Some(end) => table.range(start..end).map_err(storage)?,
            None => table.range(start..).map_err(storage)?,
        };
        let mut result = Vec::new();
        for item in iter.take(limit) {
            let (k, v) = item.map_err(storage)?;
            result.push((k.value().to_vec(), v.value().to_vec()));
        }
        Ok(result)
    }

    /// Commits are durable; nothing is buffered.
    fn flush(&self) -> DbResult<()> {
        Ok(())
    }
}
