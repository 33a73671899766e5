//! Per-pool schema cache.
//!
//! Two halves are kept per table: what the application declared and what the
//! backend reported. [`SchemaCache::load`] replaces the introspected half,
//! [`SchemaCache::declare`] the declared half, and both re-run the
//! reconciliation that marks declared-but-missing columns as provisional.

use crate::error::{DbError, DbResult};
use crate::models::{ColumnEntry, ColumnMap, TableIntrospection, TableSchema, TableSpec};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

#[derive(Debug, Default)]
struct State {
    declared: BTreeMap<String, TableSpec>,
    columns: BTreeMap<String, ColumnMap>,
    keys: BTreeMap<String, Vec<String>>,
    /// Index name → columns, pool-wide
    indexes: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
pub struct SchemaCache {
    state: RwLock<State>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a table declaration.
    pub fn declare(&self, table: TableSpec) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.declared.insert(table.name.clone(), table);
        merge(&mut state);
    }

    pub fn declared(&self, table: &str) -> Option<TableSpec> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.declared.get(table).cloned()
    }

    pub fn declared_tables(&self) -> Vec<TableSpec> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.declared.values().cloned().collect()
    }

    /// Replace the introspected half with a fresh catalog read.
    pub fn load(&self, tables: BTreeMap<String, TableIntrospection>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        for columns in state.columns.values_mut() {
            columns.retain(|_, entry| entry.declared.is_some());
            for entry in columns.values_mut() {
                entry.introspected = None;
            }
        }
        state.keys.clear();
        state.indexes.clear();

        for (table, info) in tables {
            let columns = state.columns.entry(table.clone()).or_default();
            for (name, column) in info.columns {
                columns.entry(name).or_default().introspected = Some(column);
            }
            if !info.keys.is_empty() {
                state.keys.insert(table.clone(), info.keys);
            }
            state.indexes.extend(info.indexes);
        }
        state.columns.retain(|_, columns| !columns.is_empty());
        merge(&mut state);
        debug!(tables = state.columns.len(), "Schema cache loaded");
    }

    /// Re-run reconciliation of declared against introspected columns.
    pub fn merge(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        merge(&mut state);
    }

    pub fn columns(&self, table: &str) -> ColumnMap {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.columns.get(table).cloned().unwrap_or_default()
    }

    /// Introspected primary key, else declared primary columns in declaration order.
    pub fn keys(&self, table: &str) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        table_keys(&state, table)
    }

    pub fn indexes(&self) -> BTreeMap<String, Vec<String>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.indexes.clone()
    }

    /// Index name → columns for indexes whose name starts with the table name.
    pub fn table_indexes(&self, table: &str) -> BTreeMap<String, Vec<String>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .indexes
            .iter()
            .filter(|(name, _)| name.starts_with(table))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn tables(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.columns.keys().cloned().collect()
    }

    /// Snapshot handed to statement builders.
    pub fn table(&self, table: &str) -> TableSchema {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        TableSchema {
            name: table.to_string(),
            columns: state.columns.get(table).cloned().unwrap_or_default(),
            keys: table_keys(&state, table),
            indexes: state.indexes.clone(),
        }
    }

    /// Snapshot that fails when the table is only known from declarations.
    pub fn strict_table(&self, table: &str) -> DbResult<TableSchema> {
        let schema = self.table(table);
        if schema.is_provisional() {
            return Err(DbError::schema_mismatch(
                "table is declared but does not exist in the backend",
                table,
            ));
        }
        Ok(schema)
    }

    /// Forget a dropped table; its declaration stays so it can be created again.
    pub fn remove(&self, table: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.columns.remove(table);
        state.keys.remove(table);
        state.indexes.retain(|name, _| !name.starts_with(table));
        merge(&mut state);
    }
}

fn table_keys(state: &State, table: &str) -> Vec<String> {
    if let Some(keys) = state.keys.get(table) {
        return keys.clone();
    }
    state
        .declared
        .get(table)
        .map(TableSpec::primary_keys)
        .unwrap_or_default()
}

fn merge(state: &mut State) {
    let State {
        declared, columns, ..
    } = state;
    for (table, spec) in declared.iter() {
        let cached = columns.entry(table.clone()).or_default();
        for col in &spec.columns {
            let entry = cached.entry(col.name.clone()).or_insert_with(ColumnEntry::default);
            entry.declared = Some(col.clone());
        }
    }
    for entry in columns.values_mut().flat_map(|c| c.values_mut()) {
        entry.provisional = entry.introspected.is_none();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnInfo, ColumnSpec};

    fn declared() -> TableSpec {
        TableSpec::new("users")
            .column(ColumnSpec::new("id").primary())
            .column(ColumnSpec::new("name").public())
            .column(ColumnSpec::new("email"))
    }

    fn introspected(cols: &[&str]) -> BTreeMap<String, TableIntrospection> {
        let mut info = TableIntrospection::default();
        for (pos, name) in cols.iter().enumerate() {
            info.columns
                .insert(name.to_string(), ColumnInfo::new("text", pos as u32));
        }
        info.keys = vec!["id".to_string()];
        BTreeMap::from([("users".to_string(), info)])
    }

    #[test]
    fn test_declared_only_columns_are_provisional() {
        let cache = SchemaCache::new();
        cache.declare(declared());
        let cols = cache.columns("users");
        assert_eq!(cols.len(), 3);
        assert!(cols.values().all(|c| c.provisional));
        assert!(cache.table("users").is_provisional());
        assert_eq!(cache.keys("users"), vec!["id"]);
    }

    #[test]
    fn test_load_clears_provisional_and_keeps_declared_metadata() {
        let cache = SchemaCache::new();
        cache.declare(declared());
        cache.load(introspected(&["id", "name"]));
        let cols = cache.columns("users");
        assert!(!cols["id"].provisional);
        assert!(!cols["name"].provisional);
        assert!(cols["name"].is_public());
        assert!(cols["email"].provisional);
        assert!(!cache.table("users").is_provisional());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let cache = SchemaCache::new();
        cache.declare(declared());
        cache.load(introspected(&["id", "name", "extra"]));
        let first = cache.table("users");
        cache.merge();
        cache.merge();
        assert_eq!(cache.table("users"), first);
        assert!(first.columns["extra"].declared.is_none());
        assert!(!first.columns["extra"].provisional);
    }

    #[test]
    fn test_reload_drops_vanished_columns() {
        let cache = SchemaCache::new();
        cache.load(introspected(&["id", "tmp"]));
        cache.load(introspected(&["id"]));
        assert!(!cache.columns("users").contains_key("tmp"));
    }

    #[test]
    fn test_strict_table() {
        let cache = SchemaCache::new();
        cache.declare(declared());
        assert!(matches!(
            cache.strict_table("users"),
            Err(DbError::SchemaMismatch { .. })
        ));
        cache.load(introspected(&["id"]));
        assert!(cache.strict_table("users").is_ok());
    }

    #[test]
    fn test_remove_keeps_declaration() {
        let cache = SchemaCache::new();
        cache.declare(declared());
        cache.load(introspected(&["id", "name", "email"]));
        cache.remove("users");
        assert!(cache.columns("users").values().all(|c| c.provisional));
        assert!(cache.declared("users").is_some());
    }
}
