//! Per-table row callbacks run on every result of a pool.

use crate::models::{Options, Row};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Callback applied to each row read from a table.
pub type RowHook = Arc<dyn Fn(&mut Row, &Options) + Send + Sync>;

/// Hooks by table name, run in the order they were added.
#[derive(Default)]
pub struct RowHooks {
    tables: DashMap<String, Vec<RowHook>>,
}

impl fmt::Debug for RowHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<(String, usize)> = self
            .tables
            .iter()
            .map(|e| (e.key().clone(), e.value().len()))
            .collect();
        f.debug_struct("RowHooks").field("tables", &counts).finish()
    }
}

impl RowHooks {
    pub fn add(&self, table: &str, hook: RowHook) {
        self.tables
            .entry(table.to_lowercase())
            .or_default()
            .push(hook);
    }

    pub fn clear(&self, table: &str) {
        self.tables.remove(&table.to_lowercase());
    }

    pub fn apply(&self, table: &str, rows: &mut [Row], options: &Options) {
        // Cloned so a hook may register further hooks
        let hooks = match self.tables.get(&table.to_lowercase()) {
            Some(entry) => entry.value().clone(),
            None => return,
        };
        for row in rows {
            for hook in &hooks {
                hook(row, options);
            }
        }
    }
}
