//! CREATE / ALTER / DROP generation from table declarations.

use crate::models::{ColumnMap, ColumnSpec, Options, SqlStatement, TableSpec};
use crate::sql::dialect::Dialect;
use crate::sql::literal::value_literal;
use std::collections::BTreeMap;

/// Index name for index group `group`: `<table>_idx`, `_idx1`, `_idx2`.
pub fn index_name(table: &str, group: u8) -> String {
    if group == 0 {
        format!("{table}_idx")
    } else {
        format!("{table}_idx{group}")
    }
}

fn column_type(dialect: &Dialect, options: &Options, col: &ColumnSpec) -> String {
    let kind = dialect.map_type(options, col.kind.as_deref());
    match col.len {
        Some(len) if !dialect.no_lengths => format!("{kind}({len})"),
        _ => kind,
    }
}

fn default_clause(dialect: &Dialect, col: &ColumnSpec) -> Option<String> {
    if dialect.no_defaults {
        return None;
    }
    col.value
        .as_ref()
        .map(|v| format!("DEFAULT {}", value_literal(v, col.kind.as_deref(), None, None, None)))
}

fn column_def(dialect: &Dialect, options: &Options, col: &ColumnSpec) -> String {
    let mut parts = vec![col.name.clone(), column_type(dialect, options, col)];
    if col.not_null && !dialect.no_nulls {
        parts.push("NOT NULL".to_string());
    }
    if col.auto {
        if let Some(auto) = &dialect.auto_increment {
            parts.push(auto.clone());
        }
    }
    parts.extend(default_clause(dialect, col));
    parts.join(" ")
}

/// CREATE INDEX statements for groups not yet present in `existing`.
fn index_statements(
    dialect: &Dialect,
    table: &TableSpec,
    existing: &BTreeMap<String, Vec<String>>,
) -> Vec<String> {
    let if_not_exists = if dialect.if_not_exists_index {
        "IF NOT EXISTS "
    } else {
        ""
    };
    (0..3u8)
        .filter_map(|group| {
            let name = index_name(&table.name, group);
            if existing.contains_key(&name) {
                return None;
            }
            let cols = table.index_columns(group);
            if cols.is_empty() {
                return None;
            }
            let unique = cols
                .iter()
                .all(|c| table.get(c).is_some_and(|spec| spec.unique));
            Some(format!(
                "CREATE {}INDEX {if_not_exists}{name} ON {}({})",
                if unique { "UNIQUE " } else { "" },
                table.name,
                cols.join(",")
            ))
        })
        .collect()
}

fn finish(dialect: &Dialect, statements: Vec<String>) -> Option<SqlStatement> {
    if statements.is_empty() {
        None
    } else if dialect.no_multi_sql {
        Some(SqlStatement::batch(statements))
    } else {
        Some(SqlStatement::new(statements.join(";"), Vec::new()))
    }
}

/// CREATE TABLE plus its indexes.
pub fn create(
    dialect: &Dialect,
    table: &TableSpec,
    existing_indexes: &BTreeMap<String, Vec<String>>,
    options: &Options,
) -> Option<SqlStatement> {
    if table.columns.is_empty() {
        return None;
    }
    let mut defs: Vec<String> = table
        .columns
        .iter()
        .map(|c| column_def(dialect, options, c))
        .collect();
    let keys = table.primary_keys();
    if !keys.is_empty() {
        defs.push(format!("PRIMARY KEY({})", keys.join(",")));
    }
    let mut sql = format!(
        "CREATE TABLE {}{}({})",
        if dialect.if_not_exists_table {
            "IF NOT EXISTS "
        } else {
            ""
        },
        table.name,
        defs.join(",")
    );
    if let Some(extra) = &dialect.table_options {
        sql.push(' ');
        sql.push_str(extra);
    }
    let mut statements = vec![sql];
    statements.extend(index_statements(dialect, table, existing_indexes));
    finish(dialect, statements)
}

/// ALTER TABLE ADD for declared columns the table does not have yet.
pub fn upgrade(
    dialect: &Dialect,
    table: &TableSpec,
    columns: &ColumnMap,
    existing_indexes: &BTreeMap<String, Vec<String>>,
    options: &Options,
) -> Option<SqlStatement> {
    let mut statements: Vec<String> = table
        .columns
        .iter()
        .filter(|c| columns.get(&c.name).is_none_or(|e| e.provisional))
        .map(|c| {
            let mut parts = vec![
                format!("ALTER TABLE {} ADD {}", table.name, c.name),
                column_type(dialect, options, c),
            ];
            parts.extend(default_clause(dialect, c));
            parts.join(" ")
        })
        .collect();
    statements.extend(index_statements(dialect, table, existing_indexes));
    finish(dialect, statements)
}

pub fn drop(table: &str) -> SqlStatement {
    SqlStatement::new(format!("DROP TABLE IF EXISTS {table}"), Vec::new())
}
