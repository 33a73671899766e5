//! Table and column schema models.
//!
//! A column may be known from two sources: the application's declaration
//! ([`ColumnSpec`]) and the backend's catalog ([`ColumnInfo`]). The schema
//! cache keeps both side by side in a [`ColumnEntry`].

use crate::models::value::Value;
use serde::Serialize;
use std::collections::BTreeMap;

/// Normalized value family of a column, used for coercion of bound values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Number,
    Bool,
    Date,
    Json,
    Array,
    Bytes,
    #[default]
    Text,
}

impl DbType {
    /// Classify a native or declared type name.
    pub fn from_native(type_name: &str) -> Self {
        let lower = type_name.to_lowercase();
        if lower.ends_with("[]") || lower == "array" || lower.starts_with("list") || lower.starts_with("set<") {
            return DbType::Array;
        }
        if lower.contains("int")
            || lower.contains("serial")
            || lower.contains("real")
            || lower.contains("float")
            || lower.contains("double")
            || lower.contains("numeric")
            || lower.contains("decimal")
            || lower == "number"
            || lower == "counter"
            || lower == "mtime"
        {
            return DbType::Number;
        }
        if lower == "bool" || lower == "boolean" {
            return DbType::Bool;
        }
        if lower.contains("timestamp") || lower.contains("date") || lower == "time" {
            return DbType::Date;
        }
        if lower == "json" || lower == "jsonb" {
            return DbType::Json;
        }
        if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
            return DbType::Bytes;
        }
        DbType::Text
    }
}

/// Application-declared column definition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    /// Logical type (`int`, `bigint`, `real`, `text`, `json`, `counter`, `bool`, ...)
    pub kind: Option<String>,
    pub primary: bool,
    pub unique: bool,
    /// Index groups this column belongs to: 0 → `<table>_idx`, 1 → `_idx1`, 2 → `_idx2`
    pub index: Vec<u8>,
    /// Default value
    pub value: Option<Value>,
    pub len: Option<u32>,
    pub not_null: bool,
    pub auto: bool,
    /// Returned to non-owners when results are redacted
    pub public: bool,
    pub semipub: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn index(mut self, group: u8) -> Self {
        if !self.index.contains(&group) {
            self.index.push(group);
        }
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn len(mut self, len: u32) -> Self {
        self.len = Some(len);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn auto(mut self) -> Self {
        self.auto = true;
        self
    }

    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }

    pub fn semipub(mut self) -> Self {
        self.semipub = true;
        self
    }

    pub fn db_type(&self) -> DbType {
        self.kind.as_deref().map(DbType::from_native).unwrap_or_default()
    }
}

/// Application-declared table: ordered list of column specs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.retain(|c| c.name != column.name);
        self.columns.push(column);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key columns in declaration order.
    pub fn primary_keys(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.primary)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Columns of index group `group`, in declaration order.
    pub fn index_columns(&self, group: u8) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.index.contains(&group))
            .map(|c| c.name.clone())
            .collect()
    }

    /// Parse a JSON table declaration:
    /// `{"id": {"primary": true, "type": "int"}, "name": {}}`.
    pub fn from_json(name: impl Into<String>, value: &serde_json::Value) -> Self {
        let mut table = TableSpec::new(name);
        let Some(obj) = value.as_object() else {
            return table;
        };
        for (col, def) in obj {
            let mut spec = ColumnSpec::new(col.clone());
            let flag = |key: &str| {
                def.get(key)
                    .map(|v| v.as_bool().unwrap_or(v.as_i64().unwrap_or(0) != 0))
                    .unwrap_or(false)
            };
            spec.kind = def.get("type").and_then(|v| v.as_str()).map(String::from);
            spec.primary = flag("primary");
            spec.unique = flag("unique");
            spec.not_null = flag("notnull");
            spec.auto = flag("auto");
            spec.public = flag("pub");
            spec.semipub = flag("semipub");
            spec.len = def.get("len").and_then(|v| v.as_u64()).map(|v| v as u32);
            spec.value = def.get("value").cloned().map(Value::from_json);
            for (group, key) in ["index", "index1", "index2"].iter().enumerate() {
                if flag(key) {
                    spec.index.push(group as u8);
                }
            }
            table.columns.push(spec);
        }
        table
    }
}

/// Column as reported by the backend catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub native_type: String,
    pub db_type: DbType,
    pub nullable: bool,
    pub position: u32,
    pub default: Option<String>,
    pub primary: bool,
}

impl ColumnInfo {
    pub fn new(native_type: impl Into<String>, position: u32) -> Self {
        let native_type = native_type.into();
        Self {
            db_type: DbType::from_native(&native_type),
            native_type,
            nullable: true,
            position,
            default: None,
            primary: false,
        }
    }
}

/// Cached view of one column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnEntry {
    pub declared: Option<ColumnSpec>,
    pub introspected: Option<ColumnInfo>,
    /// Declared but not confirmed to exist in the backend
    pub provisional: bool,
}

impl ColumnEntry {
    pub fn db_type(&self) -> DbType {
        match (&self.introspected, &self.declared) {
            (Some(info), _) => info.db_type,
            (None, Some(spec)) => spec.db_type(),
            (None, None) => DbType::Text,
        }
    }

    /// Declared logical type, if any.
    pub fn kind(&self) -> Option<&str> {
        self.declared.as_ref().and_then(|d| d.kind.as_deref())
    }

    pub fn is_primary(&self) -> bool {
        self.declared.as_ref().is_some_and(|d| d.primary)
            || self.introspected.as_ref().is_some_and(|i| i.primary)
    }

    pub fn is_public(&self) -> bool {
        self.declared.as_ref().is_some_and(|d| d.public || d.semipub)
    }
}

pub type ColumnMap = BTreeMap<String, ColumnEntry>;

/// Result of introspecting one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableIntrospection {
    pub columns: BTreeMap<String, ColumnInfo>,
    /// Primary key columns in key order
    pub keys: Vec<String>,
    /// Index name → columns
    pub indexes: BTreeMap<String, Vec<String>>,
}

/// Snapshot of one table's cached schema, handed to the statement builders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub columns: ColumnMap,
    pub keys: Vec<String>,
    /// Index name → columns, pool-wide
    pub indexes: BTreeMap<String, Vec<String>>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnEntry> {
        self.columns.get(name)
    }

    /// True when the table is known only from declarations.
    pub fn is_provisional(&self) -> bool {
        !self.columns.is_empty() && self.columns.values().all(|c| c.provisional)
    }

    /// Columns returned to non-owners when results are redacted.
    pub fn public_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|(_, c)| c.is_public())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_db_type_from_native() {
        assert_eq!(DbType::from_native("INTEGER"), DbType::Number);
        assert_eq!(DbType::from_native("double precision"), DbType::Number);
        assert_eq!(DbType::from_native("jsonb"), DbType::Json);
        assert_eq!(DbType::from_native("timestamp with time zone"), DbType::Date);
        assert_eq!(DbType::from_native("text[]"), DbType::Array);
        assert_eq!(DbType::from_native("varchar"), DbType::Text);
        assert_eq!(DbType::from_native("boolean"), DbType::Bool);
    }

    #[test]
    fn test_table_spec_keys_and_indexes() {
        let table = TableSpec::new("msg")
            .column(ColumnSpec::new("id").primary())
            .column(ColumnSpec::new("mtime").kind("bigint").primary().index(1))
            .column(ColumnSpec::new("status").index(0).index(1));
        assert_eq!(table.primary_keys(), vec!["id", "mtime"]);
        assert_eq!(table.index_columns(0), vec!["status"]);
        assert_eq!(table.index_columns(1), vec!["mtime", "status"]);
    }

    #[test]
    fn test_table_spec_from_json() {
        let table = TableSpec::from_json(
            "users",
            &json!({
                "id": {"primary": 1},
                "name": {"pub": true, "len": 64},
                "age": {"type": "int", "value": 0, "index": 1}
            }),
        );
        let id = table.get("id").unwrap();
        assert!(id.primary);
        let name = table.get("name").unwrap();
        assert!(name.public);
        assert_eq!(name.len, Some(64));
        let age = table.get("age").unwrap();
        assert_eq!(age.db_type(), DbType::Number);
        assert_eq!(age.value, Some(Value::Int(0)));
        assert_eq!(age.index, vec![0]);
    }

    #[test]
    fn test_table_schema_provisional() {
        let mut schema = TableSchema::new("t");
        assert!(!schema.is_provisional());
        schema.columns.insert(
            "a".into(),
            ColumnEntry {
                declared: Some(ColumnSpec::new("a").public()),
                introspected: None,
                provisional: true,
            },
        );
        assert!(schema.is_provisional());
        assert_eq!(schema.public_columns(), vec!["a"]);
    }

    #[test]
    fn test_column_entry_prefers_introspected_type() {
        let entry = ColumnEntry {
            declared: Some(ColumnSpec::new("a").kind("text")),
            introspected: Some(ColumnInfo::new("integer", 1)),
            provisional: false,
        };
        assert_eq!(entry.db_type(), DbType::Number);
    }
}
