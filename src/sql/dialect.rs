//! Per-backend SQL flavour: placeholders, operator and type translation, DDL capabilities.

use crate::models::Options;
use std::collections::BTreeMap;

/// Bind parameter syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `$1`, `$2` (PostgreSQL)
    Dollar,
    /// `?1`, `?2` (SQLite)
    Numbered,
    /// `?` (MySQL, CQL)
    Question,
}

impl Placeholder {
    /// Placeholder for the `n`-th parameter, 1-based.
    pub fn render(&self, n: usize) -> String {
        match self {
            Placeholder::Dollar => format!("${n}"),
            Placeholder::Numbered => format!("?{n}"),
            Placeholder::Question => "?".to_string(),
        }
    }
}

/// Translation tables and capability flags of one SQL-speaking backend.
#[derive(Debug, Clone)]
pub struct Dialect {
    pub placeholder: Placeholder,
    /// Operator aliases: `gt` → `>`, `ne` → `<>`, ...
    pub ops_map: BTreeMap<String, String>,
    /// Logical type → native column type
    pub types_map: BTreeMap<String, String>,
    /// Column type used when a declaration has none
    pub default_type: String,
    pub if_not_exists_table: bool,
    pub if_not_exists_index: bool,
    /// Ignore `len` on declared columns
    pub no_lengths: bool,
    /// NOT NULL is not supported
    pub no_nulls: bool,
    /// DEFAULT is not supported
    pub no_defaults: bool,
    /// Keyword for auto-increment columns, `None` when unsupported
    pub auto_increment: Option<String>,
    /// Infix concatenation (`col || $n`) instead of `CONCAT(col,$n)`
    pub concat_operator: Option<String>,
    /// `col + $n` instead of `COALESCE(col, 0) + $n`
    pub no_coalesce: bool,
    /// Json values are bound as text and parsed back on read
    pub no_json: bool,
    /// DDL batches are executed one statement at a time
    pub no_multi_sql: bool,
    /// Appended after the closing parenthesis of CREATE TABLE
    pub table_options: Option<String>,
}

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

const COMMON_OPS: &[(&str, &str)] = &[
    ("eq", "="),
    ("ne", "<>"),
    ("le", "<="),
    ("lt", "<"),
    ("ge", ">="),
    ("gt", ">"),
];

impl Default for Dialect {
    fn default() -> Self {
        Self {
            placeholder: Placeholder::Dollar,
            ops_map: string_map(COMMON_OPS),
            types_map: string_map(&[("mtime", "bigint")]),
            default_type: "text".to_string(),
            if_not_exists_table: true,
            if_not_exists_index: true,
            no_lengths: false,
            no_nulls: false,
            no_defaults: false,
            auto_increment: None,
            concat_operator: None,
            no_coalesce: false,
            no_json: false,
            no_multi_sql: false,
            table_options: None,
        }
    }
}

impl Dialect {
    pub fn sqlite() -> Self {
        let mut d = Self {
            placeholder: Placeholder::Numbered,
            no_lengths: true,
            no_multi_sql: true,
            concat_operator: Some("||".to_string()),
            ..Self::default()
        };
        d.types_map.extend(string_map(&[
            ("counter", "int"),
            ("bigint", "int"),
            ("mtime", "int"),
        ]));
        d
    }

    pub fn postgres() -> Self {
        let mut d = Self::default();
        d.types_map.extend(string_map(&[
            ("real", "numeric"),
            ("counter", "bigint"),
            ("bool", "boolean"),
        ]));
        d
    }

    pub fn mysql() -> Self {
        let mut d = Self {
            placeholder: Placeholder::Question,
            default_type: "VARCHAR(128)".to_string(),
            // CREATE INDEX has no IF NOT EXISTS
            if_not_exists_index: false,
            auto_increment: Some("AUTO_INCREMENT".to_string()),
            no_json: true,
            no_multi_sql: true,
            ..Self::default()
        };
        d.types_map.extend(string_map(&[
            ("json", "text"),
            ("counter", "bigint"),
        ]));
        d
    }

    /// Cassandra query language.
    pub fn cql() -> Self {
        let mut d = Self {
            placeholder: Placeholder::Question,
            no_lengths: true,
            no_nulls: true,
            no_defaults: true,
            concat_operator: Some("+".to_string()),
            no_coalesce: true,
            no_json: true,
            no_multi_sql: true,
            ..Self::default()
        };
        d.ops_map.insert("begins_with".into(), "begins_with".into());
        d.types_map.extend(string_map(&[
            ("json", "text"),
            ("real", "double"),
            ("counter", "counter"),
            ("mtime", "bigint"),
        ]));
        d
    }

    /// Translate an operator, call-site mapping first.
    pub fn map_op(&self, options: &Options, op: &str) -> String {
        let lower = op.to_lowercase();
        options
            .ops_map
            .get(&lower)
            .or_else(|| self.ops_map.get(&lower))
            .cloned()
            .unwrap_or(lower)
    }

    /// Native column type for a declared logical type.
    pub fn map_type(&self, options: &Options, kind: Option<&str>) -> String {
        let kind = kind.unwrap_or(self.default_type.as_str());
        let lower = kind.to_lowercase();
        options
            .types_map
            .get(&lower)
            .or_else(|| self.types_map.get(&lower))
            .cloned()
            .unwrap_or_else(|| kind.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_render() {
        assert_eq!(Placeholder::Dollar.render(3), "$3");
        assert_eq!(Placeholder::Numbered.render(1), "?1");
        assert_eq!(Placeholder::Question.render(7), "?");
    }

    #[test]
    fn test_map_op_prefers_options() {
        let d = Dialect::sqlite();
        let opts = Options::default();
        assert_eq!(d.map_op(&opts, "GT"), ">");
        // A prefix range, LIKE would treat `_` and `%` in the prefix as wildcards
        assert_eq!(d.map_op(&opts, "begins_with"), "begins_with");
        let mut opts = Options::default();
        opts.ops_map.insert("begins_with".into(), "like".into());
        assert_eq!(d.map_op(&opts, "begins_with"), "like");
        assert_eq!(d.map_op(&opts, "between"), "between");
    }

    #[test]
    fn test_map_type() {
        let opts = Options::default();
        assert_eq!(Dialect::sqlite().map_type(&opts, Some("counter")), "int");
        assert_eq!(Dialect::postgres().map_type(&opts, Some("real")), "numeric");
        assert_eq!(Dialect::mysql().map_type(&opts, None), "VARCHAR(128)");
        assert_eq!(Dialect::cql().map_type(&opts, Some("json")), "text");
        assert_eq!(Dialect::postgres().map_type(&opts, Some("varchar")), "varchar");
    }
}
