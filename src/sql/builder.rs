//! DML statement builder shared by the relational and CQL adapters.

use crate::models::{DbType, Input, Options, Row, SqlStatement, TableSchema, Value, value::parse_bool};
use crate::sql::dialect::Dialect;
use crate::sql::expr::{ExprSpec, expr};
use crate::sql::literal::{quote_value, value_in, value_literal};

/// Builds statements for one table with the per-call options applied.
pub struct SqlBuilder<'a> {
    dialect: &'a Dialect,
    schema: &'a TableSchema,
    options: &'a Options,
    /// Key seek appended to row conditions
    seek: Option<String>,
}

impl<'a> SqlBuilder<'a> {
    pub fn new(dialect: &'a Dialect, schema: &'a TableSchema, options: &'a Options) -> Self {
        Self {
            dialect,
            schema,
            options,
            seek: None,
        }
    }

    /// Keep only rows sorting after `start` on `columns`, compared as one
    /// tuple. With `token` the partition tokens are compared instead.
    pub fn after(mut self, columns: &[String], start: &Row, token: bool) -> Self {
        let literals: Vec<String> = columns
            .iter()
            .map(|c| {
                let value = start.get(c).map(|v| self.bind_value(c, v)).unwrap_or_default();
                value_literal(&value, None, None, None, None)
            })
            .collect();
        let (columns, literals) = (columns.join(","), literals.join(","));
        self.seek = Some(if token {
            format!("token({columns}) > token({literals})")
        } else {
            format!("({columns}) > ({literals})")
        });
        self
    }

    fn table(&self) -> &str {
        &self.schema.name
    }

    /// Condition columns: explicit keys, else the table's primary key.
    pub fn keys(&self) -> Vec<String> {
        if self.options.keys.is_empty() {
            self.schema.keys.clone()
        } else {
            self.options.keys.clone()
        }
    }

    /// True if the column must not take part in the statement.
    pub fn skip_column(&self, name: &str, value: Option<&Value>) -> bool {
        let opts = self.options;
        name.is_empty()
            || name.starts_with('_')
            || (opts.skip_null && value.is_some_and(Value::is_null))
            || (!opts.all_columns && !self.schema.columns.contains_key(name))
            || opts.skip_columns.iter().any(|c| c == name)
            || (!opts.select.is_empty() && !opts.select.iter().any(|c| c == name))
    }

    /// Projection for SELECT; `None` means `*`.
    ///
    /// Columns only known from declarations are not selected, they may not
    /// exist in the table yet.
    pub fn selected_columns(&self) -> Option<Vec<String>> {
        let cols: Vec<String> = self
            .schema
            .columns
            .iter()
            .filter(|(name, entry)| !entry.provisional && !self.skip_column(name, None))
            .map(|(name, _)| name.clone())
            .collect();
        (!cols.is_empty()).then_some(cols)
    }

    /// WHERE condition for an object or a list of objects.
    pub fn where_clause(&self, input: &Input) -> String {
        let cond = match input {
            Input::Row(row) => self.where_row(row),
            Input::List(rows) => return self.where_list(rows),
            _ => String::new(),
        };
        match &self.seek {
            Some(seek) if cond.is_empty() => seek.clone(),
            Some(seek) => format!("{cond} AND {seek}"),
            None => cond,
        }
    }

    fn where_row(&self, row: &Row) -> String {
        let mut conds = Vec::new();
        for key in self.keys() {
            let Some(value) = row.get(&key) else { continue };
            if matches!(value, Value::Text(s) if s.is_empty()) {
                continue;
            }
            let mut op = self.options.ops.get(&key).cloned().unwrap_or_default();
            if op.is_empty() {
                match value {
                    Value::Null => op = "null".into(),
                    Value::List(_) => op = "in".into(),
                    _ => {}
                }
            }
            let spec = ExprSpec {
                op: self.dialect.map_op(self.options, &op),
                kind: self.options.types_map.get(&key).cloned(),
                ..Default::default()
            };
            let sql = expr(&key, value, &spec);
            if !sql.is_empty() {
                conds.push(sql);
            }
        }
        conds.join(" AND ")
    }

    fn where_list(&self, rows: &[Row]) -> String {
        let Some(first) = rows.first() else {
            return String::new();
        };
        let keys = self.keys();
        if first.len() == 1 {
            if let Some(prop) = first.keys().next().filter(|p| keys.contains(p)) {
                let values: Vec<Value> = rows
                    .iter()
                    .map(|r| r.get(prop).cloned().unwrap_or_default())
                    .collect();
                return format!("{prop} IN ({})", value_in(&values, None));
            }
        }
        if keys.is_empty() {
            return String::new();
        }
        rows.iter()
            .map(|row| {
                let group = keys
                    .iter()
                    .map(|k| {
                        let v = row.get(k).map(|v| self.bind_value(k, v)).unwrap_or_default();
                        format!("{k}={}", quote_value(&v))
                    })
                    .collect::<Vec<_>>()
                    .join(" AND ");
                format!("({group})")
            })
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    /// ORDER BY / LIMIT / OFFSET suffix.
    pub fn limit(&self, count: u32) -> String {
        let mut sql = String::new();
        let order = self
            .options
            .sort
            .iter()
            .take(3)
            .map(|s| {
                if s.desc {
                    format!("{} DESC", s.column)
                } else {
                    s.column.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(",");
        if !order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }
        sql.push_str(&format!(" LIMIT {count}"));
        let offset = self.options.offset();
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        sql
    }

    /// SELECT; `count` overrides the page size (get uses 1).
    pub fn select(&self, input: &Input, count: Option<u32>) -> SqlStatement {
        let columns = if self.options.total {
            "COUNT(*) AS count".to_string()
        } else {
            self.selected_columns()
                .map(|c| c.join(","))
                .unwrap_or_else(|| "*".to_string())
        };
        let mut sql = format!("SELECT {columns} FROM {}", self.table());
        let cond = self.where_clause(input);
        if !cond.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&cond);
        }
        let count = count.unwrap_or_else(|| self.options.count_or_default());
        sql.push_str(&self.limit(count));
        SqlStatement::new(sql, Vec::new())
    }

    /// INSERT or REPLACE; `None` when no column survives filtering.
    pub fn insert(&self, row: &Row, replace: bool) -> Option<SqlStatement> {
        let mut names = Vec::new();
        let mut marks = Vec::new();
        let mut values = Vec::new();
        for (name, value) in row {
            if self.skip_column(name, Some(value)) {
                continue;
            }
            names.push(name.as_str());
            values.push(self.bind_value(name, value));
            marks.push(self.dialect.placeholder.render(values.len()));
        }
        if names.is_empty() {
            return None;
        }
        let verb = if replace { "REPLACE" } else { "INSERT" };
        let mut sql = format!(
            "{verb} INTO {}({}) values({})",
            self.table(),
            names.join(","),
            marks.join(",")
        );
        self.push_returning(&mut sql);
        Some(SqlStatement::new(sql, values))
    }

    /// UPDATE by key; `None` without a key condition or columns to set.
    pub fn update(&self, row: &Row) -> Option<SqlStatement> {
        let keys = self.keys();
        let mut sets = Vec::new();
        let mut values = Vec::new();
        for (name, value) in row {
            if keys.contains(name) || self.skip_column(name, Some(value)) {
                continue;
            }
            let entry = self.schema.column(name);
            if entry.is_some_and(|e| e.is_primary()) {
                continue;
            }
            values.push(self.bind_value(name, value));
            let mark = self.dialect.placeholder.render(values.len());
            let in_list = |list: &[String]| list.iter().any(|c| c == name);

            let set = if in_list(&self.options.coalesce) {
                format!("{name}=COALESCE({name},{mark})")
            } else if in_list(&self.options.concat) {
                match &self.dialect.concat_operator {
                    Some(op) => format!("{name}={name}{op}{mark}"),
                    None => format!("{name}=CONCAT({name},{mark})"),
                }
            } else if entry.and_then(|e| e.kind()) == Some("counter")
                || in_list(&self.options.counter)
            {
                if self.dialect.no_coalesce {
                    format!("{name}={name}+{mark}")
                } else {
                    format!("{name}=COALESCE({name},0)+{mark}")
                }
            } else {
                format!("{name}={mark}")
            };
            sets.push(set);
        }
        let cond = self.where_row(row);
        if sets.is_empty() || cond.is_empty() {
            return None;
        }
        let mut sql = format!("UPDATE {} SET {} WHERE {cond}", self.table(), sets.join(","));
        self.push_returning(&mut sql);
        Some(SqlStatement::new(sql, values))
    }

    /// DELETE by key; `None` without a key condition.
    pub fn delete(&self, input: &Input) -> Option<SqlStatement> {
        let cond = self.where_clause(input);
        if cond.is_empty() {
            return None;
        }
        let mut sql = format!("DELETE FROM {} WHERE {cond}", self.table());
        self.push_returning(&mut sql);
        Some(SqlStatement::new(sql, Vec::new()))
    }

    fn push_returning(&self, sql: &mut String) {
        if let Some(returning) = self.options.returning.as_deref() {
            sql.push_str(" RETURNING ");
            sql.push_str(returning);
        }
    }

    /// Coerce a value to what the column expects before binding.
    pub fn bind_value(&self, name: &str, value: &Value) -> Value {
        let entry = self.schema.column(name);
        let target = match self.options.types.get(name) {
            Some(kind) => DbType::from_native(kind),
            None => match entry {
                Some(e) => e.db_type(),
                None => return value.clone(),
            },
        };
        let no_json = self.options.no_json || self.dialect.no_json;
        match (target, value) {
            (DbType::Number | DbType::Json, Value::Text(s)) if s.is_empty() => Value::Null,
            (DbType::Number, Value::Text(s)) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Value::Int)
                    .or_else(|_| s.parse::<f64>().map(Value::Float))
                    .unwrap_or_else(|_| value.clone())
            }
            (DbType::Number, Value::Bool(b)) => Value::Int(i64::from(*b)),
            (DbType::Bool, Value::Text(s)) => Value::Bool(parse_bool(s)),
            (DbType::Bool, Value::Int(n)) => Value::Bool(*n != 0),
            (DbType::Json, Value::Json(_) | Value::List(_)) if no_json => {
                Value::Text(value.to_json().to_string())
            }
            (DbType::Json, Value::List(_)) => Value::Json(value.to_json()),
            (DbType::Text, Value::Json(_) | Value::List(_)) => {
                Value::Text(value.to_json().to_string())
            }
            (DbType::Text, Value::Int(_) | Value::Float(_) | Value::Bool(_)) => {
                Value::Text(value.to_text())
            }
            _ => value.clone(),
        }
    }
}
