//! Declarative WHERE builder driven by a list of column descriptions and a
//! bag of request values.

use crate::models::{Row, Value};
use crate::sql::dialect::Placeholder;
use crate::sql::expr::{ExprSpec, expr};
use crate::sql::literal::value_literal;

/// One filterable column.
#[derive(Debug, Clone, Default)]
pub struct FilterColumn {
    /// Key looked up in the values
    pub name: String,
    /// Actual column name when different from `name`
    pub col: Option<String>,
    /// Table alias prefix for joins
    pub alias: Option<String>,
    /// Default value
    pub value: Option<Value>,
    /// Operator and literal type; `op = "skip"` drops the column, `op = "bind"`
    /// substitutes `$#` in `expr.template` with the next placeholder
    pub expr: ExprSpec,
    /// Columns with the same group are OR-ed together
    pub group: Option<String>,
    /// Only the default value is used
    pub always: bool,
    /// A missing value makes the whole filter empty
    pub required: bool,
    /// Empty values still produce a condition
    pub empty: bool,
    /// Additional value names that feed this column
    pub search: Vec<String>,
    /// Wraps the column in `COALESCE(col, value)`
    pub coalesce: Option<Value>,
    /// `"null"`/`"notnull"` values become IS [NOT] NULL
    pub isnull: bool,
}

impl FilterColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn op(mut self, op: impl Into<String>) -> Self {
        self.expr.op = op.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Text(s) => !s.is_empty(),
        Value::Int(n) => *n != 0,
        Value::Float(f) => *f != 0.0,
        Value::Bool(b) => *b,
        _ => true,
    }
}

/// Build the condition; bound values are appended to `params`.
///
/// Returns an empty string when there is no condition or when a required
/// column has no value.
pub fn filter(
    columns: &[FilterColumn],
    values: &Row,
    params: &mut Vec<Value>,
    placeholder: Placeholder,
) -> String {
    let mut all: Vec<String> = Vec::new();
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();

    for col in columns {
        let mut value = col.value.clone();
        if !col.always {
            if let Some(v) = values.get(&col.name).filter(|v| truthy(v)) {
                value = Some(v.clone());
            }
            for alias in &col.search {
                if let Some(v) = values.get(alias).filter(|v| truthy(v)) {
                    value = Some(v.clone());
                }
            }
        }

        let missing = match &value {
            None => true,
            Some(Value::Text(s)) => s.is_empty(),
            _ => false,
        };
        if missing {
            if col.required {
                return String::new();
            }
            if !col.empty {
                continue;
            }
        }
        let value = value.unwrap_or_else(|| Value::Text(String::new()));

        let mut name = col.col.clone().unwrap_or_else(|| col.name.clone());
        if let Some(alias) = &col.alias {
            name = format!("{alias}.{name}");
        }
        if let Some(dflt) = &col.coalesce {
            name = format!(
                "COALESCE({name},{})",
                value_literal(dflt, col.expr.kind.as_deref(), None, None, None)
            );
        }

        let sql = match col.expr.op.as_str() {
            "skip" => continue,
            "bind" => {
                let template = col.expr.template.as_deref().unwrap_or_default();
                let sql = template.replace("$#", &placeholder.render(params.len() + 1));
                params.push(value);
                sql
            }
            _ if col.isnull && matches!(value.as_str(), Some("null" | "notnull")) => {
                let not = if value.as_str() == Some("notnull") { "NOT " } else { "" };
                format!("{name} IS {not}NULL")
            }
            _ => expr(&name, &value, &col.expr),
        };
        if sql.is_empty() {
            continue;
        }

        match &col.group {
            Some(group) => match groups.iter_mut().find(|(g, _)| g == group) {
                Some((_, list)) => list.push(sql),
                None => groups.push((group.clone(), vec![sql])),
            },
            None => all.push(sql),
        }
    }

    let mut sql = all.join(" AND ");
    for (_, list) in groups {
        if list.is_empty() {
            continue;
        }
        if !sql.is_empty() {
            sql.push_str(" AND ");
        }
        sql.push_str(&format!("({})", list.join(" OR ")));
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::row_from_json;
    use serde_json::json;

    #[test]
    fn test_basic_and_groups() {
        let columns = vec![
            FilterColumn::new("status"),
            FilterColumn::new("name").op("like%").group("q"),
            FilterColumn::new("email").op("like%").group("q"),
        ];
        let values = row_from_json(json!({"status": "ok", "name": "jo", "email": "jo"}));
        let mut params = Vec::new();
        assert_eq!(
            filter(&columns, &values, &mut params, Placeholder::Dollar),
            "status='ok' AND (name like 'jo%' OR email like 'jo%')"
        );
    }

    #[test]
    fn test_required_missing_empties_clause() {
        let mut req = FilterColumn::new("id");
        req.required = true;
        let columns = vec![FilterColumn::new("status"), req];
        let values = row_from_json(json!({"status": "ok"}));
        assert_eq!(filter(&columns, &values, &mut Vec::new(), Placeholder::Dollar), "");
    }

    #[test]
    fn test_defaults_aliases_and_skip() {
        let mut always = FilterColumn::new("type");
        always.always = true;
        always.value = Some(Value::from("user"));
        let mut searched = FilterColumn::new("name");
        searched.search = vec!["q".into()];
        searched.col = Some("full_name".into());
        searched.alias = Some("u".into());
        let columns = vec![always, searched, FilterColumn::new("x").op("skip")];
        let values = row_from_json(json!({"type": "admin", "q": "bob", "x": "1"}));
        assert_eq!(
            filter(&columns, &values, &mut Vec::new(), Placeholder::Dollar),
            "type='user' AND u.full_name='bob'"
        );
    }

    #[test]
    fn test_bind_and_isnull() {
        let mut bind = FilterColumn::new("age").op("bind");
        bind.expr.template = Some("age > $#".into());
        let mut nullable = FilterColumn::new("deleted");
        nullable.isnull = true;
        let mut coalesced = FilterColumn::new("score");
        coalesced.coalesce = Some(Value::Int(0));
        coalesced.expr.kind = Some("int".into());
        let columns = vec![bind, nullable, coalesced];
        let values = row_from_json(json!({"age": 21, "deleted": "notnull", "score": "5"}));
        let mut params = vec![Value::from("existing")];
        assert_eq!(
            filter(&columns, &values, &mut params, Placeholder::Dollar),
            "age > $2 AND deleted IS NOT NULL AND COALESCE(score,0)=5"
        );
        assert_eq!(params, vec![Value::from("existing"), Value::Int(21)]);
    }

    #[test]
    fn test_empty_values() {
        let mut empty = FilterColumn::new("note");
        empty.empty = true;
        let columns = vec![empty, FilterColumn::new("other")];
        let values = row_from_json(json!({"other": ""}));
        assert_eq!(
            filter(&columns, &values, &mut Vec::new(), Placeholder::Dollar),
            "note=''"
        );
    }
}
