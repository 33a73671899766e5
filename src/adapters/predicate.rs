//! In-process condition evaluation.
//!
//! Backends without server-side filtering (item-store scans, key-value range
//! scans) apply non-key conditions to fetched rows with the same operator
//! vocabulary the SQL builder understands.

use crate::models::{Options, Row, Value};
use std::cmp::Ordering;

/// One column condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    /// Normalized operator, see [`normalize_op`]
    pub op: String,
    pub value: Value,
}

/// Canonical operator name for aliases (`gt` → `>`, `like%` → `begins_with`).
pub fn normalize_op(op: &str) -> String {
    let lower = op.trim().to_lowercase();
    match lower.as_str() {
        "" | "eq" | "==" => "=".into(),
        "ne" | "!=" => "<>".into(),
        "lt" => "<".into(),
        "le" => "<=".into(),
        "gt" => ">".into(),
        "ge" => ">=".into(),
        "like%" | "ilike%" => "begins_with".into(),
        "like" | "ilike" => "contains".into(),
        "not like" => "not contains".into(),
        "isnull" | "is null" => "null".into(),
        "notnull" | "is not null" => "not null".into(),
        _ => lower,
    }
}

/// Conditions for every column of `row` not in `skip`, with operators taken
/// from `options.ops` (lists default to `in`).
pub fn conditions(row: &Row, skip: &[String], options: &Options) -> Vec<Condition> {
    row.iter()
        .filter(|(name, _)| !name.starts_with('_') && !skip.contains(name))
        .map(|(name, value)| {
            let op = match options.ops.get(name) {
                Some(op) => op.clone(),
                None if matches!(value, Value::List(_)) => "in".to_string(),
                None if value.is_null() => "null".to_string(),
                None => String::new(),
            };
            Condition {
                column: name.clone(),
                op: normalize_op(&options.ops_map.get(&op).cloned().unwrap_or(op)),
                value: value.clone(),
            }
        })
        .collect()
}

fn operands(value: &Value) -> Vec<Value> {
    match value {
        Value::List(items) => items.clone(),
        Value::Text(s) if s.contains('|') => s.split('|').map(Value::from).collect(),
        Value::Text(s) if s.contains(',') => s.split(',').map(Value::from).collect(),
        other => vec![other.clone()],
    }
}

/// Evaluate one condition against a row.
pub fn matches(row: &Row, cond: &Condition) -> bool {
    let actual = row.get(&cond.column).unwrap_or(&Value::Null);
    let cmp = || actual.compare(&cond.value);
    match cond.op.as_str() {
        "=" => actual.loose_eq(&cond.value),
        "<>" => !actual.loose_eq(&cond.value),
        "<" => cmp() == Some(Ordering::Less),
        "<=" => matches!(cmp(), Some(Ordering::Less | Ordering::Equal)),
        ">" => cmp() == Some(Ordering::Greater),
        ">=" => matches!(cmp(), Some(Ordering::Greater | Ordering::Equal)),
        "null" => actual.is_null(),
        "not null" => !actual.is_null(),
        "in" => operands(&cond.value).iter().any(|v| actual.loose_eq(v)),
        "not in" => !operands(&cond.value).iter().any(|v| actual.loose_eq(v)),
        "between" => match operands(&cond.value).as_slice() {
            [low, high, ..] => {
                matches!(
                    actual.compare(low),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(actual.compare(high), Some(Ordering::Less | Ordering::Equal))
            }
            _ => actual.loose_eq(&cond.value),
        },
        "begins_with" => {
            !actual.is_null() && actual.to_text().starts_with(cond.value.to_text().as_str())
        }
        "contains" => {
            let needle = cond.value.to_text().replace('%', "");
            actual.to_text().contains(needle.as_str())
        }
        "not contains" => {
            let needle = cond.value.to_text().replace('%', "");
            !actual.to_text().contains(needle.as_str())
        }
        _ => actual.loose_eq(&cond.value),
    }
}

pub fn matches_all(row: &Row, conds: &[Condition]) -> bool {
    conds.iter().all(|c| matches(row, c))
}
