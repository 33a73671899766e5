//! Inline SQL literals for WHERE conditions and DDL defaults.

use crate::models::Value;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Single-quote a string, doubling embedded quotes.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote any value as text; null becomes `NULL`.
pub fn quote_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        other => quote(&other.to_text()),
    }
}

/// Value family used when no explicit type is given.
fn inferred_type(value: &Value) -> &'static str {
    match value {
        Value::Int(_) | Value::Float(_) => "number",
        Value::Bool(_) => "bool",
        Value::Timestamp(_) => "date",
        _ => "string",
    }
}

/// Literal formatted according to `kind`.
///
/// Numbers that cannot be parsed fall back to `default`, then to zero, and are
/// clamped to `[min, max]` when bounds are given.
pub fn value_literal(
    value: &Value,
    kind: Option<&str>,
    default: Option<&Value>,
    min: Option<f64>,
    max: Option<f64>,
) -> String {
    if value.is_null() || value.as_str() == Some("null") {
        return "NULL".to_string();
    }
    let kind = kind
        .filter(|k| !k.is_empty())
        .map(str::to_lowercase)
        .unwrap_or_else(|| inferred_type(value).to_string());

    match kind.as_str() {
        "expr" | "buffer" => value.to_text(),
        "real" | "float" | "double" => format_number(to_number(value, default, min, max)),
        "int" | "integer" | "bigint" | "smallint" | "counter" => {
            format!("{}", to_number(value, default, min, max) as i64)
        }
        "number" => format_number(to_number(value, default, min, max)),
        "bool" | "boolean" => value.as_bool().to_string(),
        "date" => match to_datetime(value) {
            Some(ts) => quote(&ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => quote(&value.to_text()),
        },
        "time" => match to_datetime(value) {
            Some(ts) => quote(&ts.format("%H:%M:%S").to_string()),
            None => quote(&value.to_text()),
        },
        "mtime" => {
            let text = value.to_text();
            if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit() || c == '.') {
                format_number(to_number(value, default, min, max))
            } else {
                match to_datetime(value) {
                    Some(ts) => quote(&ts.to_rfc3339_opts(SecondsFormat::Millis, true)),
                    None => quote(&text),
                }
            }
        }
        _ => quote_value(value),
    }
}

/// Comma-separated literals for `IN (...)`.
pub fn value_in(list: &[Value], kind: Option<&str>) -> String {
    list.iter()
        .map(|v| value_literal(v, kind, None, None, None))
        .collect::<Vec<_>>()
        .join(",")
}

fn to_number(value: &Value, default: Option<&Value>, min: Option<f64>, max: Option<f64>) -> f64 {
    let mut n = value
        .as_f64()
        .or_else(|| default.and_then(Value::as_f64))
        .unwrap_or(0.0);
    if let Some(min) = min {
        n = n.max(min);
    }
    if let Some(max) = max {
        n = n.min(max);
    }
    n
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Timestamp from a timestamp value, epoch milliseconds or RFC 3339 text.
pub fn to_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Timestamp(ts) => Some(*ts),
        Value::Int(ms) => Utc.timestamp_millis_opt(*ms).single(),
        Value::Float(ms) => Utc.timestamp_millis_opt(*ms as i64).single(),
        Value::Text(s) => {
            let s = s.trim();
            if let Ok(ms) = s.parse::<i64>() {
                return Utc.timestamp_millis_opt(ms).single();
            }
            DateTime::parse_from_rfc3339(s)
                .map(|ts| ts.with_timezone(&Utc))
                .ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_doubles_quotes() {
        assert_eq!(quote("it's"), "'it''s'");
        assert_eq!(quote_value(&Value::Null), "NULL");
    }

    #[test]
    fn test_null_text_is_sql_null() {
        assert_eq!(value_literal(&Value::from("null"), None, None, None, None), "NULL");
    }

    #[test]
    fn test_numbers_clamped_and_defaulted() {
        let v = Value::from("250");
        assert_eq!(value_literal(&v, Some("int"), None, Some(0.0), Some(100.0)), "100");
        let v = Value::from("abc");
        assert_eq!(
            value_literal(&v, Some("int"), Some(&Value::Int(7)), None, None),
            "7"
        );
        assert_eq!(value_literal(&Value::from("1.5"), Some("real"), None, None, None), "1.5");
        assert_eq!(value_literal(&Value::Int(3), None, None, None, None), "3");
    }

    #[test]
    fn test_bool_normalized() {
        assert_eq!(value_literal(&Value::from("yes"), Some("bool"), None, None, None), "true");
        assert_eq!(value_literal(&Value::from("0"), Some("boolean"), None, None, None), "false");
    }

    #[test]
    fn test_date_iso_quoted() {
        let v = Value::Int(0);
        assert_eq!(
            value_literal(&v, Some("date"), None, None, None),
            "'1970-01-01T00:00:00.000Z'"
        );
    }

    #[test]
    fn test_expr_passes_raw() {
        assert_eq!(value_literal(&Value::from("NOW()"), Some("expr"), None, None, None), "NOW()");
    }

    #[test]
    fn test_value_in() {
        let list = vec![Value::from("a"), Value::Int(2)];
        assert_eq!(value_in(&list, None), "'a',2");
    }
}
