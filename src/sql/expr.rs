//! Single-column condition compiler.

use crate::models::Value;
use crate::sql::literal::{quote, value_in, value_literal};

/// How one column is compared.
#[derive(Debug, Clone, Default)]
pub struct ExprSpec {
    /// SQL operator, `=` when empty
    pub op: String,
    /// Literal type: `int`, `real`, `bool`, `date`, `expr`, ...
    pub kind: Option<String>,
    /// Used when the value cannot be converted
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Template for `op = "expr"`: `%s` is the value, `%1`/`%2` the first two operands
    pub template: Option<String>,
    /// Text search configuration for `@@`, `english` by default
    pub language: Option<String>,
}

impl ExprSpec {
    pub fn op(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            ..Default::default()
        }
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    fn literal(&self, value: &Value) -> String {
        value_literal(
            value,
            self.kind.as_deref(),
            self.default.as_ref(),
            self.min,
            self.max,
        )
    }

    fn is_numeric(&self) -> bool {
        matches!(self.kind.as_deref(), Some("number" | "int"))
    }
}

/// Operand list: arrays, object values, or a string split on `|`
/// (or `,` for numeric types).
fn operands(value: &Value, spec: &ExprSpec) -> Vec<Value> {
    match value {
        Value::List(items) => items.clone(),
        Value::Json(serde_json::Value::Object(map)) => {
            map.values().cloned().map(Value::from_json).collect()
        }
        Value::Text(s) => split_text(s, spec).unwrap_or_else(|| vec![value.clone()]),
        other => vec![other.clone()],
    }
}

fn split_text(s: &str, spec: &ExprSpec) -> Option<Vec<Value>> {
    if spec.is_numeric() && s.contains(',') {
        Some(s.split(',').map(Value::from).collect())
    } else if s.contains('|') {
        Some(s.split('|').map(Value::from).collect())
    } else {
        None
    }
}

/// Smallest string greater than every string starting with `prefix`.
pub fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = char::from_u32(last as u32 + 1) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// Build the condition for `name` and `value`. Returns an empty string when
/// the operator produces no condition (e.g. `in` with an empty list).
pub fn expr(name: &str, value: &Value, spec: &ExprSpec) -> String {
    if name.is_empty() {
        return String::new();
    }
    let op = spec.op.to_lowercase();
    match op.as_str() {
        "in" | "not in" => {
            let list = operands(value, spec);
            if list.is_empty() {
                return String::new();
            }
            format!("{name} {op} ({})", value_in(&list, spec.kind.as_deref()))
        }
        "between" | "not between" => {
            let list = match value {
                Value::List(items) => items.clone(),
                Value::Text(s) => split_text(s, spec).unwrap_or_default(),
                _ => Vec::new(),
            };
            if list.len() > 1 {
                format!(
                    "{name} {op} {} AND {}",
                    spec.literal(&list[0]),
                    spec.literal(&list[1])
                )
            } else {
                format!("{name}={}", spec.literal(value))
            }
        }
        "null" | "not null" => format!("{name} IS {}", op.to_uppercase()),
        "@@" => {
            let lang = spec.language.as_deref().unwrap_or("english");
            let query = |v: &Value| format!("plainto_tsquery('{lang}',{})", quote(&v.to_text()));
            match value {
                Value::Text(s) if !s.contains('|') => format!("{name}@@ {}", query(value)),
                _ => {
                    let parts = operands(value, spec)
                        .iter()
                        .map(query)
                        .collect::<Vec<_>>()
                        .join("||");
                    format!("{name}@@ ({parts})")
                }
            }
        }
        "~* any" | "!~* any" => format!("{} {op}({name})", quote(&value.to_text())),
        "like%" | "ilike%" | "not like%" | "not ilike%" => {
            let op = &op[..op.len() - 1];
            let pattern = Value::Text(format!("{}%", value.to_text()));
            format!("{name} {op} {}", spec.literal(&pattern))
        }
        ">" | ">=" | "<" | "<=" | "<>" | "!=" | "like" | "not like" | "ilike" | "not ilike"
        | "similar to" | "not similar to" | "regexp" | "not regexp" | "~" | "~*" | "!~"
        | "!~*" | "match" => format!("{name} {op} {}", spec.literal(value)),
        "iregexp" | "not iregexp" => {
            let not = if op.starts_with("not") { " NOT" } else { "" };
            format!("LOWER({name}){not} REGEXP LOWER({})", spec.literal(value))
        }
        "begins_with" => {
            let prefix = value.to_text();
            if prefix.is_empty() {
                return String::new();
            }
            match prefix_upper_bound(&prefix) {
                Some(upper) => format!("{name} >= {} AND {name} < {}", quote(&prefix), quote(&upper)),
                None => format!("{name} >= {}", quote(&prefix)),
            }
        }
        "expr" => {
            let Some(template) = spec.template.as_deref() else {
                return String::new();
            };
            let list = operands(value, spec);
            let nth = |i: usize| {
                value_literal(
                    list.get(i).unwrap_or(&Value::Null),
                    spec.kind.as_deref(),
                    None,
                    spec.min,
                    spec.max,
                )
            };
            template
                .replace("%s", &value_literal(value, spec.kind.as_deref(), None, spec.min, spec.max))
                .replace("%1", &nth(0))
                .replace("%2", &nth(1))
        }
        _ => format!("{name}={}", spec.literal(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::from(s)
    }

    #[test]
    fn test_default_equality() {
        assert_eq!(expr("id", &text("a'b"), &ExprSpec::default()), "id='a''b'");
        assert_eq!(expr("n", &Value::Int(5), &ExprSpec::default()), "n=5");
    }

    #[test]
    fn test_in_variants() {
        let spec = ExprSpec::op("in");
        assert_eq!(expr("id", &text("a|b"), &spec), "id in ('a','b')");
        assert_eq!(
            expr("id", &Value::List(vec![Value::Int(1), Value::Int(2)]), &spec),
            "id in (1,2)"
        );
        assert_eq!(expr("id", &text("1,2"), &ExprSpec::op("in").kind("int")), "id in (1,2)");
        assert_eq!(expr("id", &Value::List(vec![]), &spec), "");
        assert_eq!(expr("id", &text("x"), &ExprSpec::op("not in")), "id not in ('x')");
    }

    #[test]
    fn test_between_falls_back_to_equality() {
        let spec = ExprSpec::op("between").kind("int");
        assert_eq!(expr("n", &text("1,5"), &spec), "n between 1 AND 5");
        assert_eq!(expr("n", &text("3"), &spec), "n=3");
    }

    #[test]
    fn test_null_ops() {
        assert_eq!(expr("a", &Value::Null, &ExprSpec::op("null")), "a IS NULL");
        assert_eq!(expr("a", &Value::Null, &ExprSpec::op("not null")), "a IS NOT NULL");
    }

    #[test]
    fn test_like_percent() {
        assert_eq!(expr("name", &text("jo"), &ExprSpec::op("like%")), "name like 'jo%'");
        assert_eq!(expr("name", &text("jo"), &ExprSpec::op("not ilike%")), "name not ilike 'jo%'");
    }

    #[test]
    fn test_text_search() {
        assert_eq!(
            expr("doc", &text("cat"), &ExprSpec::op("@@")),
            "doc@@ plainto_tsquery('english','cat')"
        );
        assert_eq!(
            expr("doc", &text("cat|dog"), &ExprSpec::op("@@")),
            "doc@@ (plainto_tsquery('english','cat')||plainto_tsquery('english','dog'))"
        );
    }

    #[test]
    fn test_iregexp() {
        assert_eq!(
            expr("a", &text("X"), &ExprSpec::op("not iregexp")),
            "LOWER(a) NOT REGEXP LOWER('X')"
        );
    }

    #[test]
    fn test_begins_with_half_open_range() {
        assert_eq!(
            expr("id", &text("user:"), &ExprSpec::op("begins_with")),
            "id >= 'user:' AND id < 'user;'"
        );
        assert_eq!(expr("id", &text(""), &ExprSpec::op("begins_with")), "");
    }

    #[test]
    fn test_prefix_upper_bound_orders_correctly() {
        let upper = prefix_upper_bound("user:").unwrap();
        for key in ["user:", "user:123", "user:~~~"] {
            assert!(key >= "user:" && key < upper.as_str(), "{key} should match");
        }
        for key in ["users:1", "use", "user"] {
            assert!(!(key >= "user:" && key < upper.as_str()), "{key} should not match");
        }
    }

    #[test]
    fn test_expr_template() {
        let spec = ExprSpec {
            op: "expr".into(),
            kind: Some("int".into()),
            template: Some("(a > %1 AND b < %2)".into()),
            ..Default::default()
        };
        assert_eq!(expr("x", &text("1|9"), &spec), "(a > 1 AND b < 9)");
        assert_eq!(expr("x", &text("1"), &ExprSpec::op("expr")), "");
    }

    #[test]
    fn test_any_match() {
        assert_eq!(expr("tags", &text("red"), &ExprSpec::op("~* any")), "'red' ~* any(tags)");
    }
}
