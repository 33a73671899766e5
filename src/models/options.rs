//! Per-call operation options.

use crate::error::{DbError, DbResult};
use crate::models::request::Token;
use crate::models::value::{Value, parse_bool};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Default page size for select/search.
pub const DEFAULT_COUNT: u32 = 50;
pub const MAX_COUNT: u32 = 9999;

/// One ORDER BY key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub desc: bool,
}

/// Fields `replace` compares against the stored record before updating.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CheckData {
    #[default]
    Off,
    /// Every field of the incoming record
    All,
    /// Only the listed columns
    Columns(Vec<String>),
}

impl CheckData {
    pub fn is_on(&self) -> bool {
        !matches!(self, CheckData::Off)
    }

    /// `true`/`1` checks every field, an array or comma list names columns.
    fn from_json(v: &JsonValue) -> Self {
        match v {
            JsonValue::Array(_) => CheckData::Columns(json_list(v)),
            JsonValue::String(s) if s.contains(',') => CheckData::Columns(json_list(v)),
            v if json_bool(v) => CheckData::All,
            _ => CheckData::Off,
        }
    }
}

/// Modifiers for a single operation.
///
/// Pool-level operator and type maps live in the pool's dialect; entries in
/// `ops_map`/`types_map` here take precedence over them.
#[derive(Debug, Clone, Default)]
pub struct Options {
    /// Explicit pool name, overrides table pinning
    pub pool: Option<String>,
    /// Key columns used for conditions instead of the table's primary key
    pub keys: Vec<String>,
    /// Column → operator (`>`, `in`, `begins_with`, ...)
    pub ops: BTreeMap<String, String>,
    /// Operator translation overrides
    pub ops_map: BTreeMap<String, String>,
    /// Column → value type for condition literals
    pub types_map: BTreeMap<String, String>,
    /// Column → type coercion for bound values
    pub types: BTreeMap<String, String>,
    /// Projection
    pub select: Vec<String>,
    pub start: Option<Token>,
    pub count: Option<u32>,
    pub page: Option<u32>,
    /// Up to three sort keys
    pub sort: Vec<SortKey>,
    /// Column stamped with the current time before add/put/update
    pub mtime: Option<String>,
    /// Columns treated as deltas by update/incr
    pub counter: Vec<String>,
    pub skip_null: bool,
    pub skip_columns: Vec<String>,
    pub all_columns: bool,
    pub public_columns: Option<Value>,
    pub public_key: Option<String>,
    pub check_mtime: Option<String>,
    pub check_data: CheckData,
    pub add_only: bool,
    pub put_only: bool,
    /// Route get through the cache and invalidate on writes
    pub cached: bool,
    /// Cache key prefix, defaults to the table name
    pub prefix: Option<String>,
    /// Upper bound for key-value range scans
    pub end: Option<String>,
    pub returning: Option<String>,
    pub coalesce: Vec<String>,
    pub concat: Vec<String>,
    pub consistent: bool,
    /// Fail with a schema mismatch on tables that only exist as declarations
    pub strict: bool,
    /// Return `COUNT(*)` instead of rows
    pub total: bool,
    /// Use REPLACE INTO for add
    pub replace: bool,
    /// Secondary index name for item-store queries
    pub index: Option<String>,
    /// Keep json columns as text instead of structured values
    pub no_json: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn op(mut self, column: impl Into<String>, op: impl Into<String>) -> Self {
        self.ops.insert(column.into(), op.into());
        self
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn start(mut self, token: Token) -> Self {
        self.start = Some(token);
        self
    }

    pub fn sort(mut self, column: impl Into<String>, desc: bool) -> Self {
        self.sort.push(SortKey {
            column: column.into(),
            desc,
        });
        self
    }

    pub fn mtime(mut self, column: impl Into<String>) -> Self {
        self.mtime = Some(column.into());
        self
    }

    pub fn cached(mut self) -> Self {
        self.cached = true;
        self
    }

    pub fn check_data(mut self) -> Self {
        self.check_data = CheckData::All;
        self
    }

    /// Compare only `columns` when deciding whether `replace` updates.
    pub fn check_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.check_data = CheckData::Columns(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn check_mtime(mut self, column: impl Into<String>) -> Self {
        self.check_mtime = Some(column.into());
        self
    }

    pub fn add_only(mut self) -> Self {
        self.add_only = true;
        self
    }

    pub fn put_only(mut self) -> Self {
        self.put_only = true;
        self
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Page size clamped to `1..=MAX_COUNT`.
    pub fn count_or_default(&self) -> u32 {
        self.count.unwrap_or(DEFAULT_COUNT).clamp(1, MAX_COUNT)
    }

    /// Row offset from `start`, or from `page` when no start is given.
    pub fn offset(&self) -> u64 {
        match self.start.as_ref().and_then(Token::offset) {
            Some(start) if start > 0 => start,
            _ => match self.page {
                Some(page) if page > 0 => u64::from(page - 1) * u64::from(self.count_or_default()),
                _ => 0,
            },
        }
    }

    /// Parse options from a JSON object using the external option names
    /// (`sort`, `sort1`, `desc1`, `opsMap`, ...).
    pub fn from_json(value: &JsonValue) -> DbResult<Self> {
        let Some(obj) = value.as_object() else {
            if value.is_null() {
                return Ok(Self::default());
            }
            return Err(DbError::invalid_input("options must be a JSON object"));
        };
        let string = |key: &str| obj.get(key).and_then(json_string);
        let flag = |key: &str| obj.get(key).is_some_and(json_bool);
        let list = |key: &str| obj.get(key).map(json_list).unwrap_or_default();
        let map = |key: &str| obj.get(key).map(json_map).unwrap_or_default();
        let number = |key: &str| {
            obj.get(key)
                .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
                .map(|v| v.min(u64::from(u32::MAX)) as u32)
        };

        let mut sort = Vec::new();
        for suffix in ["", "1", "2"] {
            if let Some(column) = string(format!("sort{suffix}").as_str()) {
                sort.push(SortKey {
                    column,
                    desc: flag(format!("desc{suffix}").as_str()),
                });
            }
        }

        // `mtime: true` stamps the default column
        let mtime = match obj.get("mtime") {
            Some(JsonValue::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(v) if json_bool(v) => Some("mtime".to_string()),
            _ => None,
        };

        Ok(Self {
            pool: string("pool"),
            keys: list("keys"),
            ops: map("ops"),
            ops_map: map("opsMap"),
            types_map: map("typesMap"),
            types: map("types"),
            select: list("select"),
            start: obj.get("start").cloned().and_then(Token::from_json),
            count: number("count"),
            page: number("page"),
            sort,
            mtime,
            counter: list("counter"),
            skip_null: flag("skip_null"),
            skip_columns: list("skip_columns"),
            all_columns: flag("all_columns"),
            public_columns: obj.get("public_columns").cloned().map(Value::from_json),
            public_key: string("public_key"),
            check_mtime: string("check_mtime"),
            check_data: obj.get("check_data").map(CheckData::from_json).unwrap_or_default(),
            add_only: flag("add_only"),
            put_only: flag("put_only"),
            cached: flag("cached"),
            prefix: string("prefix"),
            end: string("end"),
            returning: string("returning"),
            coalesce: list("coalesce"),
            concat: list("concat"),
            consistent: flag("consistent"),
            strict: flag("strict"),
            total: flag("total"),
            replace: flag("replace"),
            index: string("index"),
            no_json: flag("no_json"),
        })
    }
}

fn json_string(v: &JsonValue) -> Option<String> {
    match v {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_bool(v: &JsonValue) -> bool {
    match v {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => parse_bool(s),
        _ => false,
    }
}

/// Array of strings or a comma-separated string.
fn json_list(v: &JsonValue) -> Vec<String> {
    match v {
        JsonValue::Array(items) => items.iter().filter_map(json_string).collect(),
        JsonValue::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

fn json_map(v: &JsonValue) -> BTreeMap<String, String> {
    v.as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| json_string(v).map(|s| (k.clone(), s)))
                .collect()
        })
        .unwrap_or_default()
}
