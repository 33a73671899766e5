//! Embedded ordered key-value pools.
//!
//! Every table is a separate keyspace of `name → value` records. Values are
//! stored as JSON so numbers, text and objects survive a round trip.
//! Range scans walk keys in byte order from `name` (or the resume token) to
//! `options.end`.

pub mod redb;
pub mod sled;

use crate::adapters::project;
use crate::config::PoolOptions;
use crate::db::pool::{Connection, Pool, PoolCore};
use crate::error::{DbError, DbResult};
use crate::models::{BackendKind, Input, Op, Options, QueryOutput, Request, Row, Token, Value};
use crate::sql::Dialect;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const NAME: &str = "name";
pub const VALUE: &str = "value";

/// Blocking ordered byte store; called from `spawn_blocking`.
pub trait KvStore: Send + Sync + std::fmt::Debug + 'static {
    fn get(&self, table: &str, key: &[u8]) -> DbResult<Option<Vec<u8>>>;

    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> DbResult<()>;

    /// Returns whether the key existed.
    fn delete(&self, table: &str, key: &[u8]) -> DbResult<bool>;

    /// Entries in `[start, end)`, at most `limit`.
    fn range(
        &self,
        table: &str,
        start: &[u8],
        end: Option<&[u8]>,
        limit: usize,
    ) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>>;

    fn flush(&self) -> DbResult<()>;
}

/// Smallest key greater than every key starting with `prefix`.
pub fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.last_mut() {
        if *last < 0xFF {
            *last += 1;
            return Some(upper);
        }
        upper.pop();
    }
    None
}

fn encode(value: &Value) -> DbResult<Vec<u8>> {
    Ok(serde_json::to_vec(&value.to_json())?)
}

fn decode(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .map(Value::from_json)
        .unwrap_or_else(|_| Value::Text(String::from_utf8_lossy(bytes).into_owned()))
}

fn record(key: &[u8], value: &[u8]) -> Row {
    Row::from([
        (NAME.to_string(), Value::Text(String::from_utf8_lossy(key).into_owned())),
        (VALUE.to_string(), decode(value)),
    ])
}

fn name_of(row: &Row) -> Option<String> {
    row.get(NAME)
        .filter(|v| !v.is_empty())
        .map(Value::to_text)
}

/// Sum of two numbers, integer when both are integers.
fn add_numbers(current: &Value, delta: &Value) -> DbResult<Value> {
    match (current, delta) {
        (Value::Null, d) if d.is_number() => Ok(d.clone()),
        (c, d) => match (c.as_i64(), d.as_i64(), c, d) {
            (Some(a), Some(b), Value::Int(_) | Value::Text(_), Value::Int(_) | Value::Text(_)) => {
                Ok(Value::Int(a.saturating_add(b)))
            }
            _ => match (c.as_f64(), d.as_f64()) {
                (Some(a), Some(b)) => Ok(Value::Float(a + b)),
                _ => Err(DbError::invalid_input(format!(
                    "Cannot increment {} by {}",
                    c.type_name(),
                    d.type_name()
                ))),
            },
        },
    }
}

#[derive(Debug)]
pub struct KvPool<S: KvStore> {
    core: PoolCore,
    store: Arc<S>,
    /// Serializes read-modify-write increments
    incr_lock: Mutex<()>,
}

impl<S: KvStore> KvPool<S> {
    pub fn new(
        name: impl Into<String>,
        kind: BackendKind,
        store: S,
        options: &PoolOptions,
    ) -> DbResult<Self> {
        Ok(Self {
            core: PoolCore::new(name, kind, Dialect::default(), options)?,
            store: Arc::new(store),
            incr_lock: Mutex::new(()),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&S) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| DbError::internal(format!("task join: {e}")))?
    }

    async fn get(&self, table: &str, name: String) -> DbResult<Option<Row>> {
        let table = table.to_string();
        self.blocking(move |s| {
            Ok(s.get(&table, name.as_bytes())?
                .map(|v| record(name.as_bytes(), &v)))
        })
        .await
    }

    async fn put(&self, table: &str, name: String, value: &Value) -> DbResult<()> {
        let table = table.to_string();
        let bytes = encode(value)?;
        self.blocking(move |s| s.put(&table, name.as_bytes(), &bytes))
            .await
    }

    /// Range bounds for a scan: resume token or `name`, up to `end`; a
    /// `begins_with` operator on `name` bounds the scan to the prefix.
    fn bounds(input: &Input, options: &Options) -> (Vec<u8>, Option<Vec<u8>>) {
        let name = input.row().and_then(name_of).unwrap_or_default();
        let prefix = options
            .ops
            .get(NAME)
            .is_some_and(|op| crate::adapters::predicate::normalize_op(op) == "begins_with");
        let start = match &options.start {
            Some(Token::Name(token)) if token.as_str() > name.as_str() => token.clone(),
            _ => name.clone(),
        };
        let end = match (&options.end, prefix) {
            (Some(end), _) => Some(end.as_bytes().to_vec()),
            (None, true) => prefix_upper_bound(name.as_bytes()),
            (None, false) => None,
        };
        (start.into_bytes(), end)
    }

    async fn scan(&self, request: &Request, options: &Options) -> DbResult<QueryOutput> {
        let (start, end) = Self::bounds(&request.input, options);
        let limit = if options.total {
            usize::MAX
        } else {
            options.count_or_default() as usize
        };
        let table = request.table.clone();
        let entries = self
            .blocking(move |s| s.range(&table, &start, end.as_deref(), limit))
            .await?;
        if options.total {
            let count = Row::from([("count".to_string(), Value::Int(entries.len() as i64))]);
            return Ok(QueryOutput::with_rows(vec![count]));
        }
        Ok(QueryOutput::with_rows(
            entries
                .iter()
                .map(|(k, v)| project(record(k, v), options))
                .collect(),
        ))
    }

    async fn incr(&self, table: &str, name: String, delta: &Value) -> DbResult<Value> {
        let _guard = self.incr_lock.lock().await;
        let current = self
            .get(table, name.clone())
            .await?
            .and_then(|mut r| r.remove(VALUE))
            .unwrap_or(Value::Null);
        let next = add_numbers(&current, delta)?;
        self.put(table, name, &next).await?;
        Ok(next)
    }
}

#[async_trait]
impl<S: KvStore> Pool for KvPool<S> {
    fn core(&self) -> &PoolCore {
        &self.core
    }

    async fn execute(
        &self,
        _conn: &mut Connection,
        request: &Request,
        options: &Options,
    ) -> DbResult<QueryOutput> {
        let table = request.table.as_str();
        debug!(pool = %self.name(), table, op = %request.op, "kv request");
        let name = request.input.row().and_then(name_of);
        match (request.op, name) {
            (Op::Select | Op::Search, _) => self.scan(request, options).await,
            (Op::List, _) => {
                let mut rows = Vec::new();
                for name in request.input.rows().iter().filter_map(name_of) {
                    if let Some(row) = self.get(table, name).await? {
                        rows.push(project(row, options));
                    }
                }
                Ok(QueryOutput::with_rows(rows))
            }
            (Op::Get, Some(name)) => Ok(QueryOutput::with_rows(
                self.get(table, name)
                    .await?
                    .map(|r| project(r, options))
                    .into_iter()
                    .collect(),
            )),
            (Op::Add | Op::Put | Op::Update, Some(name)) => {
                let value = request
                    .input
                    .row()
                    .and_then(|r| r.get(VALUE))
                    .cloned()
                    .unwrap_or(Value::Null);
                self.put(table, name, &value).await?;
                Ok(QueryOutput::affected(1))
            }
            (Op::Incr, Some(name)) => {
                let delta = request
                    .input
                    .row()
                    .and_then(|r| r.get(VALUE))
                    .cloned()
                    .unwrap_or(Value::Int(1));
                let value = self.incr(table, name.clone(), &delta).await?;
                let mut output = QueryOutput::affected(1);
                output.rows.push(Row::from([
                    (NAME.to_string(), Value::Text(name)),
                    (VALUE.to_string(), value),
                ]));
                Ok(output)
            }
            (Op::Del, Some(name)) => {
                let table = table.to_string();
                let existed = self
                    .blocking(move |s| s.delete(&table, name.as_bytes()))
                    .await?;
                Ok(QueryOutput::affected(u64::from(existed)))
            }
            // Tables need no DDL; a missing name is a no-op
            _ => Ok(QueryOutput::empty()),
        }
    }

    /// Resume point just past the last key of a full page.
    fn next_token(&self, request: &Request, rows: &[Row], options: &Options) -> Option<Token> {
        if !matches!(request.op, Op::Select | Op::Search) || options.total {
            return None;
        }
        if rows.len() < options.count_or_default() as usize {
            return None;
        }
        let last = rows.last().and_then(name_of)?;
        Some(Token::Name(format!("{last}\0")))
    }

    async fn close(&self) {
        let flushed = self.blocking(|s| s.flush()).await;
        if let Err(e) = flushed {
            warn!(pool = %self.name(), error = %e, "Flush on close failed");
        }
        self.core().close();
        info!(pool = %self.name(), "Pool closed");
    }
}
