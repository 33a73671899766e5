//! Cassandra column-family pool.
//!
//! Statements come from the shared SQL builder with the CQL dialect and are
//! run through a [`CqlClient`]. Paging uses the key values of the last row
//! instead of offsets.

#[cfg(feature = "cassandra")]
pub mod scylla;

use crate::adapters::sql::build_statement;
use crate::config::PoolOptions;
use crate::db::pool::{Connection, Pool, PoolCore, PutStrategy};
use crate::error::{DbError, DbResult};
use crate::models::{
    BackendKind, ColumnInfo, Input, Op, Options, QueryOutput, Request, Row, SqlStatement,
    TableIntrospection, Token, Value,
};
use crate::sql::{Dialect, SqlBuilder};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Column returned by conditional CQL writes.
const APPLIED: &str = "[applied]";

/// Session with a CQL cluster.
#[async_trait]
pub trait CqlClient: Send + Sync + std::fmt::Debug {
    /// Run one statement with positional `?` values.
    async fn execute(&self, cql: &str, values: &[Value]) -> DbResult<QueryOutput>;

    fn keyspace(&self) -> &str;
}

#[derive(Debug)]
pub struct CqlPool {
    core: PoolCore,
    client: Arc<dyn CqlClient>,
}

impl CqlPool {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn CqlClient>,
        options: &PoolOptions,
    ) -> DbResult<Self> {
        Ok(Self {
            core: PoolCore::new(name, BackendKind::Cassandra, Dialect::cql(), options)?,
            client,
        })
    }

    /// Select with a `Key` start token turned into conditions. The partition
    /// key is matched by equality and the clustering keys are seeked past as
    /// one tuple. Tables keyed by the partition key alone page by token.
    fn paged_select(
        &self,
        table: &str,
        input: Input,
        options: &Options,
    ) -> DbResult<Option<SqlStatement>> {
        let mut options = options.clone();
        options.page = None;
        let Some(Token::Key(start)) = options.start.take() else {
            return build_statement(self, Op::Select, table, &input, &options);
        };
        let keys = self.schema().keys(table);
        let Some((partition, clustering)) = keys.split_first() else {
            return build_statement(self, Op::Select, table, &input, &options);
        };
        let mut row = input.row().cloned().unwrap_or_default();
        let (columns, token) = match clustering {
            [] => {
                row.remove(partition);
                (vec![partition.clone()], true)
            }
            [last] => {
                options.ops.insert(last.clone(), ">".to_string());
                row.extend(start.clone());
                (Vec::new(), false)
            }
            _ => {
                if let Some(value) = start.get(partition) {
                    row.insert(partition.clone(), value.clone());
                }
                for name in clustering {
                    row.remove(name);
                }
                (clustering.to_vec(), false)
            }
        };
        let schema = if options.strict {
            self.schema().strict_table(table)?
        } else {
            self.schema().table(table)
        };
        let mut builder = SqlBuilder::new(self.dialect(), &schema, &options);
        if !columns.is_empty() {
            builder = builder.after(&columns, &start, token);
        }
        Ok(Some(builder.select(&Input::Row(row), None)))
    }
}

#[async_trait]
impl Pool for CqlPool {
    fn core(&self) -> &PoolCore {
        &self.core
    }

    fn prepare(&self, op: Op, table: &str, input: Input, options: &Options) -> DbResult<Request> {
        let stmt = match op {
            Op::Select | Op::Search => self.paged_select(table, input.clone(), options)?,
            _ => build_statement(self, op, table, &input, options)?,
        };
        Ok(match stmt {
            Some(mut stmt) if op == Op::Add => {
                if let Some(sql) = stmt.text.first_mut() {
                    sql.push_str(" IF NOT EXISTS");
                }
                Request::sql(op, table, input, stmt)
            }
            Some(stmt) => Request::sql(op, table, input, stmt),
            None => Request::empty(op, table, input),
        })
    }

    async fn execute(
        &self,
        _conn: &mut Connection,
        request: &Request,
        _options: &Options,
    ) -> DbResult<QueryOutput> {
        let Some(stmt) = request.statement() else {
            return Ok(QueryOutput::empty());
        };
        let mut output = QueryOutput::empty();
        for (i, cql) in stmt.text.iter().enumerate() {
            let values = if i == 0 { stmt.values.as_slice() } else { &[] };
            output = self.client.execute(cql, values).await?;
        }
        if request.op == Op::Add {
            if output.first().and_then(|r| r.get(APPLIED)) == Some(&Value::Bool(false)) {
                return Err(DbError::record_exists(&request.table));
            }
            output.rows.clear();
        }
        if request.op.is_write() && output.info.affected_rows == 0 {
            // CQL reports no row counts for writes
            output.info.affected_rows = 1;
        }
        if request.op.is_ddl() {
            info!(
                pool = %self.name(),
                table = %request.table,
                op = %request.op,
                statements = stmt.text.len(),
                "Schema changed"
            );
        }
        Ok(output)
    }

    /// Key values of the last row when a full page came back.
    fn next_token(&self, request: &Request, rows: &[Row], options: &Options) -> Option<Token> {
        if !matches!(request.op, Op::Select | Op::Search) || options.total {
            return None;
        }
        if rows.len() < options.count_or_default() as usize {
            return None;
        }
        let last = rows.last()?;
        let key: Row = self
            .schema()
            .keys(&request.table)
            .into_iter()
            .filter_map(|k| last.get(&k).map(|v| (k, v.clone())))
            .collect();
        (!key.is_empty()).then_some(Token::Key(key))
    }

    async fn cache_columns(
        &self,
        _options: &Options,
    ) -> DbResult<BTreeMap<String, TableIntrospection>> {
        let keyspace = Value::from(self.client.keyspace());
        let out = self
            .client
            .execute(
                "SELECT table_name, column_name, type, kind, position \
                 FROM system_schema.columns WHERE keyspace_name = ?",
                std::slice::from_ref(&keyspace),
            )
            .await?;

        let mut tables: BTreeMap<String, TableIntrospection> = BTreeMap::new();
        // table → (kind rank, position, column)
        let mut key_parts: BTreeMap<String, Vec<(u8, i64, String)>> = BTreeMap::new();
        for row in &out.rows {
            let text = |name: &str| row.get(name).map(Value::to_text).unwrap_or_default();
            let (table, column, kind) = (text("table_name"), text("column_name"), text("kind"));
            let position = row.get("position").and_then(Value::as_i64).unwrap_or(0);
            let info = tables.entry(table.clone()).or_default();
            let mut col = ColumnInfo::new(text("type"), info.columns.len() as u32 + 1);
            let rank = match kind.as_str() {
                "partition_key" => Some(0),
                "clustering" => Some(1),
                _ => None,
            };
            if let Some(rank) = rank {
                col.primary = true;
                col.nullable = false;
                key_parts
                    .entry(table)
                    .or_default()
                    .push((rank, position, column.clone()));
            }
            info.columns.insert(column, col);
        }
        for (table, mut parts) in key_parts {
            parts.sort();
            if let Some(info) = tables.get_mut(&table) {
                info.keys = parts.into_iter().map(|(_, _, c)| c).collect();
            }
        }

        let indexes = self
            .client
            .execute(
                "SELECT table_name, index_name, options FROM system_schema.indexes \
                 WHERE keyspace_name = ?",
                std::slice::from_ref(&keyspace),
            )
            .await?;
        for row in &indexes.rows {
            let table = row.get("table_name").map(Value::to_text).unwrap_or_default();
            let name = row.get("index_name").map(Value::to_text).unwrap_or_default();
            let target = match row.get("options") {
                Some(Value::Json(options)) => options
                    .get("target")
                    .and_then(|t| t.as_str())
                    .map(String::from),
                _ => None,
            };
            if let (Some(info), Some(target)) = (tables.get_mut(&table), target) {
                info.indexes.insert(name, vec![target]);
            }
        }
        Ok(tables)
    }

    fn put_strategy(&self) -> PutStrategy {
        PutStrategy::Update
    }

    async fn query_raw(
        &self,
        _conn: &mut Connection,
        sql: &str,
        values: &[Value],
    ) -> DbResult<QueryOutput> {
        self.client.execute(sql, values).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnSpec, TableSpec, row_from_json};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recorder {
        calls: Mutex<Vec<(String, Vec<Value>)>>,
        reply: Mutex<Vec<Row>>,
    }

    #[async_trait]
    impl CqlClient for Recorder {
        async fn execute(&self, cql: &str, values: &[Value]) -> DbResult<QueryOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((cql.to_string(), values.to_vec()));
            Ok(QueryOutput::with_rows(std::mem::take(
                &mut *self.reply.lock().unwrap(),
            )))
        }

        fn keyspace(&self) -> &str {
            "app"
        }
    }

    fn pool(recorder: Arc<Recorder>) -> CqlPool {
        let pool = CqlPool::new("cql", recorder, &PoolOptions::default()).unwrap();
        pool.schema().declare(
            TableSpec::new("msg")
                .column(ColumnSpec::new("id").primary())
                .column(ColumnSpec::new("mtime").kind("bigint").primary())
                .column(ColumnSpec::new("text")),
        );
        pool.schema().declare(
            TableSpec::new("readings")
                .column(ColumnSpec::new("sensor").primary())
                .column(ColumnSpec::new("day").kind("int").primary())
                .column(ColumnSpec::new("seq").kind("int").primary()),
        );
        pool.schema().declare(TableSpec::new("users").column(ColumnSpec::new("id").primary()));
        pool
    }

    fn select_after(pool: &CqlPool, table: &str, input: Input, start: serde_json::Value) -> String {
        let opts = Options::new().count(10).start(Token::Key(row_from_json(start)));
        let req = pool.prepare(Op::Select, table, input, &opts).unwrap();
        req.statement().unwrap().text[0].clone()
    }

    #[tokio::test]
    async fn test_start_token_seeks_clustering_tuple() {
        let pool = pool(Arc::new(Recorder::default()));
        let sql = select_after(
            &pool,
            "readings",
            Input::Row(row_from_json(json!({"sensor": "s1"}))),
            json!({"sensor": "s1", "day": 3, "seq": 7}),
        );
        assert!(sql.contains("WHERE sensor='s1' AND (day,seq) > (3,7)"), "{sql}");
    }

    #[tokio::test]
    async fn test_start_token_on_partition_key_uses_token() {
        let pool = pool(Arc::new(Recorder::default()));
        let sql = select_after(&pool, "users", Input::None, json!({"id": "u9"}));
        assert!(sql.contains("WHERE token(id) > token('u9')"), "{sql}");
    }

    #[tokio::test]
    async fn test_start_token_becomes_clustering_condition() {
        let pool = pool(Arc::new(Recorder::default()));
        let start = Token::Key(row_from_json(json!({"id": "a", "mtime": 5})));
        let opts = Options::new().count(10).start(start);
        let req = pool
            .prepare(Op::Select, "msg", Input::Row(row_from_json(json!({"id": "a"}))), &opts)
            .unwrap();
        let sql = &req.statement().unwrap().text[0];
        assert!(sql.contains("id='a'"), "{sql}");
        assert!(sql.contains("mtime > 5"), "{sql}");
        assert!(!sql.contains("OFFSET"), "{sql}");
    }

    #[tokio::test]
    async fn test_next_token_is_last_row_key() {
        let pool = pool(Arc::new(Recorder::default()));
        let req = Request::empty(Op::Select, "msg", Input::None);
        let rows = vec![
            row_from_json(json!({"id": "a", "mtime": 1, "text": "x"})),
            row_from_json(json!({"id": "a", "mtime": 2, "text": "y"})),
        ];
        let token = pool.next_token(&req, &rows, &Options::new().count(2));
        assert_eq!(
            token,
            Some(Token::Key(row_from_json(json!({"id": "a", "mtime": 2}))))
        );
        assert_eq!(pool.next_token(&req, &rows, &Options::new().count(3)), None);
    }

    #[tokio::test]
    async fn test_put_is_update_and_add_is_conditional() {
        let recorder = Arc::new(Recorder::default());
        let pool = pool(Arc::clone(&recorder));
        let opts = Options::default();
        let row = row_from_json(json!({"id": "a", "mtime": 1, "text": "hi"}));

        let req = pool.prepare(Op::Put, "msg", Input::Row(row.clone()), &opts).unwrap();
        assert!(req.statement().unwrap().text[0].starts_with("UPDATE msg SET text=?"));

        let req = pool.prepare(Op::Add, "msg", Input::Row(row), &opts).unwrap();
        *recorder.reply.lock().unwrap() = vec![row_from_json(json!({"[applied]": false}))];
        let mut conn = pool.acquire().await.unwrap();
        let err = pool.execute(&mut conn, &req, &opts).await.unwrap_err();
        assert!(matches!(err, DbError::RecordExists { .. }));
        let calls = recorder.calls.lock().unwrap();
        assert!(calls[0].0.ends_with("IF NOT EXISTS"));
        assert_eq!(calls[0].1.len(), 3);
    }

    #[tokio::test]
    async fn test_introspection_orders_keys() {
        let recorder = Arc::new(Recorder::default());
        let pool = pool(Arc::clone(&recorder));
        *recorder.reply.lock().unwrap() = vec![
            row_from_json(json!({"table_name": "msg", "column_name": "text", "type": "text", "kind": "regular", "position": -1})),
            row_from_json(json!({"table_name": "msg", "column_name": "mtime", "type": "bigint", "kind": "clustering", "position": 0})),
            row_from_json(json!({"table_name": "msg", "column_name": "id", "type": "text", "kind": "partition_key", "position": 0})),
        ];
        pool.load_schema(&Options::default()).await.unwrap();
        assert_eq!(pool.schema().keys("msg"), vec!["id", "mtime"]);
        assert!(!pool.schema().table("msg").is_provisional());
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls[0].1, vec![Value::from("app")]);
    }
}
