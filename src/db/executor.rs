//! Request execution.
//!
//! [`QueryExecutor`] runs a prepared [`Request`] against its pool: connection
//! acquisition, timed execution, error normalization, release, per-table row
//! hooks, redaction of non-public columns and invalidation of cached records.
//!
//! Relational statements are run by the database-specific submodules below:
//! - `mysql`: MySQL-specific query and write operations
//! - `postgres`: PostgreSQL-specific query and write operations
//! - `sqlite`: SQLite-specific query and write operations
//!
//! Each submodule provides identical functionality adapted to the database's type system.

use crate::db::cache::{Cache, cache_key};
use crate::db::pool::{Connection, Handle, Pool};
use crate::db::types::RowToValues;
use crate::error::{DbError, DbResult};
use crate::models::{
    DbType, Options, QueryOutput, Request, RequestBody, Row, SqlStatement, TableSchema, Value,
};
use futures_util::StreamExt;
use prometheus::HistogramTimer;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Runs requests against pools and maintains the record cache.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    cache: Arc<dyn Cache>,
}

impl QueryExecutor {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Execute a prepared request and post-process its rows.
    pub async fn execute(
        &self,
        pool: &dyn Pool,
        request: &Request,
        options: &Options,
    ) -> DbResult<QueryOutput> {
        if request.is_empty() {
            debug!(
                pool = %pool.name(),
                table = %request.table,
                op = %request.op,
                "Nothing to execute"
            );
            return Ok(QueryOutput::empty());
        }
        match &request.body {
            RequestBody::Sql(stmt) => debug!(
                pool = %pool.name(),
                table = %request.table,
                op = %request.op,
                sql = %stmt.sql(),
                params = stmt.values.len(),
                "Executing statement"
            ),
            _ => debug!(
                pool = %pool.name(),
                table = %request.table,
                op = %request.op,
                "Executing native request"
            ),
        }

        let mut conn = self.acquire(pool).await?;
        let timer = begin(pool);
        let result = pool.execute(&mut conn, request, options).await;
        finish(pool, conn, timer, result.is_err()).await;

        let mut output = match result {
            Ok(output) => output,
            Err(e) => {
                let err = pool.convert_error(&request.table, request.op, e);
                error!(
                    pool = %pool.name(),
                    table = %request.table,
                    op = %request.op,
                    error = %err,
                    "Operation failed"
                );
                return Err(err);
            }
        };

        if output.info.next_token.is_none() {
            output.info.next_token = pool.next_token(request, &output.rows, options);
        }

        let schema = pool.schema().table(&request.table);
        if pool.dialect().no_json && !options.no_json {
            parse_json_columns(&mut output.rows, &schema);
        }
        pool.hooks().apply(&request.table, &mut output.rows, options);
        redact(&mut output.rows, &schema, options);

        if options.cached && request.op.is_write() {
            self.invalidate(&schema, request, options).await;
        }
        Ok(output)
    }

    /// Run a native statement through the same acquire/metrics/release path.
    pub async fn execute_raw(
        &self,
        pool: &dyn Pool,
        sql: &str,
        values: &[Value],
    ) -> DbResult<QueryOutput> {
        debug!(pool = %pool.name(), sql = %sql, params = values.len(), "Executing raw query");
        let mut conn = self.acquire(pool).await?;
        let timer = begin(pool);
        let result = pool.query_raw(&mut conn, sql, values).await;
        finish(pool, conn, timer, result.is_err()).await;
        result.inspect_err(|e| error!(pool = %pool.name(), error = %e, "Raw query failed"))
    }

    async fn acquire(&self, pool: &dyn Pool) -> DbResult<Connection> {
        let metrics = pool.metrics();
        metrics.requests.inc();
        pool.acquire().await.inspect_err(|e| {
            metrics.errors.inc();
            error!(pool = %pool.name(), error = %e, "Failed to acquire connection");
        })
    }

    async fn invalidate(&self, schema: &TableSchema, request: &Request, options: &Options) {
        let keys = if options.keys.is_empty() {
            &schema.keys
        } else {
            &options.keys
        };
        if keys.is_empty() {
            return;
        }
        for row in request.input.rows() {
            let key = cache_key(&request.table, keys, row, options.prefix.as_deref());
            if let Err(e) = self.cache.delete(&key).await {
                warn!(key = %key, error = %e, "Failed to invalidate cached record");
            }
        }
    }
}

fn begin(pool: &dyn Pool) -> HistogramTimer {
    pool.metrics().in_flight.inc();
    pool.metrics().start_timer()
}

async fn finish(pool: &dyn Pool, conn: Connection, timer: HistogramTimer, failed: bool) {
    timer.observe_duration();
    pool.metrics().in_flight.dec();
    pool.release(conn).await;
    if failed {
        pool.metrics().errors.inc();
    }
}

/// Strip non-public columns unless the row belongs to the caller.
///
/// `public_columns` carries the caller's identity; rows whose `public_key`
/// (default `id`) equals it are returned whole.
fn redact(rows: &mut [Row], schema: &TableSchema, options: &Options) {
    let Some(owner) = options.public_columns.as_ref().filter(|v| !v.is_empty()) else {
        return;
    };
    let key = options.public_key.as_deref().unwrap_or("id");
    let public = schema.public_columns();
    for row in rows {
        if row.get(key).is_some_and(|v| v.loose_eq(owner)) {
            continue;
        }
        row.retain(|name, _| public.iter().any(|p| p == name));
    }
}

/// Json columns stored as text come back as structured values.
fn parse_json_columns(rows: &mut [Row], schema: &TableSchema) {
    let json_columns: Vec<&String> = schema
        .columns
        .iter()
        .filter(|(_, c)| c.db_type() == DbType::Json || c.kind() == Some("json"))
        .map(|(name, _)| name)
        .collect();
    if json_columns.is_empty() {
        return;
    }
    for row in rows {
        for name in &json_columns {
            let Some(value) = row.get_mut(name.as_str()) else {
                continue;
            };
            let parsed = match value.as_str() {
                Some(text) if text.starts_with('{') || text.starts_with('[') => {
                    serde_json::from_str::<serde_json::Value>(text).ok()
                }
                _ => None,
            };
            if let Some(json) = parsed {
                *value = Value::from_json(json);
            }
        }
    }
}

/// True when a statement produces a result set.
pub fn returns_rows(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    ["SELECT", "WITH", "PRAGMA", "SHOW", "EXPLAIN", "VALUES", "DESCRIBE"]
        .iter()
        .any(|kw| upper.starts_with(kw))
        || upper.contains(" RETURNING ")
}

/// Run every statement of `stmt` on a borrowed driver connection.
///
/// Values are bound to single statements only; batches carry none.
pub async fn run_statement(
    handle: &mut Handle,
    stmt: &SqlStatement,
    fetch: bool,
    query_timeout: Duration,
) -> DbResult<QueryOutput> {
    let mut output = QueryOutput::empty();
    for sql in &stmt.text {
        let fetch = fetch || returns_rows(sql);
        let part = match handle {
            Handle::MySql(conn) => mysql::run(conn, sql, &stmt.values, fetch, query_timeout).await?,
            Handle::Postgres(conn) => {
                postgres::run(conn, sql, &stmt.values, fetch, query_timeout).await?
            }
            Handle::SQLite(conn) => {
                sqlite::run(conn, sql, &stmt.values, fetch, query_timeout).await?
            }
            Handle::Shared => {
                return Err(DbError::internal(
                    "SQL statement executed without a driver connection",
                ));
            }
        };
        output.rows.extend(part.rows);
        output.info.affected_rows += part.info.affected_rows;
        if part.info.inserted_oid.is_some() {
            output.info.inserted_oid = part.info.inserted_oid;
        }
    }
    Ok(output)
}

// =============================================================================
// Common Helper Functions
// =============================================================================

fn collect_rows<R: RowToValues>(results: Vec<Result<R, sqlx::Error>>) -> DbResult<Vec<Row>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(DbError::from)?.to_row());
    }
    Ok(rows)
}

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout.as_secs() as u32)
}

fn fetched(rows: Vec<Row>) -> QueryOutput {
    let mut output = QueryOutput::with_rows(rows);
    output.info.affected_rows = output.rows.len() as u64;
    output
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// Each module below provides the same interface adapted to its database type.
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::MySql;
    use sqlx::pool::PoolConnection;

    pub async fn run(
        conn: &mut PoolConnection<MySql>,
        sql: &str,
        params: &[Value],
        fetch: bool,
        query_timeout: Duration,
    ) -> DbResult<QueryOutput> {
        if fetch {
            return Ok(fetched(fetch_rows(conn, sql, params, query_timeout).await?));
        }
        // When params is empty, execute raw SQL directly to avoid prepared statement issues
        let result = if params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, (&mut **conn).execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            timeout(query_timeout, query.execute(&mut **conn)).await
        };

        match result {
            Ok(Ok(r)) => {
                let mut output = QueryOutput::affected(r.rows_affected());
                output.info.inserted_oid =
                    Some(r.last_insert_id()).filter(|id| *id > 0).map(|id| id as i64);
                Ok(output)
            }
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("write operation", query_timeout)),
        }
    }

    async fn fetch_rows(
        conn: &mut PoolConnection<MySql>,
        sql: &str,
        params: &[Value],
        query_timeout: Duration,
    ) -> DbResult<Vec<Row>> {
        let rows_future = if params.is_empty() {
            use sqlx::Executor;
            (&mut **conn).fetch(sql).collect::<Vec<_>>()
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_mysql_param(query, param);
            }
            query.fetch(&mut **conn).collect::<Vec<_>>()
        };

        match timeout(query_timeout, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::Postgres;
    use sqlx::pool::PoolConnection;

    pub async fn run(
        conn: &mut PoolConnection<Postgres>,
        sql: &str,
        params: &[Value],
        fetch: bool,
        query_timeout: Duration,
    ) -> DbResult<QueryOutput> {
        if fetch {
            return Ok(fetched(fetch_rows(conn, sql, params, query_timeout).await?));
        }
        let result = if params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, (&mut **conn).execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            timeout(query_timeout, query.execute(&mut **conn)).await
        };

        match result {
            Ok(Ok(r)) => Ok(QueryOutput::affected(r.rows_affected())),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("write operation", query_timeout)),
        }
    }

    async fn fetch_rows(
        conn: &mut PoolConnection<Postgres>,
        sql: &str,
        params: &[Value],
        query_timeout: Duration,
    ) -> DbResult<Vec<Row>> {
        let rows_future = if params.is_empty() {
            use sqlx::Executor;
            (&mut **conn).fetch(sql).collect::<Vec<_>>()
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_postgres_param(query, param);
            }
            query.fetch(&mut **conn).collect::<Vec<_>>()
        };

        match timeout(query_timeout, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::Sqlite;
    use sqlx::pool::PoolConnection;

    pub async fn run(
        conn: &mut PoolConnection<Sqlite>,
        sql: &str,
        params: &[Value],
        fetch: bool,
        query_timeout: Duration,
    ) -> DbResult<QueryOutput> {
        if fetch {
            return Ok(fetched(fetch_rows(conn, sql, params, query_timeout).await?));
        }
        let result = if params.is_empty() {
            use sqlx::Executor;
            timeout(query_timeout, (&mut **conn).execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            timeout(query_timeout, query.execute(&mut **conn)).await
        };

        match result {
            Ok(Ok(r)) => {
                let mut output = QueryOutput::affected(r.rows_affected());
                if r.rows_affected() > 0 {
                    output.info.inserted_oid = Some(r.last_insert_rowid());
                }
                Ok(output)
            }
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("write operation", query_timeout)),
        }
    }

    async fn fetch_rows(
        conn: &mut PoolConnection<Sqlite>,
        sql: &str,
        params: &[Value],
        query_timeout: Duration,
    ) -> DbResult<Vec<Row>> {
        let rows_future = if params.is_empty() {
            use sqlx::Executor;
            (&mut **conn).fetch(sql).collect::<Vec<_>>()
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_sqlite_param(query, param);
            }
            query.fetch(&mut **conn).collect::<Vec<_>>()
        };

        match timeout(query_timeout, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error("query execution", query_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::cache::LocalCache;
    use crate::db::pool::NonePool;
    use crate::models::{ColumnEntry, ColumnSpec, Input, Op, row_from_json};
    use serde_json::json;

    fn schema() -> TableSchema {
        let mut schema = TableSchema::new("users");
        for col in [
            ColumnSpec::new("id").primary().public(),
            ColumnSpec::new("name").public(),
            ColumnSpec::new("email"),
            ColumnSpec::new("prefs").kind("json"),
        ] {
            schema.columns.insert(
                col.name.clone(),
                ColumnEntry {
                    declared: Some(col),
                    ..Default::default()
                },
            );
        }
        schema
    }

    #[test]
    fn test_redact_keeps_owner_rows() {
        let mut rows = vec![
            row_from_json(json!({"id": "1", "name": "a", "email": "a@x"})),
            row_from_json(json!({"id": "2", "name": "b", "email": "b@x"})),
        ];
        let mut options = Options::default();
        options.public_columns = Some(Value::from("1"));
        redact(&mut rows, &schema(), &options);
        assert!(rows[0].contains_key("email"));
        assert!(!rows[1].contains_key("email"));
        assert!(rows[1].contains_key("name"));
    }

    #[test]
    fn test_redact_noop_without_option() {
        let mut rows = vec![row_from_json(json!({"id": "1", "email": "a@x"}))];
        redact(&mut rows, &schema(), &Options::default());
        assert!(rows[0].contains_key("email"));
    }

    #[test]
    fn test_parse_json_columns() {
        let mut rows = vec![row_from_json(json!({"prefs": "{\"a\":1}", "name": "{x"}))];
        parse_json_columns(&mut rows, &schema());
        assert_eq!(rows[0]["prefs"], Value::Json(json!({"a": 1})));
        assert_eq!(rows[0]["name"], Value::Text("{x".into()));
    }

    #[test]
    fn test_returns_rows() {
        assert!(returns_rows("  select 1"));
        assert!(returns_rows("PRAGMA table_info(t)"));
        assert!(returns_rows("UPDATE t SET a=1 WHERE b=2 RETURNING *"));
        assert!(!returns_rows("INSERT INTO t(a) values(?1)"));
    }

    #[tokio::test]
    async fn test_empty_request_skips_pool() {
        let pool = NonePool::new("none").unwrap();
        let executor = QueryExecutor::new(Arc::new(LocalCache::new()));
        let request = Request::empty(Op::Update, "t", Input::None);
        let out = executor
            .execute(&pool, &request, &Options::default())
            .await
            .unwrap();
        assert_eq!(out, QueryOutput::empty());
        assert_eq!(pool.metrics().requests.get(), 0);
    }

    #[tokio::test]
    async fn test_metrics_counted() {
        let pool = NonePool::new("none").unwrap();
        let executor = QueryExecutor::new(Arc::new(LocalCache::new()));
        let request = Request::native(Op::Select, "t", Input::None);
        executor
            .execute(&pool, &request, &Options::default())
            .await
            .unwrap();
        assert_eq!(pool.metrics().requests.get(), 1);
        assert_eq!(pool.metrics().duration.get_sample_count(), 1);
        assert!(executor.execute_raw(&pool, "select 1", &[]).await.is_err());
        assert_eq!(pool.metrics().errors.get(), 1);
    }

    #[tokio::test]
    async fn test_writes_invalidate_cache() {
        let pool = NonePool::new("none").unwrap();
        let cache = Arc::new(LocalCache::new());
        let executor = QueryExecutor::new(cache.clone());
        cache.put("t:a", Row::new()).await.unwrap();
        let request = Request::native(Op::Del, "t", Input::Row(row_from_json(json!({"id": "a"}))));
        let options = Options::new().keys(["id"]).cached();
        executor.execute(&pool, &request, &options).await.unwrap();
        assert!(cache.is_empty());
    }
}
