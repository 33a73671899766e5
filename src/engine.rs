//! Operation API.
//!
//! [`Db`] is the single entry point application code talks to. Every call
//! resolves a pool from the options and table pinning, stamps the mtime
//! column, lets the pool prepare a request and runs it through the
//! [`QueryExecutor`].

use crate::config::Config;
use crate::db::cache::{Cache, LocalCache, cache_key};
use crate::db::executor::QueryExecutor;
use crate::db::hooks::RowHook;
use crate::db::pool::{Pool, PutStrategy};
use crate::db::registry::Registry;
use crate::error::{DbError, DbResult};
use crate::geo::{self, LocationSearch};
use crate::models::{
    CheckData, ColumnMap, Input, Op, Options, QueryOutput, Row, TableSpec, Value, row_from_json,
};
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Db {
    registry: Registry,
    executor: QueryExecutor,
}

impl Db {
    pub fn new(registry: Registry, cache: Arc<dyn Cache>) -> Self {
        Self {
            registry,
            executor: QueryExecutor::new(cache),
        }
    }

    /// Engine with an in-process record cache.
    pub fn with_registry(registry: Registry) -> Self {
        Self::new(registry, Arc::new(LocalCache::new()))
    }

    /// Open every configured pool, pin tables and select the default pool.
    pub async fn open(config: &Config) -> DbResult<Self> {
        let defs = config.parse_pools().map_err(DbError::invalid_input)?;
        let tables = config.parse_tables().map_err(DbError::invalid_input)?;
        let registry = Registry::new()?;
        for def in &defs {
            let pool_config = def.to_pool_config().map_err(DbError::invalid_input)?;
            registry.open(pool_config).await?;
        }
        for (table, pool) in tables {
            if !registry.exists(&pool).await {
                return Err(DbError::pool_not_found(pool));
            }
            registry.pin(table, pool).await;
        }
        if let Some(name) = config.default_pool_name(&defs) {
            if !registry.exists(&name).await {
                return Err(DbError::pool_not_found(name));
            }
            registry.set_default(name).await;
        }
        Ok(Self::with_registry(registry))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        self.executor.cache()
    }

    /// Pool that serves `table` under `options`.
    pub async fn pool(&self, table: &str, options: &Options) -> DbResult<Arc<dyn Pool>> {
        self.registry.resolve(options, table).await
    }

    /// Prepare and run one operation.
    async fn run(
        &self,
        op: Op,
        table: &str,
        input: Input,
        options: &Options,
    ) -> DbResult<QueryOutput> {
        let pool = self.pool(table, options).await?;
        self.run_on(pool.as_ref(), op, table, input, options).await
    }

    async fn run_on(
        &self,
        pool: &dyn Pool,
        op: Op,
        table: &str,
        mut input: Input,
        options: &Options,
    ) -> DbResult<QueryOutput> {
        if options.strict && !op.is_ddl() {
            pool.schema().strict_table(table)?;
        }
        if let (Some(column), Op::Add | Op::Put | Op::Update, Input::Row(row)) =
            (&options.mtime, op, &mut input)
        {
            row.insert(column.clone(), Value::Int(Utc::now().timestamp_millis()));
        }
        let request = pool.prepare(op, table, input, options)?;
        self.executor.execute(pool, &request, options).await
    }

    /// Key columns for `table`: `options.keys`, else the schema cache.
    pub async fn table_keys(&self, table: &str, options: &Options) -> DbResult<Vec<String>> {
        if !options.keys.is_empty() {
            return Ok(options.keys.clone());
        }
        let pool = self.pool(table, options).await?;
        if options.strict {
            return Ok(pool.schema().strict_table(table)?.keys);
        }
        Ok(pool.schema().keys(table))
    }

    /// Reconciled columns of `table`.
    pub async fn table_columns(&self, table: &str, options: &Options) -> DbResult<ColumnMap> {
        Ok(self.pool(table, options).await?.schema().columns(table))
    }

    /// One record by key. With `cached`, reads through the record cache.
    pub async fn get(&self, table: &str, row: Row, options: &Options) -> DbResult<QueryOutput> {
        if !options.cached {
            return self.run(Op::Get, table, Input::Row(row), options).await;
        }
        let pool = self.pool(table, options).await?;
        let keys = self.table_keys(table, options).await?;
        let key = cache_key(table, &keys, &row, options.prefix.as_deref());
        match self.cache().get(&key).await {
            Ok(Some(cached)) => {
                pool.metrics().cache_hits.inc();
                debug!(key = %key, "Cache hit");
                return Ok(QueryOutput::with_rows(vec![cached]));
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Cache read failed"),
        }
        pool.metrics().cache_misses.inc();
        let output = self
            .run_on(pool.as_ref(), Op::Get, table, Input::Row(row), options)
            .await?;
        if let Some(first) = output.first() {
            if let Err(e) = self.cache().put(&key, first.clone()).await {
                warn!(key = %key, error = %e, "Cache write failed");
            }
        }
        Ok(output)
    }

    pub async fn select(&self, table: &str, input: Input, options: &Options) -> DbResult<QueryOutput> {
        let op = if matches!(input, Input::List(_)) {
            Op::List
        } else {
            Op::Select
        };
        self.run(op, table, input, options).await
    }

    pub async fn search(&self, table: &str, input: Input, options: &Options) -> DbResult<QueryOutput> {
        self.run(Op::Search, table, input, options).await
    }

    /// Records by a list of keys.
    pub async fn list(&self, table: &str, rows: Vec<Row>, options: &Options) -> DbResult<QueryOutput> {
        self.run(Op::List, table, Input::List(rows), options).await
    }

    /// Records by comma-separated values of the first key column.
    pub async fn list_keys(&self, table: &str, ids: &str, options: &Options) -> DbResult<QueryOutput> {
        let keys = self.table_keys(table, options).await?;
        let Some(key) = keys.first() else {
            return Err(DbError::invalid_input(format!("Table '{table}' has no key columns")));
        };
        let rows = ids
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|id| Row::from([(key.clone(), Value::from(id))]))
            .collect();
        self.list(table, rows, options).await
    }

    pub async fn add(&self, table: &str, row: Row, options: &Options) -> DbResult<QueryOutput> {
        self.run(Op::Add, table, Input::Row(row), options).await
    }

    /// Insert or overwrite a record. Backends without a native upsert run an
    /// update and fall back to an insert when nothing was updated.
    pub async fn put(&self, table: &str, row: Row, options: &Options) -> DbResult<QueryOutput> {
        let pool = self.pool(table, options).await?;
        if pool.put_strategy() != PutStrategy::UpdateThenInsert {
            return self
                .run_on(pool.as_ref(), Op::Put, table, Input::Row(row), options)
                .await;
        }
        let output = self
            .run_on(pool.as_ref(), Op::Put, table, Input::Row(row.clone()), options)
            .await?;
        if output.info.affected_rows > 0 {
            return Ok(output);
        }
        debug!(pool = %pool.name(), table, "Put updated nothing, inserting");
        self.run_on(pool.as_ref(), Op::Add, table, Input::Row(row), options)
            .await
    }

    pub async fn update(&self, table: &str, row: Row, options: &Options) -> DbResult<QueryOutput> {
        self.run(Op::Update, table, Input::Row(row), options).await
    }

    /// Add every non-key column of `row` to the stored value.
    pub async fn incr(&self, table: &str, row: Row, options: &Options) -> DbResult<QueryOutput> {
        let mut options = options.clone();
        if options.counter.is_empty() {
            let keys = self.table_keys(table, &options).await?;
            options.counter = row
                .keys()
                .filter(|name| !keys.contains(name))
                .cloned()
                .collect();
        }
        self.run(Op::Incr, table, Input::Row(row), &options).await
    }

    pub async fn del(&self, table: &str, row: Row, options: &Options) -> DbResult<QueryOutput> {
        self.run(Op::Del, table, Input::Row(row), options).await
    }

    /// Insert a missing record or update an existing one when it changed.
    ///
    /// The existing record is looked up by key. It is updated only when
    /// `check_mtime` is newer, or when `check_data` finds a differing field,
    /// or when neither check is requested. `add_only` never updates,
    /// `put_only` never inserts; skipped writes return an empty result.
    pub async fn replace(&self, table: &str, row: Row, options: &Options) -> DbResult<QueryOutput> {
        if options.add_only && options.put_only {
            return Ok(QueryOutput::empty());
        }
        let pool = self.pool(table, options).await?;
        let mut options = options.clone();
        if options.keys.is_empty() {
            options.keys = self.table_keys(table, &options).await?;
        }

        let mtime_check = options
            .check_mtime
            .clone()
            .filter(|column| row.get(column).is_some_and(|v| !v.is_empty()));
        let select: Vec<String> = if let Some(column) = &mtime_check {
            vec![column.clone()]
        } else if options.check_data.is_on() {
            let columns = pool.schema().columns(table);
            let mtime = options.mtime.as_deref().unwrap_or("mtime");
            let candidates: Vec<&String> = match &options.check_data {
                CheckData::Columns(list) => list.iter().collect(),
                _ => row.keys().collect(),
            };
            let fields: Vec<String> = candidates
                .into_iter()
                .filter(|name| {
                    !name.starts_with('_')
                        && name.as_str() != mtime
                        && !options.keys.contains(name)
                        && columns.contains_key(name.as_str())
                })
                .cloned()
                .collect();
            if fields.is_empty() {
                options.keys.iter().take(1).cloned().collect()
            } else {
                fields
            }
        } else {
            options.keys.iter().take(1).cloned().collect()
        };

        let lookup_options = Options {
            pool: options.pool.clone(),
            keys: options.keys.clone(),
            ops: options.ops.clone(),
            types_map: options.types_map.clone(),
            select,
            ..Options::default()
        };
        let lookup = pool.prepare(Op::Get, table, Input::Row(row.clone()), &lookup_options)?;
        if lookup.is_empty() {
            if options.put_only {
                return Ok(QueryOutput::empty());
            }
            return self
                .run_on(pool.as_ref(), Op::Add, table, Input::Row(row), &options)
                .await;
        }
        let found = self
            .executor
            .execute(pool.as_ref(), &lookup, &lookup_options)
            .await?;
        debug!(pool = %pool.name(), table, found = found.rows.len(), "Replace lookup");

        let Some(existing) = found.first() else {
            if options.put_only {
                return Ok(QueryOutput::empty());
            }
            return self
                .run_on(pool.as_ref(), Op::Add, table, Input::Row(row), &options)
                .await;
        };
        if options.add_only {
            return Ok(QueryOutput::empty());
        }
        if let Some(column) = &mtime_check {
            let stored = existing.get(column).unwrap_or(&Value::Null);
            let incoming = row.get(column).unwrap_or(&Value::Null);
            if matches!(
                stored.compare(incoming),
                Some(Ordering::Greater | Ordering::Equal)
            ) {
                return Ok(QueryOutput::empty());
            }
        } else if options.check_data.is_on() {
            let same = existing.iter().all(|(name, stored)| {
                stored.to_text() == row.get(name).map(Value::to_text).unwrap_or_default()
            });
            if same {
                return Ok(QueryOutput::empty());
            }
        }
        self.run_on(pool.as_ref(), Op::Update, table, Input::Row(row), &options)
            .await
    }

    /// Create `spec` and refresh the pool's schema cache.
    pub async fn create(&self, spec: TableSpec, options: &Options) -> DbResult<QueryOutput> {
        let table = spec.name.clone();
        let pool = self.pool(&table, options).await?;
        pool.schema().declare(spec.clone());
        let output = self
            .run_on(pool.as_ref(), Op::Create, &table, Input::Table(spec), options)
            .await?;
        pool.load_schema(options).await?;
        Ok(output)
    }

    /// Add the declared columns and indexes of `spec` that the backend lacks.
    pub async fn upgrade(&self, spec: TableSpec, options: &Options) -> DbResult<QueryOutput> {
        let table = spec.name.clone();
        let pool = self.pool(&table, options).await?;
        pool.schema().declare(spec.clone());
        let output = self
            .run_on(pool.as_ref(), Op::Upgrade, &table, Input::Table(spec), options)
            .await?;
        pool.load_schema(options).await?;
        Ok(output)
    }

    /// Drop `table`, forget its cached columns and cached records.
    pub async fn drop(&self, table: &str, options: &Options) -> DbResult<QueryOutput> {
        let pool = self.pool(table, options).await?;
        let output = self
            .run_on(pool.as_ref(), Op::Drop, table, Input::None, options)
            .await?;
        pool.schema().remove(table);
        let prefix = format!("{}:", options.prefix.as_deref().unwrap_or(table));
        if let Err(e) = self.cache().clear(&prefix).await {
            warn!(table, error = %e, "Failed to clear cached records");
        }
        Ok(output)
    }

    /// Drop `tables` from `pool`. Failures are logged and the rest still run.
    pub async fn drop_pool_tables(&self, pool: &str, tables: &[String]) -> DbResult<usize> {
        let options = Options::new().pool(self.registry.get(pool).await?.name());
        let mut dropped = 0;
        for table in tables {
            match self.drop(table, &options).await {
                Ok(_) => dropped += 1,
                Err(e) => warn!(pool, table = %table, error = %e, "Table drop failed"),
            }
        }
        info!(pool, tables = tables.len(), dropped, "Tables dropped");
        Ok(dropped)
    }

    /// Run `hook` on every row read from `table`, after the hooks added
    /// before it.
    pub async fn set_process_row(
        &self,
        table: &str,
        options: &Options,
        hook: RowHook,
    ) -> DbResult<()> {
        self.pool(table, options).await?.hooks().add(table, hook);
        Ok(())
    }

    /// Run a native statement on `pool` (the default pool when `None`).
    pub async fn query_raw(
        &self,
        pool: Option<&str>,
        sql: &str,
        values: &[Value],
    ) -> DbResult<QueryOutput> {
        let pool = match pool {
            Some(name) => self.registry.get(name).await?,
            None => self.registry.resolve(&Options::default(), "").await?,
        };
        self.executor.execute_raw(pool.as_ref(), sql, values).await
    }

    /// Re-read the schema of one pool, or of every pool.
    pub async fn cache_columns(&self, pool: Option<&str>) -> DbResult<()> {
        let pools = match pool {
            Some(name) => vec![self.registry.get(name).await?],
            None => self.registry.pools().await,
        };
        for pool in pools {
            pool.load_schema(&Options::default()).await?;
        }
        Ok(())
    }

    /// Declare `tables` and create or upgrade them. Each table goes to the
    /// pool it is pinned to; unpinned tables go to the default pool.
    pub async fn init_tables(&self, tables: &[TableSpec]) -> DbResult<()> {
        let mut by_pool: BTreeMap<String, Vec<TableSpec>> = BTreeMap::new();
        for spec in tables {
            let pool = self.pool(&spec.name, &Options::default()).await?;
            by_pool
                .entry(pool.name().to_string())
                .or_default()
                .push(spec.clone());
        }
        for (pool, specs) in by_pool {
            self.init_pool_tables(&pool, &specs).await?;
        }
        Ok(())
    }

    /// Declare `tables` in `pool`, create missing ones and add missing
    /// columns, then re-introspect once if anything changed.
    pub async fn init_pool_tables(&self, pool: &str, tables: &[TableSpec]) -> DbResult<()> {
        let pool = self.registry.get(pool).await?;
        let options = Options::new().pool(pool.name());
        for spec in tables {
            pool.schema().declare(spec.clone());
        }
        pool.load_schema(&options).await?;

        let mut changes = 0;
        for spec in tables {
            let schema = pool.schema().table(&spec.name);
            let op = if schema.columns.is_empty() || schema.is_provisional() {
                Op::Create
            } else if schema.columns.values().any(|c| c.provisional) {
                Op::Upgrade
            } else {
                continue;
            };
            match self
                .run_on(pool.as_ref(), op, &spec.name, Input::Table(spec.clone()), &options)
                .await
            {
                Ok(_) => changes += 1,
                Err(e) => warn!(pool = %pool.name(), table = %spec.name, op = %op, error = %e, "Table init failed"),
            }
        }
        info!(pool = %pool.name(), tables = tables.len(), changes, "Tables initialized");
        if changes > 0 {
            pool.load_schema(&options).await?;
        }
        Ok(())
    }

    /// One page of rows near a point from a table keyed by (`geohash`, `id`)
    /// whose geohash column uses [`LocationSearch::precision`] characters.
    ///
    /// The center cell is scanned first, then its neighbors, until `count`
    /// rows are found. Returns the rows and the state for the next page.
    pub async fn get_locations(
        &self,
        table: &str,
        search: &LocationSearch,
        options: &Options,
    ) -> DbResult<(Vec<Row>, LocationSearch)> {
        let mut search = search.clone();
        if search.geohash.is_none() {
            let cell = geo::encode(search.latitude, search.longitude, search.precision());
            search.neighbors = geo::neighbors(&cell);
            search.geohash = Some(cell);
        }
        let count = search.count.clamp(1, 250) as usize;
        let mut rows: Vec<Row> = Vec::new();

        while let Some(cell) = search.geohash.clone() {
            let mut condition = Row::new();
            condition.insert("geohash".into(), Value::Text(cell));
            if let Some(id) = &search.id {
                condition.insert("id".into(), Value::Text(id.clone()));
            }
            let mut page = options
                .clone()
                .keys(["geohash", "id"])
                .op("id", ">")
                .count((count - rows.len()) as u32);
            page.sort = Vec::new();
            page.start = None;
            let page = page.sort("id", false);
            let out = self.select(table, Input::Row(condition), &page).await?;
            if let Some(last) = out.rows.last() {
                search.id = last.get("id").map(Value::to_text);
            }
            rows.extend(out.rows);
            if rows.len() >= count || search.neighbors.is_empty() {
                break;
            }
            search.geohash = Some(search.neighbors.remove(0));
            search.id = None;
        }

        if search.calc_distance {
            for row in &mut rows {
                let point = (
                    row.get("latitude").and_then(Value::as_f64),
                    row.get("longitude").and_then(Value::as_f64),
                );
                if let (Some(lat), Some(lon)) = point {
                    let km = geo::distance_km(search.latitude, search.longitude, lat, lon);
                    row.insert("distance".into(), Value::Float(km));
                }
            }
        }
        debug!(table, rows = rows.len(), cell = ?search.geohash, "Location page");
        Ok((rows, search))
    }

    /// Run `op` by name; used by the command line.
    pub async fn call(
        &self,
        op: &str,
        table: &str,
        input: serde_json::Value,
        options: &Options,
    ) -> DbResult<QueryOutput> {
        let row = || row_from_json(input.clone());
        match op {
            "get" => self.get(table, row(), options).await,
            "select" | "search" | "list" => {
                let input = match &input {
                    serde_json::Value::Array(items) => {
                        Input::List(items.iter().cloned().map(row_from_json).collect())
                    }
                    serde_json::Value::String(ids) if op == "list" => {
                        return self.list_keys(table, ids, options).await;
                    }
                    serde_json::Value::Null => Input::None,
                    _ => Input::Row(row()),
                };
                match op {
                    "search" => self.search(table, input, options).await,
                    _ => self.select(table, input, options).await,
                }
            }
            "add" => self.add(table, row(), options).await,
            "put" => self.put(table, row(), options).await,
            "update" => self.update(table, row(), options).await,
            "incr" => self.incr(table, row(), options).await,
            "replace" => self.replace(table, row(), options).await,
            "del" => self.del(table, row(), options).await,
            "create" => self.create(TableSpec::from_json(table, &input), options).await,
            "upgrade" => self.upgrade(TableSpec::from_json(table, &input), options).await,
            "drop" => self.drop(table, options).await,
            other => Err(DbError::invalid_input(format!("Unknown operation '{other}'"))),
        }
    }

    pub async fn close(&self) {
        self.registry.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::NonePool;
    use serde_json::json;

    async fn none_db() -> Db {
        let registry = Registry::new().unwrap();
        registry.register(Arc::new(NonePool::new("nil").unwrap())).await.unwrap();
        registry.set_default("nil").await;
        Db::with_registry(registry)
    }

    #[tokio::test]
    async fn test_none_pool_select_is_empty() {
        let db = none_db().await;
        let out = db
            .select("t", Input::Row(row_from_json(json!({"id": 1}))), &Options::default())
            .await
            .unwrap();
        assert!(out.rows.is_empty());
        assert_eq!(out.info.affected_rows, 0);
        assert!(out.info.next_token.is_none());
    }

    #[tokio::test]
    async fn test_replace_with_both_flags_is_noop() {
        let db = none_db().await;
        let opts = Options::new().add_only().put_only();
        let out = db
            .replace("t", row_from_json(json!({"id": 1})), &opts)
            .await
            .unwrap();
        assert!(out.rows.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_op_rejected() {
        let db = none_db().await;
        let err = db.call("merge", "t", json!({}), &Options::default()).await;
        assert!(matches!(err, Err(DbError::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn test_list_keys_requires_key_columns() {
        let db = none_db().await;
        let err = db.list_keys("t", "a,b", &Options::default()).await;
        assert!(err.is_err());
        let out = db
            .list_keys("t", "a,b", &Options::new().keys(["id"]))
            .await
            .unwrap();
        assert!(out.rows.is_empty());
    }
}
