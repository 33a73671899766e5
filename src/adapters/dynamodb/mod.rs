//! DynamoDB item-store pool.
//!
//! Operations map onto the native item API: get/put/update/delete by primary
//! key, Query when the hash key is given and Scan otherwise. Conditions on
//! non-key attributes are evaluated on the fetched items.

pub mod client;
pub mod http;
pub mod memory;

pub use client::{ItemClient, KeySchema, TableDescription};
pub use http::HttpItemClient;
pub use memory::MemoryItemStore;

use crate::adapters::{predicate, project, writable};
use crate::config::PoolOptions;
use crate::db::pool::{Connection, Pool, PoolCore};
use crate::error::{DbError, DbResult};
use crate::models::{
    BackendKind, ColumnInfo, DbType, Input, Op, Options, PoolConfig, QueryOutput, Request, Row,
    TableIntrospection, TableSpec, Token, Value,
};
use crate::sql::{Dialect, ddl};
use async_trait::async_trait;
use client::{
    KeyCondition, KeyOp, QueryInput, ScanInput, UpdateInput, WriteCondition,
    is_conditional_check_failed,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// BatchGetItem accepts at most this many keys.
const BATCH_SIZE: usize = 100;
const BATCH_RETRIES: u32 = 5;

#[derive(Debug)]
pub struct DynamoPool {
    core: PoolCore,
    client: Arc<dyn ItemClient>,
}

impl DynamoPool {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn ItemClient>,
        options: &PoolOptions,
    ) -> DbResult<Self> {
        Ok(Self {
            core: PoolCore::new(name, BackendKind::DynamoDB, Dialect::default(), options)?,
            client,
        })
    }

    /// `dynamodb://memory` keeps items in process, any other location is a
    /// region.
    pub fn connect(config: &PoolConfig) -> DbResult<Self> {
        let client: Arc<dyn ItemClient> = if config.location() == "memory" {
            Arc::new(MemoryItemStore::new())
        } else {
            Arc::new(HttpItemClient::from_config(config)?)
        };
        Self::new(config.name.clone(), client, &config.pool_options)
    }

    pub fn client(&self) -> &Arc<dyn ItemClient> {
        &self.client
    }

    fn table_keys(&self, table: &str) -> Option<KeySchema> {
        let keys = self.schema().keys(table);
        KeySchema::from_keys(&keys)
    }

    fn require_keys(&self, table: &str) -> DbResult<KeySchema> {
        self.table_keys(table).ok_or_else(|| {
            DbError::invalid_input(format!("Table {table} has no primary key"))
        })
    }

    async fn create(&self, table: &str, spec: &TableSpec) -> DbResult<QueryOutput> {
        if self.client.describe_table(table).await?.is_some() {
            debug!(pool = %self.name(), table, "Table exists");
            return Ok(QueryOutput::empty());
        }
        let mut primary = spec.primary_keys();
        if primary.is_empty() {
            primary = self.schema().keys(table);
        }
        let keys = KeySchema::from_keys(&primary).ok_or_else(|| {
            DbError::invalid_input(format!("Table {table} needs at least one primary column"))
        })?;

        let mut groups: Vec<u8> = spec.columns.iter().flat_map(|c| c.index.clone()).collect();
        groups.sort_unstable();
        groups.dedup();
        let indexes: Vec<(String, KeySchema)> = groups
            .into_iter()
            .filter_map(|group| {
                let columns = spec.index_columns(group);
                KeySchema::from_keys(&columns).map(|keys| (ddl::index_name(table, group), keys))
            })
            .collect();

        let attributes: Vec<(String, String)> = spec
            .columns
            .iter()
            .map(|c| {
                let kind = match c.db_type() {
                    DbType::Number => "N",
                    DbType::Bytes => "B",
                    _ => "S",
                };
                (c.name.clone(), kind.to_string())
            })
            .collect();

        self.client
            .create_table(table, &keys, &indexes, &attributes)
            .await?;
        info!(
            pool = %self.name(),
            table,
            keys = %keys.names().join(","),
            indexes = indexes.len(),
            "Table created"
        );
        Ok(QueryOutput::affected(1))
    }

    async fn drop_table(&self, table: &str) -> DbResult<QueryOutput> {
        match self.client.delete_table(table).await {
            Ok(()) => {
                info!(pool = %self.name(), table, "Table dropped");
                Ok(QueryOutput::affected(1))
            }
            Err(e) if e.code() == Some(client::RESOURCE_NOT_FOUND) => Ok(QueryOutput::empty()),
            Err(e) => Err(e),
        }
    }

    async fn get(&self, table: &str, row: &Row, options: &Options) -> DbResult<QueryOutput> {
        let keys = self.require_keys(table)?;
        let Some(key) = keys.key_of(row) else {
            return Ok(QueryOutput::empty());
        };
        let item = self.client.get_item(table, &key, options.consistent).await?;
        Ok(QueryOutput::with_rows(
            item.into_iter().map(|i| project(i, options)).collect(),
        ))
    }

    async fn select(
        &self,
        table: &str,
        row: Option<&Row>,
        options: &Options,
    ) -> DbResult<QueryOutput> {
        let keys = self.require_keys(table)?;
        let index_keys = match &options.index {
            Some(name) => {
                let columns = self.schema().indexes().get(name).cloned().unwrap_or_default();
                KeySchema::from_keys(&columns)
                    .ok_or_else(|| DbError::invalid_input(format!("Unknown index: {name}")))?
            }
            None => keys.clone(),
        };

        let empty = Row::new();
        let mut key_conditions = Vec::new();
        let mut filters = Vec::new();
        for cond in predicate::conditions(row.unwrap_or(&empty), &[], options) {
            let is_hash = cond.column == index_keys.hash
                && cond.op == "="
                && !matches!(cond.value, Value::List(_));
            let is_range = index_keys.range.as_deref() == Some(cond.column.as_str());
            match KeyOp::parse(&cond.op, &cond.value) {
                Some(op) if is_hash || is_range => key_conditions.push(KeyCondition {
                    name: cond.column,
                    op,
                    value: cond.value,
                }),
                _ => filters.push(cond),
            }
        }
        let use_query = key_conditions.iter().any(|c| c.name == index_keys.hash);
        if !use_query {
            // Scan cannot use key conditions; evaluate them like any other.
            filters.extend(key_conditions.drain(..).map(|c| predicate::Condition {
                op: match &c.op {
                    KeyOp::Eq => "=",
                    KeyOp::Lt => "<",
                    KeyOp::Le => "<=",
                    KeyOp::Gt => ">",
                    KeyOp::Ge => ">=",
                    KeyOp::BeginsWith => "begins_with",
                    KeyOp::Between(..) => "between",
                }
                .to_string(),
                column: c.name,
                value: c.value,
            }));
        }

        let count = options.count_or_default();
        let limit = (!options.total).then_some(count);
        let mut start = match &options.start {
            Some(Token::Key(key)) => Some(key.clone()),
            _ => None,
        };
        let mut token_names = keys.names();
        for name in index_keys.names() {
            if !token_names.contains(&name) {
                token_names.push(name);
            }
        }

        let mut rows = Vec::new();
        let mut total: u64 = 0;
        let mut next_token = None;
        'pages: loop {
            let page = if use_query {
                self.client
                    .query(&QueryInput {
                        table: table.to_string(),
                        index: options.index.clone(),
                        conditions: key_conditions.clone(),
                        start_key: start.clone(),
                        limit,
                        consistent: options.consistent,
                        descending: options.sort.first().is_some_and(|s| s.desc),
                    })
                    .await?
            } else {
                self.client
                    .scan(&ScanInput {
                        table: table.to_string(),
                        start_key: start.clone(),
                        limit,
                        consistent: options.consistent,
                    })
                    .await?
            };

            let page_len = page.items.len();
            for (i, item) in page.items.into_iter().enumerate() {
                if !predicate::matches_all(&item, &filters) {
                    continue;
                }
                if options.total {
                    total += 1;
                    continue;
                }
                rows.push(item);
                if rows.len() >= count as usize {
                    if i + 1 < page_len || page.last_key.is_some() {
                        next_token = rows.last().map(|last| {
                            Token::Key(
                                token_names
                                    .iter()
                                    .filter_map(|n| last.get(n).map(|v| (n.clone(), v.clone())))
                                    .collect(),
                            )
                        });
                    }
                    break 'pages;
                }
            }
            match page.last_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }

        if options.total {
            let mut row = Row::new();
            row.insert("count".to_string(), Value::Int(total as i64));
            return Ok(QueryOutput::with_rows(vec![row]));
        }
        let mut output =
            QueryOutput::with_rows(rows.into_iter().map(|r| project(r, options)).collect());
        output.info.next_token = next_token;
        Ok(output)
    }

    async fn list(&self, table: &str, rows: &[Row], options: &Options) -> DbResult<QueryOutput> {
        let keys = self.require_keys(table)?;
        let wanted: Vec<Row> = rows.iter().filter_map(|r| keys.key_of(r)).collect();
        let mut found = Vec::new();
        for chunk in wanted.chunks(BATCH_SIZE) {
            let mut pending = chunk.to_vec();
            let mut attempt = 0;
            while !pending.is_empty() {
                if attempt > BATCH_RETRIES {
                    return Err(DbError::database(
                        format!("{} keys remain unprocessed", pending.len()),
                        None,
                        "Reduce the batch or raise the table capacity",
                    ));
                }
                if attempt > 0 {
                    warn!(
                        pool = %self.name(),
                        table,
                        unprocessed = pending.len(),
                        attempt,
                        "Retrying unprocessed keys"
                    );
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                let out = self
                    .client
                    .batch_get(table, &pending, options.consistent)
                    .await?;
                found.extend(out.items);
                pending = out.unprocessed;
                attempt += 1;
            }
        }
        Ok(QueryOutput::with_rows(
            found.into_iter().map(|r| project(r, options)).collect(),
        ))
    }

    async fn write(
        &self,
        table: &str,
        op: Op,
        row: &Row,
        options: &Options,
    ) -> DbResult<QueryOutput> {
        let keys = self.require_keys(table)?;
        let item = writable(row, options);
        let Some(key) = keys.key_of(&item) else {
            return Ok(QueryOutput::empty());
        };

        match op {
            Op::Add | Op::Put => {
                let condition = if op == Op::Add {
                    WriteCondition::NotExists(keys.names())
                } else {
                    WriteCondition::None
                };
                self.client.put_item(table, &item, &condition).await?;
                let mut output = QueryOutput::affected(1);
                if options.returning.is_some() {
                    output.rows.push(item);
                }
                Ok(output)
            }
            Op::Update | Op::Incr => {
                let key_names = keys.names();
                let counters: Vec<&String> = if options.counter.is_empty() && op == Op::Incr {
                    item.keys().filter(|n| !key_names.contains(n)).collect()
                } else {
                    options.counter.iter().collect()
                };
                let mut input = UpdateInput {
                    table: table.to_string(),
                    key,
                    condition: if op == Op::Update {
                        WriteCondition::Exists(key_names.clone())
                    } else {
                        WriteCondition::None
                    },
                    ..Default::default()
                };
                for (name, value) in &item {
                    if key_names.contains(name) {
                        continue;
                    }
                    if counters.contains(&name) && value.is_number() {
                        input.add.insert(name.clone(), value.clone());
                    } else if counters.contains(&name) && value.as_f64().is_some() {
                        input.add.insert(name.clone(), Value::Float(value.as_f64().unwrap_or(0.0)));
                    } else if value.is_null() {
                        input.remove.push(name.clone());
                    } else {
                        input.set.insert(name.clone(), value.clone());
                    }
                }
                match self.client.update_item(&input).await {
                    Ok(updated) => {
                        let mut output = QueryOutput::affected(1);
                        if options.returning.is_some() {
                            output.rows.push(project(updated, options));
                        }
                        Ok(output)
                    }
                    // Nothing to update is not an error, same as zero rows in SQL
                    Err(e) if op == Op::Update && is_conditional_check_failed(&e) => {
                        Ok(QueryOutput::affected(0))
                    }
                    Err(e) => Err(e),
                }
            }
            Op::Del => {
                let old = self.client.delete_item(table, &key).await?;
                Ok(QueryOutput::affected(u64::from(old.is_some())))
            }
            other => Err(DbError::internal(format!("{other} is not an item write"))),
        }
    }
}

#[async_trait]
impl Pool for DynamoPool {
    fn core(&self) -> &PoolCore {
        &self.core
    }

    fn prepare(&self, op: Op, table: &str, input: Input, options: &Options) -> DbResult<Request> {
        if options.strict {
            self.schema().strict_table(table)?;
        }
        let keys = self.table_keys(table);
        let has_key = |row: Option<&Row>| match (&keys, row) {
            (Some(keys), Some(row)) => keys.key_of(row).is_some(),
            _ => false,
        };
        let ready = match op {
            Op::Get | Op::Add | Op::Put | Op::Update | Op::Incr | Op::Del => has_key(input.row()),
            Op::List => matches!(&input, Input::List(rows) if !rows.is_empty()) && keys.is_some(),
            Op::Create | Op::Upgrade => input.table().is_some(),
            Op::Select | Op::Search | Op::Drop => true,
        };
        Ok(if ready {
            Request::native(op, table, input)
        } else {
            Request::empty(op, table, input)
        })
    }

    async fn execute(
        &self,
        _conn: &mut Connection,
        request: &Request,
        options: &Options,
    ) -> DbResult<QueryOutput> {
        if request.is_empty() {
            return Ok(QueryOutput::empty());
        }
        let table = request.table.as_str();
        match (request.op, &request.input) {
            (Op::Create, Input::Table(spec)) => self.create(table, spec).await,
            (Op::Upgrade, _) => Ok(QueryOutput::empty()),
            (Op::Drop, _) => self.drop_table(table).await,
            (Op::Get, Input::Row(row)) => self.get(table, row, options).await,
            (Op::Select | Op::Search, input) => self.select(table, input.row(), options).await,
            (Op::List, Input::List(rows)) => self.list(table, rows, options).await,
            (op @ (Op::Add | Op::Put | Op::Update | Op::Incr | Op::Del), Input::Row(row)) => {
                self.write(table, op, row, options).await
            }
            _ => Ok(QueryOutput::empty()),
        }
    }

    async fn cache_columns(
        &self,
        _options: &Options,
    ) -> DbResult<BTreeMap<String, TableIntrospection>> {
        let mut tables = BTreeMap::new();
        for name in self.client.list_tables().await? {
            let Some(desc) = self.client.describe_table(&name).await? else {
                continue;
            };
            let mut info = TableIntrospection::default();
            for (pos, (attr, kind)) in desc.attributes.iter().enumerate() {
                let native = match kind.as_str() {
                    "N" => "number",
                    "B" => "bytes",
                    _ => "text",
                };
                let mut column = ColumnInfo::new(native, pos as u32 + 1);
                column.primary = desc.keys.names().contains(attr);
                column.nullable = !column.primary;
                info.columns.insert(attr.clone(), column);
            }
            info.keys = desc.keys.names();
            for (index, keys) in &desc.indexes {
                info.indexes.insert(index.clone(), keys.names());
            }
            tables.insert(name, info);
        }
        Ok(tables)
    }

    fn convert_error(&self, table: &str, op: Op, err: DbError) -> DbError {
        if op == Op::Add && is_conditional_check_failed(&err) {
            DbError::record_exists(table)
        } else {
            err
        }
    }
}
