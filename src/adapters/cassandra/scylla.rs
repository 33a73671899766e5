//! [`CqlClient`] over the scylla driver.

use super::CqlClient;
use crate::error::{DbError, DbResult};
use crate::models::{PoolConfig, QueryOutput, Row, Value};
use async_trait::async_trait;
use chrono::DateTime;
use scylla::frame::response::result::CqlValue;
use scylla::{Session, SessionBuilder};
use url::Url;

pub struct ScyllaClient {
    session: Session,
    keyspace: String,
}

impl std::fmt::Debug for ScyllaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScyllaClient")
            .field("keyspace", &self.keyspace)
            .finish_non_exhaustive()
    }
}

fn query_error(e: impl std::fmt::Display) -> DbError {
    DbError::database(e.to_string(), None, "Check the CQL statement and keyspace")
}

impl ScyllaClient {
    /// `cassandra://[user:pass@]host[:port][,host...]/keyspace`
    pub async fn connect(config: &PoolConfig) -> DbResult<Self> {
        let url = Url::parse(&config.connection_string).map_err(|e| {
            DbError::connection(
                format!("Invalid Cassandra URL: {e}"),
                "Use cassandra://host:9042/keyspace",
            )
        })?;
        let keyspace = url.path().trim_start_matches('/').to_string();
        if keyspace.is_empty() {
            return Err(DbError::connection(
                "Cassandra URL has no keyspace",
                "Use cassandra://host:9042/keyspace",
            ));
        }
        let host = url.host_str().unwrap_or("127.0.0.1");
        let port = url.port().unwrap_or(9042);

        let mut builder = SessionBuilder::new().known_node(format!("{host}:{port}"));
        if !url.username().is_empty() {
            builder = builder.user(url.username(), url.password().unwrap_or_default());
        }
        let session = builder.build().await.map_err(|e| {
            DbError::connection(
                format!("Failed to connect: {e}"),
                "Check that the Cassandra cluster is reachable",
            )
        })?;
        session
            .use_keyspace(&keyspace, false)
            .await
            .map_err(query_error)?;
        Ok(Self { session, keyspace })
    }
}

fn to_cql(value: &Value) -> CqlValue {
    match value {
        Value::Null => CqlValue::Empty,
        Value::Bool(b) => CqlValue::Boolean(*b),
        Value::Int(n) => CqlValue::BigInt(*n),
        Value::Float(f) => CqlValue::Double(*f),
        Value::Text(s) => CqlValue::Text(s.clone()),
        Value::Bytes(b) => CqlValue::Blob(b.clone()),
        Value::Timestamp(ts) => CqlValue::BigInt(ts.timestamp_millis()),
        Value::List(items) => CqlValue::List(items.iter().map(to_cql).collect()),
        Value::Json(_) => CqlValue::Text(value.to_json().to_string()),
    }
}

fn from_cql(value: CqlValue) -> Value {
    match value {
        CqlValue::Ascii(s) | CqlValue::Text(s) => Value::Text(s),
        CqlValue::Boolean(b) => Value::Bool(b),
        CqlValue::Blob(b) => Value::Bytes(b),
        CqlValue::Counter(c) => Value::Int(c.0),
        CqlValue::Double(f) => Value::Float(f),
        CqlValue::Float(f) => Value::Float(f64::from(f)),
        CqlValue::Int(n) => Value::Int(i64::from(n)),
        CqlValue::BigInt(n) => Value::Int(n),
        CqlValue::SmallInt(n) => Value::Int(i64::from(n)),
        CqlValue::TinyInt(n) => Value::Int(i64::from(n)),
        CqlValue::Timestamp(ts) => DateTime::from_timestamp_millis(ts.0)
            .map(Value::Timestamp)
            .unwrap_or(Value::Int(ts.0)),
        CqlValue::List(items) | CqlValue::Set(items) => {
            Value::List(items.into_iter().map(from_cql).collect())
        }
        CqlValue::Map(pairs) => {
            let obj = pairs
                .into_iter()
                .map(|(k, v)| (from_cql(k).to_text(), from_cql(v).to_json()))
                .collect();
            Value::Json(serde_json::Value::Object(obj))
        }
        CqlValue::Empty => Value::Null,
        other => Value::Text(format!("{other:?}")),
    }
}

#[async_trait]
impl CqlClient for ScyllaClient {
    async fn execute(&self, cql: &str, values: &[Value]) -> DbResult<QueryOutput> {
        let bound: Vec<CqlValue> = values.iter().map(to_cql).collect();
        let result = self.session.query(cql, bound).await.map_err(query_error)?;
        let names: Vec<String> = result.col_specs.iter().map(|s| s.name.clone()).collect();
        let rows: Vec<Row> = result
            .rows
            .unwrap_or_default()
            .into_iter()
            .map(|row| {
                names
                    .iter()
                    .cloned()
                    .zip(row.columns)
                    .map(|(name, value)| (name, value.map(from_cql).unwrap_or(Value::Null)))
                    .collect()
            })
            .collect();
        Ok(QueryOutput::with_rows(rows))
    }

    fn keyspace(&self) -> &str {
        &self.keyspace
    }
}
