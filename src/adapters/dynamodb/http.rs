//! DynamoDB JSON protocol over HTTPS with Signature Version 4.

use super::client::{
    BatchGetOutput, ItemClient, KeyOp, KeySchema, Page, QueryInput, RESOURCE_NOT_FOUND,
    ScanInput, TableDescription, UpdateInput, WriteCondition,
};
use crate::error::{DbError, DbResult};
use crate::models::{PoolConfig, Row, Value};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Map, Value as JsonValue, json};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;
use url::Url;

const TARGET_PREFIX: &str = "DynamoDB_20120810";
const CONTENT_TYPE_JSON: &str = "application/x-amz-json-1.0";
const SERVICE: &str = "dynamodb";

/// Static credentials, from the pool URL or the standard AWS variables.
#[derive(Clone)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            access_key: std::env::var("AWS_ACCESS_KEY_ID").ok()?,
            secret_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok()?,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

#[derive(Debug)]
pub struct HttpItemClient {
    http: reqwest::Client,
    endpoint: Url,
    region: String,
    credentials: Credentials,
}

impl HttpItemClient {
    /// `dynamodb://<region>[?endpoint=<url>]`
    pub fn from_config(config: &PoolConfig) -> DbResult<Self> {
        let url = Url::parse(&config.connection_string).map_err(|e| {
            DbError::connection(
                format!("Invalid DynamoDB URL: {e}"),
                "Use dynamodb://<region> or dynamodb://memory",
            )
        })?;
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let param = |key: &str| {
            query
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        let region = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(String::from)
            .or_else(|| std::env::var("AWS_REGION").ok())
            .unwrap_or_else(|| "us-east-1".to_string());
        let endpoint = match param("endpoint") {
            Some(endpoint) => endpoint,
            None => format!("https://dynamodb.{region}.amazonaws.com/"),
        };
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            DbError::connection(
                format!("Invalid DynamoDB endpoint: {e}"),
                "Use an absolute http(s) URL for endpoint",
            )
        })?;

        let credentials = match (param("access_key"), param("secret_key")) {
            (Some(access_key), Some(secret_key)) => Credentials {
                access_key,
                secret_key,
                session_token: param("session_token"),
            },
            _ => Credentials::from_env().ok_or_else(|| {
                DbError::connection(
                    "No AWS credentials found",
                    "Set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
                )
            })?,
        };

        let http = reqwest::Client::builder()
            .timeout(config.pool_options.query_timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            endpoint,
            region,
            credentials,
        })
    }

    async fn call(&self, action: &str, body: JsonValue) -> DbResult<JsonValue> {
        let payload = serde_json::to_vec(&body)?;
        let headers = self.signed_headers(action, &payload, Utc::now())?;
        debug!(action, region = %self.region, "DynamoDB request");

        let response = self
            .http
            .post(self.endpoint.clone())
            .headers(headers)
            .body(payload)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        let value: JsonValue = if text.is_empty() {
            JsonValue::Object(Map::new())
        } else {
            serde_json::from_str(&text)?
        };
        if status.is_success() {
            return Ok(value);
        }

        let code = value
            .get("__type")
            .and_then(JsonValue::as_str)
            .map(|t| t.rsplit('#').next().unwrap_or(t).to_string());
        let message = value
            .get("message")
            .or_else(|| value.get("Message"))
            .and_then(JsonValue::as_str)
            .unwrap_or("request failed")
            .to_string();
        Err(DbError::database(
            format!("{action}: {message}"),
            code,
            format!("DynamoDB returned HTTP {}", status.as_u16()),
        ))
    }

    fn signed_headers(
        &self,
        action: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> DbResult<HeaderMap> {
        let host = match (self.endpoint.host_str(), self.endpoint.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(DbError::connection("Endpoint has no host", "Check endpoint")),
        };
        let target = format!("{TARGET_PREFIX}.{action}");
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut canonical = vec![
            ("content-type", CONTENT_TYPE_JSON.to_string()),
            ("host", host),
            ("x-amz-date", amz_date.clone()),
        ];
        if let Some(token) = &self.credentials.session_token {
            canonical.push(("x-amz-security-token", token.clone()));
        }
        canonical.push(("x-amz-target", target.clone()));

        let authorization = sign(
            &self.credentials,
            &self.region,
            self.endpoint.path(),
            &canonical,
            payload,
            now,
        );

        let mut headers = HeaderMap::new();
        let header = |v: &str| {
            HeaderValue::from_str(v)
                .map_err(|e| DbError::internal(format!("Invalid header value: {e}")))
        };
        headers.insert(CONTENT_TYPE, header(CONTENT_TYPE_JSON)?);
        headers.insert("x-amz-date", header(&amz_date)?);
        headers.insert("x-amz-target", header(&target)?);
        if let Some(token) = &self.credentials.session_token {
            headers.insert("x-amz-security-token", header(token)?);
        }
        headers.insert("authorization", header(&authorization)?);
        Ok(headers)
    }
}

/// HMAC-SHA256 (RFC 2104).
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    const BLOCK: usize = 64;
    let mut key_block = [0u8; BLOCK];
    if key.len() > BLOCK {
        let hashed = Sha256::digest(key);
        key_block[..hashed.len()].copy_from_slice(&hashed);
    } else {
        key_block[..key.len()].copy_from_slice(key);
    }
    let ipad: Vec<u8> = key_block.iter().map(|b| b ^ 0x36).collect();
    let opad: Vec<u8> = key_block.iter().map(|b| b ^ 0x5c).collect();

    let mut inner = Sha256::new();
    inner.update(&ipad);
    inner.update(data);
    let inner = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(&opad);
    outer.update(inner);
    outer.finalize().to_vec()
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Authorization header value for a POST with the given lowercase, sorted
/// headers.
fn sign(
    credentials: &Credentials,
    region: &str,
    path: &str,
    headers: &[(&str, String)],
    payload: &[u8],
    now: DateTime<Utc>,
) -> String {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let scope = format!("{date}/{region}/{SERVICE}/aws4_request");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{k}:{}\n", v.trim()))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join(";");
    let path = if path.is_empty() { "/" } else { path };
    let canonical_request = format!(
        "POST\n{path}\n\n{canonical_headers}\n{signed_headers}\n{}",
        hex::encode(Sha256::digest(payload))
    );
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );
    let key = signing_key(&credentials.secret_key, &date, region, SERVICE);
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));
    format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key
    )
}

/// Encode a value as a typed attribute (`{"S": ...}`, `{"N": ...}`, ...).
pub fn to_attr(value: &Value) -> JsonValue {
    match value {
        Value::Null => json!({ "NULL": true }),
        Value::Bool(b) => json!({ "BOOL": b }),
        Value::Int(n) => json!({ "N": n.to_string() }),
        Value::Float(f) => json!({ "N": f.to_string() }),
        Value::Text(s) => json!({ "S": s }),
        Value::Bytes(b) => json!({ "B": STANDARD.encode(b) }),
        Value::Timestamp(_) => json!({ "S": value.to_text() }),
        Value::List(items) => json!({ "L": items.iter().map(to_attr).collect::<Vec<_>>() }),
        Value::Json(JsonValue::Object(obj)) => {
            let map: Map<String, JsonValue> = obj
                .iter()
                .map(|(k, v)| (k.clone(), to_attr(&Value::from_json(v.clone()))))
                .collect();
            json!({ "M": map })
        }
        Value::Json(other) => to_attr(&Value::from_json(other.clone())),
    }
}

fn number(s: &str) -> Value {
    s.parse::<i64>()
        .map(Value::Int)
        .or_else(|_| s.parse::<f64>().map(Value::Float))
        .unwrap_or_else(|_| Value::Text(s.to_string()))
}

/// Decode a typed attribute.
pub fn from_attr(attr: &JsonValue) -> Value {
    let Some((kind, inner)) = attr.as_object().and_then(|o| o.iter().next()) else {
        return Value::Null;
    };
    match kind.as_str() {
        "S" => Value::Text(inner.as_str().unwrap_or_default().to_string()),
        "N" => number(inner.as_str().unwrap_or_default()),
        "BOOL" => Value::Bool(inner.as_bool().unwrap_or(false)),
        "B" => STANDARD
            .decode(inner.as_str().unwrap_or_default())
            .map(Value::Bytes)
            .unwrap_or(Value::Null),
        "L" => Value::List(
            inner
                .as_array()
                .map(|items| items.iter().map(from_attr).collect())
                .unwrap_or_default(),
        ),
        "M" => {
            let obj: Map<String, JsonValue> = inner
                .as_object()
                .map(|o| {
                    o.iter()
                        .map(|(k, v)| (k.clone(), from_attr(v).to_json()))
                        .collect()
                })
                .unwrap_or_default();
            Value::Json(JsonValue::Object(obj))
        }
        "SS" | "NS" => Value::List(
            inner
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(JsonValue::as_str)
                        .map(|s| if kind == "NS" { number(s) } else { Value::from(s) })
                        .collect()
                })
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}

pub fn item_to_json(row: &Row) -> JsonValue {
    JsonValue::Object(row.iter().map(|(k, v)| (k.clone(), to_attr(v))).collect())
}

pub fn item_from_json(value: &JsonValue) -> Row {
    value
        .as_object()
        .map(|o| o.iter().map(|(k, v)| (k.clone(), from_attr(v))).collect())
        .unwrap_or_default()
}

fn items_from_json(value: Option<&JsonValue>) -> Vec<Row> {
    value
        .and_then(JsonValue::as_array)
        .map(|items| items.iter().map(item_from_json).collect())
        .unwrap_or_default()
}

/// Placeholder allocation for expression attribute names and values.
#[derive(Default)]
struct Expression {
    names: Map<String, JsonValue>,
    values: Map<String, JsonValue>,
}

impl Expression {
    fn name(&mut self, name: &str) -> String {
        let placeholder = format!("#n{}", self.names.len());
        self.names
            .insert(placeholder.clone(), JsonValue::String(name.to_string()));
        placeholder
    }

    fn value(&mut self, value: &Value) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), to_attr(value));
        placeholder
    }

    fn condition(&mut self, condition: &WriteCondition) -> Option<String> {
        let (func, names) = match condition {
            WriteCondition::None => return None,
            WriteCondition::Exists(names) => ("attribute_exists", names),
            WriteCondition::NotExists(names) => ("attribute_not_exists", names),
        };
        let parts: Vec<String> = names
            .iter()
            .map(|n| format!("{func}({})", self.name(n)))
            .collect();
        (!parts.is_empty()).then(|| parts.join(" AND "))
    }

    fn apply(self, body: &mut Map<String, JsonValue>) {
        if !self.names.is_empty() {
            body.insert("ExpressionAttributeNames".into(), JsonValue::Object(self.names));
        }
        if !self.values.is_empty() {
            body.insert("ExpressionAttributeValues".into(), JsonValue::Object(self.values));
        }
    }
}

fn key_schema_json(keys: &KeySchema) -> JsonValue {
    let mut schema = vec![json!({ "AttributeName": keys.hash, "KeyType": "HASH" })];
    if let Some(range) = &keys.range {
        schema.push(json!({ "AttributeName": range, "KeyType": "RANGE" }));
    }
    JsonValue::Array(schema)
}

fn key_schema_from_json(value: Option<&JsonValue>) -> Option<KeySchema> {
    let mut hash = None;
    let mut range = None;
    for entry in value?.as_array()? {
        let name = entry.get("AttributeName")?.as_str()?.to_string();
        match entry.get("KeyType")?.as_str()? {
            "HASH" => hash = Some(name),
            _ => range = Some(name),
        }
    }
    Some(KeySchema { hash: hash?, range })
}

#[async_trait]
impl ItemClient for HttpItemClient {
    async fn create_table(
        &self,
        table: &str,
        keys: &KeySchema,
        indexes: &[(String, KeySchema)],
        attributes: &[(String, String)],
    ) -> DbResult<()> {
        let mut names = keys.names();
        for (_, index) in indexes {
            names.extend(index.names());
        }
        names.sort();
        names.dedup();
        let definitions: Vec<JsonValue> = names
            .iter()
            .map(|name| {
                let kind = attributes
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, k)| k.as_str())
                    .unwrap_or("S");
                json!({ "AttributeName": name, "AttributeType": kind })
            })
            .collect();

        let mut body = json!({
            "TableName": table,
            "KeySchema": key_schema_json(keys),
            "AttributeDefinitions": definitions,
            "BillingMode": "PAY_PER_REQUEST",
        });
        if !indexes.is_empty() {
            body["GlobalSecondaryIndexes"] = indexes
                .iter()
                .map(|(name, keys)| {
                    json!({
                        "IndexName": name,
                        "KeySchema": key_schema_json(keys),
                        "Projection": { "ProjectionType": "ALL" },
                    })
                })
                .collect();
        }
        self.call("CreateTable", body).await.map(|_| ())
    }

    async fn delete_table(&self, table: &str) -> DbResult<()> {
        self.call("DeleteTable", json!({ "TableName": table }))
            .await
            .map(|_| ())
    }

    async fn list_tables(&self) -> DbResult<Vec<String>> {
        let mut names = Vec::new();
        let mut start: Option<String> = None;
        loop {
            let mut body = json!({});
            if let Some(start) = &start {
                body["ExclusiveStartTableName"] = json!(start);
            }
            let out = self.call("ListTables", body).await?;
            if let Some(list) = out.get("TableNames").and_then(JsonValue::as_array) {
                names.extend(list.iter().filter_map(JsonValue::as_str).map(String::from));
            }
            start = out
                .get("LastEvaluatedTableName")
                .and_then(JsonValue::as_str)
                .map(String::from);
            if start.is_none() {
                return Ok(names);
            }
        }
    }

    async fn describe_table(&self, table: &str) -> DbResult<Option<TableDescription>> {
        let out = match self.call("DescribeTable", json!({ "TableName": table })).await {
            Ok(out) => out,
            Err(e) if e.code() == Some(RESOURCE_NOT_FOUND) => return Ok(None),
            Err(e) => return Err(e),
        };
        let desc = &out["Table"];
        let Some(keys) = key_schema_from_json(desc.get("KeySchema")) else {
            return Ok(None);
        };
        let attributes = desc
            .get("AttributeDefinitions")
            .and_then(JsonValue::as_array)
            .map(|defs| {
                defs.iter()
                    .filter_map(|d| {
                        Some((
                            d.get("AttributeName")?.as_str()?.to_string(),
                            d.get("AttributeType")?.as_str()?.to_string(),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let mut indexes = Vec::new();
        for field in ["GlobalSecondaryIndexes", "LocalSecondaryIndexes"] {
            for index in desc.get(field).and_then(JsonValue::as_array).into_iter().flatten() {
                let name = index.get("IndexName").and_then(JsonValue::as_str);
                if let (Some(name), Some(keys)) = (name, key_schema_from_json(index.get("KeySchema")))
                {
                    indexes.push((name.to_string(), keys));
                }
            }
        }
        Ok(Some(TableDescription {
            name: table.to_string(),
            keys,
            attributes,
            indexes,
        }))
    }

    async fn get_item(&self, table: &str, key: &Row, consistent: bool) -> DbResult<Option<Row>> {
        let out = self
            .call(
                "GetItem",
                json!({
                    "TableName": table,
                    "Key": item_to_json(key),
                    "ConsistentRead": consistent,
                }),
            )
            .await?;
        Ok(out.get("Item").map(item_from_json))
    }

    async fn batch_get(
        &self,
        table: &str,
        keys: &[Row],
        consistent: bool,
    ) -> DbResult<BatchGetOutput> {
        let keys: Vec<JsonValue> = keys.iter().map(item_to_json).collect();
        let mut request = Map::new();
        request.insert(
            table.to_string(),
            json!({ "Keys": keys, "ConsistentRead": consistent }),
        );
        let out = self
            .call("BatchGetItem", json!({ "RequestItems": request }))
            .await?;
        Ok(BatchGetOutput {
            items: items_from_json(out.get("Responses").and_then(|r| r.get(table))),
            unprocessed: items_from_json(
                out.get("UnprocessedKeys")
                    .and_then(|u| u.get(table))
                    .and_then(|t| t.get("Keys")),
            ),
        })
    }

    async fn put_item(&self, table: &str, item: &Row, condition: &WriteCondition) -> DbResult<()> {
        let mut body = Map::new();
        body.insert("TableName".into(), json!(table));
        body.insert("Item".into(), item_to_json(item));
        let mut expr = Expression::default();
        if let Some(cond) = expr.condition(condition) {
            body.insert("ConditionExpression".into(), json!(cond));
        }
        expr.apply(&mut body);
        self.call("PutItem", JsonValue::Object(body)).await.map(|_| ())
    }

    async fn update_item(&self, input: &UpdateInput) -> DbResult<Row> {
        let mut expr = Expression::default();
        let mut clauses = Vec::new();
        if !input.set.is_empty() {
            let parts: Vec<String> = input
                .set
                .iter()
                .map(|(k, v)| format!("{} = {}", expr.name(k), expr.value(v)))
                .collect();
            clauses.push(format!("SET {}", parts.join(", ")));
        }
        if !input.add.is_empty() {
            let parts: Vec<String> = input
                .add
                .iter()
                .map(|(k, v)| format!("{} {}", expr.name(k), expr.value(v)))
                .collect();
            clauses.push(format!("ADD {}", parts.join(", ")));
        }
        if !input.remove.is_empty() {
            let parts: Vec<String> = input.remove.iter().map(|k| expr.name(k)).collect();
            clauses.push(format!("REMOVE {}", parts.join(", ")));
        }

        let mut body = Map::new();
        body.insert("TableName".into(), json!(input.table));
        body.insert("Key".into(), item_to_json(&input.key));
        body.insert("ReturnValues".into(), json!("ALL_NEW"));
        if !clauses.is_empty() {
            body.insert("UpdateExpression".into(), json!(clauses.join(" ")));
        }
        if let Some(cond) = expr.condition(&input.condition) {
            body.insert("ConditionExpression".into(), json!(cond));
        }
        expr.apply(&mut body);
        let out = self.call("UpdateItem", JsonValue::Object(body)).await?;
        Ok(out
            .get("Attributes")
            .map(item_from_json)
            .unwrap_or_else(|| input.key.clone()))
    }

    async fn delete_item(&self, table: &str, key: &Row) -> DbResult<Option<Row>> {
        let out = self
            .call(
                "DeleteItem",
                json!({
                    "TableName": table,
                    "Key": item_to_json(key),
                    "ReturnValues": "ALL_OLD",
                }),
            )
            .await?;
        Ok(out.get("Attributes").map(item_from_json))
    }

    async fn query(&self, input: &QueryInput) -> DbResult<Page> {
        let mut expr = Expression::default();
        let parts: Vec<String> = input
            .conditions
            .iter()
            .map(|c| {
                let name = expr.name(&c.name);
                match &c.op {
                    KeyOp::Eq => format!("{name} = {}", expr.value(&c.value)),
                    KeyOp::Lt => format!("{name} < {}", expr.value(&c.value)),
                    KeyOp::Le => format!("{name} <= {}", expr.value(&c.value)),
                    KeyOp::Gt => format!("{name} > {}", expr.value(&c.value)),
                    KeyOp::Ge => format!("{name} >= {}", expr.value(&c.value)),
                    KeyOp::BeginsWith => format!("begins_with({name}, {})", expr.value(&c.value)),
                    KeyOp::Between(low, high) => {
                        format!("{name} BETWEEN {} AND {}", expr.value(low), expr.value(high))
                    }
                }
            })
            .collect();

        let mut body = Map::new();
        body.insert("TableName".into(), json!(input.table));
        body.insert("KeyConditionExpression".into(), json!(parts.join(" AND ")));
        body.insert("ConsistentRead".into(), json!(input.consistent));
        body.insert("ScanIndexForward".into(), json!(!input.descending));
        if let Some(index) = &input.index {
            body.insert("IndexName".into(), json!(index));
        }
        if let Some(limit) = input.limit {
            body.insert("Limit".into(), json!(limit));
        }
        if let Some(start) = &input.start_key {
            body.insert("ExclusiveStartKey".into(), item_to_json(start));
        }
        expr.apply(&mut body);
        let out = self.call("Query", JsonValue::Object(body)).await?;
        Ok(Page {
            items: items_from_json(out.get("Items")),
            last_key: out.get("LastEvaluatedKey").map(item_from_json),
        })
    }

    async fn scan(&self, input: &ScanInput) -> DbResult<Page> {
        let mut body = json!({
            "TableName": input.table,
            "ConsistentRead": input.consistent,
        });
        if let Some(limit) = input.limit {
            body["Limit"] = json!(limit);
        }
        if let Some(start) = &input.start_key {
            body["ExclusiveStartKey"] = item_to_json(start);
        }
        let out = self.call("Scan", body).await?;
        Ok(Page {
            items: items_from_json(out.get("Items")),
            last_key: out.get("LastEvaluatedKey").map(item_from_json),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::row_from_json;
    use chrono::TimeZone;

    #[test]
    fn test_signing_key_matches_published_vector() {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_hmac_long_key_is_hashed() {
        let long = vec![7u8; 100];
        let hashed = Sha256::digest(&long);
        assert_eq!(hmac_sha256(&long, b"x"), hmac_sha256(&hashed, b"x"));
    }

    #[test]
    fn test_authorization_header_shape() {
        let creds = Credentials {
            access_key: "AKID".into(),
            secret_key: "secret".into(),
            session_token: None,
        };
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let headers = vec![
            ("content-type", CONTENT_TYPE_JSON.to_string()),
            ("host", "dynamodb.eu-west-1.amazonaws.com".to_string()),
            ("x-amz-date", "20240102T030405Z".to_string()),
            ("x-amz-target", "DynamoDB_20120810.GetItem".to_string()),
        ];
        let auth = sign(&creds, "eu-west-1", "/", &headers, b"{}", now);
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKID/20240102/eu-west-1/dynamodb/aws4_request, \
             SignedHeaders=content-type;host;x-amz-date;x-amz-target, Signature="
        ));
        assert_eq!(auth, sign(&creds, "eu-west-1", "/", &headers, b"{}", now));
        assert_ne!(auth, sign(&creds, "eu-west-1", "/", &headers, b"{ }", now));
    }

    #[test]
    fn test_attribute_codec() {
        let row = row_from_json(json!({
            "id": "a",
            "n": 5,
            "f": 1.5,
            "ok": true,
            "tags": ["x", "y"],
            "meta": {"k": 1},
        }));
        let encoded = item_to_json(&row);
        assert_eq!(encoded["id"], json!({"S": "a"}));
        assert_eq!(encoded["n"], json!({"N": "5"}));
        assert_eq!(encoded["tags"]["L"][1], json!({"S": "y"}));
        assert_eq!(encoded["meta"]["M"]["k"], json!({"N": "1"}));
        let decoded = item_from_json(&encoded);
        assert_eq!(decoded["n"], Value::Int(5));
        assert_eq!(decoded["f"], Value::Float(1.5));
        assert_eq!(from_attr(&json!({"NS": ["1", "2"]})), Value::List(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_condition_expression() {
        let mut expr = Expression::default();
        let cond = expr
            .condition(&WriteCondition::NotExists(vec!["id".into(), "mtime".into()]))
            .unwrap();
        assert_eq!(cond, "attribute_not_exists(#n0) AND attribute_not_exists(#n1)");
        assert_eq!(expr.names["#n1"], json!("mtime"));
        assert!(Expression::default().condition(&WriteCondition::None).is_none());
    }
}
