//! Item-store client interface.
//!
//! The DynamoDB pool talks to the service through [`ItemClient`], a typed
//! subset of the DynamoDB API. [`super::http::HttpItemClient`] speaks the
//! JSON wire protocol; [`super::memory::MemoryItemStore`] keeps items in
//! process with the same key, condition and pagination semantics.

use crate::error::{DbError, DbResult};
use crate::models::{Row, Value};
use async_trait::async_trait;

/// Error code reported when a write condition does not hold.
pub const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailedException";

/// Error code reported for a missing table.
pub const RESOURCE_NOT_FOUND: &str = "ResourceNotFoundException";

pub fn conditional_check_failed(message: impl Into<String>) -> DbError {
    DbError::database(
        message,
        Some(CONDITIONAL_CHECK_FAILED.to_string()),
        "The item does not satisfy the write condition",
    )
}

pub fn is_conditional_check_failed(err: &DbError) -> bool {
    err.code() == Some(CONDITIONAL_CHECK_FAILED)
}

/// HASH and optional RANGE attribute of a table or index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    pub hash: String,
    pub range: Option<String>,
}

impl KeySchema {
    /// First key column is the hash key, the second the range key.
    pub fn from_keys(keys: &[String]) -> Option<Self> {
        let hash = keys.first()?.clone();
        Some(Self {
            hash,
            range: keys.get(1).cloned(),
        })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names = vec![self.hash.clone()];
        names.extend(self.range.clone());
        names
    }

    /// The key attributes of `row`; `None` when one is missing.
    pub fn key_of(&self, row: &Row) -> Option<Row> {
        let mut key = Row::new();
        for name in self.names() {
            let value = row.get(&name).filter(|v| !v.is_empty())?;
            key.insert(name, value.clone());
        }
        Some(key)
    }
}

/// Table layout as reported by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescription {
    pub name: String,
    pub keys: KeySchema,
    /// Attribute name → scalar type (`S`, `N`, `B`)
    pub attributes: Vec<(String, String)>,
    pub indexes: Vec<(String, KeySchema)>,
}

/// Write precondition on the item's key attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum WriteCondition {
    #[default]
    None,
    /// All attributes must exist
    Exists(Vec<String>),
    /// None of the attributes may exist
    NotExists(Vec<String>),
}

/// Key condition operators supported by Query.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Between(Value, Value),
    BeginsWith,
}

impl KeyOp {
    /// Map a normalized operator; non-key operators yield `None`.
    pub fn parse(op: &str, value: &Value) -> Option<Self> {
        Some(match op {
            "=" => KeyOp::Eq,
            "<" => KeyOp::Lt,
            "<=" => KeyOp::Le,
            ">" => KeyOp::Gt,
            ">=" => KeyOp::Ge,
            "begins_with" => KeyOp::BeginsWith,
            "between" => {
                let items = match value {
                    Value::List(items) => items.clone(),
                    Value::Text(s) => s.split(',').map(Value::from).collect(),
                    _ => return None,
                };
                match items.as_slice() {
                    [low, high] => KeyOp::Between(low.clone(), high.clone()),
                    _ => return None,
                }
            }
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    pub name: String,
    pub op: KeyOp,
    pub value: Value,
}

#[derive(Debug, Clone, Default)]
pub struct QueryInput {
    pub table: String,
    pub index: Option<String>,
    pub conditions: Vec<KeyCondition>,
    pub start_key: Option<Row>,
    pub limit: Option<u32>,
    pub consistent: bool,
    pub descending: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScanInput {
    pub table: String,
    pub start_key: Option<Row>,
    pub limit: Option<u32>,
    pub consistent: bool,
}

/// One page of Query/Scan results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Row>,
    /// Present when more items may follow
    pub last_key: Option<Row>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateInput {
    pub table: String,
    pub key: Row,
    /// Attributes replaced
    pub set: Row,
    /// Numeric attributes incremented, created when missing
    pub add: Row,
    /// Attributes removed (null values)
    pub remove: Vec<String>,
    pub condition: WriteCondition,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetOutput {
    pub items: Vec<Row>,
    /// Keys the service did not process in this call
    pub unprocessed: Vec<Row>,
}

/// Typed subset of the DynamoDB API.
#[async_trait]
pub trait ItemClient: Send + Sync + std::fmt::Debug {
    /// `attributes` maps key attribute names to `S`, `N` or `B`.
    async fn create_table(
        &self,
        table: &str,
        keys: &KeySchema,
        indexes: &[(String, KeySchema)],
        attributes: &[(String, String)],
    ) -> DbResult<()>;

    async fn delete_table(&self, table: &str) -> DbResult<()>;

    async fn list_tables(&self) -> DbResult<Vec<String>>;

    async fn describe_table(&self, table: &str) -> DbResult<Option<TableDescription>>;

    async fn get_item(&self, table: &str, key: &Row, consistent: bool) -> DbResult<Option<Row>>;

    /// At most 100 keys per call.
    async fn batch_get(&self, table: &str, keys: &[Row], consistent: bool)
    -> DbResult<BatchGetOutput>;

    async fn put_item(&self, table: &str, item: &Row, condition: &WriteCondition) -> DbResult<()>;

    /// Returns the item after the update.
    async fn update_item(&self, input: &UpdateInput) -> DbResult<Row>;

    /// Returns the deleted item, if there was one.
    async fn delete_item(&self, table: &str, key: &Row) -> DbResult<Option<Row>>;

    async fn query(&self, input: &QueryInput) -> DbResult<Page>;

    async fn scan(&self, input: &ScanInput) -> DbResult<Page>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::row_from_json;
    use serde_json::json;

    #[test]
    fn test_key_schema() {
        let keys = KeySchema::from_keys(&["id".to_string(), "mtime".to_string()]).unwrap();
        assert_eq!(keys.names(), vec!["id", "mtime"]);
        let row = row_from_json(json!({"id": "a", "mtime": 1, "x": 2}));
        assert_eq!(keys.key_of(&row).unwrap().len(), 2);
        assert!(keys.key_of(&row_from_json(json!({"id": "a"}))).is_none());
        assert!(KeySchema::from_keys(&[]).is_none());
    }

    #[test]
    fn test_key_op_parse() {
        assert_eq!(KeyOp::parse(">=", &Value::Int(1)), Some(KeyOp::Ge));
        assert_eq!(
            KeyOp::parse("between", &Value::from("1,5")),
            Some(KeyOp::Between(Value::from("1"), Value::from("5")))
        );
        assert_eq!(KeyOp::parse("in", &Value::from("a")), None);
        assert!(is_conditional_check_failed(&conditional_check_failed("x")));
    }
}
