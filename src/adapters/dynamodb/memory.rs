//! In-process item store.

use super::client::{
    BatchGetOutput, ItemClient, KeyCondition, KeyOp, KeySchema, Page, QueryInput,
    RESOURCE_NOT_FOUND, ScanInput, TableDescription, UpdateInput, WriteCondition,
    conditional_check_failed,
};
use crate::error::{DbError, DbResult};
use crate::models::{Row, Value};
use async_trait::async_trait;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct MemTable {
    keys: KeySchema,
    indexes: Vec<(String, KeySchema)>,
    attributes: Vec<(String, String)>,
    /// Encoded primary key → item, in key order
    items: BTreeMap<String, Row>,
}

impl MemTable {
    fn key_string(&self, row: &Row) -> DbResult<String> {
        let key = self.keys.key_of(row).ok_or_else(|| {
            DbError::invalid_input(format!(
                "Item is missing key attributes {}",
                self.keys.names().join(",")
            ))
        })?;
        Ok(encode_key(&key))
    }

    fn index_keys(&self, index: Option<&str>) -> DbResult<KeySchema> {
        match index {
            None => Ok(self.keys.clone()),
            Some(name) => self
                .indexes
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, keys)| keys.clone())
                .ok_or_else(|| DbError::invalid_input(format!("Unknown index: {name}"))),
        }
    }
}

fn encode_key(key: &Row) -> String {
    key.values()
        .map(Value::to_text)
        .collect::<Vec<_>>()
        .join("\u{1}")
}

fn not_found(table: &str) -> DbError {
    DbError::database(
        format!("Requested resource not found: Table: {table} not found"),
        Some(RESOURCE_NOT_FOUND.to_string()),
        "Create the table first",
    )
}

fn key_matches(item: &Row, cond: &KeyCondition) -> bool {
    let Some(actual) = item.get(&cond.name) else {
        return false;
    };
    let cmp = actual.compare(&cond.value);
    match &cond.op {
        KeyOp::Eq => actual.loose_eq(&cond.value),
        KeyOp::Lt => cmp == Some(Ordering::Less),
        KeyOp::Le => matches!(cmp, Some(Ordering::Less | Ordering::Equal)),
        KeyOp::Gt => cmp == Some(Ordering::Greater),
        KeyOp::Ge => matches!(cmp, Some(Ordering::Greater | Ordering::Equal)),
        KeyOp::Between(low, high) => {
            matches!(actual.compare(low), Some(Ordering::Greater | Ordering::Equal))
                && matches!(actual.compare(high), Some(Ordering::Less | Ordering::Equal))
        }
        KeyOp::BeginsWith => actual.to_text().starts_with(cond.value.to_text().as_str()),
    }
}

fn key_order(keys: &KeySchema, a: &Row, b: &Row) -> Ordering {
    let encoded = |row: &Row| keys.key_of(row).map(|k| encode_key(&k));
    encoded(a).cmp(&encoded(b))
}

fn range_order(range: Option<&str>, a: &Row, b: &Row) -> Ordering {
    match range.map(|name| (a.get(name), b.get(name))) {
        Some((Some(a), Some(b))) => a.compare(b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

/// Cut `items`, sorted by `order`, to one page of items sorting after
/// `start`. Seeking by position keeps pages stable when the start item
/// has been deleted in between.
fn paginate(
    items: Vec<Row>,
    start: Option<&Row>,
    limit: Option<u32>,
    order: impl Fn(&Row, &Row) -> Ordering,
    last_key: impl Fn(&Row) -> Option<Row>,
) -> Page {
    let skip = start.map_or(0, |start| {
        items
            .iter()
            .take_while(|item| order(item, start) != Ordering::Greater)
            .count()
    });
    let remaining = items.len() - skip;
    let take = limit.map(|l| l as usize).unwrap_or(remaining).min(remaining);
    let page: Vec<Row> = items.into_iter().skip(skip).take(take).collect();
    let last_key = if take < remaining {
        page.last().and_then(last_key)
    } else {
        None
    };
    Page {
        items: page,
        last_key,
    }
}

fn add_numbers(current: Option<&Value>, delta: &Value) -> Value {
    match (current.and_then(Value::as_i64), delta.as_i64()) {
        (Some(a), Some(b)) if !matches!(current, Some(Value::Float(_))) => Value::Int(a + b),
        (None, Some(b)) if current.is_none_or(Value::is_null) => Value::Int(b),
        _ => Value::Float(
            current.and_then(Value::as_f64).unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0),
        ),
    }
}

/// Items kept in process with the key, condition and pagination behavior of
/// the service.
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    tables: DashMap<String, MemTable>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(condition: &WriteCondition, existing: Option<&Row>) -> DbResult<()> {
        let has = |name: &String| existing.is_some_and(|row| row.contains_key(name));
        let ok = match condition {
            WriteCondition::None => true,
            WriteCondition::Exists(names) => names.iter().all(has),
            WriteCondition::NotExists(names) => !names.iter().any(has),
        };
        if ok {
            Ok(())
        } else {
            Err(conditional_check_failed("The conditional request failed"))
        }
    }
}

#[async_trait]
impl ItemClient for MemoryItemStore {
    async fn create_table(
        &self,
        table: &str,
        keys: &KeySchema,
        indexes: &[(String, KeySchema)],
        attributes: &[(String, String)],
    ) -> DbResult<()> {
        if self.tables.contains_key(table) {
            return Err(DbError::database(
                format!("Table already exists: {table}"),
                Some("ResourceInUseException".to_string()),
                "Drop the table first",
            ));
        }
        self.tables.insert(
            table.to_string(),
            MemTable {
                keys: keys.clone(),
                indexes: indexes.to_vec(),
                attributes: attributes.to_vec(),
                items: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> DbResult<()> {
        self.tables
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| not_found(table))
    }

    async fn list_tables(&self) -> DbResult<Vec<String>> {
        let mut names: Vec<String> = self.tables.iter().map(|t| t.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn describe_table(&self, table: &str) -> DbResult<Option<TableDescription>> {
        Ok(self.tables.get(table).map(|t| {
            let declared = |name: &String| {
                t.attributes
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, kind)| kind.clone())
            };
            let attributes = t
                .keys
                .names()
                .into_iter()
                .map(|name| {
                    let kind = declared(&name).unwrap_or_else(|| "S".to_string());
                    (name, kind)
                })
                .collect();
            TableDescription {
                name: table.to_string(),
                keys: t.keys.clone(),
                attributes,
                indexes: t.indexes.clone(),
            }
        }))
    }

    async fn get_item(&self, table: &str, key: &Row, _consistent: bool) -> DbResult<Option<Row>> {
        let t = self.tables.get(table).ok_or_else(|| not_found(table))?;
        let id = t.key_string(key)?;
        Ok(t.items.get(&id).cloned())
    }

    async fn batch_get(
        &self,
        table: &str,
        keys: &[Row],
        _consistent: bool,
    ) -> DbResult<BatchGetOutput> {
        if keys.len() > 100 {
            return Err(DbError::invalid_input("Too many items requested for BatchGetItem"));
        }
        let t = self.tables.get(table).ok_or_else(|| not_found(table))?;
        let mut items = Vec::new();
        for key in keys {
            if let Some(item) = t.items.get(&t.key_string(key)?) {
                items.push(item.clone());
            }
        }
        Ok(BatchGetOutput {
            items,
            unprocessed: Vec::new(),
        })
    }

    async fn put_item(&self, table: &str, item: &Row, condition: &WriteCondition) -> DbResult<()> {
        let mut t = self.tables.get_mut(table).ok_or_else(|| not_found(table))?;
        let id = t.key_string(item)?;
        Self::check(condition, t.items.get(&id))?;
        let stored: Row = item
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        t.items.insert(id, stored);
        Ok(())
    }

    async fn update_item(&self, input: &UpdateInput) -> DbResult<Row> {
        let mut t = self
            .tables
            .get_mut(&input.table)
            .ok_or_else(|| not_found(&input.table))?;
        let id = t.key_string(&input.key)?;
        Self::check(&input.condition, t.items.get(&id))?;
        let item = t.items.entry(id).or_insert_with(|| input.key.clone());
        for (name, value) in &input.set {
            item.insert(name.clone(), value.clone());
        }
        for (name, delta) in &input.add {
            let next = add_numbers(item.get(name), delta);
            item.insert(name.clone(), next);
        }
        for name in &input.remove {
            item.remove(name);
        }
        Ok(item.clone())
    }

    async fn delete_item(&self, table: &str, key: &Row) -> DbResult<Option<Row>> {
        let mut t = self.tables.get_mut(table).ok_or_else(|| not_found(table))?;
        let id = t.key_string(key)?;
        Ok(t.items.remove(&id))
    }

    async fn query(&self, input: &QueryInput) -> DbResult<Page> {
        let t = self
            .tables
            .get(&input.table)
            .ok_or_else(|| not_found(&input.table))?;
        let index_keys = t.index_keys(input.index.as_deref())?;
        let mut items: Vec<Row> = t
            .items
            .values()
            .filter(|item| input.conditions.iter().all(|c| key_matches(item, c)))
            .cloned()
            .collect();
        let range = index_keys.range.as_deref();
        let order = |a: &Row, b: &Row| {
            let order = range_order(range, a, b).then_with(|| key_order(&t.keys, a, b));
            if input.descending {
                order.reverse()
            } else {
                order
            }
        };
        items.sort_by(|a, b| order(a, b));
        let last_key = |item: &Row| {
            let mut key = t.keys.key_of(item)?;
            if input.index.is_some() {
                key.extend(index_keys.key_of(item)?);
            }
            Some(key)
        };
        Ok(paginate(items, input.start_key.as_ref(), input.limit, &order, last_key))
    }

    async fn scan(&self, input: &ScanInput) -> DbResult<Page> {
        let t = self
            .tables
            .get(&input.table)
            .ok_or_else(|| not_found(&input.table))?;
        let items: Vec<Row> = t.items.values().cloned().collect();
        Ok(paginate(
            items,
            input.start_key.as_ref(),
            input.limit,
            |a, b| key_order(&t.keys, a, b),
            |item| t.keys.key_of(item),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::row_from_json;
    use serde_json::json;

    fn keys() -> KeySchema {
        KeySchema {
            hash: "id".into(),
            range: Some("n".into()),
        }
    }

    #[tokio::test]
    async fn test_conditional_put() {
        let store = MemoryItemStore::new();
        store.create_table("t", &keys(), &[], &[]).await.unwrap();
        let item = row_from_json(json!({"id": "a", "n": 1, "x": "y"}));
        let absent = WriteCondition::NotExists(vec!["id".into()]);
        store.put_item("t", &item, &absent).await.unwrap();
        let err = store.put_item("t", &item, &absent).await.unwrap_err();
        assert_eq!(err.code(), Some(super::super::client::CONDITIONAL_CHECK_FAILED));
        let got = store.get_item("t", &item, true).await.unwrap().unwrap();
        assert_eq!(got["x"], Value::from("y"));
    }

    #[tokio::test]
    async fn test_update_add_creates_item() {
        let store = MemoryItemStore::new();
        store.create_table("t", &keys(), &[], &[]).await.unwrap();
        let mut input = UpdateInput {
            table: "t".into(),
            key: row_from_json(json!({"id": "a", "n": 1})),
            add: row_from_json(json!({"hits": 2})),
            ..Default::default()
        };
        store.update_item(&input).await.unwrap();
        input.add = row_from_json(json!({"hits": 3}));
        let item = store.update_item(&input).await.unwrap();
        assert_eq!(item["hits"], Value::Int(5));
    }

    #[tokio::test]
    async fn test_query_pages() {
        let store = MemoryItemStore::new();
        store.create_table("t", &keys(), &[], &[]).await.unwrap();
        for n in 0..5 {
            let item = row_from_json(json!({"id": "a", "n": n}));
            store.put_item("t", &item, &WriteCondition::None).await.unwrap();
        }
        let mut input = QueryInput {
            table: "t".into(),
            conditions: vec![KeyCondition {
                name: "id".into(),
                op: KeyOp::Eq,
                value: Value::from("a"),
            }],
            limit: Some(2),
            ..Default::default()
        };
        let mut seen = Vec::new();
        loop {
            let page = store.query(&input).await.unwrap();
            seen.extend(page.items.iter().map(|i| i["n"].clone()));
            match page.last_key {
                Some(key) => input.start_key = Some(key),
                None => break,
            }
        }
        assert_eq!(seen, (0..5).map(Value::Int).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_resume_after_start_item_deleted() {
        let store = MemoryItemStore::new();
        store.create_table("t", &keys(), &[], &[]).await.unwrap();
        for n in 1..=5 {
            let item = row_from_json(json!({"id": "a", "n": n}));
            store.put_item("t", &item, &WriteCondition::None).await.unwrap();
        }
        let mut input = QueryInput {
            table: "t".into(),
            conditions: vec![KeyCondition {
                name: "id".into(),
                op: KeyOp::Eq,
                value: Value::from("a"),
            }],
            limit: Some(2),
            ..Default::default()
        };
        let page = store.query(&input).await.unwrap();
        let last = page.last_key.unwrap();
        assert_eq!(last["n"], Value::Int(2));
        store.delete_item("t", &last).await.unwrap();

        input.start_key = Some(last);
        let page = store.query(&input).await.unwrap();
        let seen: Vec<Value> = page.items.iter().map(|i| i["n"].clone()).collect();
        assert_eq!(seen, vec![Value::Int(3), Value::Int(4)]);
    }

    #[tokio::test]
    async fn test_scan_resume_after_start_item_deleted() {
        let store = MemoryItemStore::new();
        store.create_table("t", &keys(), &[], &[]).await.unwrap();
        for id in ["a", "b", "c", "d"] {
            let item = row_from_json(json!({"id": id, "n": 1}));
            store.put_item("t", &item, &WriteCondition::None).await.unwrap();
        }
        let mut input = ScanInput {
            table: "t".into(),
            limit: Some(2),
            ..Default::default()
        };
        let page = store.scan(&input).await.unwrap();
        let last = page.last_key.unwrap();
        store.delete_item("t", &last).await.unwrap();

        input.start_key = Some(last);
        let page = store.scan(&input).await.unwrap();
        let ids: Vec<String> = page.items.iter().map(|i| i["id"].to_text()).collect();
        assert_eq!(ids, ["c", "d"]);
        assert!(page.last_key.is_none());
    }

    #[tokio::test]
    async fn test_missing_table() {
        let store = MemoryItemStore::new();
        let err = store.scan(&ScanInput::default()).await.unwrap_err();
        assert_eq!(err.code(), Some(RESOURCE_NOT_FOUND));
    }
}
