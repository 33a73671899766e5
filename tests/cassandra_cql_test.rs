//! CQL generated by the operation API, captured by a recording session.

use async_trait::async_trait;
use polydb::Db;
use polydb::adapters::cassandra::{CqlClient, CqlPool};
use polydb::config::PoolOptions;
use polydb::db::{Pool, Registry};
use polydb::error::DbResult;
use polydb::models::{
    ColumnSpec, Input, Options, QueryOutput, Row, TableSpec, Token, Value, row_from_json,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Session {
    statements: Mutex<Vec<String>>,
    replies: Mutex<Vec<Vec<Row>>>,
}

impl Session {
    fn reply(&self, rows: Vec<Row>) {
        self.replies.lock().unwrap().push(rows);
    }

    fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl CqlClient for Session {
    async fn execute(&self, cql: &str, _values: &[Value]) -> DbResult<QueryOutput> {
        self.statements.lock().unwrap().push(cql.to_string());
        let mut replies = self.replies.lock().unwrap();
        let rows = if replies.is_empty() {
            Vec::new()
        } else {
            replies.remove(0)
        };
        Ok(QueryOutput::with_rows(rows))
    }

    fn keyspace(&self) -> &str {
        "app"
    }
}

fn events() -> TableSpec {
    TableSpec::new("events")
        .column(ColumnSpec::new("id").primary())
        .column(ColumnSpec::new("seq").kind("bigint").primary())
        .column(ColumnSpec::new("kind"))
}

async fn cql_db() -> (Arc<Session>, Db) {
    let session = Arc::new(Session::default());
    let pool = CqlPool::new("cql", session.clone(), &PoolOptions::default()).unwrap();
    pool.schema().declare(events());
    pool.schema().declare(
        TableSpec::new("readings")
            .column(ColumnSpec::new("sensor").primary())
            .column(ColumnSpec::new("day").kind("int").primary())
            .column(ColumnSpec::new("seq").kind("int").primary())
            .column(ColumnSpec::new("reading").kind("real")),
    );
    let registry = Registry::new().unwrap();
    registry.register(Arc::new(pool)).await.unwrap();
    registry.set_default("cql").await;
    (session, Db::with_registry(registry))
}

fn row(value: serde_json::Value) -> Row {
    row_from_json(value)
}

#[tokio::test]
async fn test_put_runs_update_only() {
    let (session, db) = cql_db().await;
    let out = db
        .put("events", row(json!({"id": "a", "seq": 1, "kind": "click"})), &Options::default())
        .await
        .unwrap();
    assert_eq!(out.info.affected_rows, 1);
    let statements = session.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].starts_with("UPDATE events SET"), "{statements:?}");
}

#[tokio::test]
async fn test_add_is_conditional() {
    let (session, db) = cql_db().await;
    db.add("events", row(json!({"id": "a", "seq": 1})), &Options::default())
        .await
        .unwrap();
    session.reply(vec![row(json!({"[applied]": false}))]);
    let err = db
        .add("events", row(json!({"id": "a", "seq": 1})), &Options::default())
        .await
        .unwrap_err();
    assert!(matches!(err, polydb::DbError::RecordExists { .. }));
    assert!(session.statements().iter().all(|s| s.ends_with("IF NOT EXISTS")));
}

#[tokio::test]
async fn test_full_page_yields_key_token() {
    let (session, db) = cql_db().await;
    session.reply(vec![
        row(json!({"id": "a", "seq": 1, "kind": "x"})),
        row(json!({"id": "a", "seq": 2, "kind": "y"})),
    ]);
    let out = db
        .select(
            "events",
            Input::Row(row(json!({"id": "a"}))),
            &Options::new().count(2),
        )
        .await
        .unwrap();
    let token = out.info.next_token.clone().unwrap();
    assert_eq!(token, Token::Key(row(json!({"id": "a", "seq": 2}))));

    db.select(
        "events",
        Input::Row(row(json!({"id": "a"}))),
        &Options::new().count(2).start(token),
    )
    .await
    .unwrap();
    let statements = session.statements();
    assert!(statements[1].contains("seq > 2"), "{statements:?}");
    assert!(!statements[1].contains("OFFSET"), "{statements:?}");
}

#[tokio::test]
async fn test_pages_cross_clustering_groups() {
    let (session, db) = cql_db().await;
    session.reply(vec![
        row(json!({"sensor": "s1", "day": 1, "seq": 9, "reading": 0.5})),
        row(json!({"sensor": "s1", "day": 1, "seq": 10, "reading": 0.7})),
    ]);
    let query = Input::Row(row(json!({"sensor": "s1"})));
    let out = db
        .select("readings", query.clone(), &Options::new().count(2))
        .await
        .unwrap();
    let token = out.info.next_token.unwrap();

    db.select("readings", query, &Options::new().count(2).start(token))
        .await
        .unwrap();
    let statements = session.statements();
    // Later days must still be reachable after the last seq of day 1
    assert!(statements[1].contains("(day,seq) > (1,10)"), "{statements:?}");
    assert!(!statements[1].contains("day="), "{statements:?}");
}

#[tokio::test]
async fn test_missing_key_sends_nothing() {
    let (session, db) = cql_db().await;
    let out = db
        .del("events", row(json!({"kind": "x"})), &Options::default())
        .await
        .unwrap();
    assert_eq!(out.info.affected_rows, 0);
    assert!(session.statements().is_empty());
}
