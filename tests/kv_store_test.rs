//! Name/value records on the embedded sled and redb stores.

use polydb::Db;
use polydb::config::PoolOptions;
use polydb::db::Registry;
use polydb::models::{Input, Options, PoolConfig, Row, Token, Value, row_from_json};
use serde_json::json;
use tempfile::TempDir;

async fn kv_db(scheme: &str) -> (TempDir, Db) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("{scheme}:{}", dir.path().join("store").display());
    let registry = Registry::new().unwrap();
    registry
        .open(PoolConfig::new("kv", &url, PoolOptions::default()).unwrap())
        .await
        .unwrap();
    registry.set_default("kv").await;
    (dir, Db::with_registry(registry))
}

fn row(value: serde_json::Value) -> Row {
    row_from_json(value)
}

fn names(rows: &[Row]) -> Vec<String> {
    rows.iter().map(|r| r["name"].to_text()).collect()
}

async fn put_get_del(db: &Db) {
    let opts = Options::default();
    db.put("cfg", row(json!({"name": "a", "value": {"x": 1}})), &opts)
        .await
        .unwrap();
    let out = db.get("cfg", row(json!({"name": "a"})), &opts).await.unwrap();
    assert_eq!(out.rows[0]["value"].to_json(), json!({"x": 1}));

    db.update("cfg", row(json!({"name": "a", "value": "plain"})), &opts)
        .await
        .unwrap();
    let out = db.get("cfg", row(json!({"name": "a"})), &opts).await.unwrap();
    assert_eq!(out.rows[0]["value"], Value::from("plain"));

    let out = db.del("cfg", row(json!({"name": "a"})), &opts).await.unwrap();
    assert_eq!(out.info.affected_rows, 1);
    let out = db.del("cfg", row(json!({"name": "a"})), &opts).await.unwrap();
    assert_eq!(out.info.affected_rows, 0);
    let out = db.get("cfg", row(json!({"name": "a"})), &opts).await.unwrap();
    assert!(out.rows.is_empty());
}

async fn range_scans(db: &Db) {
    let opts = Options::default();
    for name in ["a", "b", "c", "d", "user:", "user:1", "users"] {
        db.put("keys", row(json!({"name": name, "value": 1})), &opts)
            .await
            .unwrap();
    }

    let mut bounded = Options::default();
    bounded.end = Some("d".to_string());
    let out = db
        .select("keys", Input::Row(row(json!({"name": "b"}))), &bounded)
        .await
        .unwrap();
    assert_eq!(names(&out.rows), ["b", "c"]);

    let prefix = Options::new().op("name", "begins_with");
    let out = db
        .select("keys", Input::Row(row(json!({"name": "user:"}))), &prefix)
        .await
        .unwrap();
    assert_eq!(names(&out.rows), ["user:", "user:1"]);

    let mut total = Options::default();
    total.total = true;
    let out = db.select("keys", Input::None, &total).await.unwrap();
    assert_eq!(out.rows[0]["count"], Value::Int(7));
}

async fn pages(db: &Db) {
    let opts = Options::default();
    for name in ["k1", "k2", "k3", "k4", "k5"] {
        db.put("paged", row(json!({"name": name, "value": name})), &opts)
            .await
            .unwrap();
    }
    let mut seen = Vec::new();
    let mut start: Option<Token> = None;
    loop {
        let mut page = Options::new().count(2);
        page.start = start.take();
        let out = db.select("paged", Input::None, &page).await.unwrap();
        seen.extend(names(&out.rows));
        match out.info.next_token {
            Some(token) => {
                assert!(matches!(token, Token::Name(_)));
                start = Some(token);
            }
            None => break,
        }
    }
    assert_eq!(seen, ["k1", "k2", "k3", "k4", "k5"]);
}

async fn counters_and_lists(db: &Db) {
    let opts = Options::default();
    let out = db.incr("hits", row(json!({"name": "home"})), &opts).await.unwrap();
    assert_eq!(out.rows[0]["value"], Value::Int(1));
    let out = db
        .incr("hits", row(json!({"name": "home", "value": 5})), &opts)
        .await
        .unwrap();
    assert_eq!(out.rows[0]["value"], Value::Int(6));

    db.put("hits", row(json!({"name": "about", "value": 2})), &opts)
        .await
        .unwrap();
    let keyed = Options::new().keys(["name"]);
    let out = db.list_keys("hits", "home,about,missing", &keyed).await.unwrap();
    let mut found = names(&out.rows);
    found.sort();
    assert_eq!(found, ["about", "home"]);

    db.put("hits", row(json!({"name": "label", "value": "x"})), &opts)
        .await
        .unwrap();
    let err = db.incr("hits", row(json!({"name": "label"})), &opts).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn test_sled_put_get_del() {
    let (_dir, db) = kv_db("sled").await;
    put_get_del(&db).await;
    db.close().await;
}

#[tokio::test]
async fn test_redb_put_get_del() {
    let (_dir, db) = kv_db("redb").await;
    put_get_del(&db).await;
    db.close().await;
}

#[tokio::test]
async fn test_sled_range_scans() {
    let (_dir, db) = kv_db("sled").await;
    range_scans(&db).await;
}

#[tokio::test]
async fn test_redb_range_scans() {
    let (_dir, db) = kv_db("redb").await;
    range_scans(&db).await;
}

#[tokio::test]
async fn test_sled_pages() {
    let (_dir, db) = kv_db("sled").await;
    pages(&db).await;
}

#[tokio::test]
async fn test_redb_pages() {
    let (_dir, db) = kv_db("redb").await;
    pages(&db).await;
}

#[tokio::test]
async fn test_sled_counters_and_lists() {
    let (_dir, db) = kv_db("sled").await;
    counters_and_lists(&db).await;
}

#[tokio::test]
async fn test_redb_counters_and_lists() {
    let (_dir, db) = kv_db("redb").await;
    counters_and_lists(&db).await;
}
