//! Operation API against an in-memory SQLite pool.

use polydb::Db;
use polydb::config::PoolOptions;
use polydb::db::{Pool, Registry, RowHook};
use polydb::models::{
    ColumnSpec, Input, Options, PoolConfig, Row, TableSpec, Token, Value, row_from_json,
};
use serde_json::json;
use std::sync::Arc;

fn accounts() -> TableSpec {
    TableSpec::new("accounts")
        .column(ColumnSpec::new("id").primary())
        .column(ColumnSpec::new("name"))
        .column(ColumnSpec::new("likes").kind("int"))
        .column(ColumnSpec::new("mtime").kind("bigint"))
}

async fn sqlite_db() -> Db {
    let registry = Registry::new().unwrap();
    let config = PoolConfig::new("main", "sqlite::memory:", PoolOptions::default()).unwrap();
    registry.open(config).await.unwrap();
    registry.set_default("main").await;
    let db = Db::with_registry(registry);
    db.init_tables(&[accounts()]).await.unwrap();
    db
}

fn row(value: serde_json::Value) -> Row {
    row_from_json(value)
}

#[tokio::test]
async fn test_init_tables_creates_and_introspects() {
    let db = sqlite_db().await;
    let opts = Options::default();
    assert_eq!(db.table_keys("accounts", &opts).await.unwrap(), vec!["id"]);
    let columns = db.table_columns("accounts", &opts).await.unwrap();
    assert!(columns.values().all(|c| !c.provisional));

    // A second run finds nothing to do
    db.init_tables(&[accounts()]).await.unwrap();
}

#[tokio::test]
async fn test_add_get_update_del() {
    let db = sqlite_db().await;
    let opts = Options::default();

    let out = db
        .add("accounts", row(json!({"id": "1", "name": "a", "likes": 0})), &opts)
        .await
        .unwrap();
    assert_eq!(out.info.affected_rows, 1);

    let out = db.get("accounts", row(json!({"id": "1"})), &opts).await.unwrap();
    assert_eq!(out.rows[0]["name"], Value::from("a"));

    let out = db
        .update("accounts", row(json!({"id": "1", "name": "b"})), &opts)
        .await
        .unwrap();
    assert_eq!(out.info.affected_rows, 1);
    let out = db.get("accounts", row(json!({"id": "1"})), &opts).await.unwrap();
    assert_eq!(out.rows[0]["name"], Value::from("b"));

    let out = db.del("accounts", row(json!({"id": "1"})), &opts).await.unwrap();
    assert_eq!(out.info.affected_rows, 1);
    let out = db.get("accounts", row(json!({"id": "1"})), &opts).await.unwrap();
    assert!(out.rows.is_empty());
}

#[tokio::test]
async fn test_add_duplicate_is_record_exists() {
    let db = sqlite_db().await;
    let opts = Options::default();
    let record = row(json!({"id": "1", "name": "a"}));
    db.add("accounts", record.clone(), &opts).await.unwrap();
    let err = db.add("accounts", record, &opts).await.unwrap_err();
    assert!(matches!(err, polydb::DbError::RecordExists { .. }));
}

#[tokio::test]
async fn test_missing_key_is_noop() {
    let db = sqlite_db().await;
    let opts = Options::default();
    db.add("accounts", row(json!({"id": "1", "name": "a"})), &opts)
        .await
        .unwrap();
    let out = db
        .update("accounts", row(json!({"name": "z"})), &opts)
        .await
        .unwrap();
    assert_eq!(out.info.affected_rows, 0);
    let out = db.del("accounts", row(json!({})), &opts).await.unwrap();
    assert_eq!(out.info.affected_rows, 0);
    let out = db.get("accounts", row(json!({"id": "1"})), &opts).await.unwrap();
    assert_eq!(out.rows[0]["name"], Value::from("a"));
}

#[tokio::test]
async fn test_put_overwrites() {
    let db = sqlite_db().await;
    let opts = Options::default();
    db.put("accounts", row(json!({"id": "1", "name": "a"})), &opts)
        .await
        .unwrap();
    db.put("accounts", row(json!({"id": "1", "name": "b"})), &opts)
        .await
        .unwrap();
    let out = db
        .select("accounts", Input::None, &Options::default())
        .await
        .unwrap();
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.rows[0]["name"], Value::from("b"));
}

#[tokio::test]
async fn test_incr_requires_existing_row() {
    let db = sqlite_db().await;
    let opts = Options::default();

    let out = db
        .incr("accounts", row(json!({"id": "1", "likes": 1})), &opts)
        .await
        .unwrap();
    assert_eq!(out.info.affected_rows, 0);

    db.add("accounts", row(json!({"id": "1", "likes": 1})), &opts)
        .await
        .unwrap();
    db.incr("accounts", row(json!({"id": "1", "likes": 2})), &opts)
        .await
        .unwrap();
    db.incr("accounts", row(json!({"id": "1", "likes": -1})), &opts)
        .await
        .unwrap();
    let out = db.get("accounts", row(json!({"id": "1"})), &opts).await.unwrap();
    assert_eq!(out.rows[0]["likes"], Value::Int(2));
}

#[tokio::test]
async fn test_select_pages_with_offset_token() {
    let db = sqlite_db().await;
    let opts = Options::default();
    for i in 1..=5 {
        db.add("accounts", row(json!({"id": format!("{i}"), "name": "n"})), &opts)
            .await
            .unwrap();
    }

    let mut seen = Vec::new();
    let mut start = None;
    loop {
        let mut page_opts = Options::new().count(2).sort("id", false);
        page_opts.start = start.clone();
        let out = db.select("accounts", Input::None, &page_opts).await.unwrap();
        seen.extend(out.rows.iter().map(|r| r["id"].to_text()));
        match out.info.next_token {
            Some(token) => start = Some(token),
            None => break,
        }
    }
    assert_eq!(seen, vec!["1", "2", "3", "4", "5"]);
    assert_eq!(start, Some(Token::Offset(4)));
}

#[tokio::test]
async fn test_list_and_list_keys() {
    let db = sqlite_db().await;
    let opts = Options::default();
    for id in ["a", "b", "c"] {
        db.add("accounts", row(json!({"id": id})), &opts).await.unwrap();
    }
    let out = db
        .list(
            "accounts",
            vec![row(json!({"id": "a"})), row(json!({"id": "c"}))],
            &opts,
        )
        .await
        .unwrap();
    assert_eq!(out.rows.len(), 2);

    let out = db.list_keys("accounts", "b, c, zz", &opts).await.unwrap();
    let mut ids: Vec<String> = out.rows.iter().map(|r| r["id"].to_text()).collect();
    ids.sort();
    assert_eq!(ids, vec!["b", "c"]);
}

#[tokio::test]
async fn test_begins_with_is_prefix_range() {
    let db = sqlite_db().await;
    let opts = Options::default();
    for id in ["user:123", "user:", "users:1", "use"] {
        db.add("accounts", row(json!({"id": id})), &opts).await.unwrap();
    }
    let search = Options::new().op("id", "begins_with").sort("id", false);
    let out = db
        .select("accounts", Input::Row(row(json!({"id": "user:"}))), &search)
        .await
        .unwrap();
    let ids: Vec<String> = out.rows.iter().map(|r| r["id"].to_text()).collect();
    assert_eq!(ids, vec!["user:", "user:123"]);
}

#[tokio::test]
async fn test_begins_with_treats_wildcards_literally() {
    let db = sqlite_db().await;
    let opts = Options::default();
    for id in ["user_1", "userX", "user%", "USER_2"] {
        db.add("accounts", row(json!({"id": id})), &opts).await.unwrap();
    }
    let search = Options::new().op("id", "begins_with");
    let out = db
        .select("accounts", Input::Row(row(json!({"id": "user_"}))), &search)
        .await
        .unwrap();
    let ids: Vec<String> = out.rows.iter().map(|r| r["id"].to_text()).collect();
    assert_eq!(ids, vec!["user_1"]);
}

#[tokio::test]
async fn test_replace_with_check_data() {
    let db = sqlite_db().await;
    let opts = Options::new().check_data();
    let record = row(json!({"id": "1", "name": "a", "likes": 3}));

    // Missing row is inserted
    let out = db.replace("accounts", record.clone(), &opts).await.unwrap();
    assert_eq!(out.info.affected_rows, 1);

    // Identical data issues no update
    let out = db.replace("accounts", record.clone(), &opts).await.unwrap();
    assert_eq!(out.info.affected_rows, 0);
    assert!(out.rows.is_empty());

    // One changed field issues one update
    let mut changed = record;
    changed.insert("name".into(), Value::from("b"));
    let out = db.replace("accounts", changed, &opts).await.unwrap();
    assert_eq!(out.info.affected_rows, 1);
    let out = db
        .get("accounts", row(json!({"id": "1"})), &Options::default())
        .await
        .unwrap();
    assert_eq!(out.rows[0]["name"], Value::from("b"));
}

#[tokio::test]
async fn test_replace_checks_listed_columns_only() {
    let db = sqlite_db().await;
    let opts = Options::new().check_columns(["name"]);
    db.replace("accounts", row(json!({"id": "1", "name": "a", "likes": 3})), &opts)
        .await
        .unwrap();

    // likes is not compared
    let out = db
        .replace("accounts", row(json!({"id": "1", "name": "a", "likes": 4})), &opts)
        .await
        .unwrap();
    assert_eq!(out.info.affected_rows, 0);

    let out = db
        .replace("accounts", row(json!({"id": "1", "name": "b", "likes": 4})), &opts)
        .await
        .unwrap();
    assert_eq!(out.info.affected_rows, 1);
    let out = db
        .get("accounts", row(json!({"id": "1"})), &Options::default())
        .await
        .unwrap();
    assert_eq!(out.rows[0]["likes"], Value::Int(4));
}

#[tokio::test]
async fn test_replace_flags() {
    let db = sqlite_db().await;
    let record = row(json!({"id": "1", "name": "a", "mtime": 10}));

    let out = db
        .replace("accounts", record.clone(), &Options::new().put_only())
        .await
        .unwrap();
    assert_eq!(out.info.affected_rows, 0);

    db.replace("accounts", record.clone(), &Options::default())
        .await
        .unwrap();
    let mut newer = record.clone();
    newer.insert("name".into(), Value::from("b"));
    let out = db
        .replace("accounts", newer.clone(), &Options::new().add_only())
        .await
        .unwrap();
    assert_eq!(out.info.affected_rows, 0);

    // Same mtime is not newer
    let out = db
        .replace("accounts", newer.clone(), &Options::new().check_mtime("mtime"))
        .await
        .unwrap();
    assert_eq!(out.info.affected_rows, 0);

    newer.insert("mtime".into(), Value::Int(11));
    let out = db
        .replace("accounts", newer, &Options::new().check_mtime("mtime"))
        .await
        .unwrap();
    assert_eq!(out.info.affected_rows, 1);
}

#[tokio::test]
async fn test_mtime_is_stamped() {
    let db = sqlite_db().await;
    db.add("accounts", row(json!({"id": "1"})), &Options::new().mtime("mtime"))
        .await
        .unwrap();
    let out = db
        .get("accounts", row(json!({"id": "1"})), &Options::default())
        .await
        .unwrap();
    assert!(out.rows[0]["mtime"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_cached_get_and_invalidation() {
    let db = sqlite_db().await;
    let cached = Options::new().cached();
    db.add("accounts", row(json!({"id": "1", "name": "a"})), &cached)
        .await
        .unwrap();

    db.get("accounts", row(json!({"id": "1"})), &cached).await.unwrap();
    let out = db.get("accounts", row(json!({"id": "1"})), &cached).await.unwrap();
    assert_eq!(out.rows[0]["name"], Value::from("a"));
    let pool = db.pool("accounts", &cached).await.unwrap();
    assert_eq!(pool.metrics().cache_misses.get(), 1);
    assert_eq!(pool.metrics().cache_hits.get(), 1);

    db.update("accounts", row(json!({"id": "1", "name": "b"})), &cached)
        .await
        .unwrap();
    let out = db.get("accounts", row(json!({"id": "1"})), &cached).await.unwrap();
    assert_eq!(out.rows[0]["name"], Value::from("b"));
    assert_eq!(pool.metrics().cache_misses.get(), 2);
}

#[tokio::test]
async fn test_drop_forgets_table() {
    let db = sqlite_db().await;
    let opts = Options::default();
    db.drop("accounts", &opts).await.unwrap();
    let columns = db.table_columns("accounts", &opts).await.unwrap();
    assert!(columns.values().all(|c| c.provisional));

    let err = db
        .select("accounts", Input::None, &Options::new().strict())
        .await
        .unwrap_err();
    assert!(matches!(err, polydb::DbError::SchemaMismatch { .. }));
}

#[tokio::test]
async fn test_query_raw() {
    let db = sqlite_db().await;
    db.add("accounts", row(json!({"id": "1", "name": "a"})), &Options::default())
        .await
        .unwrap();
    let out = db
        .query_raw(
            Some("main"),
            "SELECT count(*) AS n FROM accounts WHERE name = ?1",
            &[Value::from("a")],
        )
        .await
        .unwrap();
    assert_eq!(out.rows[0]["n"], Value::Int(1));
}

async fn file_pool(registry: &Registry, name: &str, path: &std::path::Path) -> Arc<dyn Pool> {
    let options = PoolOptions {
        max_connections: Some(1),
        watch_interval_secs: Some(0),
        ..PoolOptions::default()
    };
    let url = format!("sqlite:{}", path.display());
    let config = PoolConfig::new(name, &url, options)
        .unwrap()
        .with_driver_options(vec![("journal_mode".to_string(), "delete".to_string())]);
    registry.open(config).await.unwrap()
}

async fn read_v(db: &Db) -> Value {
    let out = db
        .query_raw(Some("main"), "SELECT v FROM t", &[])
        .await
        .unwrap();
    out.rows[0]["v"].clone()
}

#[tokio::test]
async fn test_serial_bump_reopens_replaced_file() {
    let dir = tempfile::tempdir().unwrap();
    let live = dir.path().join("a.db");
    let staged = dir.path().join("b.db");

    let registry = Registry::new().unwrap();
    let main = file_pool(&registry, "main", &live).await;
    let seed = file_pool(&registry, "seed", &staged).await;
    let db = Db::with_registry(registry);
    for (pool, v) in [("main", "A"), ("seed", "B")] {
        db.query_raw(Some(pool), "CREATE TABLE t (v TEXT)", &[])
            .await
            .unwrap();
        db.query_raw(Some(pool), "INSERT INTO t (v) VALUES (?1)", &[Value::from(v)])
            .await
            .unwrap();
    }
    seed.close().await;

    assert_eq!(read_v(&db).await, Value::from("A"));

    std::fs::rename(&staged, &live).unwrap();
    main.core().bump_serial();
    assert_eq!(read_v(&db).await, Value::from("B"));
}

#[tokio::test]
async fn test_process_row_hook_runs_on_results() {
    let db = sqlite_db().await;
    let opts = Options::default();
    db.add("accounts", row(json!({"id": "1", "name": "ann", "likes": 2})), &opts)
        .await
        .unwrap();
    let hook: RowHook = Arc::new(|row: &mut Row, _: &Options| {
        let label = format!("{}!", row["name"].to_text());
        row.insert("label".into(), Value::from(label.as_str()));
    });
    db.set_process_row("accounts", &opts, hook).await.unwrap();

    let out = db.get("accounts", row(json!({"id": "1"})), &opts).await.unwrap();
    assert_eq!(out.rows[0]["label"], Value::from("ann!"));
    let out = db.select("accounts", Input::None, &opts).await.unwrap();
    assert!(out.rows.iter().all(|r| r.contains_key("label")));
}

#[tokio::test]
async fn test_drop_pool_tables() {
    let db = sqlite_db().await;
    let opts = Options::default();
    let notes = TableSpec::new("notes").column(ColumnSpec::new("id").primary());
    db.init_tables(&[notes]).await.unwrap();

    let dropped = db
        .drop_pool_tables("main", &["accounts".to_string(), "notes".to_string()])
        .await
        .unwrap();
    assert_eq!(dropped, 2);
    for table in ["accounts", "notes"] {
        let columns = db.table_columns(table, &opts).await.unwrap();
        assert!(columns.values().all(|c| c.provisional), "{table}");
    }
    let err = db.drop_pool_tables("ghost", &[]).await.unwrap_err();
    assert!(matches!(err, polydb::DbError::PoolNotFound { .. }));
}
