//! Catalog introspection for relational pools.
//!
//! Each database has its own submodule with queries adapted to its system
//! catalogs. Columns and primary keys are read first, indexes second, both
//! into a map of table name → [`TableIntrospection`].

use crate::db::pool::DbPool;
use crate::error::DbResult;
use crate::models::{ColumnInfo, TableIntrospection};
use std::collections::BTreeMap;

pub type Catalog = BTreeMap<String, TableIntrospection>;

/// Tables, columns and primary keys of the pool's current schema.
pub async fn columns(pool: &DbPool) -> DbResult<Catalog> {
    match pool {
        DbPool::Postgres(p) => postgres::columns(p).await,
        DbPool::MySql(p) => mysql::columns(p).await,
        DbPool::SQLite(p) => sqlite::columns(p).await,
    }
}

/// Index definitions of already introspected tables.
pub async fn indexes(pool: &DbPool, tables: &mut Catalog) -> DbResult<()> {
    match pool {
        DbPool::Postgres(p) => postgres::indexes(p, tables).await,
        DbPool::MySql(p) => mysql::indexes(p, tables).await,
        DbPool::SQLite(p) => sqlite::indexes(p, tables).await,
    }
}

fn add_column(
    tables: &mut Catalog,
    table: String,
    column: String,
    mut info: ColumnInfo,
    nullable: bool,
    default: Option<String>,
    primary: bool,
) {
    info.nullable = nullable;
    info.default = default;
    info.primary = primary;
    let entry = tables.entry(table).or_default();
    if primary {
        entry.keys.push(column.clone());
    }
    entry.columns.insert(column, info);
}

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const COLUMNS: &str = r#"
        SELECT
            c.table_name::text AS table_name,
            c.column_name::text AS column_name,
            format_type(a.atttypid, a.atttypmod) AS column_type,
            c.is_nullable::text AS is_nullable,
            c.column_default::text AS column_default,
            c.ordinal_position::int4 AS position
        FROM information_schema.columns c
        JOIN pg_class t ON t.relname = c.table_name
        JOIN pg_namespace n ON n.oid = t.relnamespace AND n.nspname = c.table_schema
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attname = c.column_name
        WHERE c.table_schema = current_schema()
        ORDER BY c.table_name, c.ordinal_position
        "#;

        pub const INDEXES: &str = r#"
        SELECT
            t.relname::text AS table_name,
            i.relname::text AS index_name,
            array_agg(a.attname::text ORDER BY array_position(ix.indkey, a.attnum)) AS column_names,
            ix.indisprimary AS is_primary
        FROM pg_index ix
        JOIN pg_class i ON i.oid = ix.indexrelid
        JOIN pg_class t ON t.oid = ix.indrelid
        JOIN pg_namespace n ON n.oid = t.relnamespace
        JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
        WHERE n.nspname = current_schema()
        GROUP BY t.relname, i.relname, ix.indisprimary
        "#;
    }

    pub mod mysql {
        pub const COLUMNS: &str = r#"
        SELECT
            CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME,
            CONVERT(COLUMN_NAME USING utf8) AS COLUMN_NAME,
            CONVERT(COLUMN_TYPE USING utf8) AS COLUMN_TYPE,
            CONVERT(IS_NULLABLE USING utf8) AS IS_NULLABLE,
            CONVERT(COLUMN_DEFAULT USING utf8) AS COLUMN_DEFAULT,
            CONVERT(COLUMN_KEY USING utf8) AS COLUMN_KEY,
            CAST(ORDINAL_POSITION AS SIGNED) AS POSITION
        FROM information_schema.columns
        WHERE TABLE_SCHEMA = DATABASE()
        ORDER BY TABLE_NAME, ORDINAL_POSITION
        "#;

        pub const INDEXES: &str = r#"
        SELECT
            CONVERT(TABLE_NAME USING utf8) AS TABLE_NAME,
            CONVERT(INDEX_NAME USING utf8) AS INDEX_NAME,
            CONVERT(GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) USING utf8) AS COLUMN_NAMES
        FROM information_schema.STATISTICS
        WHERE TABLE_SCHEMA = DATABASE()
        GROUP BY TABLE_NAME, INDEX_NAME
        "#;
    }

    pub mod sqlite {
        pub const TABLES: &str = r#"
            SELECT name FROM sqlite_master
            WHERE type = 'table'
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#;
    }
}

mod postgres {
    use super::*;
    use sqlx::{PgPool, Row};

    pub async fn columns(pool: &PgPool) -> DbResult<Catalog> {
        let rows = sqlx::query(queries::postgres::COLUMNS)
            .fetch_all(pool)
            .await?;
        let mut tables = Catalog::new();
        for row in &rows {
            let table: String = row.try_get("table_name")?;
            let column: String = row.try_get("column_name")?;
            let column_type: String = row.try_get("column_type")?;
            let nullable: String = row.try_get("is_nullable")?;
            let default: Option<String> = row.try_get("column_default")?;
            let position: i32 = row.try_get("position")?;
            add_column(
                &mut tables,
                table,
                column,
                ColumnInfo::new(column_type, position.max(0) as u32),
                nullable.eq_ignore_ascii_case("YES"),
                default,
                false,
            );
        }
        Ok(tables)
    }

    pub async fn indexes(pool: &PgPool, tables: &mut Catalog) -> DbResult<()> {
        let rows = sqlx::query(queries::postgres::INDEXES)
            .fetch_all(pool)
            .await?;
        for row in &rows {
            let table: String = row.try_get("table_name")?;
            let name: String = row.try_get("index_name")?;
            let columns: Vec<String> = row.try_get("column_names")?;
            let primary: bool = row.try_get("is_primary")?;
            let Some(entry) = tables.get_mut(&table) else {
                continue;
            };
            if primary {
                for col in &columns {
                    if let Some(info) = entry.columns.get_mut(col) {
                        info.primary = true;
                    }
                }
                entry.keys = columns;
            } else {
                entry.indexes.insert(name, columns);
            }
        }
        Ok(())
    }
}

mod mysql {
    use super::*;
    use sqlx::{MySqlPool, Row};

    pub async fn columns(pool: &MySqlPool) -> DbResult<Catalog> {
        let rows = sqlx::query(queries::mysql::COLUMNS).fetch_all(pool).await?;
        let mut tables = Catalog::new();
        for row in &rows {
            let table: String = row.try_get("TABLE_NAME")?;
            let column: String = row.try_get("COLUMN_NAME")?;
            let column_type: String = row.try_get("COLUMN_TYPE")?;
            let nullable: String = row.try_get("IS_NULLABLE")?;
            let default: Option<String> = row.try_get("COLUMN_DEFAULT")?;
            let key: Option<String> = row.try_get("COLUMN_KEY")?;
            let position: i64 = row.try_get("POSITION")?;
            add_column(
                &mut tables,
                table,
                column,
                ColumnInfo::new(column_type, position.max(0) as u32),
                nullable.eq_ignore_ascii_case("YES"),
                default,
                key.as_deref() == Some("PRI"),
            );
        }
        Ok(tables)
    }

    pub async fn indexes(pool: &MySqlPool, tables: &mut Catalog) -> DbResult<()> {
        let rows = sqlx::query(queries::mysql::INDEXES).fetch_all(pool).await?;
        for row in &rows {
            let table: String = row.try_get("TABLE_NAME")?;
            let name: String = row.try_get("INDEX_NAME")?;
            let columns: String = row.try_get("COLUMN_NAMES")?;
            let Some(entry) = tables.get_mut(&table) else {
                continue;
            };
            let columns: Vec<String> = columns.split(',').map(String::from).collect();
            // Key order comes from the index, not from column positions
            if name == "PRIMARY" {
                entry.keys = columns;
            } else {
                entry.indexes.insert(name, columns);
            }
        }
        Ok(())
    }
}

mod sqlite {
    use super::*;
    use sqlx::{Row, SqlitePool};

    fn quoted(name: &str) -> String {
        name.replace('\'', "''")
    }

    pub async fn columns(pool: &SqlitePool) -> DbResult<Catalog> {
        let names: Vec<String> = sqlx::query(queries::sqlite::TABLES)
            .fetch_all(pool)
            .await?
            .iter()
            .map(|row| row.try_get("name"))
            .collect::<Result<_, _>>()?;

        let mut tables = Catalog::new();
        for table in names {
            let pragma_query = format!("PRAGMA table_info('{}')", quoted(&table));
            let rows = sqlx::query(&pragma_query).fetch_all(pool).await?;
            let mut keys: Vec<(i64, String)> = Vec::new();
            let entry = tables.entry(table).or_default();
            for row in &rows {
                let name: String = row.try_get("name")?;
                let data_type: String = row.try_get("type")?;
                let notnull: i64 = row.try_get("notnull")?;
                let default: Option<String> = row.try_get("dflt_value").ok().flatten();
                let pk: i64 = row.try_get("pk")?;
                let cid: i64 = row.try_get("cid")?;

                let mut info = ColumnInfo::new(data_type, (cid + 1).max(0) as u32);
                info.nullable = notnull == 0;
                info.default = default;
                info.primary = pk > 0;
                if pk > 0 {
                    keys.push((pk, name.clone()));
                }
                entry.columns.insert(name, info);
            }
            // pk is the 1-based position within the primary key
            keys.sort();
            entry.keys = keys.into_iter().map(|(_, name)| name).collect();
        }
        Ok(tables)
    }

    pub async fn indexes(pool: &SqlitePool, tables: &mut Catalog) -> DbResult<()> {
        for (table, entry) in tables.iter_mut() {
            let idx_query = format!("PRAGMA index_list('{}')", quoted(table));
            let idx_list = sqlx::query(&idx_query).fetch_all(pool).await?;
            for idx_row in &idx_list {
                let name: String = idx_row.try_get("name")?;
                let origin: String = idx_row.try_get("origin").unwrap_or_default();
                if origin == "pk" {
                    continue;
                }
                let info_query = format!("PRAGMA index_info('{}')", quoted(&name));
                let columns: Vec<String> = sqlx::query(&info_query)
                    .fetch_all(pool)
                    .await?
                    .iter()
                    .filter_map(|row| row.try_get::<Option<String>, _>("name").ok().flatten())
                    .collect();
                if !columns.is_empty() {
                    entry.indexes.insert(name, columns);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> DbPool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        DbPool::SQLite(pool)
    }

    #[tokio::test]
    async fn test_sqlite_columns_and_keys() {
        let pool = memory_pool().await;
        if let DbPool::SQLite(p) = &pool {
            sqlx::query("CREATE TABLE msg (mtime INT, id TEXT NOT NULL, body TEXT DEFAULT 'x', PRIMARY KEY(id, mtime))")
                .execute(p)
                .await
                .unwrap();
            sqlx::query("CREATE INDEX msg_idx ON msg(body)")
                .execute(p)
                .await
                .unwrap();
        }
        let mut tables = columns(&pool).await.unwrap();
        let msg = tables.get("msg").unwrap();
        assert_eq!(msg.keys, vec!["id", "mtime"]);
        assert_eq!(msg.columns.len(), 3);
        assert!(!msg.columns["id"].nullable);
        assert_eq!(msg.columns["body"].default.as_deref(), Some("'x'"));
        assert_eq!(msg.columns["mtime"].position, 1);

        indexes(&pool, &mut tables).await.unwrap();
        let msg = tables.get("msg").unwrap();
        assert_eq!(msg.indexes.get("msg_idx"), Some(&vec!["body".to_string()]));
    }

    #[tokio::test]
    async fn test_sqlite_empty_database() {
        let pool = memory_pool().await;
        assert!(columns(&pool).await.unwrap().is_empty());
    }
}
