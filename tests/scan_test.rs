//! Integration tests for dynamic row scanning against SQLite.

use chrono::{TimeZone, Utc};
use sqlm::db::TypeCategory;
use sqlm::{CallContext, DbError, DbPool, Record, Value, open, query_all, query_one, with_transaction};
use std::time::Duration;
use tempfile::NamedTempFile;

async fn sqlite_pool() -> (NamedTempFile, DbPool) {
    let temp_file = NamedTempFile::new().unwrap();
    let url = format!("sqlite:{}?mode=rwc", temp_file.path().to_str().unwrap());
    let pool = open(
        "sqlite",
        &url,
        1,
        Duration::from_secs(300),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let ctx = CallContext::background();
    with_transaction(&ctx, &pool, |ctx, tx| {
        Box::pin(async move {
            tx.exec(ctx, "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", &[])
                .await?;
            tx.exec(ctx, "INSERT INTO t (id, name) VALUES (1, 'a'), (2, 'b')", &[])
                .await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    (temp_file, pool)
}

/// Run one query through `query_all` in its own transaction.
async fn fetch_all(pool: &DbPool, sql: &'static str, args: Vec<Value>) -> Result<Vec<Record>, DbError> {
    let ctx = CallContext::background();
    with_transaction(&ctx, pool, move |ctx, tx| {
        Box::pin(async move { Ok(query_all(ctx, tx, sql, &args).await?.collect()) })
    })
    .await
}

async fn fetch_one(pool: &DbPool, sql: &'static str) -> Result<Record, DbError> {
    let ctx = CallContext::background();
    with_transaction(&ctx, pool, move |ctx, tx| {
        Box::pin(async move { query_one(ctx, tx, sql, &[]).await })
    })
    .await
}

#[tokio::test]
async fn test_query_all_returns_rows_in_order() {
    let (_file, pool) = sqlite_pool().await;

    let rows = fetch_all(&pool, "SELECT id, name FROM t ORDER BY id", vec![])
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
    assert_eq!(rows[0].string("name"), "a");
    assert_eq!(rows[1].get("id"), Some(&Value::Int(2)));
    assert_eq!(rows[1].string("name"), "b");

    for row in &rows {
        let mut columns: Vec<&str> = row.columns().collect();
        columns.sort_unstable();
        assert_eq!(columns, vec!["id", "name"]);
    }
}

#[tokio::test]
async fn test_query_all_empty_result_is_not_an_error() {
    let (_file, pool) = sqlite_pool().await;

    let rows = fetch_all(&pool, "SELECT id FROM t WHERE id > 100", vec![])
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_query_all_binds_arguments() {
    let (_file, pool) = sqlite_pool().await;

    let rows = fetch_all(
        &pool,
        "SELECT id, name FROM t WHERE id = ? OR name = ? ORDER BY id",
        vec![Value::Int(2), Value::from("a")],
    )
    .await
    .unwrap();

    let ids: Vec<String> = rows.iter().map(|r| r.string("id")).collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test]
async fn test_query_one_zero_rows_is_not_found() {
    let (_file, pool) = sqlite_pool().await;

    let err = fetch_one(&pool, "SELECT id FROM t WHERE id = 42")
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound));
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_query_one_returns_first_of_many() {
    let (_file, pool) = sqlite_pool().await;

    let row = fetch_one(&pool, "SELECT id, name FROM t ORDER BY id DESC")
        .await
        .unwrap();
    assert_eq!(row.get("id"), Some(&Value::Int(2)));
    assert_eq!(row.string("name"), "b");
    assert_eq!(row.len(), 2);
}

#[tokio::test]
async fn test_query_row_leaves_connection_usable() {
    let (_file, pool) = sqlite_pool().await;
    let ctx = CallContext::background();

    // The unread second row must be discarded before the next statement runs.
    let (first, total) = with_transaction(&ctx, &pool, |ctx, tx| {
        Box::pin(async move {
            let first = tx.query_row(ctx, "SELECT id FROM t ORDER BY id", &[]).await?;
            let total = tx.query(ctx, "SELECT id FROM t", &[]).await?.count();
            Ok((first, total))
        })
    })
    .await
    .unwrap();

    assert_eq!(first.string("id"), "1");
    assert_eq!(total, 2);
}

#[tokio::test]
async fn test_scans_every_category() {
    let (_file, pool) = sqlite_pool().await;

    let row = fetch_one(
        &pool,
        "SELECT 42 AS i, 1.5 AS f, 'text' AS s, x'0102ff' AS b, NULL AS n",
    )
    .await
    .unwrap();

    assert_eq!(row.get("i"), Some(&Value::Int(42)));
    assert_eq!(row.get("f"), Some(&Value::Float(1.5)));
    assert_eq!(row.get("s"), Some(&Value::Text("text".to_string())));
    assert_eq!(row.get("b"), Some(&Value::Binary(vec![0x01, 0x02, 0xff])));
    assert_eq!(row.get("n"), Some(&Value::Null));

    assert_eq!(row.string("i"), "42");
    assert_eq!(row.string("f"), "1.5");
    assert_eq!(row.string("b"), "AQL/");
    assert_eq!(row.string("n"), "");
    assert_eq!(row.string("missing"), "");
}

#[tokio::test]
async fn test_declared_types_refine_storage_class() {
    let (_file, pool) = sqlite_pool().await;
    let ctx = CallContext::background();

    let row = with_transaction(&ctx, &pool, |ctx, tx| {
        Box::pin(async move {
            tx.exec(
                ctx,
                "CREATE TABLE events (id INTEGER, active BOOLEAN, seen_at DATETIME)",
                &[],
            )
            .await?;
            tx.exec(
                ctx,
                "INSERT INTO events VALUES (1, 1, '2024-03-01 12:30:00')",
                &[],
            )
            .await?;
            tx.query_row(ctx, "SELECT id, active, seen_at FROM events", &[])
                .await
        })
    })
    .await
    .unwrap();

    assert_eq!(row.get("id"), Some(&Value::Int(1)));
    assert_eq!(row.get("active"), Some(&Value::Bool(true)));
    assert_eq!(
        row.get("seen_at"),
        Some(&Value::Timestamp(
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
        ))
    );
    assert_eq!(row.string("active"), "true");
    assert_eq!(row.string("seen_at"), "2024-03-01T12:30:00Z");
}

#[tokio::test]
async fn test_unparseable_timestamp_falls_back_to_storage_class() {
    let (_file, pool) = sqlite_pool().await;
    let ctx = CallContext::background();

    let row = with_transaction(&ctx, &pool, |ctx, tx| {
        Box::pin(async move {
            tx.exec(ctx, "CREATE TABLE logs (at DATETIME)", &[]).await?;
            tx.exec(ctx, "INSERT INTO logs VALUES ('yesterday')", &[])
                .await?;
            tx.query_row(ctx, "SELECT at FROM logs", &[]).await
        })
    })
    .await
    .unwrap();

    assert_eq!(row.get("at"), Some(&Value::Text("yesterday".to_string())));
}

#[tokio::test]
async fn test_duplicate_column_names_keep_last_value() {
    let (_file, pool) = sqlite_pool().await;

    let rows = fetch_all(&pool, "SELECT id, name AS id FROM t ORDER BY t.id", vec![])
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].len(), 1);
    assert_eq!(rows[0].string("id"), "a");
    assert_eq!(rows[1].string("id"), "b");
}

#[tokio::test]
async fn test_join_with_shared_column_names() {
    let (_file, pool) = sqlite_pool().await;
    let ctx = CallContext::background();

    let rows = with_transaction(&ctx, &pool, |ctx, tx| {
        Box::pin(async move {
            tx.exec(ctx, "CREATE TABLE u (id INTEGER PRIMARY KEY, t_id INTEGER, name TEXT)", &[])
                .await?;
            tx.exec(ctx, "INSERT INTO u VALUES (10, 1, 'child')", &[])
                .await?;
            let rows = tx
                .query(ctx, "SELECT * FROM t JOIN u ON u.t_id = t.id", &[])
                .await?;
            Ok(rows.collect::<Vec<_>>())
        })
    })
    .await
    .unwrap();

    assert_eq!(rows.len(), 1);
    let mut columns: Vec<&str> = rows[0].columns().collect();
    columns.sort_unstable();
    assert_eq!(columns, vec!["id", "name", "t_id"]);
    assert_eq!(rows[0].get("id"), Some(&Value::Int(10)));
    assert_eq!(rows[0].string("name"), "child");
}

#[tokio::test]
async fn test_invalid_sql_is_query_exec_error() {
    let (_file, pool) = sqlite_pool().await;

    let err = fetch_all(&pool, "SELECT * FROM no_such_table", vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::QueryExec { .. }));
    assert!(err.to_string().contains("no_such_table"));
}

#[tokio::test]
async fn test_prepare_describes_columns() {
    let (_file, pool) = sqlite_pool().await;
    let ctx = CallContext::background();

    let stmt = with_transaction(&ctx, &pool, |ctx, tx| {
        Box::pin(async move { tx.prepare(ctx, "SELECT id, name FROM t").await })
    })
    .await
    .unwrap();

    assert_eq!(stmt.column_names().collect::<Vec<_>>(), vec!["id", "name"]);
    assert_eq!(stmt.columns[0].category, TypeCategory::Integer);
    assert_eq!(stmt.columns[1].category, TypeCategory::Text);
}

#[tokio::test]
async fn test_exec_reports_last_insert_id() {
    let (_file, pool) = sqlite_pool().await;
    let ctx = CallContext::background();

    let result = with_transaction(&ctx, &pool, |ctx, tx| {
        Box::pin(async move {
            tx.exec(ctx, "INSERT INTO t (name) VALUES (?)", &[Value::from("c")])
                .await
        })
    })
    .await
    .unwrap();

    assert_eq!(result.rows_affected, 1);
    assert_eq!(result.last_insert_id, Some(3));
}

#[tokio::test]
async fn test_records_serialize_as_json_objects() {
    let (_file, pool) = sqlite_pool().await;

    let rows = fetch_all(&pool, "SELECT id, name FROM t WHERE id = 1", vec![])
        .await
        .unwrap();
    let json = serde_json::to_value(&rows[0]).unwrap();
    assert_eq!(json, serde_json::json!({"id": 1, "name": "a"}));
}
