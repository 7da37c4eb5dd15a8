//! Runs against a real Postgres server when `POLICYHUB_TEST_DATABASE_URL` is
//! set; otherwise those tests return early. The runner always requests TLS,
//! so the server must accept encrypted connections.

use policyhub_db::{create_pg_pool, DbSettings, MigrateConfig, MigrationError, Migrator};
use sqlx::PgPool;
use std::path::PathBuf;

fn test_url() -> Option<String> {
    std::env::var("POLICYHUB_TEST_DATABASE_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())
}

/// Checks through a plain pool that honors the URL's own `sslmode`.
async fn table_exists(url: &str, table: &str) -> bool {
    let pool = PgPool::connect(url).await.expect("should connect");
    let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
        .bind(table)
        .fetch_one(&pool)
        .await
        .expect("should query catalog");
    pool.close().await;
    exists
}

async fn drop_table(url: &str, table: &str) {
    let pool = PgPool::connect(url).await.expect("should connect");
    sqlx::raw_sql(&format!("DROP TABLE IF EXISTS {table}"))
        .execute(&pool)
        .await
        .expect("should drop table");
    pool.close().await;
}

async fn migrate(url: &str, sql: &str) -> Result<(), MigrationError> {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let script_path: PathBuf = dir.path().join("init.sql");
    std::fs::write(&script_path, sql).expect("should write script");

    let settings = DbSettings {
        accept_invalid_certs: true,
        ..DbSettings::default()
    };
    Migrator::new(MigrateConfig {
        database_url: Some(url.to_string()),
        script_path,
    })
    .run(|url| create_pg_pool(url, &settings))
    .await
    .map(|_| ())
}

#[tokio::test]
async fn postgres_commit_applies_script() {
    let Some(url) = test_url() else { return };
    let table = "policyhub_it_commit";
    drop_table(&url, table).await;

    migrate(&url, &format!("CREATE TABLE {table} (id INT);"))
        .await
        .expect("migration should succeed");

    assert!(table_exists(&url, table).await);
    drop_table(&url, table).await;
}

#[tokio::test]
async fn postgres_failure_rolls_back_ddl() {
    let Some(url) = test_url() else { return };
    let table = "policyhub_it_rollback";
    drop_table(&url, table).await;

    let err = migrate(
        &url,
        &format!("CREATE TABLE {table} (id INT); INSERT INTO nonexistent_table VALUES (1);"),
    )
    .await
    .expect_err("migration should fail");

    assert!(matches!(err, MigrationError::Execution { .. }));
    assert!(!table_exists(&url, table).await);
}

#[tokio::test]
async fn postgres_unreachable_server_fails_before_any_statement() {
    let dir = tempfile::tempdir().expect("should create temp dir");
    let script_path = dir.path().join("init.sql");
    std::fs::write(&script_path, "CREATE TABLE never_created (id INT);")
        .expect("should write script");

    let settings = DbSettings {
        acquire_timeout_secs: 1,
        ..DbSettings::default()
    };
    // Nothing listens on port 1, so acquiring a connection times out.
    let err = Migrator::new(MigrateConfig {
        database_url: Some("postgres://nobody@127.0.0.1:1/none".to_string()),
        script_path,
    })
    .run(|url| create_pg_pool(url, &settings))
    .await
    .expect_err("migration should fail without a server");

    assert!(matches!(err, MigrationError::Unexpected(_)), "got {err:?}");
}
