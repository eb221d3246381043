#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Live-database integration tests for the migration ledger and the hook
//! registry.
//!
//! These tests need a reachable PostgreSQL instance and are ignored by
//! default:
//!
//! ```bash
//! DATABASE_URL=postgres://postgres@localhost/bottega_test \
//!     cargo test --test migration_pg_test -- --ignored
//! ```

use std::fs;
use std::path::Path;

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use bottega_kernel::module::{hooks, migration};

async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for live tests");
    PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("failed to connect to test database")
}

async fn reset(pool: &PgPool, module: &str, tables: &[&str]) {
    migration::ensure_ledger(pool).await.unwrap();
    sqlx::query("DELETE FROM migrations_log WHERE module_name = $1")
        .bind(module)
        .execute(pool)
        .await
        .unwrap();
    for table in tables {
        sqlx::raw_sql(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(pool)
            .await
            .unwrap();
    }
}

async fn table_exists(pool: &PgPool, table: &str) -> bool {
    let row = sqlx::query("SELECT to_regclass($1) AS oid")
        .bind(format!("public.{table}"))
        .fetch_one(pool)
        .await
        .unwrap();
    row.get::<Option<String>, _>("oid").is_some()
}

async fn ledger_rows(pool: &PgPool, module: &str) -> Vec<String> {
    migration::applied_migrations(pool, module).await.unwrap()
}

fn write_sql(dir: &Path, name: &str, sql: &str) {
    fs::write(dir.join(name), sql).unwrap();
}

#[tokio::test]
#[ignore]
async fn applying_twice_applies_each_file_at_most_once() {
    let pool = pool().await;
    let module = "it_idempotent";
    reset(&pool, module, &["it_idem_notes"]).await;

    let tmp = tempfile::tempdir().unwrap();
    write_sql(
        tmp.path(),
        "20240101120000_init.sql",
        "CREATE TABLE it_idem_notes (id SERIAL PRIMARY KEY, body TEXT);",
    );

    let first = migration::apply_migrations(&pool, module, tmp.path(), true)
        .await
        .unwrap();
    assert_eq!(first, vec!["20240101120000_init.sql"]);

    let second = migration::apply_migrations(&pool, module, tmp.path(), true)
        .await
        .unwrap();
    assert!(second.is_empty());

    assert_eq!(ledger_rows(&pool, module).await.len(), 1);
}

#[tokio::test]
#[ignore]
async fn down_section_never_executes() {
    let pool = pool().await;
    let module = "it_updown";
    reset(&pool, module, &["it_updown_notes"]).await;

    let tmp = tempfile::tempdir().unwrap();
    // The down section would fail if it ever ran.
    write_sql(
        tmp.path(),
        "20240101120000_init.sql",
        "-- up\nCREATE TABLE it_updown_notes (id SERIAL PRIMARY KEY);\n\
         -- down\nDROP TABLE it_updown_this_table_does_not_exist;\n",
    );

    let applied = migration::apply_migrations(&pool, module, tmp.path(), true)
        .await
        .unwrap();
    assert_eq!(applied.len(), 1);
    assert!(table_exists(&pool, "it_updown_notes").await);
}

#[tokio::test]
#[ignore]
async fn failed_migration_rolls_back_schema_and_ledger() {
    let pool = pool().await;
    let module = "it_atomic";
    reset(&pool, module, &["it_atomic_a", "it_atomic_b"]).await;

    let tmp = tempfile::tempdir().unwrap();
    write_sql(
        tmp.path(),
        "20240101120000_a.sql",
        "CREATE TABLE it_atomic_a (id SERIAL PRIMARY KEY);",
    );
    // Creates a table, then fails: the whole file must roll back.
    write_sql(
        tmp.path(),
        "20240102120000_b.sql",
        "CREATE TABLE it_atomic_b (id SERIAL PRIMARY KEY);\nSELECT frobnicate();",
    );

    let err = migration::apply_migrations(&pool, module, tmp.path(), true)
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("[installer] it_atomic migration failed: 20240102120000_b.sql"));

    // The first file committed; the broken one left nothing behind.
    assert_eq!(ledger_rows(&pool, module).await, vec!["20240101120000_a.sql"]);
    assert!(table_exists(&pool, "it_atomic_a").await);
    assert!(!table_exists(&pool, "it_atomic_b").await);

    // Fixing the file and re-running applies exactly the fixed migration.
    write_sql(
        tmp.path(),
        "20240102120000_b.sql",
        "CREATE TABLE it_atomic_b (id SERIAL PRIMARY KEY);",
    );
    let applied = migration::apply_migrations(&pool, module, tmp.path(), true)
        .await
        .unwrap();
    assert_eq!(applied, vec!["20240102120000_b.sql"]);
    assert_eq!(ledger_rows(&pool, module).await.len(), 2);
}

#[tokio::test]
#[ignore]
async fn failure_stops_later_files_for_the_same_module() {
    let pool = pool().await;
    let module = "it_ordering";
    reset(&pool, module, &["it_ordering_late"]).await;

    let tmp = tempfile::tempdir().unwrap();
    write_sql(tmp.path(), "20240101120000_bad.sql", "SELECT frobnicate();");
    write_sql(
        tmp.path(),
        "20240102120000_late.sql",
        "CREATE TABLE it_ordering_late (id SERIAL PRIMARY KEY);",
    );

    migration::apply_migrations(&pool, module, tmp.path(), true)
        .await
        .unwrap_err();

    assert!(ledger_rows(&pool, module).await.is_empty());
    assert!(!table_exists(&pool, "it_ordering_late").await);
}

#[tokio::test]
#[ignore]
async fn hook_binding_triple_is_unique() {
    let pool = pool().await;
    let module = "it_hooks";

    hooks::ensure_hook_tables(&pool).await.unwrap();
    sqlx::query("DELETE FROM hook_module WHERE module_name = $1")
        .bind(module)
        .execute(&pool)
        .await
        .unwrap();

    hooks::register_hook(&pool, module, "it_item_saved", "onItemSaved", 0)
        .await
        .unwrap();
    hooks::register_hook(&pool, module, "it_item_saved", "onItemSaved", 0)
        .await
        .unwrap();

    assert_eq!(hooks::binding_count(&pool, "it_item_saved").await.unwrap(), 1);

    let bound = hooks::bindings(&pool, "it_item_saved").await.unwrap();
    assert_eq!(bound.len(), 1);
    assert_eq!(bound[0].module_name, module);
    assert_eq!(bound[0].callback, "onItemSaved");
}
