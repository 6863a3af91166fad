//! Integration tests for database connection and pooling
//!
//! These tests use an in-memory SQLite database and validate
//! migrations, health checks and concurrent state writes; one test opens
//! a file-backed registry in the system temp directory.
//!
//! Run with: cargo test --package relaylock-storage --test integration_database

use relaylock_storage::connection::{Database, DatabaseConfig};
use relaylock_storage::{StorageError, transaction};
use std::sync::Arc;
use tokio::sync::Barrier;

async fn seed_lock(db: &Database, code: &str) {
    sqlx::query(
        "INSERT INTO users (name, email, birth_date) VALUES ('Owner', 'owner@example.com', '1980-01-01')",
    )
    .execute(db.pool())
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO locks (name, market_name, device_id, code, qr_token, owner_id)
         VALUES ('Porta', 'Mercado', 'plug-seed', ?, 'token-seed', 1)",
    )
    .bind(code)
    .execute(db.pool())
    .await
    .unwrap();
}

#[tokio::test]
async fn test_in_memory_database() {
    let db = Database::in_memory().await.unwrap();
    db.health_check().await.unwrap();
    db.close().await;
}

#[tokio::test]
async fn test_concurrent_unlocks_single_winner() {
    let db = Database::in_memory().await.unwrap();
    seed_lock(&db, "RACE1").await;

    const WRITERS: usize = 10;
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|_| {
            let db = db.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                let mut tx = db.pool().begin().await.unwrap();
                let result = transaction::commit_unlock(&mut tx, 1).await;
                tx.commit().await.unwrap();
                result
            })
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    let (won, lost): (Vec<_>, Vec<_>) = results
        .into_iter()
        .map(|r| r.unwrap())
        .partition(|r| r.is_ok());

    assert_eq!(won.len(), 1);
    assert!(
        lost.iter()
            .all(|r| matches!(r, Err(StorageError::Conflict(_))))
    );

    db.close().await;
}

#[tokio::test]
async fn test_file_database_creates_directory() {
    let dir = std::env::temp_dir().join(format!("relaylock-{}", uuid::Uuid::new_v4()));
    let path = dir.join("nested").join("locks.db");

    let db = Database::new(DatabaseConfig::new(path.to_string_lossy()))
        .await
        .unwrap();
    seed_lock(&db, "FILE1").await;
    db.close().await;
    assert!(path.exists());

    // Reopening keeps the data and re-runs migrations as a no-op
    let db = Database::new(DatabaseConfig::new(path.to_string_lossy()))
        .await
        .unwrap();
    let (code,): (String,) = sqlx::query_as("SELECT code FROM locks WHERE id = 1")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(code, "FILE1");
    db.close().await;

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_migration_idempotency() {
    let db = Database::in_memory().await.unwrap();

    db.migrate().await.unwrap();
    db.migrate().await.unwrap();

    for table in ["users", "locks", "lock_authorized_users", "access_events", "rearm_tasks"] {
        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?")
                .bind(table)
                .fetch_one(db.pool())
                .await
                .unwrap();

        assert_eq!(result.0, 1, "table {table} missing");
    }

    db.close().await;
}

#[tokio::test]
async fn test_rearm_delay_column_default() {
    let db = Database::in_memory().await.unwrap();

    sqlx::query(
        "INSERT INTO users (name, email, birth_date) VALUES ('Owner', 'owner@example.com', '1980-01-01')",
    )
    .execute(db.pool())
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO locks (name, market_name, device_id, code, qr_token, owner_id)
         VALUES ('Porta', 'Mercado', 'plug-raw', 'RAW1', 'token-raw', 1)",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let (delay, power_state, connectivity): (i64, String, String) = sqlx::query_as(
        "SELECT rearm_delay_ms, power_state, connectivity FROM locks WHERE code = 'RAW1'",
    )
    .fetch_one(db.pool())
    .await
    .unwrap();

    assert_eq!(delay, 30_000);
    assert_eq!(power_state, "locked");
    assert_eq!(connectivity, "offline");

    db.close().await;
}

#[tokio::test]
async fn test_negative_delay_rejected_by_schema() {
    let db = Database::in_memory().await.unwrap();

    sqlx::query(
        "INSERT INTO users (name, email, birth_date) VALUES ('Owner', 'owner@example.com', '1980-01-01')",
    )
    .execute(db.pool())
    .await
    .unwrap();

    let result = sqlx::query(
        "INSERT INTO locks (name, market_name, device_id, code, qr_token, owner_id, rearm_delay_ms)
         VALUES ('Porta', 'Mercado', 'plug-neg', 'NEG1', 'token-neg', 1, -1)",
    )
    .execute(db.pool())
    .await;

    assert!(result.is_err());

    db.close().await;
}
