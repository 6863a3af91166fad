#![allow(async_fn_in_trait)]

use crate::error::StorageResult;
use crate::models::RearmTask;
use sqlx::SqlitePool;

const TASK_COLUMNS: &str = r#"
    lock_id, device_id, deadline, delay_ms, attempts, status, last_error,
    created_at, updated_at
"#;

/// Read access to durable re-arm records
///
/// Records are written only inside the state transactions in
/// [`transaction`](crate::transaction), together with the lock row they
/// belong to.
pub trait RearmTaskRepository: Send + Sync {
    /// Record for one lock
    async fn find_by_lock(&self, lock_id: i64) -> StorageResult<Option<RearmTask>>;

    /// Every record, earliest deadline first
    async fn find_all(&self) -> StorageResult<Vec<RearmTask>>;

    /// Records still waiting to be executed
    async fn find_pending(&self) -> StorageResult<Vec<RearmTask>>;
}

/// SQLite implementation of RearmTaskRepository
#[derive(Debug, Clone)]
pub struct SqliteRearmTaskRepository {
    pool: SqlitePool,
}

impl SqliteRearmTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl RearmTaskRepository for SqliteRearmTaskRepository {
    async fn find_by_lock(&self, lock_id: i64) -> StorageResult<Option<RearmTask>> {
        let task = sqlx::query_as::<_, RearmTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM rearm_tasks WHERE lock_id = ?"
        ))
        .bind(lock_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(task)
    }

    async fn find_all(&self) -> StorageResult<Vec<RearmTask>> {
        let tasks = sqlx::query_as::<_, RearmTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM rearm_tasks ORDER BY deadline ASC, lock_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }

    async fn find_pending(&self) -> StorageResult<Vec<RearmTask>> {
        let tasks = sqlx::query_as::<_, RearmTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM rearm_tasks WHERE status = 'pending' \
             ORDER BY deadline ASC, lock_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(tasks)
    }
}
