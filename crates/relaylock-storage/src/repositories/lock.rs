#![allow(async_fn_in_trait)]

use crate::error::{StorageError, StorageResult};
use crate::models::{Lock, LockFilter, LockUpdate, NewLock, Page, Pagination, Scope};
use crate::repositories::like_pattern;
use relaylock_core::{LockCode, LockLookup, QrToken, validate_rearm_delay_ms};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info};

const LOCK_COLUMNS: &str = r#"
    id, name, market_name, device_id, code, qr_token,
    operational_status, connectivity, power_state, degraded,
    rearm_delay_ms, owner_id, age_restricted, personalized, version,
    created_at, updated_at
"#;

/// Repository trait for Lock entity operations (the lock registry)
///
/// Runtime state (`power_state`, `connectivity`, `degraded`) is never
/// written here; see [`transaction`](crate::transaction).
///
/// This trait uses native async trait methods (Edition 2024 feature).
pub trait LockRepository: Send + Sync {
    /// Find a lock by ID
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<Lock>>;

    /// Find a lock by its human code
    async fn find_by_code(&self, code: &LockCode) -> StorageResult<Option<Lock>>;

    /// Find a lock by its QR token
    async fn find_by_qr_token(&self, token: &QrToken) -> StorageResult<Option<Lock>>;

    /// Find a lock by either lookup key
    async fn find_by_lookup(&self, lookup: &LockLookup) -> StorageResult<Option<Lock>> {
        match lookup {
            LockLookup::Code(code) => self.find_by_code(code).await,
            LockLookup::QrToken(token) => self.find_by_qr_token(token).await,
        }
    }

    /// Create a lock; the owner is added to the authorized users
    async fn create(&self, lock: &NewLock) -> StorageResult<Lock>;

    /// Apply an administrative edit based on `expected_version`
    ///
    /// Fails with `StorageError::Conflict` if the lock changed since.
    async fn update_admin_fields(
        &self,
        id: i64,
        update: &LockUpdate,
        expected_version: i64,
    ) -> StorageResult<Lock>;

    /// Replace the authorized user list based on `expected_version`
    async fn set_authorized_users(
        &self,
        id: i64,
        users: &[i64],
        expected_version: i64,
    ) -> StorageResult<Lock>;

    /// Delete a lock
    ///
    /// Refused while the lock is unlocked, degraded, waiting for a re-arm, or
    /// referenced by access events.
    async fn delete(&self, id: i64) -> StorageResult<()>;

    /// List locks visible within `scope`
    async fn list(
        &self,
        filter: &LockFilter,
        scope: Scope,
        pagination: Pagination,
    ) -> StorageResult<Page<Lock>>;

    /// All locks carrying the degraded marker
    async fn find_degraded(&self) -> StorageResult<Vec<Lock>>;
}

/// SQLite implementation of LockRepository
#[derive(Debug, Clone)]
pub struct SqliteLockRepository {
    pool: SqlitePool,
}

impl SqliteLockRepository {
    /// Create a new SQLite lock repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Find a lock by a unique text column
    async fn find_one(&self, column: &'static str, value: &str) -> StorageResult<Option<Lock>> {
        let mut conn = self.pool.acquire().await?;
        let lock = sqlx::query_as::<_, Lock>(&format!(
            "SELECT {LOCK_COLUMNS} FROM locks WHERE {column} = ?"
        ))
        .bind(value)
        .fetch_optional(&mut *conn)
        .await?;

        match lock {
            Some(lock) => Ok(Some(with_authorized_users(&mut conn, lock).await?)),
            None => Ok(None),
        }
    }

    /// Resolve a zero-row update into NotFound or Conflict
    async fn version_mismatch(&self, id: i64, expected_version: i64) -> StorageError {
        match self.find_by_id(id).await {
            Ok(Some(lock)) => StorageError::Conflict(format!(
                "Lock {id} is at version {}, edit was based on {expected_version}",
                lock.version
            )),
            Ok(None) => StorageError::not_found("Lock", "id", id),
            Err(e) => e,
        }
    }
}

/// Load the authorized user list into `lock`
pub(crate) async fn with_authorized_users(
    conn: &mut SqliteConnection,
    mut lock: Lock,
) -> StorageResult<Lock> {
    let users: Vec<(i64,)> = sqlx::query_as(
        "SELECT user_id FROM lock_authorized_users WHERE lock_id = ? ORDER BY user_id",
    )
    .bind(lock.id)
    .fetch_all(&mut *conn)
    .await?;

    lock.authorized_users = users.into_iter().map(|(id,)| id).collect();
    Ok(lock)
}

fn push_lock_filters(builder: &mut QueryBuilder<'_, Sqlite>, filter: &LockFilter, scope: Scope) {
    builder.push(" WHERE 1 = 1");

    if let Some(market) = filter.market_name.as_deref().filter(|s| !s.trim().is_empty()) {
        builder
            .push(" AND l.market_name LIKE ")
            .push_bind(like_pattern(market))
            .push(" ESCAPE '\\'");
    }

    if let Some(device_id) = filter.device_id.as_deref().filter(|s| !s.trim().is_empty()) {
        builder
            .push(" AND l.device_id = ")
            .push_bind(device_id.trim().to_string());
    }

    if let Some(status) = filter.operational_status {
        builder
            .push(" AND l.operational_status = ")
            .push_bind(status.as_str());
    }

    match scope {
        Scope::Unrestricted => {}
        Scope::AuthorizedLocks(user_id) | Scope::OwnEvents(user_id) => {
            builder
                .push(" AND (l.owner_id = ")
                .push_bind(user_id)
                .push(" OR l.id IN (SELECT lock_id FROM lock_authorized_users WHERE user_id = ")
                .push_bind(user_id)
                .push("))");
        }
    }
}

impl LockRepository for SqliteLockRepository {
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<Lock>> {
        let mut conn = self.pool.acquire().await?;
        let lock = sqlx::query_as::<_, Lock>(&format!(
            "SELECT {LOCK_COLUMNS} FROM locks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        match lock {
            Some(lock) => Ok(Some(with_authorized_users(&mut conn, lock).await?)),
            None => Ok(None),
        }
    }

    async fn find_by_code(&self, code: &LockCode) -> StorageResult<Option<Lock>> {
        self.find_one("code", code.as_str()).await
    }

    async fn find_by_qr_token(&self, token: &QrToken) -> StorageResult<Option<Lock>> {
        self.find_one("qr_token", token.as_str()).await
    }

    async fn create(&self, lock: &NewLock) -> StorageResult<Lock> {
        let name = lock.name.trim();
        if name.is_empty() {
            return Err(StorageError::Validation("Lock name is required".to_string()));
        }
        let delay_ms = validate_rearm_delay_ms(lock.effective_rearm_delay_ms())?;
        let qr_token = match &lock.qr_token {
            Some(token) => token.as_str().to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO locks (
                name, market_name, device_id, code, qr_token,
                operational_status, rearm_delay_ms, owner_id,
                age_restricted, personalized
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(lock.market_name.trim())
        .bind(lock.device_id.as_str())
        .bind(lock.code.as_str())
        .bind(&qr_token)
        .bind(lock.operational_status.as_str())
        .bind(delay_ms)
        .bind(lock.owner_id)
        .bind(lock.age_restricted)
        .bind(lock.personalized)
        .execute(&mut *tx)
        .await?;

        let id = result.last_insert_rowid();

        let mut users = lock.authorized_users.clone();
        users.push(lock.owner_id);
        users.sort_unstable();
        users.dedup();

        for user_id in &users {
            sqlx::query("INSERT INTO lock_authorized_users (lock_id, user_id) VALUES (?, ?)")
                .bind(id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        info!(lock_id = id, device_id = %lock.device_id, "Lock created");

        self.find_by_id(id)
            .await?
            .ok_or_else(|| StorageError::not_found("Lock", "id", id))
    }

    async fn update_admin_fields(
        &self,
        id: i64,
        update: &LockUpdate,
        expected_version: i64,
    ) -> StorageResult<Lock> {
        if let Some(delay) = update.rearm_delay_ms {
            validate_rearm_delay_ms(delay)?;
        }
        if update.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(StorageError::Validation("Lock name is required".to_string()));
        }

        let result = sqlx::query(
            r#"
            UPDATE locks
            SET name = COALESCE(?, name),
                market_name = COALESCE(?, market_name),
                code = COALESCE(?, code),
                rearm_delay_ms = COALESCE(?, rearm_delay_ms),
                operational_status = COALESCE(?, operational_status),
                age_restricted = COALESCE(?, age_restricted),
                personalized = COALESCE(?, personalized),
                version = version + 1,
                updated_at = datetime('now')
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(update.name.as_deref().map(str::trim))
        .bind(update.market_name.as_deref().map(str::trim))
        .bind(update.code.as_ref().map(LockCode::as_str))
        .bind(update.rearm_delay_ms)
        .bind(update.operational_status.map(|s| s.as_str()))
        .bind(update.age_restricted)
        .bind(update.personalized)
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.version_mismatch(id, expected_version).await);
        }

        debug!(lock_id = id, "Lock administrative fields updated");

        self.find_by_id(id)
            .await?
            .ok_or_else(|| StorageError::not_found("Lock", "id", id))
    }

    async fn set_authorized_users(
        &self,
        id: i64,
        users: &[i64],
        expected_version: i64,
    ) -> StorageResult<Lock> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE locks
            SET version = version + 1, updated_at = datetime('now')
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            drop(tx);
            return Err(self.version_mismatch(id, expected_version).await);
        }

        sqlx::query("DELETE FROM lock_authorized_users WHERE lock_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let mut users = users.to_vec();
        users.sort_unstable();
        users.dedup();

        for user_id in &users {
            sqlx::query("INSERT INTO lock_authorized_users (lock_id, user_id) VALUES (?, ?)")
                .bind(id)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| StorageError::not_found("Lock", "id", id))
    }

    async fn delete(&self, id: i64) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(String, bool)> =
            sqlx::query_as("SELECT power_state, degraded FROM locks WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((power_state, degraded)) = row else {
            return Err(StorageError::not_found("Lock", "id", id));
        };

        if degraded {
            return Err(StorageError::ReferentialIntegrity(format!(
                "Lock {id} is degraded and must be cleared first"
            )));
        }

        let (pending,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rearm_tasks WHERE lock_id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        if pending > 0 || power_state != "locked" {
            return Err(StorageError::ReferentialIntegrity(format!(
                "Lock {id} has a pending re-arm"
            )));
        }

        let (events,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM access_events WHERE lock_id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;

        if events > 0 {
            return Err(StorageError::ReferentialIntegrity(format!(
                "Lock {id} is referenced by {events} access events"
            )));
        }

        sqlx::query("DELETE FROM locks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(lock_id = id, "Lock deleted");
        Ok(())
    }

    async fn list(
        &self,
        filter: &LockFilter,
        scope: Scope,
        pagination: Pagination,
    ) -> StorageResult<Page<Lock>> {
        let mut conn = self.pool.acquire().await?;

        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM locks l");
        push_lock_filters(&mut count, filter, scope);
        let (total,): (i64,) = count.build_query_as::<(i64,)>().fetch_one(&mut *conn).await?;

        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM locks l",
            LOCK_COLUMNS
                .split(',')
                .map(|c| format!("l.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        ));
        push_lock_filters(&mut select, filter, scope);
        select
            .push(" ORDER BY l.name ASC, l.id ASC LIMIT ")
            .push_bind(i64::from(pagination.limit))
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let rows = select.build_query_as::<Lock>().fetch_all(&mut *conn).await?;

        let mut items = Vec::with_capacity(rows.len());
        for lock in rows {
            items.push(with_authorized_users(&mut conn, lock).await?);
        }

        Ok(Page::new(
            items,
            pagination,
            u64::try_from(total).unwrap_or(0),
        ))
    }

    async fn find_degraded(&self) -> StorageResult<Vec<Lock>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, Lock>(&format!(
            "SELECT {LOCK_COLUMNS} FROM locks WHERE degraded = 1 ORDER BY id"
        ))
        .fetch_all(&mut *conn)
        .await?;

        let mut locks = Vec::with_capacity(rows.len());
        for lock in rows {
            locks.push(with_authorized_users(&mut conn, lock).await?);
        }
        Ok(locks)
    }
}
