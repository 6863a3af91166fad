//! Transaction-scoped writes of lock runtime state.
//!
//! Every function here takes an open SQLite transaction so a state change,
//! the access event it produces and the re-arm record it implies commit
//! together or not at all. These are the only writers of `power_state`,
//! `connectivity` and `degraded`.
//!
//! # Compare-and-set
//!
//! State updates name the state they expect to leave
//! (`WHERE power_state = 'locked'` for an unlock, and so on). When the row is
//! not in that state the update touches nothing and the function returns
//! [`StorageError::Conflict`], so a stale writer can never overwrite a newer
//! transition.
//!
//! # Usage Pattern
//!
//! ```no_run
//! use relaylock_storage::{Database, transaction};
//! use relaylock_storage::models::{NewAccessEvent, NewRearmTask};
//! use relaylock_core::DeviceId;
//! use chrono::{Duration, Utc};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::in_memory().await?;
//! let now = Utc::now();
//!
//! let mut tx = db.pool().begin().await?;
//! transaction::commit_unlock(&mut tx, 1).await?;
//! transaction::insert_access_event(&mut tx, &NewAccessEvent::new(7, 1, now)).await?;
//! transaction::insert_rearm_task(
//!     &mut tx,
//!     &NewRearmTask {
//!         lock_id: 1,
//!         device_id: DeviceId::new("plug-1")?,
//!         deadline: now + Duration::seconds(30),
//!         delay_ms: 30_000,
//!     },
//! )
//! .await?;
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{StorageError, StorageResult};
use crate::models::{AccessEvent, NewAccessEvent, NewRearmTask};
use relaylock_core::Connectivity;
use sqlx::{Sqlite, Transaction};

/// Turn a zero-row compare-and-set into NotFound or Conflict
async fn cas_failure(
    tx: &mut Transaction<'_, Sqlite>,
    lock_id: i64,
    expected: &str,
) -> StorageError {
    let row: Result<Option<(String, bool)>, sqlx::Error> =
        sqlx::query_as("SELECT power_state, degraded FROM locks WHERE id = ?")
            .bind(lock_id)
            .fetch_optional(&mut **tx)
            .await;

    match row {
        Ok(Some((power_state, degraded))) => StorageError::Conflict(format!(
            "Lock {lock_id} expected {expected}, found power_state={power_state} degraded={degraded}"
        )),
        Ok(None) => StorageError::not_found("Lock", "id", lock_id),
        Err(e) => e.into(),
    }
}

/// Record a confirmed unlock: `locked -> unlocked`, device online
///
/// # Errors
///
/// Returns `StorageError::Conflict` if the lock is not locked or is degraded.
pub async fn commit_unlock(tx: &mut Transaction<'_, Sqlite>, lock_id: i64) -> StorageResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE locks
        SET power_state = 'unlocked', connectivity = 'online', updated_at = datetime('now')
        WHERE id = ? AND power_state = 'locked' AND degraded = 0
        "#,
    )
    .bind(lock_id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(cas_failure(tx, lock_id, "locked and not degraded").await);
    }

    Ok(())
}

/// Record a confirmed relock: `unlocked -> locked`, device online
///
/// # Errors
///
/// Returns `StorageError::Conflict` if the lock is not unlocked.
pub async fn commit_relock(tx: &mut Transaction<'_, Sqlite>, lock_id: i64) -> StorageResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE locks
        SET power_state = 'locked', connectivity = 'online', updated_at = datetime('now')
        WHERE id = ? AND power_state = 'unlocked' AND degraded = 0
        "#,
    )
    .bind(lock_id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(cas_failure(tx, lock_id, "unlocked and not degraded").await);
    }

    Ok(())
}

/// Mark a lock degraded after re-arm retries ran out
///
/// The lock stays `unlocked`, connectivity becomes `offline`, and the re-arm
/// record is kept with status `failed`.
///
/// # Errors
///
/// Returns `StorageError::Conflict` if the lock is not unlocked.
pub async fn mark_degraded(
    tx: &mut Transaction<'_, Sqlite>,
    lock_id: i64,
    reason: &str,
) -> StorageResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE locks
        SET connectivity = 'offline', degraded = 1, updated_at = datetime('now')
        WHERE id = ? AND power_state = 'unlocked'
        "#,
    )
    .bind(lock_id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(cas_failure(tx, lock_id, "unlocked").await);
    }

    sqlx::query(
        r#"
        UPDATE rearm_tasks
        SET status = 'failed', last_error = ?, updated_at = datetime('now')
        WHERE lock_id = ?
        "#,
    )
    .bind(reason)
    .bind(lock_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Record an unlock the device confirmed but that could not be committed,
/// after the compensating relock failed too
///
/// The lock becomes `unlocked`, `offline` and degraded in one step, and the
/// re-arm record is stored (or overwritten) with status `failed`.
///
/// # Errors
///
/// Returns `StorageError::Conflict` if the lock is already degraded.
pub async fn mark_open_degraded(
    tx: &mut Transaction<'_, Sqlite>,
    task: &NewRearmTask,
    reason: &str,
) -> StorageResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE locks
        SET power_state = 'unlocked', connectivity = 'offline', degraded = 1,
            updated_at = datetime('now')
        WHERE id = ? AND degraded = 0
        "#,
    )
    .bind(task.lock_id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(cas_failure(tx, task.lock_id, "not degraded").await);
    }

    sqlx::query(
        r#"
        INSERT INTO rearm_tasks (lock_id, device_id, deadline, delay_ms, attempts, status, last_error)
        VALUES (?, ?, ?, ?, 1, 'failed', ?)
        ON CONFLICT(lock_id) DO UPDATE SET
            attempts = excluded.attempts,
            status = 'failed',
            last_error = excluded.last_error,
            updated_at = datetime('now')
        "#,
    )
    .bind(task.lock_id)
    .bind(task.device_id.as_str())
    .bind(task.deadline)
    .bind(task.delay_ms)
    .bind(reason)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Clear the degraded marker after a confirmed manual relock
///
/// Sets `locked`/`online`, clears the marker and drops the re-arm record.
///
/// # Errors
///
/// Returns `StorageError::Conflict` if the lock is not degraded.
pub async fn clear_degraded(tx: &mut Transaction<'_, Sqlite>, lock_id: i64) -> StorageResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE locks
        SET power_state = 'locked', connectivity = 'online', degraded = 0,
            updated_at = datetime('now')
        WHERE id = ? AND degraded = 1
        "#,
    )
    .bind(lock_id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(cas_failure(tx, lock_id, "degraded").await);
    }

    delete_rearm_task(tx, lock_id).await
}

/// Record the outcome of a connectivity probe
///
/// Degraded locks keep `offline` until cleared.
pub async fn record_connectivity(
    tx: &mut Transaction<'_, Sqlite>,
    lock_id: i64,
    connectivity: Connectivity,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        UPDATE locks
        SET connectivity = ?, updated_at = datetime('now')
        WHERE id = ? AND degraded = 0
        "#,
    )
    .bind(connectivity.as_str())
    .bind(lock_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Append an access event
///
/// # Errors
///
/// Returns a database error if the user or lock does not exist.
pub async fn insert_access_event(
    tx: &mut Transaction<'_, Sqlite>,
    event: &NewAccessEvent,
) -> StorageResult<AccessEvent> {
    let (lat, long) = match event.geo {
        Some(geo) => (Some(geo.lat), Some(geo.long)),
        None => (None, None),
    };

    let result = sqlx::query(
        r#"
        INSERT INTO access_events (user_id, lock_id, occurred_at, lat, long, photo_ref)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.user_id)
    .bind(event.lock_id)
    .bind(event.occurred_at)
    .bind(lat)
    .bind(long)
    .bind(&event.photo_ref)
    .execute(&mut **tx)
    .await?;

    let id = result.last_insert_rowid();

    let created = sqlx::query_as::<_, AccessEvent>(
        r#"
        SELECT id, user_id, lock_id, occurred_at, lat, long, photo_ref, created_at
        FROM access_events
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(created)
}

/// Persist a re-arm record
///
/// # Errors
///
/// Returns `StorageError::Conflict` if the lock already has one.
pub async fn insert_rearm_task(
    tx: &mut Transaction<'_, Sqlite>,
    task: &NewRearmTask,
) -> StorageResult<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO rearm_tasks (lock_id, device_id, deadline, delay_ms)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(task.lock_id)
    .bind(task.device_id.as_str())
    .bind(task.deadline)
    .bind(task.delay_ms)
    .execute(&mut **tx)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) => {
            let err = StorageError::from(e);
            if err.is_unique_violation() {
                Err(StorageError::Conflict(format!(
                    "Lock {} already has a pending re-arm",
                    task.lock_id
                )))
            } else {
                Err(err)
            }
        }
    }
}

/// Record a re-arm attempt and its error, if any
pub async fn record_rearm_attempt(
    tx: &mut Transaction<'_, Sqlite>,
    lock_id: i64,
    attempts: u32,
    last_error: Option<&str>,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        UPDATE rearm_tasks
        SET attempts = ?, last_error = ?, updated_at = datetime('now')
        WHERE lock_id = ?
        "#,
    )
    .bind(i64::from(attempts))
    .bind(last_error)
    .bind(lock_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Remove the re-arm record of a lock
pub async fn delete_rearm_task(
    tx: &mut Transaction<'_, Sqlite>,
    lock_id: i64,
) -> StorageResult<()> {
    sqlx::query("DELETE FROM rearm_tasks WHERE lock_id = ?")
        .bind(lock_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
