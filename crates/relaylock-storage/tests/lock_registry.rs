//! Integration tests for the lock registry, state transactions and the
//! access event log.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use relaylock_core::{
    Connectivity, DeviceId, GeoPoint, LockCode, LockLookup, OperationalStatus, PowerState,
    QrToken, Role,
};
use relaylock_storage::models::{
    AccessEventFilter, LockFilter, LockUpdate, NewAccessEvent, NewLock, NewRearmTask, NewUser,
    Pagination, RearmTaskStatus, Scope, User,
};
use relaylock_storage::repositories::{
    AccessEventRepository, LockRepository, RearmTaskRepository, SqliteAccessEventRepository,
    SqliteLockRepository, SqliteRearmTaskRepository, SqliteUserRepository, UserRepository,
};
use relaylock_storage::{Database, StorageError, transaction};

struct Fixture {
    db: Database,
    users: SqliteUserRepository,
    locks: SqliteLockRepository,
    events: SqliteAccessEventRepository,
    tasks: SqliteRearmTaskRepository,
}

async fn fixture() -> Fixture {
    let db = Database::in_memory().await.unwrap();
    let pool = db.pool().clone();
    Fixture {
        users: SqliteUserRepository::new(pool.clone()),
        locks: SqliteLockRepository::new(pool.clone()),
        events: SqliteAccessEventRepository::new(pool.clone()),
        tasks: SqliteRearmTaskRepository::new(pool),
        db,
    }
}

fn birth() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 1, 1).unwrap()
}

async fn user(f: &Fixture, name: &str, role: Role) -> User {
    f.users
        .create(
            &NewUser::new(name, format!("{}@example.com", name.to_lowercase()), birth())
                .with_role(role)
                .with_phone("+55 11 90000-0000"),
        )
        .await
        .unwrap()
}

fn new_lock(name: &str, device: &str, code: &str, owner: i64) -> NewLock {
    NewLock::new(
        name,
        "Mercado Central",
        DeviceId::new(device).unwrap(),
        LockCode::new(code).unwrap(),
        owner,
    )
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
}

#[tokio::test]
async fn test_create_lock_defaults() {
    let f = fixture().await;
    let owner = user(&f, "Owner", Role::Market).await;

    let lock = f
        .locks
        .create(&new_lock("Porta 1", "plug-1", "mc1", owner.id))
        .await
        .unwrap();

    assert_eq!(lock.rearm_delay_ms, 30_000);
    assert_eq!(lock.power_state, PowerState::Locked);
    assert_eq!(lock.connectivity, Connectivity::Offline);
    assert_eq!(lock.operational_status, OperationalStatus::Active);
    assert!(!lock.degraded);
    assert_eq!(lock.version, 1);
    assert_eq!(lock.authorized_users, vec![owner.id]);
    assert!(uuid::Uuid::parse_str(lock.qr_token.as_str()).is_ok());
    assert_eq!(lock.code.as_str(), "MC1");
}

#[tokio::test]
async fn test_create_lock_rejects_negative_delay() {
    let f = fixture().await;
    let owner = user(&f, "Owner", Role::Market).await;

    let err = f
        .locks
        .create(&new_lock("Porta", "plug-1", "mc1", owner.id).with_rearm_delay_ms(-1))
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::Validation(_)));
}

#[tokio::test]
async fn test_lookup_by_code_and_qr_token() {
    let f = fixture().await;
    let owner = user(&f, "Owner", Role::Market).await;
    let token = QrToken::new("qr-porta-1").unwrap();

    let lock = f
        .locks
        .create(&new_lock("Porta 1", "plug-1", "MC1", owner.id).with_qr_token(token.clone()))
        .await
        .unwrap();

    let by_code = f
        .locks
        .find_by_lookup(&LockLookup::Code(LockCode::new("mc1").unwrap()))
        .await
        .unwrap()
        .unwrap();
    let by_token = f
        .locks
        .find_by_lookup(&LockLookup::QrToken(token))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(by_code.id, lock.id);
    assert_eq!(by_token.id, lock.id);

    let missing = f
        .locks
        .find_by_lookup(&LockLookup::Code(LockCode::new("nope").unwrap()))
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_admin_update_leaves_runtime_state() {
    let f = fixture().await;
    let owner = user(&f, "Owner", Role::Market).await;
    let lock = f
        .locks
        .create(&new_lock("Porta 1", "plug-1", "MC1", owner.id))
        .await
        .unwrap();

    let mut tx = f.db.pool().begin().await.unwrap();
    transaction::commit_unlock(&mut tx, lock.id).await.unwrap();
    tx.commit().await.unwrap();

    let update = LockUpdate {
        name: Some("Porta Principal".to_string()),
        rearm_delay_ms: Some(10_000),
        ..Default::default()
    };
    let updated = f
        .locks
        .update_admin_fields(lock.id, &update, lock.version)
        .await
        .unwrap();

    assert_eq!(updated.name, "Porta Principal");
    assert_eq!(updated.rearm_delay_ms, 10_000);
    assert_eq!(updated.version, lock.version + 1);
    assert_eq!(updated.power_state, PowerState::Unlocked);
    assert_eq!(updated.connectivity, Connectivity::Online);
}

#[tokio::test]
async fn test_admin_update_stale_version_conflicts() {
    let f = fixture().await;
    let owner = user(&f, "Owner", Role::Market).await;
    let lock = f
        .locks
        .create(&new_lock("Porta 1", "plug-1", "MC1", owner.id))
        .await
        .unwrap();

    let update = LockUpdate {
        age_restricted: Some(true),
        ..Default::default()
    };
    f.locks
        .update_admin_fields(lock.id, &update, lock.version)
        .await
        .unwrap();

    let err = f
        .locks
        .update_admin_fields(lock.id, &update, lock.version)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));

    let err = f
        .locks
        .update_admin_fields(9999, &update, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[tokio::test]
async fn test_set_authorized_users() {
    let f = fixture().await;
    let owner = user(&f, "Owner", Role::Market).await;
    let guest = user(&f, "Guest", Role::Common).await;
    let lock = f
        .locks
        .create(&new_lock("Porta 1", "plug-1", "MC1", owner.id))
        .await
        .unwrap();

    let updated = f
        .locks
        .set_authorized_users(lock.id, &[guest.id, owner.id, guest.id], lock.version)
        .await
        .unwrap();

    assert_eq!(updated.authorized_users, vec![owner.id, guest.id]);
    assert!(updated.is_authorized(guest.id));

    let err = f
        .locks
        .set_authorized_users(lock.id, &[owner.id], lock.version)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
}

#[tokio::test]
async fn test_unlock_relock_compare_and_set() {
    let f = fixture().await;
    let owner = user(&f, "Owner", Role::Market).await;
    let lock = f
        .locks
        .create(&new_lock("Porta 1", "plug-1", "MC1", owner.id))
        .await
        .unwrap();

    let mut tx = f.db.pool().begin().await.unwrap();
    transaction::commit_unlock(&mut tx, lock.id).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = f.db.pool().begin().await.unwrap();
    let err = transaction::commit_unlock(&mut tx, lock.id).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
    drop(tx);

    let mut tx = f.db.pool().begin().await.unwrap();
    transaction::commit_relock(&mut tx, lock.id).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = f.db.pool().begin().await.unwrap();
    let err = transaction::commit_relock(&mut tx, lock.id).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
    drop(tx);

    let current = f.locks.find_by_id(lock.id).await.unwrap().unwrap();
    assert_eq!(current.power_state, PowerState::Locked);
}

#[tokio::test]
async fn test_rearm_task_is_unique_per_lock() {
    let f = fixture().await;
    let owner = user(&f, "Owner", Role::Market).await;
    let lock = f
        .locks
        .create(&new_lock("Porta 1", "plug-1", "MC1", owner.id))
        .await
        .unwrap();

    let task = NewRearmTask {
        lock_id: lock.id,
        device_id: lock.device_id.clone(),
        deadline: at(30),
        delay_ms: 30_000,
    };

    let mut tx = f.db.pool().begin().await.unwrap();
    transaction::insert_rearm_task(&mut tx, &task).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = f.db.pool().begin().await.unwrap();
    let err = transaction::insert_rearm_task(&mut tx, &task).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
    drop(tx);

    let stored = f.tasks.find_by_lock(lock.id).await.unwrap().unwrap();
    assert_eq!(stored.deadline, at(30));
    assert_eq!(stored.attempts, 0);
    assert_eq!(stored.status, RearmTaskStatus::Pending);
}

#[tokio::test]
async fn test_degraded_lifecycle() {
    let f = fixture().await;
    let owner = user(&f, "Owner", Role::Market).await;
    let lock = f
        .locks
        .create(&new_lock("Porta 1", "plug-1", "MC1", owner.id))
        .await
        .unwrap();

    let mut tx = f.db.pool().begin().await.unwrap();
    transaction::commit_unlock(&mut tx, lock.id).await.unwrap();
    transaction::insert_rearm_task(
        &mut tx,
        &NewRearmTask {
            lock_id: lock.id,
            device_id: lock.device_id.clone(),
            deadline: at(0),
            delay_ms: 0,
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let mut tx = f.db.pool().begin().await.unwrap();
    transaction::record_rearm_attempt(&mut tx, lock.id, 3, Some("device offline"))
        .await
        .unwrap();
    transaction::mark_degraded(&mut tx, lock.id, "device offline")
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let degraded = f.locks.find_by_id(lock.id).await.unwrap().unwrap();
    assert!(degraded.degraded);
    assert_eq!(degraded.power_state, PowerState::Unlocked);
    assert_eq!(degraded.connectivity, Connectivity::Offline);
    assert_eq!(f.locks.find_degraded().await.unwrap().len(), 1);

    let task = f.tasks.find_by_lock(lock.id).await.unwrap().unwrap();
    assert!(task.is_failed());
    assert_eq!(task.attempts, 3);
    assert!(f.tasks.find_pending().await.unwrap().is_empty());

    // Probes do not flip a degraded lock back online.
    let mut tx = f.db.pool().begin().await.unwrap();
    transaction::record_connectivity(&mut tx, lock.id, Connectivity::Online)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    let still = f.locks.find_by_id(lock.id).await.unwrap().unwrap();
    assert_eq!(still.connectivity, Connectivity::Offline);

    let err = f.locks.delete(lock.id).await.unwrap_err();
    assert!(matches!(err, StorageError::ReferentialIntegrity(_)));

    let mut tx = f.db.pool().begin().await.unwrap();
    transaction::clear_degraded(&mut tx, lock.id).await.unwrap();
    tx.commit().await.unwrap();

    let cleared = f.locks.find_by_id(lock.id).await.unwrap().unwrap();
    assert!(!cleared.degraded);
    assert_eq!(cleared.power_state, PowerState::Locked);
    assert_eq!(cleared.connectivity, Connectivity::Online);
    assert!(f.tasks.find_by_lock(lock.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_open_degraded_from_closed_row() {
    let f = fixture().await;
    let owner = user(&f, "Owner", Role::Market).await;
    let lock = f
        .locks
        .create(&new_lock("Porta 1", "plug-1", "MC1", owner.id))
        .await
        .unwrap();
    let task = NewRearmTask {
        lock_id: lock.id,
        device_id: lock.device_id.clone(),
        deadline: at(30),
        delay_ms: 30_000,
    };

    // The row still reads locked: the unlock itself was never committed.
    let mut tx = f.db.pool().begin().await.unwrap();
    transaction::mark_open_degraded(&mut tx, &task, "device offline")
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let open = f.locks.find_by_id(lock.id).await.unwrap().unwrap();
    assert!(open.degraded);
    assert_eq!(open.power_state, PowerState::Unlocked);
    assert_eq!(open.connectivity, Connectivity::Offline);

    let stored = f.tasks.find_by_lock(lock.id).await.unwrap().unwrap();
    assert!(stored.is_failed());
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.last_error.as_deref(), Some("device offline"));

    let mut tx = f.db.pool().begin().await.unwrap();
    let err = transaction::mark_open_degraded(&mut tx, &task, "again")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict(_)));
    drop(tx);

    let mut tx = f.db.pool().begin().await.unwrap();
    transaction::clear_degraded(&mut tx, lock.id).await.unwrap();
    tx.commit().await.unwrap();
    assert!(f.tasks.find_by_lock(lock.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_rules() {
    let f = fixture().await;
    let owner = user(&f, "Owner", Role::Market).await;
    let busy = f
        .locks
        .create(&new_lock("Porta 1", "plug-1", "MC1", owner.id))
        .await
        .unwrap();
    let idle = f
        .locks
        .create(&new_lock("Porta 2", "plug-2", "MC2", owner.id))
        .await
        .unwrap();

    let mut tx = f.db.pool().begin().await.unwrap();
    transaction::commit_unlock(&mut tx, busy.id).await.unwrap();
    transaction::insert_rearm_task(
        &mut tx,
        &NewRearmTask {
            lock_id: busy.id,
            device_id: busy.device_id.clone(),
            deadline: at(30),
            delay_ms: 30_000,
        },
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    let err = f.locks.delete(busy.id).await.unwrap_err();
    assert!(matches!(err, StorageError::ReferentialIntegrity(_)));

    f.locks.delete(idle.id).await.unwrap();
    assert!(f.locks.find_by_id(idle.id).await.unwrap().is_none());

    let err = f.locks.delete(idle.id).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[tokio::test]
async fn test_list_locks_filters_and_scope() {
    let f = fixture().await;
    let admin = user(&f, "Admin", Role::Admin).await;
    let market = user(&f, "Market", Role::Market).await;

    f.locks
        .create(&new_lock("Porta A", "plug-a", "PA1", admin.id))
        .await
        .unwrap();
    f.locks
        .create(
            &NewLock::new(
                "Porta B",
                "Padaria Sul",
                DeviceId::new("plug-b").unwrap(),
                LockCode::new("PB1").unwrap(),
                market.id,
            )
            .with_status(OperationalStatus::Inactive),
        )
        .await
        .unwrap();

    let all = f
        .locks
        .list(&LockFilter::default(), Scope::Unrestricted, Pagination::default())
        .await
        .unwrap();
    assert_eq!(all.total_results, 2);

    let scoped = f
        .locks
        .list(
            &LockFilter::default(),
            Scope::AuthorizedLocks(market.id),
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(scoped.total_results, 1);
    assert_eq!(scoped.items[0].name, "Porta B");

    let by_market = f
        .locks
        .list(
            &LockFilter {
                market_name: Some("central".to_string()),
                ..Default::default()
            },
            Scope::Unrestricted,
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(by_market.total_results, 1);
    assert_eq!(by_market.items[0].name, "Porta A");

    let inactive = f
        .locks
        .list(
            &LockFilter {
                operational_status: Some(OperationalStatus::Inactive),
                device_id: Some("plug-b".to_string()),
                ..Default::default()
            },
            Scope::Unrestricted,
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(inactive.total_results, 1);
}

#[tokio::test]
async fn test_access_events_are_immutable() {
    let f = fixture().await;
    let owner = user(&f, "Owner", Role::Market).await;
    let lock = f
        .locks
        .create(&new_lock("Porta 1", "plug-1", "MC1", owner.id))
        .await
        .unwrap();

    let event = f
        .events
        .append(
            &NewAccessEvent::new(owner.id, lock.id, at(0))
                .with_geo(Some(GeoPoint::new(-23.55, -46.63).unwrap()))
                .with_photo_ref(Some("photos/1.jpg".to_string())),
        )
        .await
        .unwrap();

    assert_eq!(event.occurred_at, at(0));
    assert_eq!(event.geo().unwrap().lat, -23.55);

    let update = sqlx::query("UPDATE access_events SET photo_ref = NULL WHERE id = ?")
        .bind(event.id)
        .execute(f.db.pool())
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM access_events WHERE id = ?")
        .bind(event.id)
        .execute(f.db.pool())
        .await;
    assert!(delete.is_err());

    assert_eq!(f.events.count_for_lock(lock.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_event_query_order_filters_and_scope() {
    let f = fixture().await;
    let market = user(&f, "Market", Role::Market).await;
    let maria = user(&f, "Maria", Role::Common).await;
    let joao = user(&f, "Joao", Role::Common).await;
    let other_owner = user(&f, "Other", Role::Market).await;

    let own_lock = f
        .locks
        .create(&new_lock("Porta Mercado", "plug-1", "MC1", market.id))
        .await
        .unwrap();
    let foreign_lock = f
        .locks
        .create(&new_lock("Porta Padaria", "plug-2", "PD1", other_owner.id))
        .await
        .unwrap();

    // Two events share a timestamp to exercise the id tiebreak.
    let e1 = f
        .events
        .append(&NewAccessEvent::new(maria.id, own_lock.id, at(10)))
        .await
        .unwrap();
    let e2 = f
        .events
        .append(&NewAccessEvent::new(joao.id, own_lock.id, at(10)))
        .await
        .unwrap();
    let e3 = f
        .events
        .append(&NewAccessEvent::new(maria.id, foreign_lock.id, at(20)))
        .await
        .unwrap();
    let e4 = f
        .events
        .append(&NewAccessEvent::new(joao.id, own_lock.id, at(5)))
        .await
        .unwrap();

    let all = f
        .events
        .query(
            &AccessEventFilter::default(),
            Scope::Unrestricted,
            Pagination::new(1, 10),
        )
        .await
        .unwrap();
    let ids: Vec<i64> = all.items.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![e3.id, e1.id, e2.id, e4.id]);
    assert_eq!(all.items[0].lock_name, "Porta Padaria");
    assert_eq!(all.items[0].user_name, "Maria");

    // Pagination keeps the same order across pages.
    let first = f
        .events
        .query(&AccessEventFilter::default(), Scope::Unrestricted, Pagination::new(1, 2))
        .await
        .unwrap();
    let second = f
        .events
        .query(&AccessEventFilter::default(), Scope::Unrestricted, Pagination::new(2, 2))
        .await
        .unwrap();
    assert_eq!(first.items.iter().map(|e| e.id).collect::<Vec<_>>(), vec![e3.id, e1.id]);
    assert_eq!(second.items.iter().map(|e| e.id).collect::<Vec<_>>(), vec![e2.id, e4.id]);
    assert!(first.has_next_page);
    assert!(!first.has_previous_page);
    assert!(!second.has_next_page);
    assert!(second.has_previous_page);
    assert_eq!(second.total_pages, 2);

    let by_name = f
        .events
        .query(
            &AccessEventFilter {
                user_name: Some("mar".to_string()),
                lock_name: Some("mercado".to_string()),
                ..Default::default()
            },
            Scope::Unrestricted,
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(by_name.total_results, 1);
    assert_eq!(by_name.items[0].id, e1.id);

    let by_email = f
        .events
        .query(
            &AccessEventFilter {
                user_email: Some("JOAO@".to_string()),
                ..Default::default()
            },
            Scope::Unrestricted,
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(by_email.total_results, 2);

    let market_scope = f
        .events
        .query(
            &AccessEventFilter::default(),
            Scope::AuthorizedLocks(market.id),
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(market_scope.total_results, 3);
    assert!(market_scope.items.iter().all(|e| e.lock_id == own_lock.id));

    let own_events = f
        .events
        .query(
            &AccessEventFilter::default(),
            Scope::OwnEvents(maria.id),
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(own_events.total_results, 2);

    let found = f.events.find_by_id(e4.id).await.unwrap().unwrap();
    assert_eq!(found.user_email, "joao@example.com");
    assert_eq!(found.occurred_at, at(10) - Duration::seconds(5));
}
