//! Shared fixtures for the access integration tests.

#![allow(dead_code)]

use chrono::{Months, NaiveDate, Utc};
use relaylock_access::{AccessOrchestrator, AccessRequest, RearmPolicy};
use relaylock_core::{DeviceId, LockCode, LockLookup, Role};
use relaylock_device::{DeviceGateway, SimulatedCloud, SimulatedCloudHandle};
use relaylock_storage::{
    Database, Lock, LockRepository, NewLock, NewUser, SqliteAccessEventRepository,
    SqliteLockRepository, SqliteRearmTaskRepository, SqliteUserRepository, User, UserRepository,
};
use std::time::Duration;

pub struct Harness {
    pub db: Database,
    pub orchestrator: AccessOrchestrator<SimulatedCloud>,
    pub cloud: SimulatedCloudHandle,
    pub users: SqliteUserRepository,
    pub locks: SqliteLockRepository,
    pub events: SqliteAccessEventRepository,
    pub tasks: SqliteRearmTaskRepository,
}

/// Retries fast enough for a test run
pub fn fast_policy() -> RearmPolicy {
    RearmPolicy::default()
        .with_max_attempts(3)
        .with_backoff(Duration::from_millis(10))
        .with_max_backoff(Duration::from_millis(40))
}

pub async fn harness() -> Harness {
    let db = Database::in_memory().await.unwrap();
    harness_on(db, fast_policy())
}

/// A fresh orchestrator over an existing database, as after a restart
pub fn harness_on(db: Database, policy: RearmPolicy) -> Harness {
    let (cloud, handle) = SimulatedCloud::new();
    let pool = db.pool().clone();

    Harness {
        orchestrator: AccessOrchestrator::new(db.clone(), DeviceGateway::new(cloud), policy),
        cloud: handle,
        users: SqliteUserRepository::new(pool.clone()),
        locks: SqliteLockRepository::new(pool.clone()),
        events: SqliteAccessEventRepository::new(pool.clone()),
        tasks: SqliteRearmTaskRepository::new(pool),
        db,
    }
}

pub fn adult_birth() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 6, 15).unwrap()
}

pub fn minor_birth() -> NaiveDate {
    Utc::now()
        .date_naive()
        .checked_sub_months(Months::new(10 * 12))
        .unwrap()
}

impl Harness {
    pub async fn user(&self, name: &str, role: Role) -> User {
        self.user_born(name, role, adult_birth()).await
    }

    pub async fn user_born(&self, name: &str, role: Role, birth: NaiveDate) -> User {
        self.users
            .create(
                &NewUser::new(name, format!("{}@example.com", name.to_lowercase()), birth)
                    .with_role(role)
                    .with_phone("+55 11 98888-0000"),
            )
            .await
            .unwrap()
    }

    pub async fn lock(&self, code: &str, owner: i64, delay_ms: i64) -> Lock {
        self.create_lock(new_lock(code, owner).with_rearm_delay_ms(delay_ms))
            .await
    }

    pub async fn create_lock(&self, lock: NewLock) -> Lock {
        self.locks.create(&lock).await.unwrap()
    }

    pub async fn reload(&self, lock_id: i64) -> Lock {
        self.locks.find_by_id(lock_id).await.unwrap().unwrap()
    }
}

pub fn new_lock(code: &str, owner: i64) -> NewLock {
    NewLock::new(
        format!("Porta {code}"),
        "Mercado Central",
        device(code),
        LockCode::new(code).unwrap(),
        owner,
    )
}

pub fn device(code: &str) -> DeviceId {
    DeviceId::new(&format!("plug-{}", code.to_lowercase())).unwrap()
}

pub fn by_code(user_id: i64, code: &str) -> AccessRequest {
    AccessRequest::new(user_id, LockLookup::Code(LockCode::new(code).unwrap()))
}
