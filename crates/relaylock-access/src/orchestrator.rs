//! Access orchestrator.
//!
//! Runs the end-to-end access flow and is the only writer of lock runtime
//! state outside the re-arm scheduler.
//!
//! # Flow
//!
//! 1. Resolve the lock by code or QR token
//! 2. Resolve the user
//! 3. Take the lock's single-flight lease
//! 4. Evaluate eligibility
//! 5. Probe and send the unlock command
//! 6. In one transaction: commit `unlocked/online`, append the access event,
//!    persist the re-arm record
//! 7. Hand the lease to the scheduler
//!
//! Any failure up to step 5 leaves no trace: no event, no re-arm record, no
//! state change, and the lease is released. If step 6 fails after the
//! device already opened, the lock is re-armed on the spot; when that
//! relock fails too, the open lock is stored as degraded.

use crate::audit::AccessAuditLog;
use crate::eligibility::{AccessEligibilityEvaluator, Eligibility};
use crate::error::{AccessError, Result};
use crate::guard::{FlightLease, FlightStatus, SingleFlight};
use crate::scheduler::{ReArmScheduler, RearmPolicy};
use crate::state_machine::LockState;
use chrono::{DateTime, TimeDelta, Utc};
use relaylock_core::{Connectivity, DeviceId, Error, GeoPoint, LockLookup, PowerState};
use relaylock_device::{DeviceCloud, DeviceGateway, ProbeReport};
use relaylock_storage::{
    AccessEvent, Database, Lock, LockRepository, NewAccessEvent, NewRearmTask,
    RearmTaskRepository, SqliteLockRepository, SqliteRearmTaskRepository, SqliteUserRepository,
    StorageError, UserRepository, transaction,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// An access attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub user_id: i64,
    pub lookup: LockLookup,
    pub geo: Option<GeoPoint>,
    pub photo_ref: Option<String>,
}

impl AccessRequest {
    pub fn new(user_id: i64, lookup: LockLookup) -> Self {
        Self {
            user_id,
            lookup,
            geo: None,
            photo_ref: None,
        }
    }

    pub fn with_geo(mut self, geo: GeoPoint) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_photo_ref(mut self, photo_ref: impl Into<String>) -> Self {
        self.photo_ref = Some(photo_ref.into());
        self
    }
}

/// A granted access
#[derive(Debug, Clone, PartialEq)]
pub struct AccessGrant {
    /// The recorded access event
    pub event: AccessEvent,
    pub lock_id: i64,
    pub device_id: DeviceId,
    /// How long the lock stays open
    pub unlock_window: Duration,
    /// When the re-arm is due
    pub relock_at: DateTime<Utc>,
}

/// What a start-up recovery pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Locks whose re-arm was scheduled again
    pub rescheduled: Vec<i64>,
    /// Locks found degraded and held
    pub degraded: Vec<i64>,
    /// Records that could not be resumed
    pub skipped: Vec<i64>,
}

/// Coordinates eligibility, device, state, audit and re-arm
pub struct AccessOrchestrator<C> {
    db: Database,
    users: SqliteUserRepository,
    locks: SqliteLockRepository,
    tasks: SqliteRearmTaskRepository,
    audit: AccessAuditLog,
    gateway: Arc<DeviceGateway<C>>,
    guard: SingleFlight,
    scheduler: ReArmScheduler<C>,
}

impl<C: DeviceCloud> AccessOrchestrator<C> {
    pub fn new(db: Database, gateway: DeviceGateway<C>, policy: RearmPolicy) -> Self {
        let pool = db.pool().clone();
        let gateway = Arc::new(gateway);

        Self {
            users: SqliteUserRepository::new(pool.clone()),
            locks: SqliteLockRepository::new(pool.clone()),
            tasks: SqliteRearmTaskRepository::new(pool),
            audit: AccessAuditLog::new(&db),
            scheduler: ReArmScheduler::new(Arc::clone(&gateway), db.clone(), policy),
            guard: SingleFlight::new(),
            gateway,
            db,
        }
    }

    pub fn audit(&self) -> &AccessAuditLog {
        &self.audit
    }

    pub fn guard(&self) -> &SingleFlight {
        &self.guard
    }

    pub fn scheduler(&self) -> &ReArmScheduler<C> {
        &self.scheduler
    }

    pub fn gateway(&self) -> &DeviceGateway<C> {
        &self.gateway
    }

    /// Grant access to a lock, opening it for its re-arm delay.
    ///
    /// # Errors
    ///
    /// Returns the failing step's [`AccessError`]; see the module docs.
    pub async fn request_access(&self, request: AccessRequest) -> Result<AccessGrant> {
        let lock = self
            .locks
            .find_by_lookup(&request.lookup)
            .await?
            .ok_or_else(|| AccessError::lock_not_found(&request.lookup))?;

        let user = self
            .users
            .find_by_id(request.user_id)
            .await?
            .ok_or(AccessError::UserNotFound {
                user_id: request.user_id,
            })?;

        if lock.degraded {
            return Err(AccessError::RearmFailedDegraded { lock_id: lock.id });
        }

        let mut lease = self.guard.try_acquire(lock.id)?;

        // Read again under the lease; the first read may predate a re-arm.
        let lock = self.reload(lock.id).await?;
        if lock.degraded {
            lease.into_degraded();
            return Err(AccessError::RearmFailedDegraded { lock_id: lock.id });
        }
        if lock.power_state == PowerState::Unlocked {
            warn!(lock_id = lock.id, "Lock is open without a running re-arm");
            return Err(AccessError::ConcurrentAccessInProgress { lock_id: lock.id });
        }
        lease.restore(&lock);

        let today = Utc::now().date_naive();
        if let Eligibility::Deny(reason) = AccessEligibilityEvaluator::evaluate(&user, &lock, today)
        {
            info!(
                lock_id = lock.id,
                user_id = user.id,
                reason = reason.code(),
                "Access denied"
            );
            return Err(reason.into());
        }

        let unlock_window = lock.rearm_delay();
        let window_delta = TimeDelta::from_std(unlock_window)
            .ok()
            .filter(|delta| Utc::now().checked_add_signed(*delta).is_some())
            .ok_or(Error::InvalidRearmDelay(lock.rearm_delay_ms))?;

        lease.machine_mut().begin_unlock()?;
        let report = self.gateway.dispatch(&lock.device_id, false).await;

        if !report.success {
            lease.machine_mut().abort_unlock(report.reachable)?;
            if report.is_offline() {
                self.record_connectivity(lock.id, Connectivity::Offline).await;
                return Err(AccessError::DeviceOffline {
                    device_id: lock.device_id.clone(),
                });
            }
            return Err(AccessError::DeviceCommandFailed {
                device_id: lock.device_id.clone(),
            });
        }
        lease.machine_mut().confirm_unlock()?;

        let granted_at = Utc::now();
        let relock_at = granted_at
            .checked_add_signed(window_delta)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let event = NewAccessEvent {
            user_id: user.id,
            lock_id: lock.id,
            occurred_at: granted_at,
            geo: request.geo,
            photo_ref: request.photo_ref,
        };
        let task = NewRearmTask {
            lock_id: lock.id,
            device_id: lock.device_id.clone(),
            deadline: relock_at,
            delay_ms: lock.rearm_delay_ms,
        };

        let event = match self.commit_grant(&event, &task).await {
            Ok(event) => event,
            Err(e) => {
                error!(lock_id = lock.id, error = %e, "Unlock confirmed but not recorded");
                self.compensate(lease, &task, &e).await;
                return Err(e);
            }
        };

        info!(
            lock_id = lock.id,
            user_id = user.id,
            event_id = event.id,
            window_ms = lock.rearm_delay_ms,
            "Access granted"
        );

        self.scheduler
            .schedule(lease, lock.device_id.clone(), unlock_window);

        Ok(AccessGrant {
            event,
            lock_id: lock.id,
            device_id: lock.device_id,
            unlock_window,
            relock_at,
        })
    }

    /// Resume persisted re-arms and hold degraded locks after a restart.
    ///
    /// Records past their deadline fire immediately.
    pub async fn recover_pending(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for lock in self.locks.find_degraded().await? {
            self.guard.install_degraded(lock.id);
            report.degraded.push(lock.id);
        }

        let now = Utc::now();
        for task in self.tasks.find_pending().await? {
            let Some(lock) = self.locks.find_by_id(task.lock_id).await? else {
                report.skipped.push(task.lock_id);
                continue;
            };

            let mut lease = match self.guard.try_acquire(lock.id) {
                Ok(lease) => lease,
                Err(e) => {
                    warn!(lock_id = lock.id, error = %e, "Re-arm already owned, not resuming");
                    report.skipped.push(lock.id);
                    continue;
                }
            };
            lease.restore(&lock);

            if lease.machine().current_state() != LockState::Unlocked {
                warn!(lock_id = lock.id, "Re-arm record for a closed lock, discarding");
                self.discard_task(lock.id).await?;
                report.skipped.push(lock.id);
                continue;
            }

            let remaining = task.remaining(now);
            info!(
                lock_id = lock.id,
                remaining_ms = remaining.as_millis() as u64,
                previous_attempts = task.attempts,
                "Resuming pending re-arm"
            );
            self.scheduler.schedule(lease, task.device_id, remaining);
            report.rescheduled.push(lock.id);
        }

        Ok(report)
    }

    /// Manually re-arm a degraded lock and clear its marker.
    ///
    /// Accepts a lock flagged degraded in storage, or one held degraded in
    /// this process whose marker could not be written. The marker is cleared
    /// only once the device confirms the relock; on any failure the lock
    /// stays degraded and held.
    pub async fn clear_degraded(&self, lock_id: i64) -> Result<Lock> {
        let lock = self.reload(lock_id).await?;
        let held_degraded = self.guard.status(lock_id) == Some(FlightStatus::Degraded);
        if !lock.degraded && !held_degraded {
            return Err(AccessError::NotDegraded { lock_id });
        }

        let mut lease = self.guard.acquire_degraded(lock_id)?;
        if lock.degraded {
            lease.restore(&lock);
        } else {
            lease.restore_open_degraded();
        }

        match self.relock_degraded(&mut lease, &lock).await {
            Ok(()) => {
                lease.release();
                info!(lock_id, device_id = %lock.device_id, "Degraded marker cleared");
                self.reload(lock_id).await
            }
            Err(e) => {
                warn!(lock_id, error = %e, "Manual re-arm failed, lock stays degraded");
                lease.into_degraded();
                Err(e)
            }
        }
    }

    /// Probe a lock's device and record its connectivity
    pub async fn refresh_connectivity(&self, lock_id: i64) -> Result<ProbeReport> {
        let lock = self.reload(lock_id).await?;
        let report = self.gateway.probe(&lock.device_id).await;

        let connectivity = if report.online {
            Connectivity::Online
        } else {
            Connectivity::Offline
        };
        self.record_connectivity(lock_id, connectivity).await;

        Ok(report)
    }

    async fn reload(&self, lock_id: i64) -> Result<Lock> {
        self.locks
            .find_by_id(lock_id)
            .await?
            .ok_or_else(|| AccessError::lock_not_found(format!("id={lock_id}")))
    }

    async fn commit_grant(&self, event: &NewAccessEvent, task: &NewRearmTask) -> Result<AccessEvent> {
        let mut tx = self.db.pool().begin().await.map_err(StorageError::from)?;
        transaction::commit_unlock(&mut tx, event.lock_id).await?;
        let created = self.audit.record(&mut tx, event).await?;
        transaction::insert_rearm_task(&mut tx, task).await?;
        tx.commit().await.map_err(StorageError::from)?;
        Ok(created)
    }

    async fn relock_degraded(&self, lease: &mut FlightLease, lock: &Lock) -> Result<()> {
        lease.machine_mut().begin_relock()?;
        let report = self.gateway.dispatch(&lock.device_id, true).await;

        if !report.success {
            lease.machine_mut().relock_failed(report.reachable)?;
            lease.machine_mut().mark_degraded()?;
            return Err(if report.is_offline() {
                AccessError::DeviceOffline {
                    device_id: lock.device_id.clone(),
                }
            } else {
                AccessError::DeviceCommandFailed {
                    device_id: lock.device_id.clone(),
                }
            });
        }

        let mut tx = self.db.pool().begin().await.map_err(StorageError::from)?;
        if lock.degraded {
            transaction::clear_degraded(&mut tx, lock.id).await?;
        } else {
            // Marker only lived in memory; the row already reads locked.
            transaction::record_connectivity(&mut tx, lock.id, Connectivity::Online).await?;
            transaction::delete_rearm_task(&mut tx, lock.id).await?;
        }
        tx.commit().await.map_err(StorageError::from)?;

        lease.machine_mut().confirm_relock()?;
        Ok(())
    }

    /// Close a lock whose unlock could not be recorded.
    ///
    /// If the relock fails too, the open lock is persisted as degraded. When
    /// even that write fails the lease is still held degraded, and
    /// [`clear_degraded`](Self::clear_degraded) accepts the held slot.
    async fn compensate(&self, mut lease: FlightLease, task: &NewRearmTask, cause: &AccessError) {
        let lock_id = lease.lock_id();
        let device_id = &task.device_id;

        if lease.machine_mut().begin_relock().is_ok() {
            let report = self.gateway.dispatch(device_id, true).await;
            if report.success {
                if let Err(e) = lease.machine_mut().confirm_relock() {
                    warn!(lock_id, error = %e, "State machine out of step after re-arm");
                }
                info!(lock_id, "Unrecorded unlock re-armed");
                lease.release();
                return;
            }
            if let Err(e) = lease.machine_mut().relock_failed(report.reachable) {
                warn!(lock_id, error = %e, "State machine out of step after re-arm");
            }
        }

        if let Err(e) = lease.machine_mut().mark_degraded() {
            warn!(lock_id, error = %e, "State machine refused degraded marker");
        }

        let reason = format!("unlock not recorded ({}), relock failed", cause.code());
        let persisted = async {
            let mut tx = self.db.pool().begin().await?;
            transaction::mark_open_degraded(&mut tx, task, &reason).await?;
            tx.commit().await?;
            Ok::<(), StorageError>(())
        }
        .await;

        match persisted {
            Ok(()) => error!(
                alert = "rearm_degraded",
                lock_id,
                device_id = %device_id,
                "Unrecorded unlock could not be re-armed, lock left open"
            ),
            Err(e) => error!(
                alert = "rearm_degraded",
                lock_id,
                device_id = %device_id,
                error = %e,
                "Unrecorded unlock could not be re-armed and degraded marker not stored, lock left open"
            ),
        }
        lease.into_degraded();
    }

    async fn record_connectivity(&self, lock_id: i64, connectivity: Connectivity) {
        let result = async {
            let mut tx = self.db.pool().begin().await?;
            transaction::record_connectivity(&mut tx, lock_id, connectivity).await?;
            tx.commit().await?;
            Ok::<(), StorageError>(())
        }
        .await;

        if let Err(e) = result {
            warn!(lock_id, error = %e, "Failed to record connectivity");
        }
    }

    async fn discard_task(&self, lock_id: i64) -> Result<()> {
        let mut tx = self.db.pool().begin().await.map_err(StorageError::from)?;
        transaction::delete_rearm_task(&mut tx, lock_id).await?;
        tx.commit().await.map_err(StorageError::from)?;
        Ok(())
    }
}
