//! Re-arm scheduler.
//!
//! Fires the relock command for an unlocked lock once its delay has elapsed.
//! Each scheduled re-arm runs in its own Tokio task, detached from the
//! request that opened the lock, and owns that lock's [`FlightLease`] until
//! the cycle ends.
//!
//! # Flow
//!
//! ```text
//! schedule(lease, device, delay)
//!     └─> sleep(delay)
//!         └─> dispatch(device, energize = true)
//!             ├─ confirmed ──> commit locked + drop record ──> release lease
//!             └─ failed ─────> record attempt ──> backoff ──> retry
//!                              └─ attempts exhausted ──> mark degraded,
//!                                 keep lease held, raise alert
//! ```
//!
//! The durable record of a re-arm is written by the orchestrator in the
//! same transaction as the unlock. The scheduler only updates it (attempt
//! counts, failure status) and deletes it on success.
//!
//! # Alerts
//!
//! A degraded re-arm logs at `error` level with `alert = "rearm_degraded"`
//! and publishes [`RearmEvent::Degraded`] to every subscriber.

use crate::guard::FlightLease;
use relaylock_core::{
    DeviceId,
    constants::{DEFAULT_REARM_BACKOFF_MS, DEFAULT_REARM_MAX_ATTEMPTS, MAX_REARM_BACKOFF_MS},
};
use relaylock_device::{DeviceCloud, DeviceGateway};
use relaylock_storage::{Database, StorageError, StorageResult, transaction};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Retry policy for re-arm commands.
///
/// ```
/// use relaylock_access::RearmPolicy;
/// use std::time::Duration;
///
/// let policy = RearmPolicy::default();
/// assert_eq!(policy.max_attempts, 3);
/// assert_eq!(policy.backoff_after(1), Duration::from_secs(1));
/// assert_eq!(policy.backoff_after(2), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RearmPolicy {
    /// Total dispatch attempts, including the first
    pub max_attempts: u32,
    /// Wait after the first failure; doubles after each further failure
    pub backoff: Duration,
    /// Upper bound for any single wait
    pub max_backoff: Duration,
}

impl Default for RearmPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_REARM_MAX_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_REARM_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_REARM_BACKOFF_MS),
        }
    }
}

impl RearmPolicy {
    /// At least one attempt is always made.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Wait before the attempt following failed attempt number `attempt`
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Outcome notifications published by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RearmEvent {
    /// Relock confirmed and committed
    Relocked { lock_id: i64, attempts: u32 },
    /// An attempt failed and another one is coming
    RetryScheduled {
        lock_id: i64,
        attempt: u32,
        retry_in: Duration,
    },
    /// All attempts failed; the lock is open and needs intervention
    Degraded {
        lock_id: i64,
        attempts: u32,
        reason: String,
    },
}

impl RearmEvent {
    pub fn lock_id(&self) -> i64 {
        match self {
            RearmEvent::Relocked { lock_id, .. }
            | RearmEvent::RetryScheduled { lock_id, .. }
            | RearmEvent::Degraded { lock_id, .. } => *lock_id,
        }
    }
}

struct ScheduledRearm {
    id: u64,
    handle: JoinHandle<()>,
}

struct SchedulerInner<C> {
    gateway: Arc<DeviceGateway<C>>,
    db: Database,
    policy: RearmPolicy,
    tasks: Mutex<HashMap<i64, ScheduledRearm>>,
    next_id: AtomicU64,
    events: broadcast::Sender<RearmEvent>,
}

/// Deferred relock service
pub struct ReArmScheduler<C> {
    inner: Arc<SchedulerInner<C>>,
}

impl<C> Clone for ReArmScheduler<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: DeviceCloud> ReArmScheduler<C> {
    pub fn new(gateway: Arc<DeviceGateway<C>>, db: Database, policy: RearmPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SchedulerInner {
                gateway,
                db,
                policy,
                tasks: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                events,
            }),
        }
    }

    pub fn policy(&self) -> RearmPolicy {
        self.inner.policy
    }

    /// Receive outcome notifications from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RearmEvent> {
        self.inner.events.subscribe()
    }

    /// Relock the lease's lock after `delay`.
    ///
    /// Must be called from within a Tokio runtime. The lease travels with
    /// the task; its slot stays held until the relock is confirmed, or
    /// indefinitely if the lock ends degraded.
    pub fn schedule(&self, lease: FlightLease, device_id: DeviceId, delay: Duration) {
        let lock_id = lease.lock_id();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        info!(
            lock_id,
            device_id = %device_id,
            delay_ms = delay.as_millis() as u64,
            "Re-arm scheduled"
        );

        let mut tasks = self.inner.tasks();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(run_rearm(inner, lease, device_id, delay, id));

        if let Some(previous) = tasks.insert(lock_id, ScheduledRearm { id, handle }) {
            warn!(lock_id, "Replaced an existing re-arm task handle");
            previous.handle.abort();
        }
    }

    pub fn is_scheduled(&self, lock_id: i64) -> bool {
        self.inner.tasks().contains_key(&lock_id)
    }

    /// Locks with a running re-arm task
    pub fn scheduled_locks(&self) -> Vec<i64> {
        let mut locks: Vec<i64> = self.inner.tasks().keys().copied().collect();
        locks.sort_unstable();
        locks
    }

    /// Wait until every scheduled re-arm has finished.
    pub async fn wait_idle(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = self
                .inner
                .tasks()
                .drain()
                .map(|(_, task)| task.handle)
                .collect();

            if handles.is_empty() {
                return;
            }

            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Re-arm task ended abnormally");
                }
            }
        }
    }

    /// Abort all running re-arm tasks.
    ///
    /// Their durable records stay in place and are picked up by the next
    /// recovery pass.
    pub fn shutdown(&self) {
        let tasks: Vec<(i64, ScheduledRearm)> = self.inner.tasks().drain().collect();
        for (lock_id, task) in tasks {
            debug!(lock_id, "Aborting re-arm task");
            task.handle.abort();
        }
    }
}

impl<C> SchedulerInner<C> {
    fn tasks(&self) -> MutexGuard<'_, HashMap<i64, ScheduledRearm>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the task entry if it still belongs to task `id`
    fn forget(&self, lock_id: i64, id: u64) {
        let mut tasks = self.tasks();
        if tasks.get(&lock_id).is_some_and(|task| task.id == id) {
            tasks.remove(&lock_id);
        }
    }

    fn publish(&self, event: RearmEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl<C: DeviceCloud> SchedulerInner<C> {
    /// One dispatch attempt; on failure returns the reason
    async fn attempt(
        &self,
        lease: &mut FlightLease,
        device_id: &DeviceId,
        attempt: u32,
    ) -> std::result::Result<(), String> {
        let lock_id = lease.lock_id();
        lease.machine_mut().begin_relock().map_err(|e| e.to_string())?;

        let report = self.gateway.dispatch(device_id, true).await;

        let reason = if report.success {
            match self.commit_relock(lock_id).await {
                Ok(()) => {
                    lease.machine_mut().confirm_relock().map_err(|e| e.to_string())?;
                    return Ok(());
                }
                Err(e) => {
                    error!(lock_id, attempt, error = %e, "Relock confirmed but not committed");
                    format!("commit failed: {e}")
                }
            }
        } else if report.is_offline() {
            "device offline".to_string()
        } else {
            "command not confirmed".to_string()
        };

        lease
            .machine_mut()
            .relock_failed(report.reachable)
            .map_err(|e| e.to_string())?;
        self.record_attempt(lock_id, attempt, &reason).await;

        Err(reason)
    }

    async fn commit_relock(&self, lock_id: i64) -> StorageResult<()> {
        let mut tx = self.db.pool().begin().await?;
        transaction::commit_relock(&mut tx, lock_id).await?;
        transaction::delete_rearm_task(&mut tx, lock_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_attempt(&self, lock_id: i64, attempt: u32, reason: &str) {
        let result = async {
            let mut tx = self.db.pool().begin().await?;
            transaction::record_rearm_attempt(&mut tx, lock_id, attempt, Some(reason)).await?;
            tx.commit().await?;
            Ok::<(), StorageError>(())
        }
        .await;

        if let Err(e) = result {
            warn!(lock_id, attempt, error = %e, "Failed to record re-arm attempt");
        }
    }

    async fn persist_degraded(&self, lock_id: i64, reason: &str) -> StorageResult<()> {
        let mut tx = self.db.pool().begin().await?;
        transaction::mark_degraded(&mut tx, lock_id, reason).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn degrade(
        &self,
        mut lease: FlightLease,
        device_id: &DeviceId,
        attempts: u32,
        reason: String,
    ) {
        let lock_id = lease.lock_id();

        if let Err(e) = lease.machine_mut().mark_degraded() {
            warn!(lock_id, error = %e, "State machine refused degraded marker");
        }

        if let Err(e) = self.persist_degraded(lock_id, &reason).await {
            error!(lock_id, error = %e, "Failed to persist degraded marker");
        }

        error!(
            alert = "rearm_degraded",
            lock_id,
            device_id = %device_id,
            attempts,
            reason = %reason,
            "Re-arm failed, lock left open and marked degraded"
        );

        lease.into_degraded();
        self.publish(RearmEvent::Degraded {
            lock_id,
            attempts,
            reason,
        });
    }
}

async fn run_rearm<C: DeviceCloud>(
    inner: Arc<SchedulerInner<C>>,
    mut lease: FlightLease,
    device_id: DeviceId,
    delay: Duration,
    id: u64,
) {
    let lock_id = lease.lock_id();
    let policy = inner.policy;

    tokio::time::sleep(delay).await;

    let mut attempt = 0;
    loop {
        attempt += 1;

        match inner.attempt(&mut lease, &device_id, attempt).await {
            Ok(()) => {
                info!(lock_id, device_id = %device_id, attempt, "Lock re-armed");
                lease.release();
                inner.publish(RearmEvent::Relocked {
                    lock_id,
                    attempts: attempt,
                });
                break;
            }
            Err(reason) if attempt >= policy.max_attempts => {
                inner.degrade(lease, &device_id, attempt, reason).await;
                break;
            }
            Err(reason) => {
                let retry_in = policy.backoff_after(attempt);
                warn!(
                    lock_id,
                    device_id = %device_id,
                    attempt,
                    max_attempts = policy.max_attempts,
                    retry_in_ms = retry_in.as_millis() as u64,
                    reason = %reason,
                    "Re-arm attempt failed, retrying"
                );
                inner.publish(RearmEvent::RetryScheduled {
                    lock_id,
                    attempt,
                    retry_in,
                });
                tokio::time::sleep(retry_in).await;
            }
        }
    }

    inner.forget(lock_id, id);
}
