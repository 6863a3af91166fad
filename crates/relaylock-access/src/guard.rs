//! Per-lock single-flight guard.
//!
//! A lock is held from the moment an access request passes the guard until
//! its re-arm is confirmed. Requests arriving meanwhile are rejected, never
//! queued. The holder receives a [`FlightLease`] that owns the lock's
//! [`LockStateMachine`] for the whole cycle.
//!
//! A lease releases its slot when dropped. A lease that ends the cycle in
//! the degraded condition is converted with [`FlightLease::into_degraded`],
//! which keeps the slot occupied until an administrator clears it.
//!
//! # Examples
//!
//! ```
//! use relaylock_access::{AccessError, SingleFlight};
//!
//! let guard = SingleFlight::new();
//! let lease = guard.try_acquire(1).unwrap();
//!
//! assert!(matches!(
//!     guard.try_acquire(1),
//!     Err(AccessError::ConcurrentAccessInProgress { lock_id: 1 })
//! ));
//!
//! drop(lease);
//! assert!(guard.try_acquire(1).is_ok());
//! ```

use crate::error::{AccessError, Result};
use crate::state_machine::LockStateMachine;
use relaylock_core::{Connectivity, PowerState};
use relaylock_storage::Lock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Occupancy of one lock's slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightStatus {
    /// An access cycle is running
    InFlight,
    /// Re-arm gave up; waiting for manual intervention
    Degraded,
}

/// Registry of held locks
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    slots: Arc<Mutex<HashMap<i64, FlightStatus>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<i64, FlightStatus>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the slot of `lock_id` for a new access cycle.
    ///
    /// # Errors
    ///
    /// - `ConcurrentAccessInProgress` if a cycle is running
    /// - `RearmFailedDegraded` if the lock is waiting for intervention
    pub fn try_acquire(&self, lock_id: i64) -> Result<FlightLease> {
        let mut slots = self.slots();
        match slots.get(&lock_id) {
            Some(FlightStatus::InFlight) => Err(AccessError::ConcurrentAccessInProgress { lock_id }),
            Some(FlightStatus::Degraded) => Err(AccessError::RearmFailedDegraded { lock_id }),
            None => {
                slots.insert(lock_id, FlightStatus::InFlight);
                Ok(FlightLease::new(self.clone(), lock_id))
            }
        }
    }

    /// Take the slot of a degraded lock for the manual relock.
    ///
    /// Also succeeds on a free slot, since a restarted process may not have
    /// re-installed the degraded marker yet.
    ///
    /// # Errors
    ///
    /// Returns `ConcurrentAccessInProgress` if a cycle is running.
    pub fn acquire_degraded(&self, lock_id: i64) -> Result<FlightLease> {
        let mut slots = self.slots();
        match slots.get(&lock_id) {
            Some(FlightStatus::InFlight) => Err(AccessError::ConcurrentAccessInProgress { lock_id }),
            Some(FlightStatus::Degraded) | None => {
                slots.insert(lock_id, FlightStatus::InFlight);
                Ok(FlightLease::new(self.clone(), lock_id))
            }
        }
    }

    /// Mark a lock degraded without a lease (start-up recovery)
    pub fn install_degraded(&self, lock_id: i64) {
        self.slots().insert(lock_id, FlightStatus::Degraded);
    }

    pub fn status(&self, lock_id: i64) -> Option<FlightStatus> {
        self.slots().get(&lock_id).copied()
    }

    pub fn is_held(&self, lock_id: i64) -> bool {
        self.status(lock_id).is_some()
    }

    /// Number of occupied slots
    pub fn held_count(&self) -> usize {
        self.slots().len()
    }

    fn settle(&self, lock_id: i64, degraded: bool) {
        let mut slots = self.slots();
        if degraded {
            slots.insert(lock_id, FlightStatus::Degraded);
        } else {
            slots.remove(&lock_id);
        }
    }
}

/// Exclusive hold on one lock for one access cycle
#[derive(Debug)]
pub struct FlightLease {
    guard: SingleFlight,
    lock_id: i64,
    machine: LockStateMachine,
    settled: bool,
}

impl FlightLease {
    fn new(guard: SingleFlight, lock_id: i64) -> Self {
        Self {
            guard,
            lock_id,
            machine: LockStateMachine::new(lock_id),
            settled: false,
        }
    }

    pub fn lock_id(&self) -> i64 {
        self.lock_id
    }

    pub fn machine(&self) -> &LockStateMachine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut LockStateMachine {
        &mut self.machine
    }

    /// Reload the state machine from a freshly read lock row
    pub fn restore(&mut self, lock: &Lock) {
        self.machine = LockStateMachine::from(lock);
    }

    /// Treat the lock as open, unreachable and degraded, regardless of
    /// what storage holds
    pub fn restore_open_degraded(&mut self) {
        self.machine = LockStateMachine::builder(self.lock_id)
            .with_power_state(PowerState::Unlocked)
            .with_connectivity(Connectivity::Offline)
            .with_degraded(true)
            .build();
    }

    /// Free the slot
    pub fn release(mut self) {
        self.settle(false);
    }

    /// Keep the slot occupied as degraded
    pub fn into_degraded(mut self) {
        self.settle(true);
    }

    fn settle(&mut self, degraded: bool) {
        if !self.settled {
            self.guard.settle(self.lock_id, degraded);
            self.settled = true;
        }
    }
}

impl Drop for FlightLease {
    fn drop(&mut self) {
        self.settle(false);
    }
}
