//! Lock state machine.
//!
//! Tracks one lock through an unlock window and its re-arm.
//!
//! # States
//!
//! - `Idle`: relay energized, lock closed
//! - `Unlocking`: unlock command in flight, not yet confirmed
//! - `Unlocked`: device confirmed the unlock, window open
//! - `Relocking`: re-arm command in flight, not yet confirmed
//!
//! # Valid Transitions
//!
//! - Idle → Unlocking → Unlocked → Relocking → Idle
//! - Unlocking → Idle (unlock not confirmed)
//! - Relocking → Unlocked (re-arm not confirmed, may be retried)
//!
//! Reachability and the degraded marker are separate axes. A lock can be
//! unreachable in any state; becoming unreachable while unlocked after the
//! re-arm gave up is the degraded condition, and a degraded lock refuses to
//! start a new unlock until a confirmed relock clears it.
//!
//! The persisted power state only moves on confirmations: `Unlocking` still
//! reports [`PowerState::Locked`] and `Relocking` still reports
//! [`PowerState::Unlocked`].
//!
//! # Examples
//!
//! ```
//! use relaylock_access::{LockState, LockStateMachine};
//! use relaylock_core::PowerState;
//!
//! let mut machine = LockStateMachine::new(1);
//! machine.begin_unlock().unwrap();
//! assert_eq!(machine.power_state(), PowerState::Locked);
//!
//! machine.confirm_unlock().unwrap();
//! assert_eq!(machine.current_state(), LockState::Unlocked);
//! assert_eq!(machine.power_state(), PowerState::Unlocked);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use relaylock_core::{Connectivity, Error, PowerState, Result};
use relaylock_storage::Lock;
use serde::{Deserialize, Serialize};

/// Maximum number of transitions kept per machine.
///
/// One access cycle takes four transitions, so this covers the last few
/// dozen cycles of a lock, which is plenty for diagnostics.
const MAX_HISTORY_SIZE: usize = 100;

/// Phases of the unlock/re-arm cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Idle,
    Unlocking,
    Unlocked,
    Relocking,
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            LockState::Idle => "Idle",
            LockState::Unlocking => "Unlocking",
            LockState::Unlocked => "Unlocked",
            LockState::Relocking => "Relocking",
        };
        write!(f, "{}", state_str)
    }
}

impl LockState {
    /// Check if transition to `target` is valid from this state.
    ///
    /// ```
    /// use relaylock_access::LockState;
    ///
    /// assert!(LockState::Idle.can_transition_to(&LockState::Unlocking));
    /// assert!(!LockState::Idle.can_transition_to(&LockState::Unlocked));
    /// ```
    pub fn can_transition_to(&self, target: &LockState) -> bool {
        matches!(
            (self, target),
            (LockState::Idle, LockState::Unlocking)
                | (LockState::Unlocking, LockState::Unlocked | LockState::Idle)
                | (LockState::Unlocked, LockState::Relocking)
                | (LockState::Relocking, LockState::Idle | LockState::Unlocked)
        )
    }

    /// Physical relay state the device has confirmed while in this phase
    pub fn confirmed_power_state(&self) -> PowerState {
        match self {
            LockState::Idle | LockState::Unlocking => PowerState::Locked,
            LockState::Unlocked | LockState::Relocking => PowerState::Unlocked,
        }
    }
}

/// A recorded state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: LockState,
    pub to: LockState,

    /// Not serialized; set to the deserialization time when read back.
    #[serde(skip, default = "Instant::now")]
    pub timestamp: Instant,
}

impl StateTransition {
    pub fn new(from: LockState, to: LockState) -> Self {
        Self {
            from,
            to,
            timestamp: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }
}

/// State machine for one lock.
///
/// Not synchronized. The single-flight lease owns the machine for the
/// duration of an access cycle, so only one task ever drives it.
#[derive(Debug, Clone)]
pub struct LockStateMachine {
    lock_id: i64,
    current_state: LockState,
    reachable: bool,
    degraded: bool,
    state_entered_at: Instant,
    history: VecDeque<StateTransition>,
}

impl LockStateMachine {
    /// Create a machine for a closed lock of unknown reachability.
    pub fn new(lock_id: i64) -> Self {
        Self::builder(lock_id).build()
    }

    /// Create a builder, used to restore a machine from persisted state.
    ///
    /// ```
    /// use relaylock_access::{LockState, LockStateMachine};
    /// use relaylock_core::{Connectivity, PowerState};
    ///
    /// let machine = LockStateMachine::builder(7)
    ///     .with_power_state(PowerState::Unlocked)
    ///     .with_connectivity(Connectivity::Offline)
    ///     .with_degraded(true)
    ///     .build();
    ///
    /// assert_eq!(machine.current_state(), LockState::Unlocked);
    /// assert!(machine.is_degraded());
    /// ```
    pub fn builder(lock_id: i64) -> LockStateMachineBuilder {
        LockStateMachineBuilder {
            lock_id,
            power_state: PowerState::Locked,
            connectivity: Connectivity::Offline,
            degraded: false,
        }
    }

    pub fn lock_id(&self) -> i64 {
        self.lock_id
    }

    pub fn current_state(&self) -> LockState {
        self.current_state
    }

    /// Relay state to persist for the current phase
    pub fn power_state(&self) -> PowerState {
        self.current_state.confirmed_power_state()
    }

    pub fn connectivity(&self) -> Connectivity {
        if self.reachable {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn time_in_current_state(&self) -> Duration {
        self.state_entered_at.elapsed()
    }

    /// Recent transitions, oldest first
    pub fn history(&self) -> &VecDeque<StateTransition> {
        &self.history
    }

    /// Transition to a new state, validating the transition.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` if the move is not allowed
    /// from the current state, or if it would start an unlock on a degraded
    /// lock.
    pub fn transition_to(&mut self, new_state: LockState) -> Result<StateTransition> {
        let blocked_by_degraded = self.degraded && new_state == LockState::Unlocking;

        if blocked_by_degraded || !self.current_state.can_transition_to(&new_state) {
            return Err(Error::InvalidStateTransition {
                from: self.describe(),
                to: new_state.to_string(),
            });
        }

        let transition = StateTransition::new(self.current_state, new_state);
        self.current_state = new_state;
        self.state_entered_at = Instant::now();
        self.history.push_back(transition.clone());
        if self.history.len() > MAX_HISTORY_SIZE {
            self.history.pop_front();
        }

        Ok(transition)
    }

    /// Unlock command about to be sent
    pub fn begin_unlock(&mut self) -> Result<StateTransition> {
        self.transition_to(LockState::Unlocking)
    }

    /// Device acknowledged the unlock
    pub fn confirm_unlock(&mut self) -> Result<StateTransition> {
        let transition = self.transition_to(LockState::Unlocked)?;
        self.reachable = true;
        Ok(transition)
    }

    /// Unlock was not confirmed; the lock is still closed
    pub fn abort_unlock(&mut self, reachable: bool) -> Result<StateTransition> {
        let transition = self.transition_to(LockState::Idle)?;
        self.reachable = reachable;
        Ok(transition)
    }

    /// Re-arm command about to be sent
    pub fn begin_relock(&mut self) -> Result<StateTransition> {
        self.transition_to(LockState::Relocking)
    }

    /// Device acknowledged the re-arm; clears the degraded marker
    pub fn confirm_relock(&mut self) -> Result<StateTransition> {
        let transition = self.transition_to(LockState::Idle)?;
        self.reachable = true;
        self.degraded = false;
        Ok(transition)
    }

    /// Re-arm was not confirmed; the lock is still open
    pub fn relock_failed(&mut self, reachable: bool) -> Result<StateTransition> {
        let transition = self.transition_to(LockState::Unlocked)?;
        self.reachable = reachable;
        Ok(transition)
    }

    /// Give up on re-arming: open, unreachable, degraded
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` unless the lock is unlocked.
    pub fn mark_degraded(&mut self) -> Result<()> {
        if self.current_state != LockState::Unlocked {
            return Err(Error::InvalidStateTransition {
                from: self.describe(),
                to: "Degraded".to_string(),
            });
        }
        self.reachable = false;
        self.degraded = true;
        Ok(())
    }

    fn describe(&self) -> String {
        if self.degraded {
            format!("{} (degraded)", self.current_state)
        } else {
            self.current_state.to_string()
        }
    }
}

impl From<&Lock> for LockStateMachine {
    fn from(lock: &Lock) -> Self {
        LockStateMachine::builder(lock.id)
            .with_power_state(lock.power_state)
            .with_connectivity(lock.connectivity)
            .with_degraded(lock.degraded)
            .build()
    }
}

/// Builder restoring a [`LockStateMachine`] from persisted fields
#[derive(Debug)]
pub struct LockStateMachineBuilder {
    lock_id: i64,
    power_state: PowerState,
    connectivity: Connectivity,
    degraded: bool,
}

impl LockStateMachineBuilder {
    pub fn with_power_state(mut self, power_state: PowerState) -> Self {
        self.power_state = power_state;
        self
    }

    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = connectivity;
        self
    }

    pub fn with_degraded(mut self, degraded: bool) -> Self {
        self.degraded = degraded;
        self
    }

    pub fn build(self) -> LockStateMachine {
        let current_state = match self.power_state {
            PowerState::Locked => LockState::Idle,
            PowerState::Unlocked => LockState::Unlocked,
        };

        LockStateMachine {
            lock_id: self.lock_id,
            current_state,
            reachable: self.connectivity.is_online(),
            // Only an open lock can be degraded.
            degraded: self.degraded && current_state == LockState::Unlocked,
            state_entered_at: Instant::now(),
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
        }
    }
}
