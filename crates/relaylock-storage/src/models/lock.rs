use chrono::{DateTime, Utc};
use relaylock_core::{
    Connectivity, DeviceId, LockCode, OperationalStatus, PowerState, QrToken,
    constants::DEFAULT_REARM_DELAY_MS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Relay lock record
///
/// A lock is a cloud-connected smart plug gating power to an
/// electromagnetic latch. It can be found by its human `code` or by the
/// `qr_token` printed on its sticker.
///
/// # State fields
///
/// `connectivity`, `power_state` and `degraded` are runtime state. Only the
/// functions in [`transaction`](crate::transaction) write them; the
/// administrative update path leaves them untouched.
///
/// # Concurrency
///
/// `version` increases on every administrative edit. Edits carry the
/// version they were based on and fail with a conflict if it moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Lock {
    pub id: i64,

    pub name: String,

    pub market_name: String,

    /// Vendor cloud device identifier
    #[sqlx(try_from = "String")]
    pub device_id: DeviceId,

    /// Human lookup code
    #[sqlx(try_from = "String")]
    pub code: LockCode,

    /// QR lookup token
    #[sqlx(try_from = "String")]
    pub qr_token: QrToken,

    #[sqlx(try_from = "String")]
    pub operational_status: OperationalStatus,

    #[sqlx(try_from = "String")]
    pub connectivity: Connectivity,

    #[sqlx(try_from = "String")]
    pub power_state: PowerState,

    /// Re-arm exhausted its retries; needs administrative intervention
    pub degraded: bool,

    /// Unlock window length in milliseconds
    pub rearm_delay_ms: i64,

    pub owner_id: i64,

    pub age_restricted: bool,

    /// Only `authorized_users` may open the lock
    pub personalized: bool,

    pub version: i64,

    /// Users allowed on a personalized lock (loaded separately)
    #[sqlx(skip)]
    pub authorized_users: Vec<i64>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Lock {
    /// Unlock window as a `Duration`
    pub fn rearm_delay(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.rearm_delay_ms).unwrap_or(0))
    }

    /// Check if the given user is on the authorized list
    pub fn is_authorized(&self, user_id: i64) -> bool {
        self.authorized_users.contains(&user_id)
    }

    /// Check if the lock is administratively active
    pub fn is_active(&self) -> bool {
        self.operational_status == OperationalStatus::Active
    }
}

/// Data for creating a lock
///
/// `qr_token` defaults to a random UUID and `rearm_delay_ms` to 30 000 ms
/// when omitted. The owner is always added to the authorized users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLock {
    pub name: String,
    pub market_name: String,
    pub device_id: DeviceId,
    pub code: LockCode,
    pub qr_token: Option<QrToken>,
    pub operational_status: OperationalStatus,
    pub rearm_delay_ms: Option<i64>,
    pub owner_id: i64,
    pub age_restricted: bool,
    pub personalized: bool,
    pub authorized_users: Vec<i64>,
}

impl NewLock {
    /// Create an active, unrestricted lock with default delay and token
    pub fn new(
        name: impl Into<String>,
        market_name: impl Into<String>,
        device_id: DeviceId,
        code: LockCode,
        owner_id: i64,
    ) -> Self {
        Self {
            name: name.into(),
            market_name: market_name.into(),
            device_id,
            code,
            qr_token: None,
            operational_status: OperationalStatus::Active,
            rearm_delay_ms: None,
            owner_id,
            age_restricted: false,
            personalized: false,
            authorized_users: Vec::new(),
        }
    }

    pub fn with_qr_token(mut self, token: QrToken) -> Self {
        self.qr_token = Some(token);
        self
    }

    pub fn with_rearm_delay_ms(mut self, delay_ms: i64) -> Self {
        self.rearm_delay_ms = Some(delay_ms);
        self
    }

    pub fn with_status(mut self, status: OperationalStatus) -> Self {
        self.operational_status = status;
        self
    }

    pub fn age_restricted(mut self, restricted: bool) -> Self {
        self.age_restricted = restricted;
        self
    }

    /// Restrict the lock to the given users (the owner is always included)
    pub fn personalized_for(mut self, users: impl IntoIterator<Item = i64>) -> Self {
        self.personalized = true;
        self.authorized_users.extend(users);
        self
    }

    /// Effective re-arm delay
    pub fn effective_rearm_delay_ms(&self) -> i64 {
        self.rearm_delay_ms.unwrap_or(DEFAULT_REARM_DELAY_MS)
    }
}

/// Administrative edit of a lock
///
/// `None` leaves a field unchanged. Runtime state is not editable here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockUpdate {
    pub name: Option<String>,
    pub market_name: Option<String>,
    pub code: Option<LockCode>,
    pub rearm_delay_ms: Option<i64>,
    pub operational_status: Option<OperationalStatus>,
    pub age_restricted: Option<bool>,
    pub personalized: Option<bool>,
}

/// Filters for lock listings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFilter {
    /// Case-insensitive substring of the market name
    pub market_name: Option<String>,
    /// Exact device id
    pub device_id: Option<String>,
    pub operational_status: Option<OperationalStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_lock() -> NewLock {
        NewLock::new(
            "Porta 1",
            "Mercado Central",
            DeviceId::new("plug-1").unwrap(),
            LockCode::new("MC1").unwrap(),
            7,
        )
    }

    #[test]
    fn test_new_lock_defaults() {
        let lock = new_lock();
        assert_eq!(lock.effective_rearm_delay_ms(), 30_000);
        assert!(lock.qr_token.is_none());
        assert!(!lock.personalized);
        assert_eq!(lock.operational_status, OperationalStatus::Active);
    }

    #[test]
    fn test_personalized_for() {
        let lock = new_lock().personalized_for([3, 4]);
        assert!(lock.personalized);
        assert_eq!(lock.authorized_users, vec![3, 4]);
    }

    #[test]
    fn test_update_default_is_empty() {
        let update = LockUpdate::default();
        assert!(update.name.is_none());
        assert!(update.rearm_delay_ms.is_none());
    }
}
