use chrono::{DateTime, Utc};
use relaylock_core::DeviceId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle of a durable re-arm record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RearmTaskStatus {
    /// Waiting for its deadline or retrying
    Pending,
    /// Retries exhausted; the lock is degraded
    Failed,
}

/// Durable record of a scheduled re-arm
///
/// Keyed by `lock_id`, so a lock has at most one record. The row is written
/// in the same transaction as the unlock commit and removed in the same
/// transaction as the relock commit, which lets a restarted process find
/// every unlock still waiting for its re-arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RearmTask {
    pub lock_id: i64,

    #[sqlx(try_from = "String")]
    pub device_id: DeviceId,

    /// When the re-arm command is due
    pub deadline: DateTime<Utc>,

    /// Unlock window captured at grant time
    pub delay_ms: i64,

    /// Re-arm commands attempted so far
    pub attempts: i64,

    pub status: RearmTaskStatus,

    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl RearmTask {
    /// Time left until the deadline, zero once it has passed
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.deadline - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_failed(&self) -> bool {
        self.status == RearmTaskStatus::Failed
    }
}

/// Data for scheduling a re-arm record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRearmTask {
    pub lock_id: i64,
    pub device_id: DeviceId,
    pub deadline: DateTime<Utc>,
    pub delay_ms: i64,
}
