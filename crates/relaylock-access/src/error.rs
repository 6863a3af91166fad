//! Error types for the access pipeline.
//!
//! Every variant maps to a stable machine code through
//! [`AccessError::code`]. Policy denials keep the code of their
//! [`DenyReason`], so a denial reaches the caller verbatim.

use crate::eligibility::DenyReason;
use crate::messages::AccessMessages;
use relaylock_core::DeviceId;
use relaylock_storage::StorageError;

/// Result type alias for access operations.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Errors returned by the access pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// No lock matches the lookup.
    #[error("Lock not found: {lookup}")]
    LockNotFound { lookup: String },

    /// The requesting user does not exist.
    #[error("User not found: {user_id}")]
    UserNotFound { user_id: i64 },

    /// The eligibility policy refused access.
    #[error("Access denied: {0}")]
    Denied(DenyReason),

    /// Another access cycle holds the lock.
    #[error("Access already in progress for lock {lock_id}")]
    ConcurrentAccessInProgress { lock_id: i64 },

    /// The device did not report itself online.
    #[error("Device {device_id} is offline")]
    DeviceOffline { device_id: DeviceId },

    /// The device was reachable but did not confirm the command.
    #[error("Device {device_id} did not confirm the command")]
    DeviceCommandFailed { device_id: DeviceId },

    /// The lock was left open after the re-arm gave up.
    #[error("Lock {lock_id} is degraded after a failed re-arm")]
    RearmFailedDegraded { lock_id: i64 },

    /// Degraded-marker clearing requested for a healthy lock.
    #[error("Lock {lock_id} is not degraded")]
    NotDegraded { lock_id: i64 },

    /// The lock state machine refused a transition.
    #[error("State error: {0}")]
    State(#[from] relaylock_core::Error),

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AccessError {
    pub(crate) fn lock_not_found(lookup: impl ToString) -> Self {
        Self::LockNotFound {
            lookup: lookup.to_string(),
        }
    }

    /// Stable machine code
    ///
    /// ```
    /// use relaylock_access::{AccessError, DenyReason};
    ///
    /// assert_eq!(AccessError::Denied(DenyReason::AgeRestricted).code(), "AGE_RESTRICTED");
    /// assert_eq!(
    ///     AccessError::ConcurrentAccessInProgress { lock_id: 1 }.code(),
    ///     "CONCURRENT_ACCESS_IN_PROGRESS"
    /// );
    /// ```
    pub fn code(&self) -> &'static str {
        match self {
            Self::LockNotFound { .. } => "LOCK_NOT_FOUND",
            Self::UserNotFound { .. } => "USER_NOT_FOUND",
            Self::Denied(reason) => reason.code(),
            Self::ConcurrentAccessInProgress { .. } => "CONCURRENT_ACCESS_IN_PROGRESS",
            Self::DeviceOffline { .. } => "DEVICE_OFFLINE",
            Self::DeviceCommandFailed { .. } => "DEVICE_COMMAND_FAILED",
            Self::RearmFailedDegraded { .. } => "REARM_FAILED_DEGRADED",
            Self::NotDegraded { .. } => "LOCK_NOT_DEGRADED",
            Self::State(_) => "INVALID_STATE_TRANSITION",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Message for the person requesting access
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::LockNotFound { .. } => AccessMessages::LOCK_NOT_FOUND,
            Self::UserNotFound { .. } => AccessMessages::USER_NOT_FOUND,
            Self::Denied(reason) => reason.message(),
            Self::ConcurrentAccessInProgress { .. } => {
                AccessMessages::CONCURRENT_ACCESS_IN_PROGRESS
            }
            Self::DeviceOffline { .. } => AccessMessages::DEVICE_OFFLINE,
            Self::DeviceCommandFailed { .. } => AccessMessages::DEVICE_COMMAND_FAILED,
            Self::RearmFailedDegraded { .. } => AccessMessages::REARM_FAILED_DEGRADED,
            Self::NotDegraded { .. } | Self::State(_) | Self::Storage(_) => {
                AccessMessages::INTERNAL_ERROR
            }
        }
    }

    /// Whether the failure is the caller's business rather than ours
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::State(_) | Self::Storage(_))
    }
}

impl From<DenyReason> for AccessError {
    fn from(reason: DenyReason) -> Self {
        Self::Denied(reason)
    }
}
