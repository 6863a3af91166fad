//! Core constants for the relay lock access pipeline.
//!
//! This module centralizes the defaults shared by the device gateway, the
//! re-arm scheduler, the eligibility policy and the storage layer. Keeping
//! them in one place guarantees that the database defaults, the builder
//! defaults and the documentation agree with each other.
//!
//! # Usage
//!
//! ```
//! use relaylock_core::constants::*;
//! use std::time::Duration;
//!
//! let window = Duration::from_millis(DEFAULT_REARM_DELAY_MS as u64);
//! assert_eq!(window.as_secs(), 30);
//!
//! let timeout = Duration::from_millis(DEFAULT_DEVICE_TIMEOUT_MS);
//! assert_eq!(timeout.as_secs(), 5);
//! ```

// ============================================================================
// Unlock window
// ============================================================================

/// Default time (milliseconds) a lock stays unlocked before it is re-armed.
///
/// Used when a lock is created without an explicit delay. The database
/// column carries the same default.
pub const DEFAULT_REARM_DELAY_MS: i64 = 30_000;

/// Smallest accepted re-arm delay (milliseconds).
///
/// Zero is valid and means "re-arm as soon as the scheduler runs".
pub const MIN_REARM_DELAY_MS: i64 = 0;

// ============================================================================
// Device cloud
// ============================================================================

/// Default timeout (milliseconds) for a single probe or command call.
pub const DEFAULT_DEVICE_TIMEOUT_MS: u64 = 5_000;

/// Relay instruction code understood by the smart plug firmware.
pub const SWITCH_COMMAND_CODE: &str = "switch_1";

/// Maximum length of a vendor device identifier.
pub const MAX_DEVICE_ID_LENGTH: usize = 64;

// ============================================================================
// Re-arm retries
// ============================================================================

/// Default number of re-arm attempts before a lock is marked degraded.
pub const DEFAULT_REARM_MAX_ATTEMPTS: u32 = 3;

/// Default backoff before the second re-arm attempt (milliseconds).
///
/// Each following attempt doubles the previous wait.
pub const DEFAULT_REARM_BACKOFF_MS: u64 = 1_000;

/// Upper bound for a single backoff wait (milliseconds).
pub const MAX_REARM_BACKOFF_MS: u64 = 30_000;

// ============================================================================
// Eligibility
// ============================================================================

/// Minimum age (in whole years) for age-restricted locks.
pub const ADULT_AGE_YEARS: u32 = 18;

// ============================================================================
// Lookup keys
// ============================================================================

/// Minimum length of a human lock code.
pub const MIN_LOCK_CODE_LENGTH: usize = 3;

/// Maximum length of a human lock code.
pub const MAX_LOCK_CODE_LENGTH: usize = 32;

/// Maximum length of a QR token.
pub const MAX_QR_TOKEN_LENGTH: usize = 128;

// ============================================================================
// Pagination
// ============================================================================

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// Largest page size a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_bounds_are_consistent() {
        assert!(DEFAULT_REARM_BACKOFF_MS <= MAX_REARM_BACKOFF_MS);
    }

    #[test]
    fn test_default_delay_is_valid() {
        assert!(DEFAULT_REARM_DELAY_MS >= MIN_REARM_DELAY_MS);
    }

    #[test]
    fn test_page_limits() {
        assert!(DEFAULT_PAGE_LIMIT <= MAX_PAGE_LIMIT);
        assert!(DEFAULT_PAGE_LIMIT > 0);
    }
}
