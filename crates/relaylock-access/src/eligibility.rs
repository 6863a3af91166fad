//! Access eligibility policy.
//!
//! A pure decision over a user, a lock and the current date. Checks run in a
//! fixed order and the first failing check wins:
//!
//! 1. [`DenyReason::UserBlocked`] - the user is administratively disabled
//! 2. [`DenyReason::AccessRestricted`] - personalized lock, user not authorized
//! 3. [`DenyReason::AgeRestricted`] - age-restricted lock, user under 18
//! 4. [`DenyReason::LockInactive`] - lock switched off
//!
//! # Examples
//!
//! ```no_run
//! use chrono::Utc;
//! use relaylock_access::{AccessEligibilityEvaluator, Eligibility};
//! # fn example(user: &relaylock_storage::User, lock: &relaylock_storage::Lock) {
//! match AccessEligibilityEvaluator::evaluate(user, lock, Utc::now().date_naive()) {
//!     Eligibility::Allow => println!("go ahead"),
//!     Eligibility::Deny(reason) => println!("{}: {}", reason.code(), reason.message()),
//! }
//! # }
//! ```

use crate::messages::AccessMessages;
use chrono::{Datelike, NaiveDate};
use relaylock_core::constants::ADULT_AGE_YEARS;
use relaylock_storage::{Lock, User};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a policy check refused access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    UserBlocked,
    AccessRestricted,
    AgeRestricted,
    LockInactive,
}

impl DenyReason {
    /// Stable machine code
    pub fn code(self) -> &'static str {
        match self {
            DenyReason::UserBlocked => "USER_BLOCKED",
            DenyReason::AccessRestricted => "ACCESS_RESTRICTED",
            DenyReason::AgeRestricted => "AGE_RESTRICTED",
            DenyReason::LockInactive => "LOCK_INACTIVE",
        }
    }

    /// Message for the person requesting access
    pub fn message(self) -> &'static str {
        match self {
            DenyReason::UserBlocked => AccessMessages::USER_BLOCKED,
            DenyReason::AccessRestricted => AccessMessages::ACCESS_RESTRICTED,
            DenyReason::AgeRestricted => AccessMessages::AGE_RESTRICTED,
            DenyReason::LockInactive => AccessMessages::LOCK_INACTIVE,
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of the policy gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Allow,
    Deny(DenyReason),
}

impl Eligibility {
    pub fn is_allowed(self) -> bool {
        matches!(self, Eligibility::Allow)
    }
}

/// Completed years between `birth_date` and `today`.
///
/// The year count drops by one while today's month/day is still before the
/// birthday, so a person turns N on their birthday and not before. Someone
/// born on 29 February ages on 1 March in non-leap years. Returns 0 for a
/// birth date in the future.
pub fn age_on(birth_date: NaiveDate, today: NaiveDate) -> u32 {
    let mut years = today.year() - birth_date.year();
    if (today.month(), today.day()) < (birth_date.month(), birth_date.day()) {
        years -= 1;
    }
    u32::try_from(years).unwrap_or(0)
}

/// The access policy gate
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessEligibilityEvaluator;

impl AccessEligibilityEvaluator {
    /// Decide whether `user` may operate `lock` on `today`
    pub fn evaluate(user: &User, lock: &Lock, today: NaiveDate) -> Eligibility {
        if user.is_blocked() {
            return Eligibility::Deny(DenyReason::UserBlocked);
        }

        if lock.personalized && !lock.is_authorized(user.id) {
            return Eligibility::Deny(DenyReason::AccessRestricted);
        }

        if lock.age_restricted && age_on(user.birth_date, today) < ADULT_AGE_YEARS {
            return Eligibility::Deny(DenyReason::AgeRestricted);
        }

        if !lock.is_active() {
            return Eligibility::Deny(DenyReason::LockInactive);
        }

        Eligibility::Allow
    }
}
