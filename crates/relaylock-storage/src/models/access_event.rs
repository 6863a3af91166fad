use chrono::{DateTime, Utc};
use relaylock_core::GeoPoint;
use serde::{Deserialize, Serialize};

/// Granted access, recorded once and never modified
///
/// Triggers on the `access_events` table reject updates and deletes.
///
/// # Fields
///
/// * `occurred_at` - When the lock was opened (event time)
/// * `created_at` - When the row was written
/// * `lat`, `long` - Client position, both present or both absent
/// * `photo_ref` - Reference to a photo stored elsewhere
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessEvent {
    pub id: i64,
    pub user_id: i64,
    pub lock_id: i64,
    pub occurred_at: DateTime<Utc>,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    pub photo_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AccessEvent {
    /// Client position, if one was recorded
    pub fn geo(&self) -> Option<GeoPoint> {
        match (self.lat, self.long) {
            (Some(lat), Some(long)) => Some(GeoPoint { lat, long }),
            _ => None,
        }
    }
}

/// Data for appending an access event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccessEvent {
    pub user_id: i64,
    pub lock_id: i64,
    pub occurred_at: DateTime<Utc>,
    pub geo: Option<GeoPoint>,
    pub photo_ref: Option<String>,
}

impl NewAccessEvent {
    pub fn new(user_id: i64, lock_id: i64, occurred_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            lock_id,
            occurred_at,
            geo: None,
            photo_ref: None,
        }
    }

    pub fn with_geo(mut self, geo: Option<GeoPoint>) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_photo_ref(mut self, photo_ref: Option<String>) -> Self {
        self.photo_ref = photo_ref;
        self
    }
}

/// Access event joined with the user and lock display fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessEventView {
    pub id: i64,
    pub user_id: i64,
    pub lock_id: i64,
    pub occurred_at: DateTime<Utc>,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    pub photo_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub user_name: String,
    pub user_email: String,
    pub user_phone: Option<String>,
    pub lock_name: String,
}

/// Filters for access event queries
///
/// Text filters are case-insensitive substring matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEventFilter {
    pub user_id: Option<i64>,
    pub lock_id: Option<i64>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub user_phone: Option<String>,
    pub lock_name: Option<String>,
}
