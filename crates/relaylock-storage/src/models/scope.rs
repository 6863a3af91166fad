use serde::{Deserialize, Serialize};

/// Row-level visibility applied to listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// Everything is visible
    Unrestricted,
    /// Only locks the user owns or is authorized on (and their events)
    AuthorizedLocks(i64),
    /// Only the user's own events
    OwnEvents(i64),
}
