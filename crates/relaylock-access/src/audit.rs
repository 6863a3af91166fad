//! Append-only access audit log.
//!
//! Every granted access produces exactly one event. Events are never
//! updated or deleted; the schema rejects both.
//!
//! Listings are scoped by the caller's role:
//!
//! | Role | Visible events |
//! |------|----------------|
//! | `Admin`, `Developer` | all |
//! | `Market` | events on locks the caller owns or is authorized on |
//! | `Common` | the caller's own events |

use crate::error::Result;
use relaylock_core::Role;
use relaylock_storage::{
    AccessEvent, AccessEventFilter, AccessEventRepository, AccessEventView, Database,
    LockRepository, NewAccessEvent, Page, Pagination, Scope, SqliteAccessEventRepository,
    SqliteLockRepository, transaction,
};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};
use tracing::debug;

/// Verified identity of whoever is reading the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: i64,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Row visibility for this caller
    pub fn scope(&self) -> Scope {
        match self.role {
            Role::Admin | Role::Developer => Scope::Unrestricted,
            Role::Market => Scope::AuthorizedLocks(self.user_id),
            Role::Common => Scope::OwnEvents(self.user_id),
        }
    }
}

/// Access event log
#[derive(Debug, Clone)]
pub struct AccessAuditLog {
    events: SqliteAccessEventRepository,
    locks: SqliteLockRepository,
}

impl AccessAuditLog {
    pub fn new(db: &Database) -> Self {
        Self {
            events: SqliteAccessEventRepository::new(db.pool().clone()),
            locks: SqliteLockRepository::new(db.pool().clone()),
        }
    }

    /// Write one event on its own
    pub async fn append(&self, event: &NewAccessEvent) -> Result<AccessEvent> {
        let created = self.events.append(event).await?;
        debug!(event_id = created.id, lock_id = created.lock_id, "Access event appended");
        Ok(created)
    }

    /// Write one event inside a state transaction
    pub(crate) async fn record(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        event: &NewAccessEvent,
    ) -> Result<AccessEvent> {
        Ok(transaction::insert_access_event(tx, event).await?)
    }

    /// Page through the events visible to `caller`.
    ///
    /// Newest first; events sharing a timestamp are ordered by id so pages
    /// never overlap or skip.
    pub async fn query(
        &self,
        caller: &Caller,
        filter: &AccessEventFilter,
        pagination: Pagination,
    ) -> Result<Page<AccessEventView>> {
        Ok(self.events.query(filter, caller.scope(), pagination).await?)
    }

    /// One event, if it exists and `caller` may see it
    pub async fn find_by_id(&self, caller: &Caller, id: i64) -> Result<Option<AccessEventView>> {
        let Some(event) = self.events.find_by_id(id).await? else {
            return Ok(None);
        };

        let visible = match caller.scope() {
            Scope::Unrestricted => true,
            Scope::OwnEvents(user_id) => event.user_id == user_id,
            Scope::AuthorizedLocks(user_id) => self
                .locks
                .find_by_id(event.lock_id)
                .await?
                .is_some_and(|lock| lock.owner_id == user_id || lock.is_authorized(user_id)),
        };

        Ok(visible.then_some(event))
    }
}
