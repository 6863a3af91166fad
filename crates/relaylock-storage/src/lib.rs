//! Lock registry for the relay lock access pipeline.
//!
//! This crate provides SQLite-backed persistence for users, locks, access
//! events and durable re-arm records.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool manager with automatic migrations
//! - [`LockRepository`], [`UserRepository`], [`AccessEventRepository`],
//!   [`RearmTaskRepository`] - Data access traits
//! - [`transaction`] - The only writers of lock runtime state, designed to be
//!   combined in one transaction with the event and re-arm record they imply
//!
//! # State ownership
//!
//! A lock row carries two kinds of fields:
//!
//! - Administrative fields (name, code, delay, restriction flags, authorized
//!   users), edited through [`LockRepository::update_admin_fields`] with
//!   optimistic versioning.
//! - Runtime state (`power_state`, `connectivity`, `degraded`), written only
//!   through [`transaction`] with compare-and-set updates.
//!
//! The two paths never touch each other's columns, so an administrative edit
//! cannot clobber a concurrent state transition.
//!
//! # Examples
//!
//! ```no_run
//! use relaylock_storage::{Database, DatabaseConfig};
//! use relaylock_storage::repositories::{LockRepository, SqliteLockRepository};
//! use relaylock_core::{LockCode, LockLookup};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(DatabaseConfig::new("relaylock.db")).await?;
//! let locks = SqliteLockRepository::new(db.pool().clone());
//!
//! let lookup = LockLookup::Code(LockCode::new("MKT-01")?);
//! if let Some(lock) = locks.find_by_lookup(&lookup).await? {
//!     println!("{} is {}", lock.name, lock.power_state);
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;
pub mod transaction;

pub use connection::{DEFAULT_DATABASE_PATH, Database, DatabaseConfig};
pub use error::{StorageError, StorageResult};
pub use models::{
    AccessEvent, AccessEventFilter, AccessEventView, Lock, LockFilter, LockUpdate, NewAccessEvent,
    NewLock, NewRearmTask, NewUser, Page, Pagination, RearmTask, RearmTaskStatus, Scope, User,
};
pub use repositories::{
    AccessEventRepository, LockRepository, RearmTaskRepository, SqliteAccessEventRepository,
    SqliteLockRepository, SqliteRearmTaskRepository, SqliteUserRepository, UserRepository,
};
