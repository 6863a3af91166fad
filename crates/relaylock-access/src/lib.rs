//! Access pipeline for relay locks.
//!
//! Decides whether a user may open a lock, opens it through the device
//! gateway for the lock's unlock window, records the access, and makes sure
//! the lock closes again afterwards.
//!
//! # Architecture
//!
//! ```text
//! AccessOrchestrator
//!     ├─> AccessEligibilityEvaluator   policy gate (pure)
//!     ├─> SingleFlight                 one access cycle per lock
//!     │     └─> LockStateMachine       owned by the cycle's lease
//!     ├─> DeviceGateway                probe + unlock
//!     ├─> AccessAuditLog               one event per grant
//!     └─> ReArmScheduler               relock after the window, with retries
//! ```
//!
//! The unlock commit, the access event and the durable re-arm record are
//! written in one transaction. A restarted process resumes pending re-arms
//! with [`AccessOrchestrator::recover_pending`].
//!
//! # Examples
//!
//! ```no_run
//! use relaylock_access::{AccessOrchestrator, AccessRequest, RearmPolicy};
//! use relaylock_core::{LockCode, LockLookup};
//! use relaylock_device::{DeviceGateway, SimulatedCloud};
//! use relaylock_storage::Database;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::in_memory().await?;
//! let (cloud, _handle) = SimulatedCloud::new();
//! let orchestrator =
//!     AccessOrchestrator::new(db, DeviceGateway::new(cloud), RearmPolicy::default());
//!
//! orchestrator.recover_pending().await?;
//!
//! let request = AccessRequest::new(1, LockLookup::Code(LockCode::new("MKT-01")?));
//! match orchestrator.request_access(request).await {
//!     Ok(grant) => println!("open until {}", grant.relock_at),
//!     Err(e) => println!("{}: {}", e.code(), e.user_message()),
//! }
//!
//! orchestrator.scheduler().wait_idle().await;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod eligibility;
pub mod error;
pub mod guard;
pub mod messages;
pub mod orchestrator;
pub mod scheduler;
pub mod state_machine;

pub use audit::{AccessAuditLog, Caller};
pub use eligibility::{AccessEligibilityEvaluator, DenyReason, Eligibility, age_on};
pub use error::{AccessError, Result};
pub use guard::{FlightLease, FlightStatus, SingleFlight};
pub use orchestrator::{AccessGrant, AccessOrchestrator, AccessRequest, RecoveryReport};
pub use scheduler::{ReArmScheduler, RearmEvent, RearmPolicy};
pub use state_machine::{LockState, LockStateMachine, LockStateMachineBuilder, StateTransition};
