pub mod access_event;
pub mod lock;
pub mod pagination;
pub mod rearm_task;
pub mod scope;
pub mod user;

pub use access_event::{AccessEvent, AccessEventFilter, AccessEventView, NewAccessEvent};
pub use lock::{Lock, LockFilter, LockUpdate, NewLock};
pub use pagination::{Page, Pagination};
pub use rearm_task::{NewRearmTask, RearmTask, RearmTaskStatus};
pub use scope::Scope;
pub use user::{NewUser, User};
