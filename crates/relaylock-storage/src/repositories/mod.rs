pub mod access_event;
pub mod lock;
pub mod rearm_task;
pub mod user;

pub use access_event::{AccessEventRepository, SqliteAccessEventRepository};
pub use lock::{LockRepository, SqliteLockRepository};
pub use rearm_task::{RearmTaskRepository, SqliteRearmTaskRepository};
pub use user::{SqliteUserRepository, UserRepository};

/// Build a `LIKE ... ESCAPE '\'` pattern matching `value` as a substring
pub(crate) fn like_pattern(value: &str) -> String {
    let mut pattern = String::with_capacity(value.len() + 2);
    pattern.push('%');
    for c in value.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
