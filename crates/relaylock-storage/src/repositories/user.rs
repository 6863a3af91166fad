#![allow(async_fn_in_trait)]

use crate::error::{StorageError, StorageResult};
use crate::models::{NewUser, User};
use sqlx::SqlitePool;

const USER_COLUMNS: &str = r#"
    id, name, email, phone, role, disabled, birth_date, created_at, updated_at
"#;

/// Repository trait for User entity operations
///
/// This trait uses native async trait methods (Edition 2024 feature).
pub trait UserRepository: Send + Sync {
    /// Find a user by ID
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<User>>;

    /// Find a user by email
    async fn find_by_email(&self, email: &str) -> StorageResult<Option<User>>;

    /// Register a user
    async fn create(&self, user: &NewUser) -> StorageResult<User>;

    /// Block or unblock a user
    async fn set_disabled(&self, id: i64, disabled: bool) -> StorageResult<()>;
}

/// SQLite implementation of UserRepository
#[derive(Debug, Clone)]
pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    /// Create a new SQLite user repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl UserRepository for SqliteUserRepository {
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?"
        ))
        .bind(email.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create(&self, user: &NewUser) -> StorageResult<User> {
        let name = user.name.trim();
        if name.is_empty() {
            return Err(StorageError::Validation("User name is required".to_string()));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO users (name, email, phone, role, birth_date)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(user.email.trim().to_lowercase())
        .bind(&user.phone)
        .bind(user.role.as_str())
        .bind(user.birth_date)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.find_by_id(id)
            .await?
            .ok_or_else(|| StorageError::not_found("User", "id", id))
    }

    async fn set_disabled(&self, id: i64, disabled: bool) -> StorageResult<()> {
        let result = sqlx::query(
            "UPDATE users SET disabled = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(disabled)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::not_found("User", "id", id));
        }

        Ok(())
    }
}
