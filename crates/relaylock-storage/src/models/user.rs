use chrono::{DateTime, NaiveDate, Utc};
use relaylock_core::Role;
use serde::{Deserialize, Serialize};

/// User entity as seen by the access pipeline
///
/// Accounts, credentials and sessions belong to the identity provider; the
/// registry keeps only what access policy needs.
///
/// # Fields
///
/// * `id` - Auto-increment primary key
/// * `name` - Display name (max 100 characters)
/// * `email` - Unique contact email
/// * `phone` - Optional contact phone
/// * `role` - Caller role (`common`, `admin`, `developer`, `market`)
/// * `disabled` - Administrative block; disabled users are denied everywhere
/// * `birth_date` - Used for age-restricted locks
///
/// # Examples
///
/// ```
/// use relaylock_storage::models::User;
/// use relaylock_core::Role;
/// use chrono::{NaiveDate, Utc};
///
/// let user = User {
///     id: 1,
///     name: "Maria Souza".to_string(),
///     email: "maria@example.com".to_string(),
///     phone: None,
///     role: Role::Common,
///     disabled: false,
///     birth_date: NaiveDate::from_ymd_opt(1990, 5, 17).unwrap(),
///     created_at: Utc::now(),
///     updated_at: Utc::now(),
/// };
///
/// assert!(!user.is_blocked());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,

    pub name: String,

    pub email: String,

    pub phone: Option<String>,

    #[sqlx(try_from = "String")]
    pub role: Role,

    /// Administrative block flag
    pub disabled: bool,

    pub birth_date: NaiveDate,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Check if the user has been administratively disabled
    pub fn is_blocked(&self) -> bool {
        self.disabled
    }
}

/// Data for registering a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub birth_date: NaiveDate,
}

impl NewUser {
    /// Create a common-role user with no phone
    pub fn new(name: impl Into<String>, email: impl Into<String>, birth_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            phone: None,
            role: Role::Common,
            birth_date,
        }
    }

    /// Set the role
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Set the phone
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }
}
