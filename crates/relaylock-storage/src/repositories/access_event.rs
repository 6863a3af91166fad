#![allow(async_fn_in_trait)]

use crate::error::{StorageError, StorageResult};
use crate::models::{AccessEvent, AccessEventFilter, AccessEventView, NewAccessEvent, Page, Pagination, Scope};
use crate::repositories::like_pattern;
use crate::transaction;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

const VIEW_SELECT: &str = r#"
    SELECT e.id, e.user_id, e.lock_id, e.occurred_at, e.lat, e.long,
           e.photo_ref, e.created_at,
           u.name AS user_name, u.email AS user_email, u.phone AS user_phone,
           l.name AS lock_name
    FROM access_events e
    JOIN users u ON u.id = e.user_id
    JOIN locks l ON l.id = e.lock_id
"#;

const VIEW_COUNT: &str = r#"
    SELECT COUNT(*)
    FROM access_events e
    JOIN users u ON u.id = e.user_id
    JOIN locks l ON l.id = e.lock_id
"#;

/// Repository trait for the append-only access event log
///
/// There is no update or delete: events are immutable once written.
///
/// This trait uses native async trait methods (Edition 2024 feature).
pub trait AccessEventRepository: Send + Sync {
    /// Append an event
    async fn append(&self, event: &NewAccessEvent) -> StorageResult<AccessEvent>;

    /// Find an event with its display fields
    async fn find_by_id(&self, id: i64) -> StorageResult<Option<AccessEventView>>;

    /// Page through events visible within `scope`
    ///
    /// Sorted by event time descending, then id ascending.
    async fn query(
        &self,
        filter: &AccessEventFilter,
        scope: Scope,
        pagination: Pagination,
    ) -> StorageResult<Page<AccessEventView>>;

    /// Number of events recorded for a lock
    async fn count_for_lock(&self, lock_id: i64) -> StorageResult<i64>;
}

/// SQLite implementation of AccessEventRepository
#[derive(Debug, Clone)]
pub struct SqliteAccessEventRepository {
    pool: SqlitePool,
}

impl SqliteAccessEventRepository {
    /// Create a new SQLite access event repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn push_text_filter(
    builder: &mut QueryBuilder<'_, Sqlite>,
    column: &'static str,
    value: Option<&str>,
) {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        builder
            .push(" AND ")
            .push(column)
            .push(" LIKE ")
            .push_bind(like_pattern(value))
            .push(" ESCAPE '\\'");
    }
}

fn push_event_filters(
    builder: &mut QueryBuilder<'_, Sqlite>,
    filter: &AccessEventFilter,
    scope: Scope,
) {
    builder.push(" WHERE 1 = 1");

    if let Some(user_id) = filter.user_id {
        builder.push(" AND e.user_id = ").push_bind(user_id);
    }
    if let Some(lock_id) = filter.lock_id {
        builder.push(" AND e.lock_id = ").push_bind(lock_id);
    }

    push_text_filter(builder, "u.name", filter.user_name.as_deref());
    push_text_filter(builder, "u.email", filter.user_email.as_deref());
    push_text_filter(builder, "u.phone", filter.user_phone.as_deref());
    push_text_filter(builder, "l.name", filter.lock_name.as_deref());

    match scope {
        Scope::Unrestricted => {}
        Scope::AuthorizedLocks(user_id) => {
            builder
                .push(" AND (l.owner_id = ")
                .push_bind(user_id)
                .push(" OR e.lock_id IN (SELECT lock_id FROM lock_authorized_users WHERE user_id = ")
                .push_bind(user_id)
                .push("))");
        }
        Scope::OwnEvents(user_id) => {
            builder.push(" AND e.user_id = ").push_bind(user_id);
        }
    }
}

impl AccessEventRepository for SqliteAccessEventRepository {
    async fn append(&self, event: &NewAccessEvent) -> StorageResult<AccessEvent> {
        let mut tx = self.pool.begin().await?;
        let created = transaction::insert_access_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> StorageResult<Option<AccessEventView>> {
        let event = sqlx::query_as::<_, AccessEventView>(&format!("{VIEW_SELECT} WHERE e.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(event)
    }

    async fn query(
        &self,
        filter: &AccessEventFilter,
        scope: Scope,
        pagination: Pagination,
    ) -> StorageResult<Page<AccessEventView>> {
        let mut count = QueryBuilder::<Sqlite>::new(VIEW_COUNT);
        push_event_filters(&mut count, filter, scope);
        let (total,): (i64,) = count
            .build_query_as::<(i64,)>()
            .fetch_one(&self.pool)
            .await?;

        let mut select = QueryBuilder::<Sqlite>::new(VIEW_SELECT);
        push_event_filters(&mut select, filter, scope);
        select
            .push(" ORDER BY e.occurred_at DESC, e.id ASC LIMIT ")
            .push_bind(i64::from(pagination.limit))
            .push(" OFFSET ")
            .push_bind(pagination.offset());

        let items = select
            .build_query_as::<AccessEventView>()
            .fetch_all(&self.pool)
            .await?;

        let total = u64::try_from(total)
            .map_err(|_| StorageError::Validation(format!("Negative row count: {total}")))?;

        Ok(Page::new(items, pagination, total))
    }

    async fn count_for_lock(&self, lock_id: i64) -> StorageResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM access_events WHERE lock_id = ?")
            .bind(lock_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
