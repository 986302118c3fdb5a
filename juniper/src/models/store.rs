use std::fmt;
use std::marker::PhantomData;

use sqlx::query::QueryAs;
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqlitePool};
use thiserror::Error;
use tracing::debug;

use super::{FieldValue, Model};

type SqliteQueryAs<'q, O> = QueryAs<'q, Sqlite, O, SqliteArguments<'q>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{model} {id} not found")]
    NotFound { model: &'static str, id: i64 },
    #[error("unknown column {column} for {model}")]
    UnknownColumn {
        model: &'static str,
        column: String,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

/// Gives generic handlers access to the store for `T`.
pub trait StoreProvider<T: Model> {
    fn store(&self) -> &Store<T>;
}

/// Persistence for one [`Model`] over a shared pool.
pub struct Store<T> {
    pool: SqlitePool,
    _model: PhantomData<fn() -> T>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _model: PhantomData,
        }
    }
}

impl<T: Model> fmt::Debug for Store<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("table", &T::TABLE).finish()
    }
}

fn bind_value<'q, O>(query: SqliteQueryAs<'q, O>, value: FieldValue) -> SqliteQueryAs<'q, O> {
    match value {
        FieldValue::Integer(v) => query.bind(v),
        FieldValue::Bool(v) => query.bind(v),
        FieldValue::Text(v) => query.bind(v),
        FieldValue::Timestamp(v) => query.bind(v),
        FieldValue::OptionalTimestamp(v) => query.bind(v),
        FieldValue::OptionalDate(v) => query.bind(v),
    }
}

fn bind_all<'q, O>(
    query: SqliteQueryAs<'q, O>,
    values: impl IntoIterator<Item = FieldValue>,
) -> SqliteQueryAs<'q, O> {
    values.into_iter().fold(query, bind_value)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl<T: Model> Store<T> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _model: PhantomData,
        }
    }

    fn insert_sql() -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            T::TABLE,
            T::COLUMNS.join(", "),
            placeholders(T::COLUMNS.len())
        )
    }

    fn update_sql() -> String {
        let assignments = T::COLUMNS
            .iter()
            .map(|column| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {} SET {assignments} WHERE id = ? RETURNING *",
            T::TABLE
        )
    }

    fn checked_column(column: &str) -> Result<&'static str, StoreError> {
        std::iter::once(&"id")
            .chain(T::COLUMNS.iter())
            .find(|known| **known == column)
            .copied()
            .ok_or_else(|| StoreError::UnknownColumn {
                model: T::NAME,
                column: column.to_string(),
            })
    }

    /// Inserts the model, ignoring its `id`, and returns the stored row.
    pub async fn create(&self, model: &T) -> Result<T, StoreError> {
        let sql = Self::insert_sql();
        let created = bind_all(sqlx::query_as::<_, T>(&sql), model.values())
            .fetch_one(&self.pool)
            .await?;
        debug!(model = T::NAME, id = created.id(), "row created");
        Ok(created)
    }

    pub async fn read(&self, id: i64) -> Result<T, StoreError> {
        let sql = format!("SELECT * FROM {} WHERE id = ?", T::TABLE);
        sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { model: T::NAME, id })
    }

    /// Saves every column of `model` to the row with the same id.
    pub async fn update(&self, model: &T) -> Result<T, StoreError> {
        let sql = Self::update_sql();
        let id = model.id();
        let updated = bind_all(sqlx::query_as::<_, T>(&sql), model.values())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { model: T::NAME, id })?;
        debug!(model = T::NAME, id, "row updated");
        Ok(updated)
    }

    pub async fn delete(&self, id: i64) -> Result<T, StoreError> {
        let sql = format!("DELETE FROM {} WHERE id = ? RETURNING *", T::TABLE);
        let deleted = sqlx::query_as::<_, T>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { model: T::NAME, id })?;
        debug!(model = T::NAME, id, "row deleted");
        Ok(deleted)
    }

    pub async fn list(&self) -> Result<Vec<T>, StoreError> {
        let sql = format!("SELECT * FROM {} ORDER BY id", T::TABLE);
        Ok(sqlx::query_as::<_, T>(&sql).fetch_all(&self.pool).await?)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let sql = format!("SELECT COUNT(*) FROM {}", T::TABLE);
        let (count,) = sqlx::query_as::<_, (i64,)>(&sql)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn exists(
        &self,
        column: &str,
        value: impl Into<FieldValue>,
    ) -> Result<bool, StoreError> {
        let column = Self::checked_column(column)?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {column} = ?", T::TABLE);
        let (count,) = bind_value(sqlx::query_as::<_, (i64,)>(&sql), value.into())
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// First row (lowest id) whose `column` equals `value`.
    pub async fn find_one(
        &self,
        column: &str,
        value: impl Into<FieldValue>,
    ) -> Result<Option<T>, StoreError> {
        let column = Self::checked_column(column)?;
        let sql = format!(
            "SELECT * FROM {} WHERE {column} = ? ORDER BY id LIMIT 1",
            T::TABLE
        );
        Ok(bind_value(sqlx::query_as::<_, T>(&sql), value.into())
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Inserts all items in one transaction.
    pub async fn batch_create(&self, items: &[T]) -> Result<Vec<T>, StoreError> {
        let sql = Self::insert_sql();
        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(items.len());
        for item in items {
            let row = bind_all(sqlx::query_as::<_, T>(&sql), item.values())
                .fetch_one(&mut *tx)
                .await?;
            created.push(row);
        }
        tx.commit().await?;
        debug!(model = T::NAME, rows = created.len(), "batch created");
        Ok(created)
    }

    /// Saves all items in one transaction; a missing id rolls everything back.
    pub async fn batch_update(&self, items: &[T]) -> Result<Vec<T>, StoreError> {
        let sql = Self::update_sql();
        let mut tx = self.pool.begin().await?;
        let mut updated = Vec::with_capacity(items.len());
        for item in items {
            let id = item.id();
            let row = bind_all(sqlx::query_as::<_, T>(&sql), item.values())
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(StoreError::NotFound { model: T::NAME, id })?;
            updated.push(row);
        }
        tx.commit().await?;
        debug!(model = T::NAME, rows = updated.len(), "batch updated");
        Ok(updated)
    }

    /// Deletes the given ids and returns how many rows went away.
    pub async fn batch_delete(&self, ids: &[i64]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM {} WHERE id IN ({})",
            T::TABLE,
            placeholders(ids.len())
        );
        let mut tx = self.pool.begin().await?;
        let query = ids
            .iter()
            .fold(sqlx::query(&sql), |query, id| query.bind(*id));
        let affected = query.execute(&mut *tx).await?.rows_affected();
        tx.commit().await?;
        debug!(model = T::NAME, rows = affected, "batch deleted");
        Ok(affected)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use anyhow::Result;

    use super::{Store, StoreError};
    use crate::db;
    use crate::models::{Model, Post, PostInput};

    async fn post_store() -> Result<Store<Post>> {
        let pool = db::connect_in_memory().await?;
        db::migrate(&pool).await?;
        Ok(Store::new(pool))
    }

    fn draft(title: &str) -> Post {
        Post::from_input(PostInput {
            title: Some(title.to_string()),
            content: Some(format!("{title} body")),
            user_id: Some(1),
            ..PostInput::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn create_read_update_delete() -> Result<()> {
        let store = post_store().await?;

        let created = store.create(&draft("Hello")).await?;
        assert!(created.id > 0);
        assert_eq!(store.read(created.id).await?.title, "Hello");

        let mut changed = created.clone();
        changed.title = String::from("Hello again");
        let updated = store.update(&changed).await?;
        assert_eq!(updated.title, "Hello again");
        assert_eq!(updated.id, created.id);

        let deleted = store.delete(created.id).await?;
        assert_eq!(deleted.title, "Hello again");
        assert!(matches!(
            store.read(created.id).await,
            Err(StoreError::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn update_and_delete_report_missing_rows() -> Result<()> {
        let store = post_store().await?;
        let mut ghost = draft("Ghost");
        ghost.id = 42;

        assert!(matches!(
            store.update(&ghost).await,
            Err(StoreError::NotFound { id: 42, .. })
        ));
        assert!(matches!(
            store.delete(42).await,
            Err(StoreError::NotFound { id: 42, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn list_count_and_lookup() -> Result<()> {
        let store = post_store().await?;
        store.create(&draft("One")).await?;
        store.create(&draft("Two")).await?;

        let listed = store.list().await?;
        assert_eq!(listed.len(), 2);
        assert!(listed[0].id < listed[1].id);
        assert_eq!(store.count().await?, 2);

        assert!(store.exists("slug", "two").await?);
        assert!(!store.exists("slug", "three").await?);
        let found = store.find_one("slug", "one").await?;
        assert_eq!(found.map(|post| post.title), Some(String::from("One")));
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_slugs_violate_uniqueness() -> Result<()> {
        let store = post_store().await?;
        store.create(&draft("Hello")).await?;

        let err = store.create(&draft("Hello")).await.unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(store.count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_columns_are_rejected() -> Result<()> {
        let store = post_store().await?;
        let result = store.exists("slug; DROP TABLE posts", "x").await;
        assert!(matches!(result, Err(StoreError::UnknownColumn { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn batch_operations_are_all_or_nothing() -> Result<()> {
        let store = post_store().await?;
        let created = store
            .batch_create(&[draft("A"), draft("B"), draft("C")])
            .await?;
        assert_eq!(created.len(), 3);

        let mut renamed = created.clone();
        for post in &mut renamed {
            post.content = String::from("rewritten");
        }
        let mut missing = draft("Missing");
        missing.id = 999;
        renamed.push(missing);
        assert!(store.batch_update(&renamed).await.is_err());
        assert!(store
            .list()
            .await?
            .iter()
            .all(|post| post.content != "rewritten"));

        let removed = store
            .batch_delete(&[created[0].id, created[2].id, 12345])
            .await?;
        assert_eq!(removed, 2);
        assert_eq!(store.count().await?, 1);
        assert_eq!(store.batch_delete(&[]).await?, 0);
        Ok(())
    }
}
