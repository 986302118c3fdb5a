//! Entities persisted in SQLite and the generic machinery that exposes them.
//!
//! A type implementing [`Model`] gets a [`Store`] (one SQL statement per
//! operation) and a [`ModelHandler`] (five REST routes under `/api/<route>`).

mod handler;
mod post;
mod store;
mod user;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::FromRow;
use thiserror::Error;

use crate::auth::PasswordError;

pub use handler::ModelHandler;
pub(crate) use handler::decode_json;
pub use post::{slugify, Post, PostInput};
pub use store::{Store, StoreError, StoreProvider};
pub use user::{hash_email_token, User, UserInput, ADMIN_ROLE, DEFAULT_ROLE};

/// A column value ready to be bound to a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Bool(bool),
    Text(String),
    Timestamp(DateTime<Utc>),
    OptionalTimestamp(Option<DateTime<Utc>>),
    OptionalDate(Option<NaiveDate>),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("{0}")]
    Forbidden(&'static str),
    #[error(transparent)]
    Password(#[from] PasswordError),
}

/// A write the session user is about to make, with the stored row when there is one.
#[derive(Debug)]
pub enum Write<'a, T, I> {
    Create(&'a I),
    Update(&'a T, &'a I),
    Delete(&'a T),
}

/// An entity bound to one table.
///
/// `COLUMNS` lists every writable column (everything but `id`) in the order
/// [`Model::values`] returns them. `Input` is the JSON shape accepted by the
/// create and update endpoints.
pub trait Model:
    Serialize + for<'r> FromRow<'r, SqliteRow> + Send + Sync + Unpin + 'static
{
    type Input: DeserializeOwned + Send + 'static;

    /// Name shown in the model registry.
    const NAME: &'static str;
    /// Path segment under `/api/`.
    const ROUTE: &'static str;
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    /// Whether list and get-one are served without a session.
    const PUBLIC_READ: bool;

    fn id(&self) -> i64;

    fn values(&self) -> Vec<FieldValue>;

    fn from_input(input: Self::Input) -> Result<Self, ModelError>
    where
        Self: Sized;

    fn apply(&mut self, input: Self::Input) -> Result<(), ModelError>;

    fn touch(&mut self, now: DateTime<Utc>);

    /// Called on create with the session user; entities without an owner ignore it.
    fn set_owner(&mut self, _user_id: i64) {}

    /// Whether `actor` may make `write`. Open to every session unless overridden.
    fn authorize(_actor: &User, _write: Write<'_, Self, Self::Input>) -> Result<(), ModelError>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Schema applied at start-up. Every statement is idempotent.
pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL,
        password TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        last_login_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        forename TEXT NOT NULL DEFAULT '',
        surname TEXT NOT NULL DEFAULT '',
        birthdate TEXT,
        email_token TEXT NOT NULL DEFAULT '',
        email_verified INTEGER NOT NULL DEFAULT 0,
        phone_number TEXT NOT NULL DEFAULT '',
        phone_verified INTEGER NOT NULL DEFAULT 0,
        user_role TEXT NOT NULL DEFAULT 'user'
    )",
    "DROP INDEX IF EXISTS idx_users_username",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username_unique ON users (username)",
    "CREATE TABLE IF NOT EXISTS posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        deleted_at TEXT,
        slug TEXT NOT NULL,
        title TEXT NOT NULL,
        content TEXT NOT NULL,
        user_id INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_posts_deleted_at ON posts (deleted_at)",
    "DROP INDEX IF EXISTS idx_posts_slug",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_posts_slug_unique ON posts (slug)",
];

fn require_text(field: &'static str, value: Option<String>) -> Result<String, ModelError> {
    match value.map(|raw| raw.trim().to_string()) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(ModelError::MissingField(field)),
    }
}
