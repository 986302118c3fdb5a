//! SQLite pool set-up, schema creation and first-run seeding.

use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::config::AdminSeed;
use crate::models::{Store, User, ADMIN_ROLE, SCHEMA};

/// Opens (creating if needed) the database file in WAL mode.
pub async fn connect(path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;

    info!(path = %path.display(), "database connected");
    Ok(pool)
}

/// A private in-memory database. One connection, so every query sees the same data.
pub async fn connect_in_memory() -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("failed to open in-memory database")?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| format!("schema statement failed: {statement}"))?;
    }
    info!(statements = SCHEMA.len(), "schema up to date");
    Ok(())
}

/// Creates the administrator account unless a user with that name exists.
/// Returns whether an account was created.
pub async fn seed_admin(users: &Store<User>, seed: &AdminSeed) -> anyhow::Result<bool> {
    if users.exists("username", seed.username.as_str()).await? {
        return Ok(false);
    }

    let mut admin = User::new(&seed.username, &seed.password, &seed.email)
        .context("failed to hash admin password")?;
    admin.user_role = String::from(ADMIN_ROLE);
    admin.email_verified = true;
    let admin = users.create(&admin).await?;

    if seed.password == "admin" {
        warn!(
            username = %admin.username,
            "seeded administrator with the default password; change it"
        );
    }
    info!(id = admin.id, username = %admin.username, "administrator account created");
    Ok(true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::{connect, connect_in_memory, migrate, seed_admin};
    use crate::config::AdminSeed;
    use crate::models::{Store, User};

    #[tokio::test]
    async fn migrate_is_idempotent() -> Result<()> {
        let pool = connect_in_memory().await?;
        migrate(&pool).await?;
        migrate(&pool).await?;
        Ok(())
    }

    #[tokio::test]
    async fn seed_admin_runs_once() -> Result<()> {
        let pool = connect_in_memory().await?;
        migrate(&pool).await?;
        let users: Store<User> = Store::new(pool);
        let seed = AdminSeed::default();

        assert!(seed_admin(&users, &seed).await?);
        assert!(!seed_admin(&users, &seed).await?);

        let admin = users.find_one("username", "admin").await?.unwrap();
        assert!(admin.is_admin());
        assert!(admin.email_verified);
        assert!(admin.check_password("admin"));
        assert_eq!(users.count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn connect_creates_parent_directory() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("juniper.db");

        let pool = connect(&path).await?;
        migrate(&pool).await?;
        pool.close().await;

        assert!(path.exists());
        Ok(())
    }
}
