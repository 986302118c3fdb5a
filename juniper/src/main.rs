//! # juniper
//!
//! A small personal CMS: a blog, a dashboard and JSON CRUD endpoints.
//!
//! ## Architecture
//!
//! - **Models**: `User` and `Post` rows in SQLite, each exposed through a generic `ModelHandler`
//! - **Auth**: server-side sessions behind a signed cookie, Argon2 passwords, CSRF tokens
//! - **Views**: HTML rendered from plain string builders
//! - **HTTP**: Axum router with rate limiting, CORS, request IDs, and graceful shutdown

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

mod auth;
mod config;
mod db;
mod http;
mod mailer;
mod models;
mod promise;
mod views;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::serve;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::auth::{cookie_key, init_session_key, SessionStore};
use crate::config::{AppConfig, Cli};
use crate::http::{router, AppState};
use crate::mailer::Mailer;
use crate::models::Store;

const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging().context("failed to initialize logging")?;

    let cli = Cli::parse();
    let config = AppConfig::from_cli(cli).context("failed to load configuration")?;
    info!(
        bind = %config.bind,
        database = %config.database.display(),
        session_key_file = %config.session_key_file.display(),
        site_url = %config.site_url,
        allowed_origins = ?config.allowed_origins,
        session_ttl = %humantime::format_duration(config.session_ttl),
        secure_cookies = config.secure_cookies,
        "configuration loaded"
    );

    let pool = db::connect(&config.database)
        .await
        .context("failed to open database")?;
    db::migrate(&pool).await.context("failed to migrate database")?;

    let users = Store::new(pool.clone());
    let posts = Store::new(pool);
    if db::seed_admin(&users, &config.admin)
        .await
        .context("failed to seed administrator")?
    {
        info!(username = %config.admin.username, "first start; administrator seeded");
    }

    let master_key = init_session_key(&config.session_key_file).with_context(|| {
        format!(
            "failed to initialize session key {}",
            config.session_key_file.display()
        )
    })?;
    let key = cookie_key(&master_key).context("failed to derive cookie key")?;

    let mailer = Mailer::new(&config.smtp, &config.site_url).context("failed to configure mailer")?;
    info!(enabled = mailer.is_enabled(), "mailer ready");

    let sessions = SessionStore::new(config.session_ttl);
    spawn_session_reaper(sessions.clone(), SESSION_PURGE_INTERVAL);

    let state = AppState {
        users,
        posts,
        sessions,
        cookie_key: key,
        mailer,
        allowed_origins: Arc::from(config.allowed_origins.clone()),
        secure_cookies: config.secure_cookies,
    };

    let app = router(state);
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    let shutdown = tokio::signal::ctrl_c();
    info!(bind = %config.bind, "juniper listening");

    serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = shutdown.await;
        info!("shutting down gracefully");
    })
    .await
    .context("server exited with error")
}

/// Initialize tracing subscriber with `RUST_LOG` env filter (default: `info`).
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}

/// Spawns a background task that drops expired sessions at the given interval.
fn spawn_session_reaper(sessions: SessionStore, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let purged = sessions.purge_expired();
            if purged > 0 {
                info!(purged, active = sessions.count(), "expired sessions purged");
            } else {
                debug!(active = sessions.count(), "no expired sessions");
            }
        }
    });
}
