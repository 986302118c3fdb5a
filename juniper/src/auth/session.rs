use std::sync::Arc;
use std::time::{Duration, Instant};

use axum_extra::extract::cookie::{Cookie, SameSite};
use dashmap::DashMap;

pub const SESSION_COOKIE: &str = "juniper-session";

/// Server-side state behind one session cookie.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub user_id: Option<i64>,
    pub authenticated: bool,
    pub csrf_token: Option<String>,
}

impl Session {
    pub fn with_csrf(token: String) -> Self {
        Self {
            csrf_token: Some(token),
            ..Self::default()
        }
    }

    /// The logged-in user, if any.
    pub fn user(&self) -> Option<i64> {
        if self.authenticated {
            self.user_id
        } else {
            None
        }
    }
}

/// Session id -> (session, expires_at).
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<DashMap<String, (Session, Instant)>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn create(&self, session: Session) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let expires = Instant::now() + self.ttl;
        self.inner.insert(id.clone(), (session, expires));
        id
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        let entry = self.inner.get(id)?;
        if entry.1 > Instant::now() {
            Some(entry.0.clone())
        } else {
            drop(entry);
            self.inner.remove(id);
            None
        }
    }

    /// Mutates a live session in place. Returns `false` if it is gone or expired.
    pub fn update(&self, id: &str, change: impl FnOnce(&mut Session)) -> bool {
        let Some(mut entry) = self.inner.get_mut(id) else {
            return false;
        };
        if entry.1 <= Instant::now() {
            drop(entry);
            self.inner.remove(id);
            return false;
        }
        change(&mut entry.0);
        true
    }

    /// Replaces `old_id` with a fresh id holding `session`.
    pub fn rotate(&self, old_id: Option<&str>, session: Session) -> String {
        if let Some(old_id) = old_id {
            self.inner.remove(old_id);
        }
        self.create(session)
    }

    pub fn remove(&self, id: &str) {
        self.inner.remove(id);
    }

    /// Drops every expired session and returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, (_, expires)| *expires > now);
        before.saturating_sub(self.inner.len())
    }

    pub fn count(&self) -> usize {
        self.inner.len()
    }
}

pub fn session_cookie(id: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

/// Cookie that, passed to `jar.remove`, expires the session cookie.
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, "")).path("/").build()
}
