use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::SignedCookieJar;
use tracing::{debug, warn};

use crate::http::{ApiError, AppState};

use super::session::{Session, SESSION_COOKIE};

/// The authenticated account behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
}

/// The session id from the signed cookie and its live session.
pub fn current_session(state: &AppState, jar: &SignedCookieJar) -> Option<(String, Session)> {
    let id = jar.get(SESSION_COOKIE)?.value().to_string();
    let session = state.sessions.get(&id)?;
    Some((id, session))
}

pub fn current_user(state: &AppState, jar: &SignedCookieJar) -> Option<CurrentUser> {
    let (_, session) = current_session(state, jar)?;
    session.user().map(|id| CurrentUser { id })
}

pub fn ensure_authenticated(
    state: &AppState,
    jar: &SignedCookieJar,
) -> Result<CurrentUser, ApiError> {
    match current_user(state, jar) {
        Some(user) => {
            debug!(user_id = user.id, "authorized request using session");
            Ok(user)
        }
        None => {
            warn!("unauthorized request");
            Err(ApiError::Unauthorized)
        }
    }
}

/// Gate for HTML areas: anonymous page loads go to `/login`, anything else gets 401.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    match current_user(&state, &jar) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None if request.method() == Method::GET || request.method() == Method::HEAD => {
            debug!(path = %request.uri().path(), "redirecting anonymous visitor to login");
            Redirect::to("/login").into_response()
        }
        None => ApiError::Unauthorized.into_response(),
    }
}
