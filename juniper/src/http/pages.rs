use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::Extension;
use axum_extra::extract::SignedCookieJar;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::auth::{current_session, current_user, removal_cookie, CsrfToken, CurrentUser};
use crate::models::{Model, Post, User};
use crate::promise::Promise;
use crate::views;

use super::error::ApiError;
use super::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VerifyParams {
    pub token: String,
    pub username: String,
}

async fn session_user(state: &AppState, user: Option<CurrentUser>) -> Option<User> {
    let user = user?;
    match state.users.read(user.id).await {
        Ok(found) => Some(found),
        Err(err) => {
            warn!(user_id = user.id, error = %err, "session user could not be loaded");
            None
        }
    }
}

async fn render(state: &AppState, jar: &SignedCookieJar, content: &str) -> Html<String> {
    let user = session_user(state, current_user(state, jar)).await;
    views::app(
        views::SITE_TITLE,
        &views::header(user.as_ref()),
        content,
        &views::footer(),
    )
}

fn published(posts: Vec<Post>) -> Vec<Post> {
    posts
        .into_iter()
        .filter(|post| post.deleted_at.is_none())
        .collect()
}

pub async fn home(State(state): State<AppState>, jar: SignedCookieJar) -> Html<String> {
    render(&state, &jar, &views::paragraph("Home page content.")).await
}

pub async fn about(State(state): State<AppState>, jar: SignedCookieJar) -> Html<String> {
    render(&state, &jar, &views::about()).await
}

pub async fn blog(
    State(state): State<AppState>,
    jar: SignedCookieJar,
) -> Result<Html<String>, ApiError> {
    let posts = published(state.posts.list().await?);
    debug!(posts = posts.len(), "blog requested");
    Ok(render(&state, &jar, &views::blog(&posts)).await)
}

pub async fn blog_post(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    jar: SignedCookieJar,
) -> Result<Response, ApiError> {
    let mut found = state.posts.find_one("slug", slug.as_str()).await?;
    if found.is_none() {
        if let Ok(id) = slug.parse::<i64>() {
            found = state.posts.read(id).await.ok();
        }
    }

    match found.filter(|post| post.deleted_at.is_none()) {
        Some(post) => Ok(render(&state, &jar, &views::post(&post))
            .await
            .into_response()),
        None => Ok(not_found_page(&state, &jar).await),
    }
}

pub async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Extension(csrf): Extension<CsrfToken>,
) -> Html<String> {
    render(&state, &jar, &views::login(&csrf.0)).await
}

pub async fn register(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Extension(csrf): Extension<CsrfToken>,
) -> Html<String> {
    render(&state, &jar, &views::register(&csrf.0)).await
}

/// Confirms an email address from the link sent at registration. The visitor
/// must be logged in as the account named in the link.
pub async fn verify(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(params): Query<VerifyParams>,
) -> Result<Response, ApiError> {
    let Some(session_user) = current_user(&state, &jar) else {
        let content = views::paragraph("Please log in to verify your email address.");
        return Ok((StatusCode::UNAUTHORIZED, render(&state, &jar, &content).await).into_response());
    };

    let user = state.users.find_by_username(&params.username).await?;
    let verified = match user {
        Some(mut user) if user.id == session_user.id && user.check_email_token(&params.token) => {
            let now = Utc::now();
            user.email_verified = true;
            user.email_token.clear();
            user.last_login_at = now;
            user.touch(now);
            let user = state.users.update(&user).await?;
            info!(user_id = user.id, "email verified from link");
            true
        }
        _ => {
            warn!(username = %params.username, "verification link rejected");
            false
        }
    };

    Ok(render(&state, &jar, &views::verify(verified))
        .await
        .into_response())
}

pub async fn logout(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    if let Some((id, session)) = current_session(&state, &jar) {
        state.sessions.remove(&id);
        info!(user_id = ?session.user_id, "session ended");
    }
    let jar = jar.remove(removal_cookie());
    let page = views::app(
        views::SITE_TITLE,
        &views::header(None),
        &views::logged_out(),
        &views::footer(),
    );
    (jar, page).into_response()
}

/// Model overview and post list. Loads run concurrently.
pub async fn dashboard(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Extension(user): Extension<CurrentUser>,
    Extension(csrf): Extension<CsrfToken>,
) -> Result<Html<String>, ApiError> {
    let posts = {
        let store = state.posts.clone();
        Promise::new(async move { Ok::<_, anyhow::Error>(store.list().await?) })
    };
    let counts = {
        let users = state.users.clone();
        let posts = state.posts.clone();
        Promise::all(vec![
            Promise::new(async move { Ok::<_, anyhow::Error>(users.count().await?) }),
            Promise::new(async move { Ok::<_, anyhow::Error>(posts.count().await?) }),
        ])
    };

    let posts = published(posts.resolve().await.map_err(ApiError::internal)?);
    let counts = counts.resolve().await.map_err(ApiError::internal)?;
    let models: Vec<(&str, i64)> = state.model_names().into_iter().zip(counts).collect();
    debug!(user_id = user.id, posts = posts.len(), "dashboard requested");

    Ok(render(&state, &jar, &views::dashboard(&models, &posts, &csrf.0)).await)
}

async fn not_found_page(state: &AppState, jar: &SignedCookieJar) -> Response {
    (
        StatusCode::NOT_FOUND,
        render(state, jar, &views::not_found()).await,
    )
        .into_response()
}

/// JSON for unknown `/api/` paths, the HTML 404 page for everything else.
pub async fn fallback(State(state): State<AppState>, jar: SignedCookieJar, uri: Uri) -> Response {
    if uri.path().starts_with("/api/") {
        debug!(path = %uri.path(), "unknown endpoint");
        return ApiError::endpoint_not_found().into_response();
    }
    not_found_page(&state, &jar).await
}
