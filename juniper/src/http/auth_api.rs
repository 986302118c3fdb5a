use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use axum_extra::extract::SignedCookieJar;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::auth::{
    current_session, current_user, generate_csrf_token, generate_token, session_cookie,
    CsrfToken, Session, CSRF_TOKEN_LEN,
};
use crate::models::{decode_json, hash_email_token, Model, User, UserInput};

use super::error::ApiError;
use super::state::AppState;

const EMAIL_TOKEN_LEN: usize = 32;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub email: String,
    pub forename: String,
    pub surname: String,
    pub phone: String,
    pub birthdate: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyQuery {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CsrfResponse {
    pub csrf: String,
}

fn success() -> Json<MessageResponse> {
    Json(MessageResponse { message: "Success" })
}

/// Authenticates the session as `user_id` under a fresh session id.
pub(super) fn log_in(state: &AppState, jar: SignedCookieJar, user_id: i64) -> SignedCookieJar {
    let previous = current_session(state, &jar);
    let csrf_token = previous
        .as_ref()
        .and_then(|(_, session)| session.csrf_token.clone())
        .unwrap_or_else(|| generate_csrf_token(CSRF_TOKEN_LEN));
    let session = Session {
        user_id: Some(user_id),
        authenticated: true,
        csrf_token: Some(csrf_token),
    };
    let id = state
        .sessions
        .rotate(previous.as_ref().map(|(id, _)| id.as_str()), session);
    jar.add(session_cookie(id, state.secure_cookies))
}

pub async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    body: Bytes,
) -> Result<(SignedCookieJar, Json<MessageResponse>), ApiError> {
    let request: LoginRequest = decode_json(&body)?;

    let user = state.users.find_by_username(&request.username).await?;
    let Some(user) = user.filter(|user| user.check_password(&request.password)) else {
        warn!(username = %request.username, "login failed");
        return Err(ApiError::Unauthorized);
    };

    state.users.record_login(user.id).await?;
    info!(user_id = user.id, username = %user.username, "user logged in");
    Ok((log_in(&state, jar, user.id), success()))
}

pub async fn logout(State(state): State<AppState>, jar: SignedCookieJar) -> Json<MessageResponse> {
    if let Some((id, session)) = current_session(&state, &jar) {
        state.sessions.update(&id, |live| {
            live.user_id = None;
            live.authenticated = false;
        });
        info!(user_id = ?session.user_id, "user logged out");
    }
    success()
}

pub async fn status(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    match current_user(&state, &jar) {
        Some(user) => {
            debug!(user_id = user.id, "status: authenticated");
            Json(MessageResponse {
                message: "Authenticated",
            })
            .into_response()
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(MessageResponse {
                message: "Unauthorized",
            }),
        )
            .into_response(),
    }
}

pub async fn register(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    body: Bytes,
) -> Result<(SignedCookieJar, Json<MessageResponse>), ApiError> {
    let request: RegisterRequest = decode_json(&body)?;
    let username = request.username.trim();
    let email = request.email.trim();
    if username.is_empty() || email.is_empty() || request.password.is_empty() {
        return Err(ApiError::BadRequest(String::from(
            "Username, password and email are required",
        )));
    }
    let birthdate = parse_birthdate(&request.birthdate)?;

    if state.users.find_by_username(username).await?.is_some() {
        return Err(ApiError::BadRequest(String::from("Username already exists")));
    }
    if state.users.find_by_email(email).await?.is_some() {
        return Err(ApiError::BadRequest(String::from("Email already exists")));
    }

    let mut user = User::from_input(UserInput {
        username: Some(username.to_string()),
        password: Some(request.password.clone()),
        email: Some(email.to_string()),
        forename: Some(request.forename.trim().to_string()),
        surname: Some(request.surname.trim().to_string()),
        phone_number: Some(request.phone.trim().to_string()),
        birthdate,
        ..UserInput::default()
    })?;
    let token = generate_token(EMAIL_TOKEN_LEN);
    user.email_token = hash_email_token(&token)?;

    let user = state.users.create(&user).await?;
    info!(user_id = user.id, username = %user.username, "user registered");

    if let Err(err) = state
        .mailer
        .send_verification(&user.email, &user.username, &token)
        .await
    {
        error!(user_id = user.id, error = %err, "verification mail failed");
    }

    Ok((log_in(&state, jar, user.id), success()))
}

fn parse_birthdate(raw: &str) -> Result<Option<NaiveDate>, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| ApiError::BadRequest(String::from("Invalid birthdate, expected YYYY-MM-DD")))
}

pub async fn verify_email(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(query): Query<VerifyQuery>,
) -> Result<(SignedCookieJar, Json<MessageResponse>), ApiError> {
    let user = state.users.find_by_username(&query.username).await?;
    let Some(mut user) = user.filter(|user| user.check_email_token(&query.token)) else {
        warn!(username = %query.username, "email verification rejected");
        return Err(ApiError::Unauthorized);
    };

    let now = Utc::now();
    user.email_verified = true;
    user.email_token.clear();
    user.last_login_at = now;
    user.touch(now);
    let user = state.users.update(&user).await?;
    info!(user_id = user.id, "email verified");

    Ok((log_in(&state, jar, user.id), success()))
}

pub async fn csrf(Extension(token): Extension<CsrfToken>) -> Json<CsrfResponse> {
    Json(CsrfResponse { csrf: token.0 })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::NaiveDate;

    use super::parse_birthdate;

    #[test]
    fn birthdate_is_optional_but_strict() {
        assert_eq!(parse_birthdate("").unwrap(), None);
        assert_eq!(
            parse_birthdate("1990-02-28").unwrap(),
            NaiveDate::from_ymd_opt(1990, 2, 28)
        );
        assert!(parse_birthdate("28/02/1990").is_err());
        assert!(parse_birthdate("1990-02-30").is_err());
    }
}
