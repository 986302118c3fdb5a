use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::SignedCookieJar;
use percent_encoding::percent_decode_str;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::http::{ApiError, AppState};

use super::key::generate_token;
use super::session::{session_cookie, Session, SESSION_COOKIE};

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FIELD: &str = "csrf";
pub const CSRF_TOKEN_LEN: usize = 32;
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Safe routes whose handlers render the token. Only these start a session
/// for a visitor without one.
const TOKEN_PATHS: &[&str] = &["/login", "/register", "/dashboard", "/api/auth/csrf"];

/// Token of the current session, available to handlers of safe requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

pub fn generate_csrf_token(length: usize) -> String {
    generate_token(length)
}

/// Issues tokens on safe requests and checks them on state-changing ones.
pub async fn csrf_protect(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    request: Request,
    next: Next,
) -> Response {
    if is_safe(request.method()) {
        issue(state, jar, request, next).await
    } else {
        match verify(&state, &jar, request).await {
            Ok(request) => next.run(request).await,
            Err(err) => err.into_response(),
        }
    }
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

async fn issue(state: AppState, jar: SignedCookieJar, mut request: Request, next: Next) -> Response {
    let existing = jar
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .and_then(|id| state.sessions.get(&id).map(|session| (id, session)));

    let (token, jar) = match existing {
        Some((_, Session {
            csrf_token: Some(token),
            ..
        })) => (token, jar),
        Some((id, _)) => {
            let token = generate_csrf_token(CSRF_TOKEN_LEN);
            let stored = token.clone();
            state.sessions.update(&id, move |session| session.csrf_token = Some(stored));
            (token, jar)
        }
        None if !TOKEN_PATHS.contains(&request.uri().path()) => return next.run(request).await,
        None => {
            let token = generate_csrf_token(CSRF_TOKEN_LEN);
            let id = state.sessions.create(Session::with_csrf(token.clone()));
            debug!("new session issued");
            (token, jar.add(session_cookie(id, state.secure_cookies)))
        }
    };

    request.extensions_mut().insert(CsrfToken(token));
    let response = next.run(request).await;
    (jar, response).into_response()
}

async fn verify(
    state: &AppState,
    jar: &SignedCookieJar,
    request: Request,
) -> Result<Request, ApiError> {
    let expected = jar
        .get(SESSION_COOKIE)
        .and_then(|cookie| state.sessions.get(cookie.value()))
        .and_then(|session| session.csrf_token)
        .ok_or_else(|| {
            warn!(method = %request.method(), path = %request.uri().path(), "state-changing request without session");
            ApiError::Unauthorized
        })?;

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| ApiError::BadRequest(String::from("Request body too large")))?;

    let submitted = header_token(&parts.headers).or_else(|| body_token(&parts.headers, &bytes));
    let matches = submitted
        .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);
    if !matches {
        warn!(method = %parts.method, path = %parts.uri.path(), "CSRF token mismatch");
        return Err(ApiError::CsrfMismatch);
    }

    Ok(Request::from_parts(parts, Body::from(bytes)))
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn body_token(headers: &HeaderMap, body: &Bytes) -> Option<String> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("application/json") {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        value.get(CSRF_FIELD)?.as_str().map(String::from)
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        form_field(std::str::from_utf8(body).ok()?, CSRF_FIELD)
    } else {
        None
    }
}

/// First value of `name` in an urlencoded form.
fn form_field(form: &str, name: &str) -> Option<String> {
    form.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if decode_form_component(key)? == name {
            decode_form_component(value)
        } else {
            None
        }
    })
}

fn decode_form_component(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::body::Bytes;
    use axum::http::header::CONTENT_TYPE;
    use axum::http::{HeaderMap, HeaderValue};

    use super::{body_token, form_field, generate_csrf_token, header_token, CSRF_HEADER};

    #[test]
    fn tokens_are_random() {
        let token = generate_csrf_token(32);
        assert_eq!(token.len(), 44);
        assert_ne!(token, generate_csrf_token(32));
    }

    #[test]
    fn form_field_decodes_values() {
        assert_eq!(
            form_field("title=a+b&csrf=x%2By%3D", "csrf").as_deref(),
            Some("x+y=")
        );
        assert_eq!(form_field("csrf", "csrf").as_deref(), Some(""));
        assert!(form_field("title=x", "csrf").is_none());
    }

    #[test]
    fn token_sources() {
        let mut headers = HeaderMap::new();
        assert!(header_token(&headers).is_none());
        headers.insert(CSRF_HEADER, HeaderValue::from_static("abc"));
        assert_eq!(header_token(&headers).as_deref(), Some("abc"));

        let mut json = HeaderMap::new();
        json.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let body = Bytes::from_static(br#"{"title":"t","csrf":"tok"}"#);
        assert_eq!(body_token(&json, &body).as_deref(), Some("tok"));
        assert!(body_token(&json, &Bytes::from_static(b"not json")).is_none());

        let mut form = HeaderMap::new();
        form.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=utf-8"),
        );
        let body = Bytes::from_static(b"csrf=tok&x=1");
        assert_eq!(body_token(&form, &body).as_deref(), Some("tok"));

        assert!(body_token(&HeaderMap::new(), &body).is_none());
    }
}
