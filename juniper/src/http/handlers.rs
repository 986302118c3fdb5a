use std::sync::Arc;

use axum::extract::State;
use axum::http::header::{HeaderName, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::auth::{csrf_protect, require_auth, CSRF_HEADER};
use crate::models::{ModelHandler, Post, User};

use super::auth_api;
use super::pages;
use super::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
}

pub fn router(state: AppState) -> Router {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(20)
            .burst_size(50)
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .unwrap_or_else(|| unreachable!("static governor config is valid")),
    );

    let dashboard = Router::new()
        .route("/dashboard", get(pages::dashboard))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .route("/api/auth/login", post(auth_api::login))
        .route("/api/auth/logout", post(auth_api::logout))
        .route("/api/auth/status", get(auth_api::status))
        .route("/api/auth/register", post(auth_api::register))
        .route("/api/auth/verify-email", get(auth_api::verify_email))
        .route("/api/auth/csrf", get(auth_api::csrf))
        .merge(ModelHandler::<User>::routes())
        .merge(ModelHandler::<Post>::routes())
        .merge(dashboard)
        .route("/", get(pages::home))
        .route("/about", get(pages::about))
        .route("/blog", get(pages::blog))
        .route("/blog/{slug}", get(pages::blog_post))
        .route("/login", get(pages::login))
        .route("/register", get(pages::register))
        .route("/verify", get(pages::verify))
        .route("/logout", get(pages::logout))
        .fallback(pages::fallback)
        .layer(from_fn_with_state(state.clone(), csrf_protect))
        .layer(cors_layer(&state.allowed_origins))
        .layer(GovernorLayer::new(governor_conf))
        .layer(tower_http::request_id::SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            tower_http::request_id::MakeRequestUuid::default(),
        ))
        .layer(tower_http::request_id::PropagateRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) if origin != "*" => Some(value),
            _ => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([CONTENT_TYPE, HeaderName::from_static(CSRF_HEADER)])
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.sessions.count(),
    })
}
