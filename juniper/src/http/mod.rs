//! HTTP layer: Axum router, auth API, pages and the error type.
//!
//! JSON lives under `/api/` (auth endpoints plus one model handler per
//! entity); everything else is server-rendered HTML. The whole router sits
//! behind the CSRF middleware, and `/dashboard` additionally behind the
//! session guard.

mod auth_api;
mod error;
mod handlers;
mod pages;
mod state;


pub use error::ApiError;
pub use handlers::router;
pub use state::AppState;
