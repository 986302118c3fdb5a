//! Cookie sessions, password hashing and CSRF protection.
//!
//! ## Sessions
//!
//! Session state lives server-side in [`SessionStore`]. The browser only holds
//! the session id, inside the signed `juniper-session` cookie. The signing key
//! is derived from a 32-byte master key kept in a file (`session.key` by
//! default, created with mode 0600 on first start).
//!
//! ## CSRF
//!
//! Every session carries a CSRF token. Safe requests make sure one exists;
//! state-changing requests must echo it back in the `x-csrf-token` header or
//! in a `csrf` field of a JSON or urlencoded body.

mod csrf;
mod guard;
mod key;
mod password;
mod session;

pub use csrf::{csrf_protect, generate_csrf_token, CsrfToken, CSRF_HEADER, CSRF_TOKEN_LEN};
pub use guard::{current_session, current_user, ensure_authenticated, require_auth, CurrentUser};
pub use key::{cookie_key, generate_random_key, generate_token, init_session_key, SESSION_KEY_LEN};
pub use password::{hash_password, verify_password, PasswordError};
pub use session::{removal_cookie, session_cookie, Session, SessionStore};
