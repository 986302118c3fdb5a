use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use crate::auth::SessionStore;
use crate::mailer::Mailer;
use crate::models::{Model, Post, Store, StoreProvider, User};

#[derive(Clone)]
pub struct AppState {
    pub users: Store<User>,
    pub posts: Store<Post>,
    pub sessions: SessionStore,
    pub cookie_key: Key,
    pub mailer: Mailer,
    pub allowed_origins: Arc<[String]>,
    pub secure_cookies: bool,
}

impl AppState {
    /// Names of the entities served by a model handler, in registration order.
    pub fn model_names(&self) -> Vec<&'static str> {
        vec![User::NAME, Post::NAME]
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

impl StoreProvider<User> for AppState {
    fn store(&self) -> &Store<User> {
        &self.users
    }
}

impl StoreProvider<Post> for AppState {
    fn store(&self) -> &Store<Post> {
        &self.posts
    }
}
