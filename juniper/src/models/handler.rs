use std::marker::PhantomData;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{any, get};
use axum::{Json, Router};
use axum_extra::extract::SignedCookieJar;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::auth::{ensure_authenticated, CurrentUser};
use crate::http::{ApiError, AppState};

use super::{Model, Store, StoreError, StoreProvider, User, Write};

/// REST surface for one [`Model`]:
///
/// | method | path                | action                  |
/// |--------|---------------------|-------------------------|
/// | GET    | `/api/<route>[/]`   | list                    |
/// | POST   | `/api/<route>[/]`   | create                  |
/// | GET    | `/api/<route>/{id}` | get one                 |
/// | PUT    | `/api/<route>/{id}` | apply fields and save   |
/// | DELETE | `/api/<route>/{id}` | delete, returns the row |
///
/// Writes need a logged-in session and must pass [`Model::authorize`]. Reads
/// need a session too unless `T::PUBLIC_READ`.
pub struct ModelHandler<T>(PhantomData<fn() -> T>);

impl<T> ModelHandler<T>
where
    T: Model,
    AppState: StoreProvider<T>,
{
    pub fn routes() -> Router<AppState> {
        let base = format!("/api/{}", T::ROUTE);
        Router::new()
            .route(&base, get(list::<T>).post(create::<T>))
            .route(
                &format!("{base}/"),
                get(list::<T>)
                    .post(create::<T>)
                    .put(endpoint_not_found)
                    .delete(endpoint_not_found),
            )
            .route(
                &format!("{base}/{{id}}"),
                get(get_one::<T>).put(update::<T>).delete(remove::<T>),
            )
            .route(&format!("{base}/{{id}}/{{*rest}}"), any(endpoint_not_found))
    }
}

fn store<T>(state: &AppState) -> &Store<T>
where
    T: Model,
    AppState: StoreProvider<T>,
{
    StoreProvider::<T>::store(state)
}

fn authorize_read<T: Model>(
    state: &AppState,
    jar: &SignedCookieJar,
) -> Result<Option<CurrentUser>, ApiError> {
    if T::PUBLIC_READ {
        Ok(None)
    } else {
        ensure_authenticated(state, jar).map(Some)
    }
}

/// The account behind the session, loaded so its role can be checked.
async fn session_actor(state: &AppState, jar: &SignedCookieJar) -> Result<User, ApiError> {
    let current = ensure_authenticated(state, jar)?;
    match state.users.read(current.id).await {
        Ok(user) => Ok(user),
        Err(StoreError::NotFound { .. }) => {
            warn!(user_id = current.id, "session user no longer exists");
            Err(ApiError::Unauthorized)
        }
        Err(err) => Err(err.into()),
    }
}

fn authorize<T: Model>(actor: &User, write: Write<'_, T, T::Input>) -> Result<(), ApiError> {
    T::authorize(actor, write).map_err(|err| {
        warn!(model = T::NAME, user_id = actor.id, error = %err, "write denied");
        ApiError::from(err)
    })
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid id: {raw}")))
}

pub(crate) fn decode_json<I: DeserializeOwned>(body: &Bytes) -> Result<I, ApiError> {
    serde_json::from_slice(body).map_err(|err| ApiError::BadRequest(format!("Invalid JSON: {err}")))
}

async fn endpoint_not_found() -> ApiError {
    ApiError::endpoint_not_found()
}

async fn list<T>(
    State(state): State<AppState>,
    jar: SignedCookieJar,
) -> Result<Json<Vec<T>>, ApiError>
where
    T: Model,
    AppState: StoreProvider<T>,
{
    authorize_read::<T>(&state, &jar)?;
    let items = store::<T>(&state).list().await?;
    debug!(model = T::NAME, items = items.len(), "list requested");
    Ok(Json(items))
}

async fn get_one<T>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    jar: SignedCookieJar,
) -> Result<Json<T>, ApiError>
where
    T: Model,
    AppState: StoreProvider<T>,
{
    authorize_read::<T>(&state, &jar)?;
    let id = parse_id(&id)?;
    let item = store::<T>(&state).read(id).await?;
    debug!(model = T::NAME, id, "item requested");
    Ok(Json(item))
}

async fn create<T>(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    body: Bytes,
) -> Result<Json<T>, ApiError>
where
    T: Model,
    AppState: StoreProvider<T>,
{
    let actor = session_actor(&state, &jar).await?;
    let input: T::Input = decode_json(&body)?;
    authorize::<T>(&actor, Write::Create(&input))?;
    let mut item = T::from_input(input)?;
    item.set_owner(actor.id);

    let created = store::<T>(&state).create(&item).await?;
    info!(model = T::NAME, id = created.id(), user_id = actor.id, "created");
    Ok(Json(created))
}

async fn update<T>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    jar: SignedCookieJar,
    body: Bytes,
) -> Result<Json<T>, ApiError>
where
    T: Model,
    AppState: StoreProvider<T>,
{
    let actor = session_actor(&state, &jar).await?;
    let id = parse_id(&id)?;
    let store = store::<T>(&state);

    let mut item = store.read(id).await?;
    let input: T::Input = decode_json(&body)?;
    authorize::<T>(&actor, Write::Update(&item, &input))?;
    item.apply(input)?;
    item.touch(Utc::now());

    let updated = store.update(&item).await?;
    info!(model = T::NAME, id, user_id = actor.id, "updated");
    Ok(Json(updated))
}

async fn remove<T>(
    State(state): State<AppState>,
    Path(id): Path<String>,
    jar: SignedCookieJar,
) -> Result<Json<T>, ApiError>
where
    T: Model,
    AppState: StoreProvider<T>,
{
    let actor = session_actor(&state, &jar).await?;
    let id = parse_id(&id)?;
    let store = store::<T>(&state);

    let item = store.read(id).await?;
    authorize::<T>(&actor, Write::Delete(&item))?;
    let deleted = store.delete(id).await?;
    info!(model = T::NAME, id, user_id = actor.id, "deleted");
    Ok(Json(deleted))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::body::Bytes;
    use axum::http::StatusCode;

    use super::{decode_json, parse_id};
    use crate::models::PostInput;

    #[test]
    fn ids_must_be_numeric() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert_eq!(
            parse_id("forty-two").unwrap_err().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn json_bodies_tolerate_extra_fields() {
        let input: PostInput =
            decode_json(&Bytes::from_static(br#"{"title":"T","csrf":"x"}"#)).unwrap();
        assert_eq!(input.title.as_deref(), Some("T"));

        let err = decode_json::<PostInput>(&Bytes::from_static(b"{")).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
