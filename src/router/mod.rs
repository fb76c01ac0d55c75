//! HTTP transport.
pub mod current_user;
pub mod login;
pub mod logout;
pub mod refresh_token;
pub mod register;
pub mod status;

use std::convert::Infallible;
use std::sync::LazyLock;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, FromRequest, Request};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use regex_lite::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tower_http::limit::RequestBodyLimitLayer;
use validator::{Validate, ValidationError};

use crate::token::TokenPair;
use crate::user::User;
use crate::{AppState, ServerError};

static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap());

/// Usernames are made of ASCII letters, digits, `_`, `.` and `-`.
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if !USERNAME.is_match(username.trim()) {
        return Err(ValidationError::new("username"));
    }

    Ok(())
}

/// JSON body checked with [`Validate`] before reaching the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Authenticated user with its token pair.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user: User,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

/// `/api/v1/users` routes.
pub fn users(state: AppState) -> Router<AppState> {
    let max_size = state.config.upload.max_size;

    let protected = Router::new()
        // `POST /logout` goes to `logout`. Authorization required.
        .route("/logout", post(logout::handler))
        // `GET /current-user` goes to `current_user`. Authorization required.
        .route("/current-user", get(current_user::handler))
        .route_layer(middleware::from_fn_with_state(state, crate::middleware::auth));

    Router::new()
        .route(
            "/register",
            post(register::handler)
                .layer::<_, Infallible>(DefaultBodyLimit::disable())
                .layer::<_, Infallible>(RequestBodyLimitLayer::new(max_size)),
        )
        .route("/login", post(login::handler))
        .route("/refresh-token", post(refresh_token::handler))
        .merge(protected)
}
