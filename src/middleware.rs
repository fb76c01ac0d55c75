//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;

use crate::cookie::{ACCESS_COOKIE_NAME, get_cookie};
use crate::user::User;
use crate::{AppState, ServerError};

const BEARER: &str = "Bearer ";

/// Access token sent either as a cookie or as a bearer token.
fn access_token(headers: &HeaderMap) -> Option<&str> {
    get_cookie(headers, ACCESS_COOKIE_NAME)
        .filter(|token| !token.is_empty())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|header| header.to_str().ok())
                .and_then(|header| header.strip_prefix(BEARER))
                .map(str::trim)
        })
}

/// Custom middleware for authentification.
///
/// Inserts the authenticated [`User`] into request extensions.
pub async fn auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    let Some(token) = access_token(req.headers()) else {
        return Err(ServerError::Authentication("Unauthorized request."));
    };

    let user: User = state.sessions.authenticate(token).await?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
