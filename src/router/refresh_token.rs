//! Get a new token pair with refresh token.

use axum::extract::{FromRequest, Request, State};
use axum::http::header;
use axum::{Form, Json};
use serde::Deserialize;

use crate::cookie::{REFRESH_COOKIE_NAME, get_cookie, session_cookies};
use crate::error::Result;
use crate::response::ApiResponse;
use crate::token::TokenPair;
use crate::{AppState, ServerError};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    refresh_token: Option<String>,
}

/// Read `refreshToken` from a JSON or url-encoded body.
///
/// Any other content type carries no token.
async fn from_body(req: Request, state: &AppState) -> Result<Option<String>> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let body = if content_type.starts_with("application/json") {
        let Json(body) = Json::<Body>::from_request(req, state).await?;
        body
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(body) = Form::<Body>::from_request(req, state)
            .await
            .map_err(|err| ServerError::ParsingForm(Box::new(err)))?;
        body
    } else {
        Body::default()
    };

    Ok(body.refresh_token)
}

/// Handler to rotate the session.
///
/// The `refreshToken` cookie wins; the body is only read without it.
pub async fn handler(State(state): State<AppState>, req: Request) -> Result<ApiResponse<TokenPair>> {
    let cookie = get_cookie(req.headers(), REFRESH_COOKIE_NAME)
        .filter(|token| !token.is_empty())
        .map(str::to_owned);

    let presented = match cookie {
        Some(token) => Some(token),
        None => from_body(req, &state).await?,
    };

    let session = state.sessions.refresh(presented.as_deref()).await?;

    let cookies = session_cookies(
        &session.tokens,
        state.sessions.tokens(),
        state.config.production,
    );

    Ok(ApiResponse::ok(session.tokens, "Access token refreshed").cookies(cookies))
}
