//! Open a session with username or email plus password.

use axum::extract::State;
use serde::Deserialize;
use validator::Validate;

use super::{SessionData, Valid};
use crate::AppState;
use crate::cookie::session_cookies;
use crate::error::Result;
use crate::response::ApiResponse;
use crate::session::Credentials;

#[derive(Debug, Deserialize, Validate)]
pub struct Body {
    #[validate(length(max = 32, message = "Username is too long."))]
    username: Option<String>,
    #[validate(length(max = 255, message = "Email is too long."))]
    email: Option<String>,
    #[serde(default)]
    #[validate(length(max = 255, message = "Password is too long."))]
    password: String,
}

/// Handler to log in.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<ApiResponse<SessionData>> {
    let session = state
        .sessions
        .login(Credentials {
            username: body.username,
            email: body.email,
            password: body.password,
        })
        .await?;

    let cookies = session_cookies(
        &session.tokens,
        state.sessions.tokens(),
        state.config.production,
    );

    Ok(ApiResponse::ok(
        SessionData {
            user: session.user,
            tokens: session.tokens,
        },
        "User logged in successfully",
    )
    .cookies(cookies))
}
