//! Close the current session.

use axum::Extension;
use axum::extract::State;
use serde_json::{Map, Value};

use crate::AppState;
use crate::cookie::clear_cookies;
use crate::error::Result;
use crate::response::ApiResponse;
use crate::user::User;

pub async fn handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<ApiResponse<Value>> {
    state.sessions.logout(user.id).await?;

    Ok(ApiResponse::ok(Value::Object(Map::new()), "User logged out")
        .cookies(clear_cookies(state.config.production)))
}
