use axum::Extension;

use crate::response::ApiResponse;
use crate::user::User;

/// Handler returning the authenticated user.
pub async fn handler(Extension(user): Extension<User>) -> ApiResponse<User> {
    ApiResponse::ok(user, "Current user fetched successfully")
}
