//! Create an account from a multipart form.

use std::path::Path;

use axum::extract::multipart::Field;
use axum::extract::{Multipart, State};
use tempfile::NamedTempFile;
use validator::Validate;

use crate::error::Result;
use crate::response::ApiResponse;
use crate::session::Registration;
use crate::user::User;
use crate::{AppState, ServerError};

/// Text fields of the form. Blank fields are kept as `None` and reported by
/// the session controller.
#[derive(Debug, Default, Validate)]
struct Form {
    #[validate(length(max = 128, message = "Full name is too long."))]
    full_name: Option<String>,
    #[validate(email(message = "Email must be formatted."))]
    email: Option<String>,
    #[validate(
        length(min = 2, max = 32, message = "Username must be 2 to 32 characters long."),
        custom(
            function = "crate::router::validate_username",
            message = "Username must be alphanumeric."
        )
    )]
    username: Option<String>,
    #[validate(length(max = 255, message = "Password is too long."))]
    password: Option<String>,
}

async fn text(field: Field<'_>) -> Result<Option<String>> {
    let value = field.text().await?;
    Ok(Some(value).filter(|v| !v.trim().is_empty()))
}

/// Write an uploaded part to a temporary file, removed on drop.
async fn spool(dir: &Path, field: Field<'_>) -> Result<Option<NamedTempFile>> {
    let prefix = format!("{}-", field.name().unwrap_or("upload"));
    let suffix = field
        .file_name()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    let bytes = field.bytes().await?;
    if bytes.is_empty() {
        return Ok(None);
    }

    let file = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(&suffix)
        .tempfile_in(dir)
        .map_err(|err| ServerError::persistence("cannot create temporary file", err))?;
    tokio::fs::write(file.path(), &bytes)
        .await
        .map_err(|err| ServerError::persistence("cannot write temporary file", err))?;

    Ok(Some(file))
}

/// Handler to create user.
pub async fn handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<ApiResponse<User>> {
    let dir = &state.config.upload.temp_dir;
    let mut form = Form::default();
    let mut avatar = None;
    let mut cover_image = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("fullName") => form.full_name = text(field).await?,
            Some("email") => form.email = text(field).await?,
            Some("username") => form.username = text(field).await?,
            Some("password") => form.password = text(field).await?,
            Some("avatar") => avatar = spool(dir, field).await?,
            Some("coverImage") => cover_image = spool(dir, field).await?,
            other => {
                tracing::debug!(field = ?other, "ignoring multipart field");
            },
        }
    }

    form.validate()?;

    // Temporary files live until the end of this scope.
    let user = state
        .sessions
        .register(Registration {
            full_name: form.full_name.unwrap_or_default(),
            email: form.email.unwrap_or_default(),
            username: form.username.unwrap_or_default(),
            password: form.password.unwrap_or_default(),
            avatar: avatar.as_ref().map(|f| f.path().to_path_buf()),
            cover_image: cover_image.as_ref().map(|f| f.path().to_path_buf()),
        })
        .await?;

    Ok(ApiResponse::created(user, "User registered successfully"))
}
