//! Session lifecycle: registration, login, refresh-token rotation, logout.
//!
//! A user is either anonymous (no refresh token stored) or authenticated
//! (exactly one refresh token stored). Login and refresh overwrite the stored
//! token, which invalidates whatever was there before; logout clears it.

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::crypto::PasswordManager;
use crate::error::{Result, ServerError};
use crate::media::MediaUploader;
use crate::token::{TokenManager, TokenPair};
use crate::user::{CredentialStore, Identity, NewUser, User};

const USER_ALREADY_EXISTS: &str = "User with this username or email already exists.";
const USER_NOT_FOUND: &str = "User does not exist.";
const INVALID_CREDENTIALS: &str = "Invalid user credentials.";
const MISSING_REFRESH_TOKEN: &str = "Unauthorized request.";
const INVALID_REFRESH_TOKEN: &str = "Invalid refresh token.";
const REFRESH_TOKEN_USED: &str = "Refresh token is expired or used.";
const INVALID_ACCESS_TOKEN: &str = "Invalid access token.";

/// Registration form, files already stored locally.
#[derive(Debug, Default, Clone)]
pub struct Registration {
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub avatar: Option<PathBuf>,
    pub cover_image: Option<PathBuf>,
}

/// Login form. At least one of `username` or `email` is required.
#[derive(Debug, Default, Clone)]
pub struct Credentials {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

/// Authenticated user with its freshly issued tokens.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: User,
    pub tokens: TokenPair,
}

/// Orchestrates the credential store, token issuer and media host.
#[derive(Clone)]
pub struct SessionController {
    store: Arc<dyn CredentialStore>,
    media: Arc<dyn MediaUploader>,
    tokens: Arc<TokenManager>,
    passwords: Arc<PasswordManager>,
}

impl SessionController {
    /// Create a new [`SessionController`].
    pub fn new(
        store: Arc<dyn CredentialStore>,
        media: Arc<dyn MediaUploader>,
        tokens: Arc<TokenManager>,
        passwords: Arc<PasswordManager>,
    ) -> Self {
        Self {
            store,
            media,
            tokens,
            passwords,
        }
    }

    /// Token issuer used by this controller.
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Create a new account.
    ///
    /// Nothing is written unless the avatar reached the media host.
    pub async fn register(&self, form: Registration) -> Result<User> {
        let mut errors = validator::ValidationErrors::new();
        for (field, value) in [
            ("fullName", &form.full_name),
            ("email", &form.email),
            ("username", &form.username),
            ("password", &form.password),
        ] {
            if value.trim().is_empty() {
                errors.add(
                    field,
                    validator::ValidationError::new("required")
                        .with_message("All fields are required.".into()),
                );
            }
        }
        if !errors.is_empty() {
            return Err(errors.into());
        }

        let identity = Identity::new(Some(form.username.as_str()), Some(form.email.as_str()));
        if self.store.find_by_identity(&identity).await?.is_some() {
            return Err(ServerError::Conflict(USER_ALREADY_EXISTS));
        }

        let Some(avatar_path) = form.avatar.as_deref() else {
            return Err(ServerError::validation("avatar", "Avatar file is required."));
        };

        let avatar = self.media.upload(avatar_path).await.map_err(|err| {
            tracing::warn!(error = %err, "avatar upload failed");
            ServerError::Upload("Avatar upload failed.")
        })?;

        let cover_image = match form.cover_image.as_deref() {
            Some(path) => match self.media.upload(path).await {
                Ok(media) => Some(media.url),
                Err(err) => {
                    tracing::warn!(error = %err, "cover image upload failed, ignoring");
                    None
                },
            },
            None => None,
        };

        let password = self
            .passwords
            .hash_password(&form.password)
            .map_err(|err| ServerError::persistence("cannot derive password verifier", err))?;

        let created = self
            .store
            .create(NewUser {
                username: identity.username.unwrap_or_default(),
                email: identity.email.unwrap_or_default(),
                full_name: form.full_name.trim().to_owned(),
                password,
                avatar: avatar.url,
                cover_image,
            })
            .await?;

        let user = self.store.find_by_id(created.id).await?.ok_or_else(|| {
            ServerError::Persistence {
                details: "user missing right after creation".into(),
                source: None,
            }
        })?;

        tracing::info!(user_id = %user.id, username = %user.username, "user registered");
        Ok(user)
    }

    /// Verify credentials and open a new session.
    ///
    /// Any refresh token issued before is superseded.
    pub async fn login(&self, credentials: Credentials) -> Result<Session> {
        let identity = Identity::new(
            credentials.username.as_deref(),
            credentials.email.as_deref(),
        );
        if identity.is_empty() {
            return Err(ServerError::validation(
                "username",
                "Username or email is required.",
            ));
        }
        if credentials.password.is_empty() {
            return Err(ServerError::validation("password", "Password is required."));
        }

        let user = self
            .store
            .find_by_identity(&identity)
            .await?
            .ok_or(ServerError::NotFound(USER_NOT_FOUND))?;

        if !self.passwords.verify_password(&credentials.password, &user.password) {
            tracing::debug!(user_id = %user.id, "password mismatch");
            return Err(ServerError::Authentication(INVALID_CREDENTIALS));
        }

        let tokens = self.tokens.issue(&user)?;
        self.store
            .update_refresh_token(user.id, Some(&tokens.refresh_token))
            .await?;

        tracing::info!(user_id = %user.id, "user logged in");
        Ok(Session {
            user: User {
                refresh_token: Some(tokens.refresh_token.clone()),
                ..user
            },
            tokens,
        })
    }

    /// Rotate the session designated by `refresh_token`.
    pub async fn refresh(&self, refresh_token: Option<&str>) -> Result<Session> {
        let presented = refresh_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ServerError::Authentication(MISSING_REFRESH_TOKEN))?;

        let claims = self.tokens.verify_refresh(presented)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServerError::Authentication(INVALID_REFRESH_TOKEN))?;

        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or(ServerError::NotFound(USER_NOT_FOUND))?;

        if user.refresh_token.as_deref() != Some(presented) {
            tracing::warn!(user_id = %user.id, "refresh token reuse rejected");
            return Err(ServerError::Authentication(REFRESH_TOKEN_USED));
        }

        let tokens = self.tokens.issue(&user)?;

        // Another request may have rotated the token since it was read.
        if !self
            .store
            .swap_refresh_token(user.id, presented, &tokens.refresh_token)
            .await?
        {
            tracing::warn!(user_id = %user.id, "concurrent refresh lost the race");
            return Err(ServerError::Authentication(REFRESH_TOKEN_USED));
        }

        tracing::info!(user_id = %user.id, "refresh token rotated");
        Ok(Session {
            user: User {
                refresh_token: Some(tokens.refresh_token.clone()),
                ..user
            },
            tokens,
        })
    }

    /// Close the session of `user_id`.
    pub async fn logout(&self, user_id: Uuid) -> Result<()> {
        self.store.update_refresh_token(user_id, None).await?;

        tracing::info!(%user_id, "user logged out");
        Ok(())
    }

    /// Resolve the user behind an access token.
    pub async fn authenticate(&self, access_token: &str) -> Result<User> {
        let claims = self.tokens.verify_access(access_token)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServerError::Authentication(INVALID_ACCESS_TOKEN))?;

        self.store
            .find_by_id(user_id)
            .await?
            .ok_or(ServerError::Authentication(INVALID_ACCESS_TOKEN))
    }
}
