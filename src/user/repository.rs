//! Handle database requests.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::{Result, ServerError};
use crate::user::{Identity, NewUser, User};

const USER_ALREADY_EXISTS: &str = "User with this username or email already exists.";

/// Persistent per-user credential record.
///
/// Implementations must enforce username and email uniqueness and apply
/// every update as an atomic per-record operation.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find the user whose username or email matches `identity`.
    async fn find_by_identity(&self, identity: &Identity) -> Result<Option<User>>;

    /// Find current user using `id` field.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Insert a new user. Fails with [`ServerError::Conflict`] on duplicate
    /// username or email.
    async fn create(&self, user: NewUser) -> Result<User>;

    /// Overwrite (or clear, with `None`) the stored refresh token.
    async fn update_refresh_token(&self, id: Uuid, token: Option<&str>) -> Result<()>;

    /// Replace the stored refresh token with `next` only if it still equals
    /// `current`. Returns whether the swap happened.
    async fn swap_refresh_token(&self, id: Uuid, current: &str, next: &str) -> Result<bool>;
}

/// PostgreSQL-backed [`CredentialStore`].
#[derive(Clone, Debug)]
pub struct UserRepository {
    pool: Pool<Postgres>,
}

impl UserRepository {
    /// Create a new [`UserRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for UserRepository {
    async fn find_by_identity(&self, identity: &Identity) -> Result<Option<User>> {
        if identity.is_empty() {
            return Ok(None);
        }

        // A username match wins over an email match on another row.
        let user = sqlx::query_as::<_, User>(
            r#"SELECT * FROM users WHERE username = $1 OR email = $2
                ORDER BY (username = $1) DESC NULLS LAST
                LIMIT 1"#,
        )
        .bind(identity.username.as_deref())
        .bind(identity.email.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(r#"SELECT * FROM users WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn create(&self, user: NewUser) -> Result<User> {
        let now = Utc::now();

        sqlx::query_as::<_, User>(
            r#"INSERT INTO users (id, username, email, full_name, avatar, cover_image, password, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
                RETURNING *"#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.avatar)
        .bind(&user.cover_image)
        .bind(&user.password)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            // Lost a race against a concurrent registration.
            if err
                .as_database_error()
                .is_some_and(|e| e.is_unique_violation())
            {
                ServerError::Conflict(USER_ALREADY_EXISTS)
            } else {
                ServerError::persistence("cannot insert user", err)
            }
        })
    }

    async fn update_refresh_token(&self, id: Uuid, token: Option<&str>) -> Result<()> {
        sqlx::query(r#"UPDATE users SET refresh_token = $1, updated_at = NOW() WHERE id = $2"#)
            .bind(token)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn swap_refresh_token(&self, id: Uuid, current: &str, next: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE users SET refresh_token = $1, updated_at = NOW()
                WHERE id = $2 AND refresh_token = $3"#,
        )
        .bind(next)
        .bind(id)
        .bind(current)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
