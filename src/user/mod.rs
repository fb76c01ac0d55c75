#[cfg(test)]
pub(crate) mod memory;
mod repository;

pub use repository::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User as saved on database.
///
/// Password verifier and refresh token never leave the server.
#[derive(
    Clone, Debug, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow,
)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar: String,
    pub cover_image: Option<String>,
    #[serde(skip)]
    pub password: String,
    #[serde(skip)]
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a [`User`].
#[derive(Clone, Debug, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: String,
    /// Already-derived password verifier.
    pub password: String,
    pub avatar: String,
    pub cover_image: Option<String>,
}

/// Lookup key for login and uniqueness checks.
///
/// Matches a user whose username **or** email equals the given value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Identity {
    pub username: Option<String>,
    pub email: Option<String>,
}

impl Identity {
    /// Build a normalized identity, ignoring blank values.
    pub fn new(username: Option<&str>, email: Option<&str>) -> Self {
        Self {
            username: username.and_then(normalize),
            email: email.and_then(normalize),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none()
    }

    /// Whether `user` is designated by this identity.
    pub fn matches(&self, user: &User) -> bool {
        self.username.as_deref() == Some(user.username.as_str())
            || self.email.as_deref() == Some(user.email.as_str())
    }
}

/// Trim and lowercase; usernames and emails are compared case-insensitively.
pub fn normalize(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_lowercase())
}
