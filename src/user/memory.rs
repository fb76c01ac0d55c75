//! In-memory credential store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, ServerError};
use crate::user::{CredentialStore, Identity, NewUser, User};

#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    /// Number of mutating calls served so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_identity(&self, identity: &Identity) -> Result<Option<User>> {
        let users = self.users.read().await;
        let by_username = identity
            .username
            .as_deref()
            .and_then(|username| users.values().find(|u| u.username == username));

        Ok(by_username
            .or_else(|| users.values().find(|u| identity.matches(u)))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn create(&self, user: NewUser) -> Result<User> {
        let mut users = self.users.write().await;
        self.writes.fetch_add(1, Ordering::SeqCst);

        if users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(ServerError::Conflict("User with this username or email already exists."));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            avatar: user.avatar,
            cover_image: user.cover_image,
            password: user.password,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn update_refresh_token(&self, id: Uuid, token: Option<&str>) -> Result<()> {
        let mut users = self.users.write().await;
        self.writes.fetch_add(1, Ordering::SeqCst);

        if let Some(user) = users.get_mut(&id) {
            user.refresh_token = token.map(str::to_owned);
            user.updated_at = Utc::now();
        }

        Ok(())
    }

    async fn swap_refresh_token(&self, id: Uuid, current: &str, next: &str) -> Result<bool> {
        let mut users = self.users.write().await;
        self.writes.fetch_add(1, Ordering::SeqCst);

        match users.get_mut(&id) {
            Some(user) if user.refresh_token.as_deref() == Some(current) => {
                user.refresh_token = Some(next.to_owned());
                user.updated_at = Utc::now();
                Ok(true)
            },
            _ => Ok(false),
        }
    }
}
