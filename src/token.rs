//! Manage json web tokens.
//!
//! Access and refresh tokens are HS256-signed with distinct secrets. Only
//! the access token carries profile claims; the refresh token names the user
//! and nothing else.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode,
};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::config;
use crate::error::{Result, ServerError};
use crate::user::User;

const INVALID_ACCESS_TOKEN: &str = "Invalid access token.";
const INVALID_REFRESH_TOKEN: &str = "Invalid refresh token.";

/// Distinguish access from refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Pieces of information asserted on an access token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User ID.
    pub sub: String,
    pub username: String,
    pub email: String,
    #[serde(rename = "fullName")]
    pub full_name: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    pub jti: String,
    /// Identifies the time at which the JWT was issued.
    pub iat: u64,
    /// Identifies the expiration time on or after which the JWT must not be
    /// accepted for processing.
    pub exp: u64,
}

/// Pieces of information asserted on a refresh token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// User ID.
    pub sub: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Makes every refresh token unique, even two minted within one second.
    pub jti: String,
    pub iat: u64,
    pub exp: u64,
}

/// Freshly minted access/refresh pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn from_secret(secret: &str) -> Option<Self> {
        if secret.is_empty() {
            return None;
        }

        Some(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }
}

/// Manage JWT tokens.
#[derive(Clone)]
pub struct TokenManager {
    algorithm: Algorithm,
    access: Option<Keys>,
    access_lifetime: u64,
    refresh: Option<Keys>,
    refresh_lifetime: u64,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("algorithm", &self.algorithm)
            .field("access_lifetime", &self.access_lifetime)
            .field("refresh_lifetime", &self.refresh_lifetime)
            .finish_non_exhaustive()
    }
}

fn now() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|err| ServerError::signing("clock before unix epoch", Some(Box::new(err))))
}

impl TokenManager {
    /// Create a new [`TokenManager`].
    ///
    /// Empty secrets are accepted here; signing with them fails later.
    pub fn new(config: &config::Token) -> Self {
        let access = Keys::from_secret(&config.access_secret);
        let refresh = Keys::from_secret(&config.refresh_secret);

        if access.is_none() || refresh.is_none() {
            tracing::warn!("token secrets are not fully configured, sessions cannot be issued");
        }

        Self {
            algorithm: Algorithm::HS256,
            access,
            access_lifetime: config.access_lifetime,
            refresh,
            refresh_lifetime: config.refresh_lifetime,
        }
    }

    /// Access token lifetime, in seconds.
    pub fn access_lifetime(&self) -> u64 {
        self.access_lifetime
    }

    /// Refresh token lifetime, in seconds.
    pub fn refresh_lifetime(&self) -> u64 {
        self.refresh_lifetime
    }

    /// Mint an access/refresh pair for `user`.
    pub fn issue(&self, user: &User) -> Result<TokenPair> {
        Ok(TokenPair {
            access_token: self.create_access(user)?,
            refresh_token: self.create_refresh(&user.id.to_string())?,
        })
    }

    /// Create a new access token.
    pub fn create_access(&self, user: &User) -> Result<String> {
        let keys = self
            .access
            .as_ref()
            .ok_or_else(|| ServerError::signing("missing access token secret", None))?;
        let iat = now()?;

        let claims = AccessClaims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            token_type: TokenType::Access,
            jti: Uuid::new_v4().to_string(),
            iat,
            exp: iat + self.access_lifetime,
        };

        encode(&Header::new(self.algorithm), &claims, &keys.encoding)
            .map_err(|err| ServerError::signing("cannot sign access token", Some(Box::new(err))))
    }

    /// Create a new refresh token.
    pub fn create_refresh(&self, user_id: &str) -> Result<String> {
        let keys = self
            .refresh
            .as_ref()
            .ok_or_else(|| ServerError::signing("missing refresh token secret", None))?;
        let iat = now()?;

        let claims = RefreshClaims {
            sub: user_id.to_owned(),
            token_type: TokenType::Refresh,
            jti: Uuid::new_v4().to_string(),
            iat,
            exp: iat + self.refresh_lifetime,
        };

        encode(&Header::new(self.algorithm), &claims, &keys.encoding)
            .map_err(|err| ServerError::signing("cannot sign refresh token", Some(Box::new(err))))
    }

    fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        keys: Option<&Keys>,
        rejection: &'static str,
    ) -> Result<T> {
        // A missing secret rejects every token.
        let keys = keys.ok_or(ServerError::Authentication(rejection))?;

        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;

        // Expired, malformed and forged tokens are reported the same way.
        decode::<T>(token, &keys.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                tracing::debug!(error = %err, "token rejected");
                ServerError::Authentication(rejection)
            })
    }

    /// Decode and check an access token.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims> {
        let claims: AccessClaims =
            self.verify(token, self.access.as_ref(), INVALID_ACCESS_TOKEN)?;

        if claims.token_type != TokenType::Access {
            return Err(ServerError::Authentication(INVALID_ACCESS_TOKEN));
        }

        Ok(claims)
    }

    /// Decode and check a refresh token.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims> {
        let claims: RefreshClaims =
            self.verify(token, self.refresh.as_ref(), INVALID_REFRESH_TOKEN)?;

        if claims.token_type != TokenType::Refresh {
            return Err(ServerError::Authentication(INVALID_REFRESH_TOKEN));
        }

        Ok(claims)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> config::Token {
    config::Token {
        access_secret: "access-secret-for-testing".into(),
        refresh_secret: "refresh-secret-for-testing".into(),
        ..Default::default()
    }
}
