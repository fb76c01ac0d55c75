//! Configuration manager for passage.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Public URL of current instance.
    pub url: String,
    /// Port to listen on.
    pub port: u16,
    /// Marks session cookies as `Secure`.
    pub production: bool,
    #[serde(skip_deserializing)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to JsonWebToken configuration.
    #[serde(skip_serializing)]
    pub token: Token,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Related to image hosting.
    #[serde(skip_serializing)]
    pub cloudinary: Cloudinary,
    /// Related to multipart uploads.
    #[serde(skip_serializing)]
    pub upload: Upload,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            url: "http://localhost:8888/".to_owned(),
            port: 8888,
            production: false,
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            token: Token::default(),
            postgres: None,
            argon2: None,
            cloudinary: Cloudinary::default(),
            upload: Upload::default(),
        }
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// Json Web Token configuration.
///
/// Access and refresh tokens are signed with distinct secrets.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Token {
    pub access_secret: String,
    /// Access token lifetime, in seconds.
    pub access_lifetime: u64,
    pub refresh_secret: String,
    /// Refresh token lifetime, in seconds.
    pub refresh_lifetime: u64,
}

impl Default for Token {
    fn default() -> Self {
        Self {
            access_secret: String::default(),
            access_lifetime: 60 * 15, // 15 minutes.
            refresh_secret: String::default(),
            refresh_lifetime: 60 * 60 * 24 * 10, // 10 days.
        }
    }
}

/// Cloudinary credentials.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Cloudinary {
    pub cloud_name: String,
    pub api_key: String,
    /// Should never be shared!
    pub api_secret: String,
    /// Remote folder receiving uploads.
    pub folder: Option<String>,
}

/// Multipart upload configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Upload {
    /// Directory holding files until they reach the media host.
    pub temp_dir: PathBuf,
    /// Maximum request body size, in bytes.
    pub max_size: usize,
}

impl Default for Upload {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            max_size: 10 * 1024 * 1024, // 10 MiB.
        }
    }
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Application version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then overlays secrets from the environment.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let mut config = match File::open(&file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file)
            {
                Ok(config) => config,
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        // set app version.
        config.version = VERSION.to_owned();
        config.path = file_path;
        config.url = Self::normalize_url(&config.url)?;

        Ok(Arc::new(config.with_env(|key| std::env::var(key).ok())))
    }

    /// Overlay secrets found by `lookup` on the configuration.
    ///
    /// Environment values win over values from the file.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(secret) = lookup("ACCESS_TOKEN_SECRET") {
            self.token.access_secret = secret;
        }
        if let Some(secret) = lookup("REFRESH_TOKEN_SECRET") {
            self.token.refresh_secret = secret;
        }
        if let Some(secret) = lookup("CLOUDINARY_API_SECRET") {
            self.cloudinary.api_secret = secret;
        }
        if let Some(postgres) = self.postgres.as_mut() {
            if let Some(password) = lookup("POSTGRES_PASSWORD") {
                postgres.password = Some(password);
            }
        }

        self
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, path = %self.path.display(), "cannot read configuration file");
        Self::default()
    }
}
