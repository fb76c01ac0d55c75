//! Publish images onto a media host.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha1::{Digest, Sha1};

use crate::config;

const CLOUDINARY_API: &str = "https://api.cloudinary.com/v1_1";

/// Error type.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media host credentials are missing")]
    NotConfigured,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("media host rejected upload: {0}")]
    Rejected(String),
}

/// Remote copy of an uploaded file.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedMedia {
    /// Public HTTPS URL.
    pub url: String,
    pub public_id: String,
}

/// Push a local file to a remote host.
///
/// The uploader never deletes `path`; cleanup belongs to the caller.
#[async_trait]
pub trait MediaUploader: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<UploadedMedia, MediaError>;
}

/// Cloudinary credentials structure to upload images.
#[derive(Clone)]
pub struct Cloudinary {
    client: reqwest::Client,
    cloud_name: String,
    endpoint: String,
    api_key: String,
    /// Should never be shared!
    api_secret: String,
    folder: Option<String>,
}

impl std::fmt::Debug for Cloudinary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cloudinary")
            .field("cloud_name", &self.cloud_name)
            .field("folder", &self.folder)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    public_id: Option<String>,
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl Cloudinary {
    /// Create a new [`Cloudinary`] uploader.
    pub fn new(config: &config::Cloudinary) -> Self {
        Self {
            client: reqwest::Client::new(),
            cloud_name: config.cloud_name.clone(),
            endpoint: format!("{CLOUDINARY_API}/{}/auto/upload", config.cloud_name),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            folder: config.folder.clone().filter(|f| !f.is_empty()),
        }
    }

    fn is_configured(&self) -> bool {
        !self.cloud_name.is_empty()
            && !self.api_key.is_empty()
            && !self.api_secret.is_empty()
    }
}

/// Sign upload parameters.
///
/// Parameters are sorted by name, serialized as `k=v` joined with `&`, then
/// the API secret is appended and the whole string is SHA-1 hashed.
pub fn sign(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut params = params.to_vec();
    params.sort_by(|a, b| a.0.cmp(b.0));

    let to_sign = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl MediaUploader for Cloudinary {
    async fn upload(&self, path: &Path) -> Result<UploadedMedia, MediaError> {
        if !self.is_configured() {
            return Err(MediaError::NotConfigured);
        }

        let buffer = tokio::fs::read(path).await?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
            .to_string();

        let mut params = vec![("timestamp", timestamp.as_str())];
        if let Some(folder) = &self.folder {
            params.push(("folder", folder.as_str()));
        }
        let signature = sign(&params, &self.api_secret);

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_owned());

        let mut form = Form::new()
            .part("file", Part::bytes(buffer).file_name(file_name))
            .text("api_key", self.api_key.clone())
            .text("signature", signature);
        for (key, value) in params {
            form = form.text(key.to_owned(), value.to_owned());
        }

        let response: UploadResponse = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await?
            .json()
            .await?;

        match response {
            UploadResponse {
                secure_url: Some(url),
                public_id,
                ..
            } => {
                tracing::debug!(%url, "file uploaded on cloudinary");
                Ok(UploadedMedia {
                    url,
                    public_id: public_id.unwrap_or_default(),
                })
            },
            UploadResponse { error, .. } => Err(MediaError::Rejected(
                error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "missing secure_url".to_owned()),
            )),
        }
    }
}
