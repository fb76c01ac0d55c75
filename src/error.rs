//! Error handler for passage.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

pub type Result<T> = std::result::Result<T, ServerError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error("error parsing form data")]
    ParsingForm(#[source] BoxError),

    #[error(transparent)]
    Json(#[from] JsonRejection),

    #[error("malformed multipart body")]
    Multipart(#[from] MultipartError),

    #[error("{0}")]
    Authentication(&'static str),

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(&'static str),

    #[error("{0}")]
    Upload(&'static str),

    #[error("persistence failure, {details}")]
    Persistence {
        details: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("token signing failure, {details}")]
    Signing {
        details: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl ServerError {
    /// Build a single-field [`ServerError::Validation`].
    pub fn validation(field: &'static str, message: &'static str) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(
            field,
            ValidationError::new("invalid").with_message(message.into()),
        );
        Self::Validation(errors)
    }

    /// Wrap an unexpected storage failure.
    pub fn persistence<E>(details: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Persistence {
            details: details.into(),
            source: Some(Box::new(err)),
        }
    }

    /// Wrap a token signing failure.
    pub fn signing(details: impl Into<String>, err: Option<BoxError>) -> Self {
        Self::Signing {
            details: details.into(),
            source: err,
        }
    }

    /// HTTP status code of this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Validation(_)
            | ServerError::ParsingForm(_)
            | ServerError::Json(_)
            | ServerError::Multipart(_)
            | ServerError::Upload(_) => StatusCode::BAD_REQUEST,
            ServerError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Persistence { .. } | ServerError::Signing { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }
}

impl From<sqlx::Error> for ServerError {
    fn from(err: sqlx::Error) -> Self {
        Self::persistence("SQL request failed", err)
    }
}

/// Failure envelope, mirrors [`crate::response::ApiResponse`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    status_code: u16,
    success: bool,
    data: Option<()>,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<FieldError>,
}

impl ResponseError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            success: false,
            data: None,
            message: message.into(),
            errors: Vec::new(),
        }
    }

    /// Automatically add errors field.
    fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = parse_validation_errors(errors);
        if let Some(first) = self.errors.first() {
            self.message = first.message.clone();
        }
        self
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut fields = errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid `{field}` field.")),
            })
        })
        .collect::<Vec<_>>();
    fields.sort_by(|a, b| a.field.cmp(&b.field));
    fields
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        let response = match &self {
            ServerError::Validation(errors) => ResponseError::new(
                status,
                "There were validation errors with your request.",
            )
            .errors(errors),

            ServerError::ParsingForm(err) => {
                tracing::debug!(error = %err, "cannot parse request body");
                ResponseError::new(status, "Server error during data parsing.")
            },

            ServerError::Json(rejection) => {
                ResponseError::new(status, rejection.body_text())
            },

            ServerError::Multipart(err) => {
                ResponseError::new(status, err.body_text())
            },

            ServerError::Persistence { details, source }
            | ServerError::Signing { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");
                ResponseError::new(status, "Something went wrong.")
            },

            _ => ResponseError::new(status, self.to_string()),
        };

        match serde_json::to_string(&response) {
            Ok(body) => (
                status,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response(),
            Err(_) => internal_server_error(),
        }
    }
}

fn internal_server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::json!({
            "statusCode": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            "success": false,
            "data": null,
            "message": "Something went wrong.",
        })
        .to_string(),
    )
        .into_response()
}
