//! Uniform success envelope.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// `{statusCode, success, data, message}` body sent on every success.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub status_code: u16,
    pub success: bool,
    pub data: T,
    pub message: String,
}

/// Successful response with optional `Set-Cookie` headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    data: T,
    message: String,
    cookies: Vec<String>,
}

impl<T: Serialize> ApiResponse<T> {
    /// `200 OK` response.
    pub fn ok(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::OK, data, message)
    }

    /// `201 Created` response.
    pub fn created(data: T, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CREATED, data, message)
    }

    fn new(status: StatusCode, data: T, message: impl Into<String>) -> Self {
        Self {
            status,
            data,
            message: message.into(),
            cookies: Vec::new(),
        }
    }

    /// Attach `Set-Cookie` values.
    pub fn cookies(mut self, cookies: impl IntoIterator<Item = String>) -> Self {
        self.cookies.extend(cookies);
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let envelope = Envelope {
            status_code: self.status.as_u16(),
            success: self.status.as_u16() < 400,
            data: self.data,
            message: self.message,
        };

        let mut response = (self.status, Json(envelope)).into_response();
        for cookie in self.cookies {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().append(header::SET_COOKIE, value);
                },
                Err(err) => {
                    tracing::error!(error = %err, "invalid cookie value dropped");
                },
            }
        }

        response
    }
}
