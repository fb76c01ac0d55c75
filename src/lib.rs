//! Passage registers accounts and keeps exactly one refreshable session per
//! user.
#![forbid(unsafe_code)]

mod cookie;
mod crypto;
mod database;
mod middleware;
mod router;
mod token;

pub mod config;
pub mod error;
pub mod media;
pub mod response;
pub mod session;
pub mod telemetry;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};

pub use error::ServerError;

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub sessions: session::SessionController,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([
            header::AUTHORIZATION,
            header::COOKIE,
            header::SET_COOKIE,
        ]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `GET /metrics` goes to `metrics`.
        .route("/metrics", get(router::status::metrics))
        .nest("/api/v1/users", router::users(state.clone()))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<config::Configuration>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let Some(postgres) = &config.postgres else {
        tracing::error!("missing `postgres` entry on `config.yaml` file");
        return Err("missing `postgres` configuration".into());
    };
    let pool = database::connect(postgres).await?;

    // execute migrations scripts on start.
    sqlx::migrate!().run(&pool).await?;

    let passwords = crypto::PasswordManager::new(config.argon2.clone())?;
    let tokens = token::TokenManager::new(&config.token);
    let media = media::Cloudinary::new(&config.cloudinary);

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "prometheus recorder not installed");
            None
        },
    };

    let sessions = session::SessionController::new(
        Arc::new(user::UserRepository::new(pool)),
        Arc::new(media),
        Arc::new(tokens),
        Arc::new(passwords),
    );

    Ok(AppState {
        config,
        sessions,
        metrics,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::{HeaderMap, HeaderName, HeaderValue, Response};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    use super::*;
    use crate::media::fake::FakeUploader;
    use crate::user::memory::MemoryStore;

    const BOUNDARY: &str = "passage-test-boundary";

    pub(crate) struct TestApp {
        pub app: Router,
        pub store: Arc<MemoryStore>,
        pub upload_dir: TempDir,
    }

    pub(crate) fn test_app(media: FakeUploader) -> TestApp {
        test_app_with(media, |_| {})
    }

    pub(crate) fn test_app_with(
        media: FakeUploader,
        configure: impl FnOnce(&mut config::Configuration),
    ) -> TestApp {
        let upload_dir = tempfile::tempdir().unwrap();
        let harness = crate::session::tests::harness_with(media);

        let mut config = config::Configuration::default();
        config.production = true;
        config.upload.temp_dir = upload_dir.path().to_path_buf();
        configure(&mut config);

        let state = AppState {
            config: Arc::new(config),
            sessions: harness.controller,
            metrics: None,
        };

        TestApp {
            app: app(state),
            store: harness.store,
            upload_dir,
        }
    }

    /// MUST NEVER be used in production.
    pub(crate) async fn make_request(
        app: &Router,
        method: Method,
        path: &str,
        headers: &[(HeaderName, String)],
        body: Body,
    ) -> Response<Body> {
        let mut request = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        app.clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap()
    }

    pub(crate) async fn json_body(response: Response<Body>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn multipart(fields: &[(&str, &str)], files: &[(&str, &str)]) -> Body {
        Body::from(multipart_bytes(fields, files))
    }

    fn multipart_bytes(fields: &[(&str, &str)], files: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        for (name, file_name) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"\x89PNG\r\n\x1a\n");
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        body
    }

    fn multipart_headers() -> Vec<(HeaderName, String)> {
        vec![(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )]
    }

    fn json_headers() -> Vec<(HeaderName, String)> {
        vec![(header::CONTENT_TYPE, "application/json".to_owned())]
    }

    fn set_cookies(headers: &HeaderMap) -> Vec<String> {
        headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v: &HeaderValue| v.to_str().ok())
            .map(str::to_owned)
            .collect()
    }

    async fn register(app: &Router, username: &str, email: &str, password: &str) -> Response<Body> {
        make_request(
            app,
            Method::POST,
            "/api/v1/users/register",
            &multipart_headers(),
            multipart(
                &[
                    ("fullName", "Alice Liddell"),
                    ("email", email),
                    ("username", username),
                    ("password", password),
                ],
                &[("avatar", "me.png")],
            ),
        )
        .await
    }

    async fn login(app: &Router, username: &str, password: &str) -> Response<Body> {
        make_request(
            app,
            Method::POST,
            "/api/v1/users/login",
            &json_headers(),
            Body::from(json!({ "username": username, "password": password }).to_string()),
        )
        .await
    }

    #[tokio::test]
    async fn test_status() {
        let test = test_app(FakeUploader::default());

        let response = make_request(&test.app, Method::GET, "/status.json", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

        let response = make_request(&test.app, Method::GET, "/metrics", &[], Body::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let test = test_app(FakeUploader::default());
        let app = &test.app;

        // Register.
        let response = register(app, "alice", "a@x.com", "p1").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["statusCode"], 201);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["username"], "alice");
        assert!(body["data"]["avatar"].as_str().unwrap().starts_with("https://media.test/avatar-"));
        assert!(body["data"].get("password").is_none());
        assert!(body["data"].get("refreshToken").is_none());

        // Uploaded parts are not kept on disk.
        assert_eq!(std::fs::read_dir(test.upload_dir.path()).unwrap().count(), 0);

        // Same username, other email.
        let response = register(app, "alice", "b@y.com", "p2").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(test.store.len().await, 1);

        // Wrong password.
        let response = login(app, "alice", "wrong").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookies(response.headers()).is_empty());

        // Login.
        let response = login(app, "alice", "p1").await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookies = set_cookies(response.headers());
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.contains("HttpOnly") && c.contains("Secure")));
        let body = json_body(response).await;
        let first_refresh = body["data"]["refreshToken"].as_str().unwrap().to_owned();
        assert!(body["data"]["accessToken"].is_string());
        assert_eq!(body["data"]["user"]["username"], "alice");

        // Refresh from cookie.
        let response = make_request(
            app,
            Method::POST,
            "/api/v1/users/refresh-token",
            &[(header::COOKIE, format!("refreshToken={first_refresh}"))],
            Body::empty(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let access = body["data"]["accessToken"].as_str().unwrap().to_owned();
        let second_refresh = body["data"]["refreshToken"].as_str().unwrap().to_owned();
        assert_ne!(first_refresh, second_refresh);

        // Replay the first token from the body.
        let response = make_request(
            app,
            Method::POST,
            "/api/v1/users/refresh-token",
            &json_headers(),
            Body::from(json!({ "refreshToken": first_refresh }).to_string()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Current user.
        let response = make_request(
            app,
            Method::GET,
            "/api/v1/users/current-user",
            &[(header::AUTHORIZATION, format!("Bearer {access}"))],
            Body::empty(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"]["email"], "a@x.com");

        // Logout.
        let response = make_request(
            app,
            Method::POST,
            "/api/v1/users/logout",
            &[(header::COOKIE, format!("accessToken={access}"))],
            Body::empty(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookies = set_cookies(response.headers());
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));

        // Logged out sessions cannot be refreshed.
        let response = make_request(
            app,
            Method::POST,
            "/api/v1/users/refresh-token",
            &json_headers(),
            Body::from(json!({ "refreshToken": second_refresh }).to_string()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let test = test_app(FakeUploader::default());
        let app = &test.app;

        // Missing avatar.
        let response = make_request(
            app,
            Method::POST,
            "/api/v1/users/register",
            &multipart_headers(),
            multipart(
                &[
                    ("fullName", "Alice"),
                    ("email", "a@x.com"),
                    ("username", "alice"),
                    ("password", "p1"),
                ],
                &[],
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["errors"][0]["field"], "avatar");

        // Blank field.
        let response = register(app, "alice", "   ", "p1").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["message"], "All fields are required.");

        // Malformed email.
        let response = register(app, "alice", "not-an-email", "p1").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Username charset.
        let response = register(app, "al ice", "a@x.com", "p1").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(test.store.len().await, 0);
    }

    #[tokio::test]
    async fn test_register_avatar_upload_failure() {
        let test = test_app(FakeUploader::rejecting("avatar"));

        let response = register(&test.app, "alice", "a@x.com", "p1").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(test.store.len().await, 0);
        assert_eq!(std::fs::read_dir(test.upload_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_register_body_limit() {
        let test = test_app_with(FakeUploader::default(), |config| {
            config.upload.max_size = 64;
        });

        let body = multipart_bytes(
            &[
                ("fullName", "Alice Liddell"),
                ("email", "a@x.com"),
                ("username", "alice"),
                ("password", "p1"),
            ],
            &[("avatar", "me.png")],
        );
        let mut headers = multipart_headers();
        headers.push((header::CONTENT_LENGTH, body.len().to_string()));

        let response = make_request(
            &test.app,
            Method::POST,
            "/api/v1/users/register",
            &headers,
            Body::from(body),
        )
        .await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(test.store.len().await, 0);
    }

    async fn refresh_token_of(app: &Router) -> String {
        let response = register(app, "alice", "a@x.com", "p1").await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = login(app, "alice", "p1").await;
        let body = json_body(response).await;
        body["data"]["refreshToken"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn test_refresh_cookie_ignores_body() {
        let test = test_app(FakeUploader::default());
        let token = refresh_token_of(&test.app).await;

        let response = make_request(
            &test.app,
            Method::POST,
            "/api/v1/users/refresh-token",
            &[
                (header::COOKIE, format!("refreshToken={token}")),
                (header::CONTENT_TYPE, "application/json".to_owned()),
            ],
            Body::from("foo=bar"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let rotated = body["data"]["refreshToken"].as_str().unwrap().to_owned();

        let response = make_request(
            &test.app,
            Method::POST,
            "/api/v1/users/refresh-token",
            &[
                (header::COOKIE, format!("refreshToken={rotated}")),
                (header::CONTENT_TYPE, "text/plain".to_owned()),
            ],
            Body::from("foo=bar"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_refresh_from_form_body() {
        let test = test_app(FakeUploader::default());
        let token = refresh_token_of(&test.app).await;

        let response = make_request(
            &test.app,
            Method::POST,
            "/api/v1/users/refresh-token",
            &[(
                header::CONTENT_TYPE,
                "application/x-www-form-urlencoded".to_owned(),
            )],
            Body::from(format!("refreshToken={token}")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        // Malformed JSON without a cookie is a bad request.
        let response = make_request(
            &test.app,
            Method::POST,
            "/api/v1/users/refresh-token",
            &json_headers(),
            Body::from("foo=bar"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_unknown_user() {
        let test = test_app(FakeUploader::default());

        let response = login(&test.app, "nobody", "p1").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = make_request(
            &test.app,
            Method::POST,
            "/api/v1/users/login",
            &json_headers(),
            Body::from(json!({ "password": "p1" }).to_string()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let test = test_app(FakeUploader::default());

        for (method, path) in [
            (Method::POST, "/api/v1/users/logout"),
            (Method::GET, "/api/v1/users/current-user"),
        ] {
            let response = make_request(&test.app, method, path, &[], Body::empty()).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let response = make_request(
            &test.app,
            Method::POST,
            "/api/v1/users/refresh-token",
            &[],
            Body::empty(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
