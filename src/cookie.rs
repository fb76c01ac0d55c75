//! Session cookies.

use axum::http::{HeaderMap, header};

use crate::token::{TokenManager, TokenPair};

/// Cookie name for the access token.
pub const ACCESS_COOKIE_NAME: &str = "accessToken";

/// Cookie name for the refresh token.
pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|part| part.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim())
}

fn build(name: &str, value: &str, max_age: u64, secure: bool) -> String {
    let secure = if secure { "; Secure" } else { "" };
    format!("{name}={value}; HttpOnly; SameSite=Strict; Path=/; Max-Age={max_age}{secure}")
}

/// `Set-Cookie` values carrying a freshly issued pair.
pub fn session_cookies(pair: &TokenPair, tokens: &TokenManager, secure: bool) -> [String; 2] {
    [
        build(
            ACCESS_COOKIE_NAME,
            &pair.access_token,
            tokens.access_lifetime(),
            secure,
        ),
        build(
            REFRESH_COOKIE_NAME,
            &pair.refresh_token,
            tokens.refresh_lifetime(),
            secure,
        ),
    ]
}

/// `Set-Cookie` values removing both session cookies.
pub fn clear_cookies(secure: bool) -> [String; 2] {
    [
        build(ACCESS_COOKIE_NAME, "", 0, secure),
        build(REFRESH_COOKIE_NAME, "", 0, secure),
    ]
}
