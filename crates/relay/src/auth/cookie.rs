// Session cookie encoding and extraction.

use axum::http::{header::COOKIE, HeaderMap, HeaderValue};

pub const SESSION_COOKIE_NAME: &str = "quizpulse_session";

/// `Set-Cookie` value carrying a freshly issued session token.
pub fn session_cookie(token: &str, max_age_seconds: i64, secure: bool) -> Option<HeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).ok()
}

/// `Set-Cookie` value that expires the session cookie immediately.
pub fn cleared_session_cookie(secure: bool) -> HeaderValue {
    let cookie = if secure {
        "quizpulse_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Secure"
    } else {
        "quizpulse_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
    };
    HeaderValue::from_static(cookie)
}

/// Session token from the request's `Cookie` headers, if any.
pub fn session_token_from_cookies(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE_NAME && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
