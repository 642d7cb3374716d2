use crate::{
    auth::{
        cookie::session_token_from_cookies,
        jwt::{JwtSessionService, SessionIdentity, SessionRole},
    },
    error::{ErrorCode, RelayError},
};
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub username: String,
    pub role: SessionRole,
}

impl From<SessionIdentity> for AuthenticatedUser {
    fn from(identity: SessionIdentity) -> Self {
        Self { user_id: identity.user_id, username: identity.username, role: identity.role }
    }
}

/// Accepts `Authorization: Bearer <jwt>` or the session cookie, in that
/// order, and injects [`AuthenticatedUser`].
pub async fn require_session(
    State(jwt_service): State<Arc<JwtSessionService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = session_token_from_headers(request.headers()) else {
        return unauthorized_response("missing session token");
    };

    let identity = match jwt_service.validate_session_token(&token) {
        Ok(identity) => identity,
        Err(_) => return unauthorized_response("invalid session token"),
    };

    request.extensions_mut().insert(AuthenticatedUser::from(identity));

    next.run(request).await
}

/// Must run inside [`require_session`].
pub async fn require_admin(request: Request, next: Next) -> Response {
    let allowed = request
        .extensions()
        .get::<AuthenticatedUser>()
        .is_some_and(|user| user.role.allows(SessionRole::Admin));

    if !allowed {
        return RelayError::new(ErrorCode::AuthForbidden, "admin role required").into_response();
    }

    next.run(request).await
}

pub fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
        .map(ToOwned::to_owned)
        .or_else(|| session_token_from_cookies(headers))
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_response(message: &'static str) -> Response {
    RelayError::new(ErrorCode::AuthInvalidToken, message).into_response()
}
