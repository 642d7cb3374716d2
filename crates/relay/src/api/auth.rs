// Session issuance for the upstream quiz application.
//
// The relay trusts the caller holding the issuer key to vouch for a user
// id and display name; it does not run its own login flow.

use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::DateTime;
use quizpulse_common::presence::format_timestamp;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::json_rejection;
use crate::auth::cookie::{cleared_session_cookie, session_cookie};
use crate::auth::jwt::SessionRole;
use crate::auth::middleware::{require_session, AuthenticatedUser};
use crate::error::{ErrorCode, RelayError};
use crate::AppState;

pub const ISSUER_KEY_HEADER: &str = "x-quizpulse-issuer-key";
const MAX_IDENTITY_LEN: usize = 128;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEnvelope {
    pub token: String,
    pub expires_at: String,
    pub role: SessionRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityEnvelope {
    pub user_id: String,
    pub username: String,
    pub role: SessionRole,
}

pub fn router(state: AppState) -> Router {
    let session_layer = middleware::from_fn_with_state(state.jwt.clone(), require_session);

    Router::new()
        .route("/v1/auth/session", post(create_session).delete(clear_session))
        .route("/v1/auth/session", get(current_session).route_layer(session_layer))
        .with_state(state)
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<Response, RelayError> {
    if let Some(expected) = state.config.issuer_key.as_deref() {
        let presented = headers.get(ISSUER_KEY_HEADER).and_then(|value| value.to_str().ok());
        if presented != Some(expected) {
            return Err(RelayError::new(ErrorCode::AuthForbidden, "issuer key required"));
        }
    }

    let Json(request) = payload.map_err(json_rejection)?;
    let user_id = validate_identity_field("user_id", &request.user_id)?;
    let username = validate_identity_field("username", &request.username)?;

    let role =
        if state.config.is_admin(user_id) { SessionRole::Admin } else { SessionRole::Member };
    let issued = state.jwt.issue_session_token(user_id, username, role).map_err(|error| {
        RelayError::new(ErrorCode::InternalError, format!("failed to issue session: {error:#}"))
    })?;

    let expires_at = DateTime::from_timestamp(issued.expires_at, 0)
        .map(format_timestamp)
        .ok_or_else(|| RelayError::new(ErrorCode::InternalError, "session expiry out of range"))?;
    info!(user_id = %user_id, role = role.as_str(), "session issued");

    let body = Json(SessionEnvelope { token: issued.token.clone(), expires_at, role });
    let mut response = (StatusCode::CREATED, body).into_response();
    if let Some(cookie) =
        session_cookie(&issued.token, state.jwt.ttl_seconds(), state.config.cookie_secure)
    {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    Ok(response)
}

async fn current_session(Extension(user): Extension<AuthenticatedUser>) -> Json<IdentityEnvelope> {
    Json(IdentityEnvelope { user_id: user.user_id, username: user.username, role: user.role })
}

async fn clear_session(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::NO_CONTENT, [(SET_COOKIE, cleared_session_cookie(state.config.cookie_secure))])
}

fn validate_identity_field<'a>(field: &str, value: &'a str) -> Result<&'a str, RelayError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_IDENTITY_LEN {
        return Err(RelayError::new(
            ErrorCode::ValidationFailed,
            format!("{field} must be 1..={MAX_IDENTITY_LEN} characters"),
        ));
    }
    Ok(trimmed)
}
