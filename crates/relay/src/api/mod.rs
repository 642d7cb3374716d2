pub mod auth;
pub mod rooms;

use axum::{extract::rejection::JsonRejection, Router};

use crate::error::{ErrorCode, RelayError};
use crate::AppState;

pub fn router(state: AppState) -> Router {
    auth::router(state.clone()).merge(rooms::router(state))
}

/// Malformed JSON bodies use the shared error envelope instead of axum's
/// plain-text rejection.
fn json_rejection(rejection: JsonRejection) -> RelayError {
    RelayError::new(ErrorCode::ValidationFailed, rejection.body_text())
}
