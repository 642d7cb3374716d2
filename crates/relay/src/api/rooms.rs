use axum::{
    extract::{Path, State},
    middleware,
    routing::get,
    Json, Router,
};
use quizpulse_common::room::RoomId;
use quizpulse_common::views::{summarize, ActivitySummary};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::{require_admin, require_session};
use crate::error::{ErrorCode, RelayError};
use crate::rooms::RoomInfo;
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsEnvelope {
    pub rooms: Vec<RoomInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomActivity {
    pub room_id: RoomId,
    #[serde(flatten)]
    pub summary: ActivitySummary,
}

pub fn router(state: AppState) -> Router {
    let session_layer = middleware::from_fn_with_state(state.jwt.clone(), require_session);

    Router::new()
        .route("/v1/rooms", get(list_rooms))
        .route("/v1/rooms/{room_id}/activity", get(room_activity))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(session_layer)
        .with_state(state)
}

async fn list_rooms(State(state): State<AppState>) -> Json<RoomsEnvelope> {
    Json(RoomsEnvelope { rooms: state.rooms.rooms() })
}

/// Derived views over the room's current peers. A room nobody is in
/// reports an empty summary rather than 404; rooms are created lazily.
async fn room_activity(
    State(state): State<AppState>,
    Path(raw_room_id): Path<String>,
) -> Result<Json<RoomActivity>, RelayError> {
    let room_id = RoomId::parse(&raw_room_id)
        .map_err(|error| RelayError::new(ErrorCode::ValidationFailed, error.to_string()))?;
    let summary = summarize(&state.rooms.peers(&room_id));
    Ok(Json(RoomActivity { room_id, summary }))
}
