// Per-socket room membership.
//
// A socket may sit in several rooms at once; each membership owns a
// forwarder task that relays the room's broadcasts (minus the socket's own
// echoes) into the socket's outbound queue.

use quizpulse_common::presence::ConnectionId;
use quizpulse_common::protocol::ws::WsMessage;
use quizpulse_common::room::RoomId;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::middleware::AuthenticatedUser;
use crate::error::{ErrorCode, RelayError};
use crate::metrics;
use crate::rooms::{RoomBroadcast, RoomChannel};
use crate::ws::protocol::{error_frame, relay_error_frame};

pub const MAX_ROOMS_PER_SOCKET: usize = 16;
pub const ROOM_NOT_JOINED: &str = "ROOM_NOT_JOINED";
const UNSUPPORTED_MESSAGE: &str = "UNSUPPORTED_MESSAGE";

struct JoinedRoom {
    connection_id: ConnectionId,
    forwarder: JoinHandle<()>,
}

pub struct SocketSession {
    user: AuthenticatedUser,
    rooms: Arc<dyn RoomChannel>,
    max_presence_bytes: usize,
    outbound: mpsc::Sender<WsMessage>,
    joined: HashMap<RoomId, JoinedRoom>,
}

impl SocketSession {
    pub fn new(
        user: AuthenticatedUser,
        rooms: Arc<dyn RoomChannel>,
        max_presence_bytes: usize,
        outbound: mpsc::Sender<WsMessage>,
    ) -> Self {
        Self { user, rooms, max_presence_bytes, outbound, joined: HashMap::new() }
    }

    pub fn user(&self) -> &AuthenticatedUser {
        &self.user
    }

    pub fn connection_id(&self, room_id: &RoomId) -> Option<ConnectionId> {
        self.joined.get(room_id).map(|joined| joined.connection_id)
    }

    /// Apply one client frame. Returns the frames owed directly to this
    /// socket; room broadcasts travel through the outbound queue.
    pub fn handle(&mut self, message: WsMessage) -> Result<Vec<WsMessage>, WsMessage> {
        match message {
            WsMessage::JoinRoom { room_id, presence } => self.join(room_id, presence),
            WsMessage::UpdatePresence { room_id, presence } => {
                self.update_presence(room_id, presence).map(|()| Vec::new())
            }
            WsMessage::LeaveRoom { room_id } => self.leave(&room_id).map(|()| Vec::new()),
            other => Err(error_frame(
                UNSUPPORTED_MESSAGE,
                format!("`{}` frames are not accepted here", super::protocol::frame_type(&other)),
                false,
                None,
            )),
        }
    }

    fn join(
        &mut self,
        room_id: RoomId,
        presence: Option<Value>,
    ) -> Result<Vec<WsMessage>, WsMessage> {
        if let Some(presence) = presence.as_ref() {
            self.check_presence(presence)
                .map_err(|error| relay_error_frame(&error, Some(room_id.clone())))?;
        }

        // Rejoining resends the snapshot and applies any new presence.
        if let Some(connection_id) = self.connection_id(&room_id) {
            if let Some(presence) = presence {
                self.publish(&room_id, connection_id, presence)?;
            }
            return Ok(vec![room_snapshot(self.rooms.as_ref(), &room_id, connection_id)]);
        }

        if self.joined.len() >= MAX_ROOMS_PER_SOCKET {
            let error = RelayError::new(
                ErrorCode::RoomLimitReached,
                format!("a connection may join at most {MAX_ROOMS_PER_SOCKET} rooms"),
            );
            return Err(relay_error_frame(&error, Some(room_id)));
        }

        let membership = self.rooms.join(&room_id, presence);
        let connection_id = membership.connection_id;
        let forwarder = tokio::spawn(forward_room_events(
            Arc::clone(&self.rooms),
            room_id.clone(),
            connection_id,
            membership.receiver,
            self.outbound.clone(),
        ));
        self.joined.insert(room_id.clone(), JoinedRoom { connection_id, forwarder });

        info!(
            room_id = %room_id,
            connection_id = %connection_id,
            user_id = %self.user.user_id,
            "joined room"
        );

        Ok(vec![WsMessage::RoomState { room_id, connection_id, peers: membership.peers }])
    }

    fn update_presence(&mut self, room_id: RoomId, presence: Value) -> Result<(), WsMessage> {
        let Some(connection_id) = self.connection_id(&room_id) else {
            return Err(not_joined(room_id));
        };
        self.check_presence(&presence)
            .map_err(|error| relay_error_frame(&error, Some(room_id.clone())))?;
        self.publish(&room_id, connection_id, presence)
    }

    fn check_presence(&self, presence: &Value) -> Result<(), RelayError> {
        validate_presence(presence, self.max_presence_bytes)?;
        validate_presence_identity(presence, &self.user)
    }

    fn publish(
        &self,
        room_id: &RoomId,
        connection_id: ConnectionId,
        presence: Value,
    ) -> Result<(), WsMessage> {
        self.rooms.publish(room_id, connection_id, presence).map_err(|error| {
            warn!(room_id = %room_id, connection_id = %connection_id, %error, "publish failed");
            relay_error_frame(
                &RelayError::new(ErrorCode::InternalError, error.to_string()),
                Some(room_id.clone()),
            )
        })?;
        metrics::increment_presence_updates();
        debug!(room_id = %room_id, connection_id = %connection_id, "presence updated");
        Ok(())
    }

    fn leave(&mut self, room_id: &RoomId) -> Result<(), WsMessage> {
        let Some(joined) = self.joined.remove(room_id) else {
            return Err(not_joined(room_id.clone()));
        };
        self.release(room_id, joined);
        Ok(())
    }

    /// Leave every joined room, broadcasting `peer_left` to the others.
    pub fn leave_all(&mut self) {
        for (room_id, joined) in std::mem::take(&mut self.joined) {
            self.release(&room_id, joined);
        }
    }

    fn release(&self, room_id: &RoomId, joined: JoinedRoom) {
        joined.forwarder.abort();
        self.rooms.leave(room_id, joined.connection_id);
        info!(
            room_id = %room_id,
            connection_id = %joined.connection_id,
            user_id = %self.user.user_id,
            "left room"
        );
    }
}

impl Drop for SocketSession {
    fn drop(&mut self) {
        self.leave_all();
    }
}

/// Presence must be a JSON object within the size limit. The object's shape
/// is not checked here; readers treat unparseable presence as absent.
pub fn validate_presence(presence: &Value, max_bytes: usize) -> Result<(), RelayError> {
    if !presence.is_object() {
        return Err(RelayError::new(ErrorCode::ValidationFailed, "presence must be a JSON object"));
    }

    let size = serde_json::to_vec(presence).map(|encoded| encoded.len()).unwrap_or(usize::MAX);
    if size > max_bytes {
        return Err(RelayError::new(
            ErrorCode::PresenceTooLarge,
            format!("presence is {size} bytes, limit is {max_bytes}"),
        ));
    }

    Ok(())
}

/// A presence may only speak for the authenticated user. Identity fields are
/// optional, but when present they must match the session.
pub fn validate_presence_identity(
    presence: &Value,
    user: &AuthenticatedUser,
) -> Result<(), RelayError> {
    for (field, expected) in [("userId", &user.user_id), ("username", &user.username)] {
        match presence.get(field) {
            None | Some(Value::Null) => {}
            Some(Value::String(claimed)) if claimed == expected => {}
            Some(_) => {
                return Err(RelayError::new(
                    ErrorCode::ValidationFailed,
                    format!("presence `{field}` does not match the authenticated session"),
                ));
            }
        }
    }
    Ok(())
}

fn not_joined(room_id: RoomId) -> WsMessage {
    error_frame(ROOM_NOT_JOINED, format!("not a member of room `{room_id}`"), false, Some(room_id))
}

fn room_snapshot(
    rooms: &dyn RoomChannel,
    room_id: &RoomId,
    connection_id: ConnectionId,
) -> WsMessage {
    let peers = rooms
        .peer_frames(room_id)
        .into_iter()
        .filter(|peer| peer.connection_id != connection_id)
        .collect();
    WsMessage::RoomState { room_id: room_id.clone(), connection_id, peers }
}

async fn forward_room_events(
    rooms: Arc<dyn RoomChannel>,
    room_id: RoomId,
    connection_id: ConnectionId,
    mut receiver: broadcast::Receiver<RoomBroadcast>,
    outbound: mpsc::Sender<WsMessage>,
) {
    loop {
        let message = match receiver.recv().await {
            Ok(event) if event.origin == connection_id => continue,
            Ok(event) => event.message,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    room_id = %room_id,
                    connection_id = %connection_id,
                    skipped,
                    "room subscriber lagged, resending snapshot"
                );
                metrics::increment_broadcast_lag();
                room_snapshot(rooms.as_ref(), &room_id, connection_id)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if outbound.send(message).await.is_err() {
            break;
        }
    }
}
