// WebSocket message types for the quizpulse-presence.v1 protocol.

use crate::aggregate::RoomEvent;
use crate::presence::{ConnectionId, Peer};
use crate::room::RoomId;
use serde::{Deserialize, Serialize};

pub const CURRENT_PROTOCOL_VERSION: &str = "quizpulse-presence.v1";
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[CURRENT_PROTOCOL_VERSION];

/// A connection and its raw presence as stored by the relay.
///
/// Presence stays untyped on the wire; receivers parse it leniently with
/// [`PeerFrame::to_peer`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerFrame {
    pub connection_id: ConnectionId,
    pub presence: Option<serde_json::Value>,
}

impl PeerFrame {
    pub fn to_peer(&self) -> Peer {
        Peer::from_raw(self.connection_id, self.presence.as_ref())
    }
}

/// All message types in the quizpulse-presence.v1 WebSocket protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Client -> Server: initial handshake. The token falls back to the
    /// session cookie sent with the upgrade request.
    Hello {
        protocol_version: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Server -> Client: handshake acknowledgement.
    HelloAck { server_time: String, user_id: String, username: String },

    /// Client -> Server: enter a room, optionally with an initial presence.
    JoinRoom {
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        presence: Option<serde_json::Value>,
    },

    /// Client -> Server: full-replacement presence for the caller's
    /// connection in a room.
    UpdatePresence { room_id: RoomId, presence: serde_json::Value },

    /// Client -> Server: leave a room.
    LeaveRoom { room_id: RoomId },

    /// Server -> Client: full peer snapshot (excluding the receiver) and the
    /// receiver's own connection id.
    RoomState { room_id: RoomId, connection_id: ConnectionId, peers: Vec<PeerFrame> },

    /// Server -> Client: another connection entered the room.
    PeerJoined { room_id: RoomId, peer: PeerFrame },

    /// Server -> Client: another connection replaced its presence.
    PeerUpdated { room_id: RoomId, peer: PeerFrame },

    /// Server -> Client: another connection left the room.
    PeerLeft { room_id: RoomId, connection_id: ConnectionId },

    /// Server -> Client: error.
    Error {
        code: String,
        message: String,
        retryable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
}

impl WsMessage {
    /// Translate a server frame into an aggregator event for its room.
    /// Returns `None` for frames that do not change a peer set.
    pub fn to_room_event(&self) -> Option<(&RoomId, RoomEvent)> {
        match self {
            Self::RoomState { room_id, peers, .. } => {
                Some((room_id, RoomEvent::Reset(peers.iter().map(PeerFrame::to_peer).collect())))
            }
            Self::PeerJoined { room_id, peer } => {
                Some((room_id, RoomEvent::Joined(peer.to_peer())))
            }
            Self::PeerUpdated { room_id, peer } => {
                Some((room_id, RoomEvent::Updated(peer.to_peer())))
            }
            Self::PeerLeft { room_id, connection_id } => {
                Some((room_id, RoomEvent::Left(*connection_id)))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn room() -> RoomId {
        RoomId::admin_dashboard()
    }

    #[test]
    fn frames_are_tagged_snake_case() {
        let samples = [
            (
                WsMessage::Hello {
                    protocol_version: CURRENT_PROTOCOL_VERSION.to_string(),
                    token: Some("jwt".into()),
                },
                "hello",
                &["type", "protocol_version", "token"][..],
            ),
            (
                WsMessage::HelloAck {
                    server_time: "2026-03-14T09:00:00Z".into(),
                    user_id: "u-1".into(),
                    username: "alice".into(),
                },
                "hello_ack",
                &["type", "server_time", "user_id", "username"][..],
            ),
            (
                WsMessage::JoinRoom { room_id: room(), presence: Some(json!({})) },
                "join_room",
                &["type", "room_id", "presence"][..],
            ),
            (
                WsMessage::UpdatePresence { room_id: room(), presence: json!({}) },
                "update_presence",
                &["type", "room_id", "presence"][..],
            ),
            (WsMessage::LeaveRoom { room_id: room() }, "leave_room", &["type", "room_id"][..]),
            (
                WsMessage::RoomState {
                    room_id: room(),
                    connection_id: ConnectionId(3),
                    peers: vec![],
                },
                "room_state",
                &["type", "room_id", "connection_id", "peers"][..],
            ),
            (
                WsMessage::PeerLeft { room_id: room(), connection_id: ConnectionId(3) },
                "peer_left",
                &["type", "room_id", "connection_id"][..],
            ),
            (
                WsMessage::Error {
                    code: "PRESENCE_INVALID".into(),
                    message: "bad".into(),
                    retryable: false,
                    room_id: Some(room()),
                },
                "error",
                &["type", "code", "message", "retryable", "room_id"][..],
            ),
        ];

        for (message, expected_type, expected_keys) in samples {
            let value = serde_json::to_value(message).expect("ws message should serialize");
            assert_eq!(value["type"], expected_type);
            for key in expected_keys {
                assert!(value.get(key).is_some(), "`{expected_type}` frame must include `{key}`");
            }
        }
    }

    #[test]
    fn optional_fields_are_omitted_when_absent() {
        let hello = serde_json::to_value(WsMessage::Hello {
            protocol_version: CURRENT_PROTOCOL_VERSION.into(),
            token: None,
        })
        .expect("serialize");
        assert!(hello.get("token").is_none());

        let join = serde_json::to_value(WsMessage::JoinRoom { room_id: room(), presence: None })
            .expect("serialize");
        assert!(join.get("presence").is_none());
    }

    #[test]
    fn invalid_room_id_fails_decoding() {
        let raw = r#"{"type":"leave_room","room_id":"no spaces allowed"}"#;
        assert!(serde_json::from_str::<WsMessage>(raw).is_err());
    }

    #[test]
    fn peer_frames_map_to_room_events() {
        let update = WsMessage::PeerUpdated {
            room_id: room(),
            peer: PeerFrame { connection_id: ConnectionId(4), presence: Some(json!({"x": 1})) },
        };
        let (room_id, event) = update.to_room_event().expect("peer update is a room event");
        assert_eq!(room_id, &room());
        assert_eq!(event, RoomEvent::Updated(Peer::new(ConnectionId(4), None)));

        let error = WsMessage::Error {
            code: "X".into(),
            message: "y".into(),
            retryable: false,
            room_id: None,
        };
        assert!(error.to_room_event().is_none());
    }
}
