use axum::extract::ws::{Message, WebSocket};
use quizpulse_common::protocol::ws::WsMessage;
use quizpulse_common::room::RoomId;

use crate::error::{ErrorCode, RelayError};

pub fn decode_message(raw: &str) -> Result<WsMessage, serde_json::Error> {
    serde_json::from_str::<WsMessage>(raw)
}

pub fn encode_message(message: &WsMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

pub async fn send_ws_message(socket: &mut WebSocket, message: &WsMessage) -> Result<(), ()> {
    let encoded = encode_message(message).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

/// Error frame for a protocol-level failure code that has no REST analogue.
pub fn error_frame(
    code: &str,
    message: impl Into<String>,
    retryable: bool,
    room_id: Option<RoomId>,
) -> WsMessage {
    WsMessage::Error { code: code.to_string(), message: message.into(), retryable, room_id }
}

/// Error frame carrying a registered [`ErrorCode`].
pub fn relay_error_frame(error: &RelayError, room_id: Option<RoomId>) -> WsMessage {
    let code: ErrorCode = error.code();
    error_frame(code.as_str(), error.message(), code.retryable(), room_id)
}

/// Frame name used for metrics labels.
pub fn frame_type(message: &WsMessage) -> &'static str {
    match message {
        WsMessage::Hello { .. } => "hello",
        WsMessage::HelloAck { .. } => "hello_ack",
        WsMessage::JoinRoom { .. } => "join_room",
        WsMessage::UpdatePresence { .. } => "update_presence",
        WsMessage::LeaveRoom { .. } => "leave_room",
        WsMessage::RoomState { .. } => "room_state",
        WsMessage::PeerJoined { .. } => "peer_joined",
        WsMessage::PeerUpdated { .. } => "peer_updated",
        WsMessage::PeerLeft { .. } => "peer_left",
        WsMessage::Error { .. } => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_client_frames() {
        let raw = r#"{"type":"join_room","room_id":"quiz-attempt:7"}"#;
        let decoded = decode_message(raw).expect("join frame should decode");
        assert_eq!(
            decoded,
            WsMessage::JoinRoom {
                room_id: RoomId::parse("quiz-attempt:7").unwrap(),
                presence: None,
            }
        );
        assert_eq!(frame_type(&decoded), "join_room");
    }

    #[test]
    fn rejects_invalid_room_ids_at_decode() {
        assert!(decode_message(r#"{"type":"leave_room","room_id":""}"#).is_err());
        assert!(decode_message(r#"{"type":"leave_room","room_id":"a b"}"#).is_err());
    }

    #[test]
    fn relay_errors_map_to_error_frames() {
        let error = RelayError::new(ErrorCode::PresenceTooLarge, "presence exceeds 4096 bytes");
        let frame = relay_error_frame(&error, Some(RoomId::admin_dashboard()));
        let encoded: serde_json::Value =
            serde_json::from_str(&encode_message(&frame).unwrap()).unwrap();

        assert_eq!(
            encoded,
            json!({
                "type": "error",
                "code": "PRESENCE_TOO_LARGE",
                "message": "presence exceeds 4096 bytes",
                "retryable": false,
                "room_id": "admin-dashboard"
            })
        );
    }
}
