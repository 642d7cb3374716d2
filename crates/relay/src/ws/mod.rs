pub mod protocol;
pub mod session;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use quizpulse_common::presence::format_timestamp;
use quizpulse_common::protocol::ws::WsMessage;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use crate::auth::middleware::{session_token_from_headers, AuthenticatedUser};
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
    RelayError,
};
use crate::metrics;
use crate::protocol::require_supported;
use crate::AppState;
use protocol::{decode_message, error_frame, frame_type, relay_error_frame, send_ws_message};
use session::SocketSession;

pub const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
const HELLO_TIMEOUT_MS: u64 = 10_000;
pub const MAX_FRAME_BYTES: usize = 65_536;
const OUTBOUND_BUFFER: usize = 64;

const HELLO_REQUIRED: &str = "HELLO_REQUIRED";
const INVALID_MESSAGE: &str = "INVALID_MESSAGE";

pub fn router(state: AppState) -> Router {
    Router::new().route("/v1/ws", get(ws_upgrade)).with_state(state)
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = request_id_from_headers_or_generate(&headers);
    // Browsers cannot set headers on upgrade; remember the cookie for hello.
    let upgrade_token = session_token_from_headers(&headers);

    ws.max_frame_size(MAX_FRAME_BYTES).max_message_size(MAX_FRAME_BYTES).on_upgrade(
        move |socket| async move {
            with_request_id_scope(request_id, handle_socket(state, upgrade_token, socket)).await;
        },
    )
}

fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}

async fn reject(socket: &mut WebSocket, frame: WsMessage) {
    metrics::record_ws_frame("hello", true);
    let _ = send_ws_message(socket, &frame).await;
    let _ = socket.send(Message::Close(None)).await;
}

/// Waits for a `hello` frame and authenticates it.
async fn handshake(
    state: &AppState,
    upgrade_token: Option<String>,
    socket: &mut WebSocket,
) -> Option<AuthenticatedUser> {
    let first = timeout(Duration::from_millis(HELLO_TIMEOUT_MS), socket.recv()).await;
    let raw_message = match first {
        Ok(Some(Ok(Message::Text(raw_message)))) => raw_message,
        Ok(Some(Err(error))) if is_frame_size_violation(&error) => {
            close_frame_too_large(socket).await;
            return None;
        }
        Ok(_) => return None,
        Err(_) => {
            reject(socket, error_frame(HELLO_REQUIRED, "no hello frame received", false, None))
                .await;
            return None;
        }
    };

    let (protocol_version, token) = match decode_message(&raw_message) {
        Ok(WsMessage::Hello { protocol_version, token }) => (protocol_version, token),
        _ => {
            let frame = error_frame(
                HELLO_REQUIRED,
                "first WebSocket message must be a hello frame",
                false,
                None,
            );
            reject(socket, frame).await;
            return None;
        }
    };

    if let Err(error) = require_supported(&protocol_version) {
        reject(socket, relay_error_frame(&error, None)).await;
        return None;
    }

    let identity = token
        .or(upgrade_token)
        .ok_or_else(|| RelayError::new(ErrorCode::AuthInvalidToken, "missing session token"))
        .and_then(|token| {
            state
                .jwt
                .validate_session_token(&token)
                .map_err(|_| RelayError::new(ErrorCode::AuthInvalidToken, "invalid session token"))
        });
    let user = match identity {
        Ok(identity) => AuthenticatedUser::from(identity),
        Err(error) => {
            reject(socket, relay_error_frame(&error, None)).await;
            return None;
        }
    };

    let ack = WsMessage::HelloAck {
        server_time: format_timestamp(Utc::now()),
        user_id: user.user_id.clone(),
        username: user.username.clone(),
    };
    if send_ws_message(socket, &ack).await.is_err() {
        return None;
    }
    metrics::record_ws_frame("hello", false);
    Some(user)
}

async fn wait_for_pong(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn handle_socket(state: AppState, upgrade_token: Option<String>, mut socket: WebSocket) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());

    let Some(user) = handshake(&state, upgrade_token, &mut socket).await else {
        return;
    };
    info!(request_id = %request_id, user_id = %user.user_id, "websocket connected");
    metrics::socket_connected();

    let (outbound_sender, mut outbound_receiver) = mpsc::channel::<WsMessage>(OUTBOUND_BUFFER);
    // Dropping the session leaves every joined room.
    let mut session = SocketSession::new(
        user,
        state.rooms.clone(),
        state.config.max_presence_bytes,
        outbound_sender,
    );

    let heartbeat_period = Duration::from_millis(state.config.heartbeat_interval_ms);
    let mut heartbeat_interval =
        tokio::time::interval_at(Instant::now() + heartbeat_period, heartbeat_period);
    let heartbeat_timeout = Duration::from_millis(state.config.heartbeat_timeout_ms);
    let mut pong_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + heartbeat_timeout);
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            _ = wait_for_pong(pong_deadline) => {
                warn!(
                    request_id = %request_id,
                    user_id = %session.user().user_id,
                    "heartbeat timeout, disconnecting"
                );
                break;
            }
            maybe_outbound = outbound_receiver.recv() => {
                let Some(outbound) = maybe_outbound else {
                    break;
                };
                if send_ws_message(&mut socket, &outbound).await.is_err() {
                    break;
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        pong_deadline = None;
                        if raw_message.len() > MAX_FRAME_BYTES {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }

                        let replies = match decode_message(&raw_message) {
                            Ok(inbound) => {
                                let label = frame_type(&inbound);
                                let result = session.handle(inbound);
                                metrics::record_ws_frame(label, result.is_err());
                                result.unwrap_or_else(|error| vec![error])
                            }
                            Err(_) => {
                                metrics::record_ws_frame("invalid", true);
                                vec![error_frame(
                                    INVALID_MESSAGE,
                                    "invalid websocket frame payload",
                                    false,
                                    None,
                                )]
                            }
                        };

                        let mut send_failed = false;
                        for reply in &replies {
                            if send_ws_message(&mut socket, reply).await.is_err() {
                                send_failed = true;
                                break;
                            }
                        }
                        if send_failed {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        pong_deadline = None;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Binary(_)) => {}
                    Err(error) => {
                        if is_frame_size_violation(&error) {
                            close_frame_too_large(&mut socket).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    info!(request_id = %request_id, user_id = %session.user().user_id, "websocket disconnected");
    drop(session);
    metrics::socket_disconnected();
}
