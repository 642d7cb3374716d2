use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use quizpulse_common::protocol::ws::{WsMessage, CURRENT_PROTOCOL_VERSION};
use quizpulse_common::room::RoomId;
use quizpulse_common::views::ActivitySummary;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsFrame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

pub const ISSUER_KEY_HEADER: &str = "x-quizpulse-issuer-key";

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const HELLO_TIMEOUT_SECS: u64 = 10;

/// Error envelope returned by the relay: `{ "error": { code, message, .. } }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayApiError {
    pub status: u16,
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl RelayApiError {
    /// Error delivered as a websocket `error` frame; there is no HTTP status.
    pub fn from_frame(code: String, message: String, retryable: bool) -> Self {
        Self { status: 0, code, message, retryable }
    }

    /// Parse a non-2xx response body. Bodies that are not an error envelope
    /// still produce an error keyed on the status code.
    pub fn from_response(status: u16, body: &str) -> Self {
        #[derive(Deserialize)]
        struct Envelope {
            error: Inner,
        }

        #[derive(Deserialize)]
        struct Inner {
            code: String,
            message: String,
            #[serde(default)]
            retryable: bool,
        }

        match serde_json::from_str::<Envelope>(body) {
            Ok(Envelope { error }) => Self {
                status,
                code: error.code,
                message: error.message,
                retryable: error.retryable,
            },
            Err(_) => Self {
                status,
                code: format!("HTTP_{status}"),
                message: if body.trim().is_empty() {
                    "relay returned an empty error response".to_string()
                } else {
                    body.trim().to_string()
                },
                retryable: status >= 500,
            },
        }
    }
}

impl fmt::Display for RelayApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "relay error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RelayApiError {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub expires_at: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub connection_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomsEnvelope {
    pub rooms: Vec<RoomInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomActivity {
    pub room_id: RoomId,
    #[serde(flatten)]
    pub summary: ActivitySummary,
}

/// HTTP client for the relay's REST surface.
#[derive(Debug, Clone)]
pub struct RelayClient {
    base_url: Url,
    token: Option<String>,
    http: reqwest::Client,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = parse_relay_url(base_url)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { base_url, token: None, http })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub async fn create_session(
        &self,
        user_id: &str,
        username: &str,
        issuer_key: Option<&str>,
    ) -> Result<Session> {
        let mut request = self
            .http
            .post(self.endpoint("/v1/auth/session")?)
            .json(&serde_json::json!({ "user_id": user_id, "username": username }));
        if let Some(key) = issuer_key {
            request = request.header(ISSUER_KEY_HEADER, key);
        }
        send_json(request).await
    }

    pub async fn current_session(&self) -> Result<Identity> {
        self.get_json("/v1/auth/session").await
    }

    pub async fn list_rooms(&self) -> Result<RoomsEnvelope> {
        self.get_json("/v1/rooms").await
    }

    pub async fn room_activity(&self, room_id: &RoomId) -> Result<RoomActivity> {
        self.get_json(&format!("/v1/rooms/{room_id}/activity")).await
    }

    /// Open the presence socket and complete the hello handshake.
    pub async fn connect_presence(&self) -> Result<PresenceSocket> {
        let ws_url = ws_url(&self.base_url)?;
        let (stream, _) = connect_async(ws_url.as_str())
            .await
            .with_context(|| format!("failed to connect to relay websocket at {ws_url}"))?;
        let mut socket = PresenceSocket { stream, identity: None };

        socket
            .send(&WsMessage::Hello {
                protocol_version: CURRENT_PROTOCOL_VERSION.to_string(),
                token: self.token.clone(),
            })
            .await?;

        let reply = timeout(Duration::from_secs(HELLO_TIMEOUT_SECS), socket.next_message())
            .await
            .map_err(|_| anyhow!("timed out waiting for hello_ack"))??;
        match reply {
            Some(WsMessage::HelloAck { user_id, username, .. }) => {
                tracing::debug!(%user_id, %username, "presence socket authenticated");
                socket.identity = Some((user_id, username));
                Ok(socket)
            }
            Some(WsMessage::Error { code, message, retryable, .. }) => {
                Err(RelayApiError::from_frame(code, message, retryable).into())
            }
            Some(other) => bail!("unexpected handshake reply: {other:?}"),
            None => bail!("relay closed the socket during the handshake"),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).with_context(|| format!("invalid relay path `{path}`"))
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let mut request = self.http.get(self.endpoint(path)?);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        send_json(request).await
    }
}

async fn send_json<R: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<R> {
    let response = request.send().await.context("failed to reach relay")?;
    let status = response.status();
    if status.is_success() {
        return response.json::<R>().await.context("failed to decode relay response");
    }
    let body = response.text().await.unwrap_or_default();
    Err(RelayApiError::from_response(status.as_u16(), &body).into())
}

/// Relay URLs must be plain `http`/`https` origins.
pub fn parse_relay_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("invalid relay URL `{raw}`"))?;
    match url.scheme() {
        "http" | "https" => {}
        other => bail!("relay URL must use http or https, got `{other}`"),
    }
    if url.host_str().is_none() {
        bail!("relay URL `{raw}` has no host");
    }
    Ok(url)
}

/// `http` → `ws`, `https` → `wss`, path `/v1/ws`.
pub fn ws_url(base_url: &Url) -> Result<Url> {
    let mut url = base_url.join("/v1/ws").context("failed to build websocket URL")?;
    let scheme = if base_url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme).map_err(|_| anyhow!("failed to set websocket scheme `{scheme}`"))?;
    Ok(url)
}

/// An authenticated presence connection.
pub struct PresenceSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    identity: Option<(String, String)>,
}

impl PresenceSocket {
    /// `(user_id, username)` from the handshake.
    pub fn identity(&self) -> Option<(&str, &str)> {
        self.identity.as_ref().map(|(user_id, username)| (user_id.as_str(), username.as_str()))
    }

    pub async fn join(&mut self, room_id: &RoomId, presence: Option<Value>) -> Result<()> {
        self.send(&WsMessage::JoinRoom { room_id: room_id.clone(), presence }).await
    }

    pub async fn update(&mut self, room_id: &RoomId, presence: Value) -> Result<()> {
        self.send(&WsMessage::UpdatePresence { room_id: room_id.clone(), presence }).await
    }

    pub async fn leave(&mut self, room_id: &RoomId) -> Result<()> {
        self.send(&WsMessage::LeaveRoom { room_id: room_id.clone() }).await
    }

    pub async fn send(&mut self, message: &WsMessage) -> Result<()> {
        let text = serde_json::to_string(message).context("failed to encode frame")?;
        self.stream.send(WsFrame::Text(text.into())).await.context("failed to send frame")
    }

    /// Next protocol frame, or `None` once the relay closes the socket.
    /// Pings are answered by the websocket layer while reading.
    pub async fn next_message(&mut self) -> Result<Option<WsMessage>> {
        while let Some(frame) = self.stream.next().await {
            match frame.context("websocket read failed")? {
                WsFrame::Text(text) => match serde_json::from_str::<WsMessage>(text.as_str()) {
                    Ok(message) => return Ok(Some(message)),
                    Err(error) => tracing::warn!(%error, "ignoring undecodable relay frame"),
                },
                WsFrame::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
