// `quizpulse join`: publish presence as a quiz taker until Ctrl-C.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use quizpulse_common::presence::{ActionType, ConnectionId, Presence};
use quizpulse_common::protocol::ws::WsMessage;
use quizpulse_common::room::RoomId;
use serde::{Deserialize, Serialize};

use super::{authenticated_client, block_on, CommonArgs};
use crate::client::{PresenceSocket, RelayApiError};
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct JoinArgs {
    /// Room to join, e.g. `quiz-attempt:42`.
    #[arg(long)]
    room: RoomId,
    /// Page to report, e.g. `/quizzes/42`.
    #[arg(long)]
    page: String,
    /// Report an in-progress attempt of this quiz.
    #[arg(long, conflicts_with = "completed")]
    attempting: Option<String>,
    /// Report a completed attempt of this quiz.
    #[arg(long)]
    completed: Option<String>,
    /// Report the user as idle.
    #[arg(long)]
    idle: bool,
    /// Seconds between keep-alive presence refreshes.
    #[arg(long, default_value_t = 30)]
    refresh_secs: u64,
    #[command(flatten)]
    common: CommonArgs,
}

/// Printed once the relay confirms the join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinResult {
    pub room_id: RoomId,
    pub connection_id: ConnectionId,
    pub peer_count: usize,
    pub presence: Presence,
}

pub fn run(args: JoinArgs) -> Result<()> {
    let format = args.common.format();
    let result = authenticated_client(args.common.relay.as_deref())
        .and_then(|client| {
            block_on(async move {
                let socket = client.connect_presence().await?;
                publish(socket, args, format).await
            })
        })
        .and_then(|result| result);

    if let Err(error) = &result {
        output::print_anyhow_error(format, error);
    }
    result
}

/// Presence for the requested page and quiz action.
fn build_presence(
    user_id: &str,
    username: &str,
    args: &JoinArgs,
    now: DateTime<Utc>,
) -> Presence {
    let mut presence = Presence::new(user_id, username, args.page.as_str(), now);
    if let Some(quiz_id) = &args.attempting {
        presence = presence.begin_action(ActionType::AttemptingQuiz, Some(quiz_id.clone()), now);
    } else if let Some(quiz_id) = &args.completed {
        presence = presence.begin_action(ActionType::CompletedQuiz, Some(quiz_id.clone()), now);
    } else {
        presence = presence.begin_action(ActionType::Viewing, Some(args.page.clone()), now);
    }
    if args.idle {
        presence = presence.set_active(false, now);
    }
    presence
}

async fn publish(mut socket: PresenceSocket, args: JoinArgs, format: OutputFormat) -> Result<()> {
    let (user_id, username) = socket
        .identity()
        .map(|(user_id, username)| (user_id.to_string(), username.to_string()))
        .context("relay did not report an identity")?;
    let room_id = args.room.clone();
    let mut presence = build_presence(&user_id, &username, &args, Utc::now());

    socket.join(&room_id, Some(presence.to_json())).await?;

    let refresh = Duration::from_secs(args.refresh_secs.max(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + refresh, refresh);

    loop {
        tokio::select! {
            message = socket.next_message() => {
                match message? {
                    Some(WsMessage::RoomState { room_id: state_room, connection_id, peers })
                        if state_room == room_id =>
                    {
                        let result = JoinResult {
                            room_id: room_id.clone(),
                            connection_id,
                            peer_count: peers.len(),
                            presence: presence.clone(),
                        };
                        output::print_output(format, &result, format_human)?;
                    }
                    Some(WsMessage::Error { code, message, retryable, .. }) => {
                        return Err(RelayApiError::from_frame(code, message, retryable).into());
                    }
                    Some(other) => tracing::debug!(frame = ?other, "room event"),
                    None => bail!("relay closed the connection"),
                }
            }
            _ = ticker.tick() => {
                if !args.idle {
                    presence = presence.set_active(true, Utc::now());
                }
                socket.update(&room_id, presence.to_json()).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = socket.leave(&room_id).await;
                socket.close().await;
                return Ok(());
            }
        }
    }
}

fn format_human(result: &JoinResult) -> String {
    let state = if result.presence.is_active { "active" } else { "idle" };
    let action = result
        .presence
        .current_action
        .as_ref()
        .map(|action| match &action.resource_id {
            Some(resource) => format!(", {} {resource}", action.action_type),
            None => format!(", {}", action.action_type),
        })
        .unwrap_or_default();
    format!(
        "Joined {} as connection {} ({} peer(s))\nPublishing {} on {} ({state}{action}). Press Ctrl-C to leave.",
        result.room_id,
        result.connection_id,
        result.peer_count,
        result.presence.username,
        result.presence.current_page,
    )
}
