// `quizpulse watch`: live activity monitor for one room.
//
// Joins without publishing presence, so the monitor never shows up as a
// user, only as a connection.

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use quizpulse_common::aggregate::PresenceAggregator;
use quizpulse_common::protocol::ws::WsMessage;
use quizpulse_common::room::RoomId;

use super::activity::render_summary;
use super::{authenticated_client, block_on, CommonArgs};
use crate::client::{PresenceSocket, RoomActivity};
use crate::output::{self, OutputFormat};

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Room to monitor.
    #[arg(long, default_value = "admin-dashboard")]
    room: RoomId,
    /// Re-render interval in milliseconds.
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
    #[command(flatten)]
    common: CommonArgs,
}

pub fn run(args: WatchArgs) -> Result<()> {
    let format = args.common.format();
    let result = authenticated_client(args.common.relay.as_deref())
        .and_then(|client| {
            block_on(async move {
                let socket = client.connect_presence().await?;
                watch(socket, &args.room, Duration::from_millis(args.interval_ms.max(100)), format)
                    .await
            })
        })
        .and_then(|result| result);

    if let Err(error) = &result {
        output::print_anyhow_error(format, error);
    }
    result
}

async fn watch(
    mut socket: PresenceSocket,
    room_id: &RoomId,
    interval: Duration,
    format: OutputFormat,
) -> Result<()> {
    socket.join(room_id, None).await?;
    tracing::info!(%room_id, "watching room");

    let mut aggregator = PresenceAggregator::new();
    let mut ticker = summary_ticker(interval);

    loop {
        tokio::select! {
            message = socket.next_message() => {
                match message? {
                    Some(message) => apply_message(&mut aggregator, room_id, message, format),
                    None => bail!("relay closed the connection"),
                }
            }
            _ = ticker.tick() => {
                let activity =
                    RoomActivity { room_id: room_id.clone(), summary: aggregator.summary() };
                output::print_output(format, &activity, format_human)?;
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = socket.leave(room_id).await;
                socket.close().await;
                return Ok(());
            }
        }
    }
}

/// First tick lands one interval out, after the join snapshot has arrived.
fn summary_ticker(interval: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker
}

fn apply_message(
    aggregator: &mut PresenceAggregator,
    room_id: &RoomId,
    message: WsMessage,
    format: OutputFormat,
) {
    if let WsMessage::Error { code, message, .. } = &message {
        output::print_warning(format, code, message);
        return;
    }
    match message.to_room_event() {
        Some((event_room, event)) if event_room == room_id => aggregator.apply(event),
        Some((event_room, _)) => tracing::debug!(%event_room, "ignoring event for another room"),
        None => {}
    }
}

fn format_human(activity: &RoomActivity) -> String {
    format!("{CLEAR_SCREEN}{}", render_summary(&activity.room_id, &activity.summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizpulse_common::presence::ConnectionId;
    use quizpulse_common::protocol::ws::PeerFrame;
    use serde_json::json;

    fn presence(user: &str, page: &str) -> serde_json::Value {
        json!({
            "currentPage": page,
            "isActive": true,
            "lastActiveAt": "2026-03-14T09:00:00.000Z",
            "userId": format!("u-{user}"),
            "username": user
        })
    }

    fn frame(id: u64, presence: Option<serde_json::Value>) -> PeerFrame {
        PeerFrame { connection_id: ConnectionId(id), presence }
    }

    #[test]
    fn frames_drive_the_aggregator() {
        let room = RoomId::admin_dashboard();
        let mut aggregator = PresenceAggregator::new();
        let messages = vec![
            WsMessage::RoomState {
                room_id: room.clone(),
                connection_id: ConnectionId(9),
                peers: vec![frame(1, Some(presence("alice", "/home"))), frame(9, None)],
            },
            WsMessage::PeerJoined {
                room_id: room.clone(),
                peer: frame(2, Some(presence("bob", "/home"))),
            },
            WsMessage::PeerUpdated {
                room_id: room.clone(),
                peer: frame(1, Some(presence("alice", "/quizzes/3"))),
            },
            WsMessage::PeerLeft { room_id: room.clone(), connection_id: ConnectionId(2) },
        ];
        for message in messages {
            apply_message(&mut aggregator, &room, message, OutputFormat::Json);
        }

        let summary = aggregator.summary();
        assert_eq!(summary.connection_count, 2);
        assert_eq!(summary.active_users.len(), 1);
        assert_eq!(summary.active_users[0].current_page, "/quizzes/3");
    }

    #[test]
    fn events_for_other_rooms_are_ignored() {
        let room = RoomId::admin_dashboard();
        let other = RoomId::quiz_attempt("1").unwrap();
        let mut aggregator = PresenceAggregator::new();
        apply_message(
            &mut aggregator,
            &room,
            WsMessage::PeerJoined { room_id: other, peer: frame(1, Some(presence("eve", "/"))) },
            OutputFormat::Json,
        );
        assert!(aggregator.is_empty());
    }

    #[test]
    fn format_human_clears_screen_before_summary() {
        let activity =
            RoomActivity { room_id: RoomId::admin_dashboard(), summary: Default::default() };
        let output = format_human(&activity);
        assert!(output.starts_with(CLEAR_SCREEN));
        assert!(output.contains("Room admin-dashboard: 0 connection(s)"));
    }

    #[tokio::test]
    async fn summary_ticker_waits_a_full_interval_before_first_tick() {
        let mut ticker = summary_ticker(Duration::from_millis(200));
        assert!(tokio::time::timeout(Duration::from_millis(50), ticker.tick()).await.is_err());
        tokio::time::timeout(Duration::from_secs(1), ticker.tick())
            .await
            .expect("first tick should arrive after one interval");
    }
}
