// `quizpulse activity`: one-shot admin view of a room.

use anyhow::Result;
use clap::Args;
use quizpulse_common::presence::Presence;
use quizpulse_common::room::RoomId;
use quizpulse_common::views::ActivitySummary;

use super::{authenticated_client, block_on, emit, CommonArgs};
use crate::client::RoomActivity;

#[derive(Debug, Args)]
pub struct ActivityArgs {
    /// Room to inspect, e.g. `admin-dashboard` or `quiz-attempt:42`.
    #[arg(long, default_value = "admin-dashboard")]
    room: RoomId,
    #[command(flatten)]
    common: CommonArgs,
}

pub fn run(args: ActivityArgs) -> Result<()> {
    let format = args.common.format();
    let room = args.room;
    let result = authenticated_client(args.common.relay.as_deref())
        .and_then(|client| block_on(async move { client.room_activity(&room).await }))
        .and_then(|result| result);
    emit(format, result, |activity| render_summary(&activity.room_id, &activity.summary))
}

/// Human rendering shared with `watch`.
pub(crate) fn render_summary(room_id: &RoomId, summary: &ActivitySummary) -> String {
    let mut lines = vec![format!(
        "Room {room_id}: {} connection(s), {} with presence",
        summary.connection_count, summary.present_count
    )];

    if summary.active_users.is_empty() {
        lines.push("No active users.".to_string());
    } else {
        lines.push(format!("Active users ({}):", summary.active_users.len()));
        for user in &summary.active_users {
            lines.push(format!(
                "  {}  {}{}",
                user.username,
                user.current_page,
                describe_action(user)
            ));
        }
    }

    if !summary.users_by_page.is_empty() {
        lines.push("By page:".to_string());
        for page in summary.users_by_page.iter() {
            let names: Vec<String> = page
                .users
                .iter()
                .map(|user| {
                    if user.is_active {
                        user.username.clone()
                    } else {
                        format!("{} (idle)", user.username)
                    }
                })
                .collect();
            lines.push(format!("  {} ({}): {}", page.page, page.users.len(), names.join(", ")));
        }
    }

    if !summary.quiz_activity.is_empty() {
        lines.push("Quiz activity:".to_string());
        for entry in &summary.quiz_activity {
            let resource = entry.action.resource_id.as_deref().unwrap_or("-");
            lines.push(format!(
                "  {}  {} {}  since {}",
                entry.username, entry.action.action_type, resource, entry.action.started_at
            ));
        }
    }

    lines.join("\n")
}

fn describe_action(user: &Presence) -> String {
    match &user.current_action {
        Some(action) => match &action.resource_id {
            Some(resource) => format!("  [{} {resource}]", action.action_type),
            None => format!("  [{}]", action.action_type),
        },
        None => String::new(),
    }
}
