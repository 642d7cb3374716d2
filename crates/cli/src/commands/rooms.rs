// `quizpulse rooms`: list rooms with live connections.

use anyhow::Result;
use clap::Args;

use super::{authenticated_client, block_on, emit, CommonArgs};
use crate::client::RoomsEnvelope;

#[derive(Debug, Args)]
pub struct RoomsArgs {
    #[command(flatten)]
    common: CommonArgs,
}

pub fn run(args: RoomsArgs) -> Result<()> {
    let format = args.common.format();
    let result = authenticated_client(args.common.relay.as_deref())
        .and_then(|client| block_on(async move { client.list_rooms().await }))
        .and_then(|result| result);
    emit(format, result, format_human)
}

fn format_human(result: &RoomsEnvelope) -> String {
    if result.rooms.is_empty() {
        return "No live rooms.".into();
    }

    let mut lines = vec![format!("{} room(s)", result.rooms.len())];
    for room in &result.rooms {
        lines.push(format!("  {}  {} connection(s)", room.room_id, room.connection_count));
    }
    lines.join("\n")
}
