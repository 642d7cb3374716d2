// CLI subcommand dispatch.

use std::future::Future;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::client::RelayClient;
use crate::config::CliConfig;
use crate::output::{self, OutputFormat};

pub mod activity;
pub mod join;
pub mod login;
pub mod rooms;
pub mod watch;
pub mod whoami;

#[derive(Subcommand)]
pub enum Command {
    /// Obtain a session from the relay and store it locally
    Login(login::LoginArgs),
    /// Show the stored identity, validated against the relay
    Whoami(whoami::WhoamiArgs),
    /// List rooms with live connections (admin)
    Rooms(rooms::RoomsArgs),
    /// One-shot activity summary for a room (admin)
    Activity(activity::ActivityArgs),
    /// Live activity monitor for a room
    Watch(watch::WatchArgs),
    /// Publish presence into a room until interrupted
    Join(join::JoinArgs),
}

pub fn run(cmd: Command) -> Result<()> {
    match cmd {
        Command::Login(args) => login::run(args),
        Command::Whoami(args) => whoami::run(args),
        Command::Rooms(args) => rooms::run(args),
        Command::Activity(args) => activity::run(args),
        Command::Watch(args) => watch::run(args),
        Command::Join(args) => join::run(args),
    }
}

/// Flags every command accepts.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// Relay base URL; defaults to the one stored at login.
    #[arg(long)]
    pub relay: Option<String>,
    /// Force JSON output.
    #[arg(long)]
    pub json: bool,
}

impl CommonArgs {
    pub fn format(&self) -> OutputFormat {
        OutputFormat::detect(self.json)
    }
}

pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    Ok(runtime.block_on(future))
}

/// Client carrying the stored session token.
pub(crate) fn authenticated_client(relay_override: Option<&str>) -> Result<RelayClient> {
    let config = CliConfig::load()?;
    let token = config
        .token()
        .context("no stored session; run: quizpulse login --user-id <id> --username <name>")?
        .to_string();
    Ok(RelayClient::new(&config.relay_url(relay_override))?.with_token(token))
}

/// Print the command result, or the mapped error in the same format.
pub(crate) fn emit<T, F>(format: OutputFormat, result: Result<T>, human_fn: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match result {
        Ok(value) => {
            output::print_output(format, &value, human_fn)?;
            Ok(())
        }
        Err(error) => {
            output::print_anyhow_error(format, &error);
            Err(error)
        }
    }
}
