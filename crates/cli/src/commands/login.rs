// `quizpulse login`: obtain a session token and store it locally.

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};

use super::{block_on, emit, CommonArgs};
use crate::client::RelayClient;
use crate::config::{CliConfig, StoredSession};

const ISSUER_KEY_ENV: &str = "QUIZPULSE_ISSUER_KEY";

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Stable user id from the quiz application.
    #[arg(long)]
    user_id: String,
    /// Display name shown to admins.
    #[arg(long)]
    username: String,
    /// Shared key required by relays that restrict session issuance.
    /// Falls back to $QUIZPULSE_ISSUER_KEY.
    #[arg(long)]
    issuer_key: Option<String>,
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResult {
    pub relay_url: String,
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub expires_at: String,
    pub config_path: String,
}

pub fn run(args: LoginArgs) -> Result<()> {
    let format = args.common.format();
    let result = block_on(login(args)).and_then(|result| result);
    emit(format, result, format_human)
}

async fn login(args: LoginArgs) -> Result<LoginResult> {
    let mut config = CliConfig::load()?;
    let relay_url = config.relay_url(args.common.relay.as_deref());
    let issuer_key = args.issuer_key.or_else(|| std::env::var(ISSUER_KEY_ENV).ok());

    let client = RelayClient::new(&relay_url)?;
    let session =
        client.create_session(&args.user_id, &args.username, issuer_key.as_deref()).await?;
    tracing::debug!(user_id = %args.user_id, role = %session.role, "session issued");

    config.relay_url = Some(relay_url.clone());
    config.session = Some(StoredSession {
        token: session.token,
        user_id: args.user_id.clone(),
        username: args.username.clone(),
        role: session.role.clone(),
        expires_at: session.expires_at.clone(),
    });
    let path = config.save()?;

    Ok(LoginResult {
        relay_url,
        user_id: args.user_id,
        username: args.username,
        role: session.role,
        expires_at: session.expires_at,
        config_path: path.display().to_string(),
    })
}

fn format_human(result: &LoginResult) -> String {
    format!(
        "Logged in to {} as {} ({}, {})\nSession expires at {}\nSaved to {}",
        result.relay_url,
        result.username,
        result.user_id,
        result.role,
        result.expires_at,
        result.config_path
    )
}
