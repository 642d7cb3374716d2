// `quizpulse whoami`: show the stored identity as the relay sees it.

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};

use super::{block_on, emit, CommonArgs};
use crate::client::RelayClient;
use crate::config::CliConfig;

#[derive(Debug, Args)]
pub struct WhoamiArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoamiResult {
    pub relay_url: String,
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub expires_at: String,
}

pub fn run(args: WhoamiArgs) -> Result<()> {
    let format = args.common.format();
    let result = block_on(whoami(args)).and_then(|result| result);
    emit(format, result, format_human)
}

async fn whoami(args: WhoamiArgs) -> Result<WhoamiResult> {
    let config = CliConfig::load()?;
    let session = config
        .session
        .as_ref()
        .context("no stored session; run: quizpulse login --user-id <id> --username <name>")?;
    let relay_url = config.relay_url(args.common.relay.as_deref());

    let identity =
        RelayClient::new(&relay_url)?.with_token(session.token.clone()).current_session().await?;

    Ok(WhoamiResult {
        relay_url,
        user_id: identity.user_id,
        username: identity.username,
        role: identity.role,
        expires_at: session.expires_at.clone(),
    })
}

fn format_human(result: &WhoamiResult) -> String {
    [
        format!("User:     {} ({})", result.username, result.user_id),
        format!("Role:     {}", result.role),
        format!("Relay:    {}", result.relay_url),
        format!("Expires:  {}", result.expires_at),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_human_lists_identity() {
        let result = WhoamiResult {
            relay_url: "https://presence.example.com".into(),
            user_id: "u-7".into(),
            username: "bob".into(),
            role: "member".into(),
            expires_at: "2026-03-14T09:15:00+00:00".into(),
        };
        let output = format_human(&result);
        assert!(output.contains("User:     bob (u-7)"));
        assert!(output.contains("Role:     member"));
        assert!(output.contains("Relay:    https://presence.example.com"));
    }

    #[test]
    fn json_output_roundtrip() {
        let result = WhoamiResult {
            relay_url: "http://127.0.0.1:8080".into(),
            user_id: "u-1".into(),
            username: "alice".into(),
            role: "admin".into(),
            expires_at: "2026-03-14T09:15:00+00:00".into(),
        };
        let json = serde_json::to_string(&result).unwrap();
        let parsed: WhoamiResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.role, "admin");
        assert_eq!(parsed.username, "alice");
    }
}
