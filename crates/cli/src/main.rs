// quizpulse CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod client;
mod commands;
mod config;
mod exit_code;
mod output;

use exit_code::ExitCode;

#[derive(Parser)]
#[command(name = "quizpulse", about = "Live presence for quiz takers and admin monitors")]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match commands::run(cli.command) {
        Ok(()) => ExitCode::Success.into(),
        Err(error) => {
            tracing::debug!(error = %format!("{error:#}"), "command failed");
            ExitCode::from_error(&error).into()
        }
    }
}

/// Diagnostics go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("QUIZPULSE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
