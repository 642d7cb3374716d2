// Output format auto-detection for the CLI.
//
// TTY → human-readable text. Piped/redirected → structured JSON.
// `--json` flag forces JSON output regardless of terminal.

use crate::client::RelayApiError;
use crate::config::ConfigError;

use serde::Serialize;
use std::io::{self, IsTerminal, Write};

const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_RESET: &str = "\x1b[0m";

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text (tables, colors, etc.).
    Human,
    /// Machine-readable JSON (one object per response).
    Json,
}

impl OutputFormat {
    /// Auto-detect format: JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    /// Testable variant that takes an explicit `is_tty` flag.
    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

/// Write a value to stdout in the selected format.
///
/// - `Human`: calls `human_fn` to produce a human-readable string.
/// - `Json`: serializes `value` as JSON.
pub fn print_output<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    let mut out = io::stdout().lock();
    match format {
        OutputFormat::Human => {
            writeln!(out, "{}", human_fn(value))
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut out, value).map_err(io::Error::other)?;
            writeln!(out)
        }
    }
}

/// Write a value to a provided writer (useful for testing).
pub fn write_output<W, T, F>(
    writer: &mut W,
    format: OutputFormat,
    value: &T,
    human_fn: F,
) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => {
            writeln!(writer, "{}", human_fn(value))
        }
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

/// Write an error to stderr in the selected format.
pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    let mut err = io::stderr().lock();
    match format {
        OutputFormat::Human => {
            let line =
                render_human_stderr_line("error", message, io::stderr().is_terminal(), ANSI_RED);
            let _ = writeln!(err, "{line}");
        }
        OutputFormat::Json => {
            let obj = serde_json::json!({
                "error": {
                    "code": code,
                    "message": message,
                }
            });
            let _ = serde_json::to_writer(&mut err, &obj);
            let _ = writeln!(err);
        }
    }
}

/// Write a warning to stderr in the selected format.
pub fn print_warning(format: OutputFormat, code: &str, message: &str) {
    let mut err = io::stderr().lock();
    match format {
        OutputFormat::Human => {
            let line = render_human_stderr_line(
                "warning",
                message,
                io::stderr().is_terminal(),
                ANSI_YELLOW,
            );
            let _ = writeln!(err, "{line}");
        }
        OutputFormat::Json => {
            let obj = serde_json::json!({
                "warning": {
                    "code": code,
                    "message": message,
                }
            });
            let _ = serde_json::to_writer(&mut err, &obj);
            let _ = writeln!(err);
        }
    }
}

/// Print a mapped, actionable error for a command failure.
pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    print_error(format, code, &message);
}

fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    let message = format!("{error:#}");

    for cause in error.chain() {
        if let Some(api_error) = cause.downcast_ref::<RelayApiError>() {
            return match api_error.code.as_str() {
                "AUTH_INVALID_TOKEN" => (
                    "AUTH_FAILURE",
                    "Session is missing or expired. Run: quizpulse login --user-id <id> --username <name>"
                        .to_string(),
                ),
                "AUTH_FORBIDDEN" => (
                    "PERMISSION_DENIED",
                    format!(
                        "Permission denied: {}. Admin views need an admin session.",
                        api_error.message
                    ),
                ),
                "VALIDATION_FAILED" => ("VALIDATION_FAILED", api_error.message.clone()),
                "UPGRADE_REQUIRED" => (
                    "UPGRADE_REQUIRED",
                    format!("{} Upgrade the quizpulse CLI.", api_error.message),
                ),
                _ => ("RELAY_ERROR", api_error.to_string()),
            };
        }
        if let Some(http_error) = cause.downcast_ref::<reqwest::Error>() {
            if http_error.is_timeout() {
                return ("NETWORK_TIMEOUT", format!("Relay did not respond in time: {message}"));
            }
            if http_error.is_connect() {
                return (
                    "RELAY_UNREACHABLE",
                    "Could not reach the relay. Check it is running or pass --relay <url>.".to_string(),
                );
            }
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ("CONFIG_ERROR", format!("{message}. Check ~/.quizpulse/config.toml"));
        }
    }

    if message.to_ascii_lowercase().contains("timed out") {
        return ("NETWORK_TIMEOUT", message);
    }

    ("ERROR", message)
}

fn render_human_stderr_line(label: &str, message: &str, is_tty: bool, color: &str) -> String {
    if is_tty {
        format!("{color}{label}:{ANSI_RESET} {message}")
    } else {
        format!("{label}: {message}")
    }
}
