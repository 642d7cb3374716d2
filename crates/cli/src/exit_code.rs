// Consistent exit codes for the quizpulse CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   10 = relay not reachable
//   11 = authentication error
//   13 = network error

use std::process;

use crate::client::RelayApiError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    RelayDown = 10,
    Auth = 11,
    Network = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(api_error) = cause.downcast_ref::<RelayApiError>() {
                return Self::from_relay_code(api_error.code.as_str());
            }
            if let Some(http_error) = cause.downcast_ref::<reqwest::Error>() {
                if http_error.is_connect() {
                    return Self::RelayDown;
                }
                if http_error.is_timeout() {
                    return Self::Network;
                }
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                return match io_err.kind() {
                    std::io::ErrorKind::ConnectionRefused => Self::RelayDown,
                    std::io::ErrorKind::TimedOut => Self::Network,
                    _ => Self::Error,
                };
            }
        }

        Self::Error
    }

    /// Map a relay error code string to an exit code.
    pub fn from_relay_code(code: &str) -> Self {
        match code {
            "AUTH_INVALID_TOKEN" | "AUTH_FORBIDDEN" => Self::Auth,
            "VALIDATION_FAILED" | "UPGRADE_REQUIRED" => Self::Usage,
            _ => Self::Error,
        }
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}
