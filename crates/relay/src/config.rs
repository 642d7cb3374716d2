// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development.

use std::net::SocketAddr;

use crate::ws::{HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS};

const DEV_JWT_SECRET: &str = "quizpulse_local_development_jwt_secret_32_chars";

pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 15 * 60;
pub const DEFAULT_MAX_PRESENCE_BYTES: usize = 4 * 1024;
pub const DEFAULT_ROOM_CHANNEL_CAPACITY: usize = 256;

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT signing secret for session tokens.
    pub jwt_secret: String,
    /// Lifetime of issued session tokens and cookies.
    pub session_ttl_seconds: i64,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `quizpulse_relay=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
    /// User ids that receive the admin role when a session is issued.
    pub admin_user_ids: Vec<String>,
    /// Shared key the upstream app must present to mint sessions. When
    /// unset, session issuance is open (development only).
    pub issuer_key: Option<String>,
    /// Mark the session cookie `Secure`.
    pub cookie_secure: bool,
    /// Largest accepted presence payload, in bytes of JSON.
    pub max_presence_bytes: usize,
    /// Per-room broadcast buffer before slow subscribers lag.
    pub room_channel_capacity: usize,
    /// Ping period for idle sockets.
    pub heartbeat_interval_ms: u64,
    /// How long a ping may go unanswered before the socket is dropped.
    pub heartbeat_timeout_ms: u64,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `QUIZPULSE_RELAY_HOST` | `0.0.0.0` |
    /// | `QUIZPULSE_RELAY_PORT` | `8080` |
    /// | `QUIZPULSE_RELAY_JWT_SECRET` | dev-only placeholder |
    /// | `QUIZPULSE_RELAY_SESSION_TTL_SECONDS` | `900` |
    /// | `QUIZPULSE_RELAY_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `QUIZPULSE_RELAY_LOG_FILTER` | `info` |
    /// | `QUIZPULSE_RELAY_LOG_FORMAT` | `text` (`json` for structured output) |
    /// | `QUIZPULSE_RELAY_ADMIN_USER_IDS` | *(none)*, comma-separated |
    /// | `QUIZPULSE_RELAY_ISSUER_KEY` | *(none)* |
    /// | `QUIZPULSE_RELAY_COOKIE_SECURE` | `false` |
    /// | `QUIZPULSE_RELAY_MAX_PRESENCE_BYTES` | `4096` |
    /// | `QUIZPULSE_RELAY_ROOM_CHANNEL_CAPACITY` | `256` |
    /// | `QUIZPULSE_RELAY_HEARTBEAT_INTERVAL_MS` | `15000` |
    /// | `QUIZPULSE_RELAY_HEARTBEAT_TIMEOUT_MS` | `10000` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    pub fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("QUIZPULSE_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 =
            env("QUIZPULSE_RELAY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret =
            env("QUIZPULSE_RELAY_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let session_ttl_seconds = env("QUIZPULSE_RELAY_SESSION_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|ttl| *ttl > 0)
            .unwrap_or(DEFAULT_SESSION_TTL_SECONDS);

        let cors_origins = env("QUIZPULSE_RELAY_CORS_ORIGINS").ok();
        let log_filter = env("QUIZPULSE_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("QUIZPULSE_RELAY_LOG_FORMAT").ok().as_deref() {
            Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let admin_user_ids = env("QUIZPULSE_RELAY_ADMIN_USER_IDS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let issuer_key = env("QUIZPULSE_RELAY_ISSUER_KEY").ok().filter(|key| !key.is_empty());
        let cookie_secure = env("QUIZPULSE_RELAY_COOKIE_SECURE")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let max_presence_bytes = env("QUIZPULSE_RELAY_MAX_PRESENCE_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|bytes| *bytes > 0)
            .unwrap_or(DEFAULT_MAX_PRESENCE_BYTES);
        let room_channel_capacity = env("QUIZPULSE_RELAY_ROOM_CHANNEL_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|capacity| *capacity > 0)
            .unwrap_or(DEFAULT_ROOM_CHANNEL_CAPACITY);
        let heartbeat_interval_ms = positive_u64(&env, "QUIZPULSE_RELAY_HEARTBEAT_INTERVAL_MS")
            .unwrap_or(HEARTBEAT_INTERVAL_MS);
        let heartbeat_timeout_ms = positive_u64(&env, "QUIZPULSE_RELAY_HEARTBEAT_TIMEOUT_MS")
            .unwrap_or(HEARTBEAT_TIMEOUT_MS);

        Self {
            listen_addr,
            jwt_secret,
            session_ttl_seconds,
            cors_origins,
            log_filter,
            log_format,
            admin_user_ids,
            issuer_key,
            cookie_secure,
            max_presence_bytes,
            room_channel_capacity,
            heartbeat_interval_ms,
            heartbeat_timeout_ms,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_user_ids.iter().any(|admin| admin == user_id)
    }
}

fn positive_u64<F>(env: &F, key: &str) -> Option<u64>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    env(key).ok().and_then(|v| v.parse::<u64>().ok()).filter(|value| *value > 0)
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_env_fn(|_| Err(std::env::VarError::NotPresent))
    }
}
