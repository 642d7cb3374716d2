// Local CLI state: `~/.quizpulse/config.toml`.
//
// Holds the relay URL and the session issued by `quizpulse login`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8080";

/// Root directory for CLI state: `~/.quizpulse/`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".quizpulse"))
}

/// Path to the CLI config file: `~/.quizpulse/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory")]
    NoHomeDir,
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CliConfig {
    /// Relay base URL (e.g. `https://presence.example.com`).
    pub relay_url: Option<String>,
    pub session: Option<StoredSession>,
}

/// Session issued by the relay at login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredSession {
    pub token: String,
    pub user_id: String,
    pub username: String,
    pub role: String,
    pub expires_at: String,
}

impl CliConfig {
    /// Load from `~/.quizpulse/config.toml`. A missing file yields defaults;
    /// an unreadable or invalid one is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path().ok_or(ConfigError::NoHomeDir)?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(ConfigError::Io(error)),
        }
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = config_path().ok_or(ConfigError::NoHomeDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        restrict_to_owner(path)?;
        Ok(())
    }

    /// `--relay` wins over the stored URL, which wins over the default.
    pub fn relay_url(&self, override_url: Option<&str>) -> String {
        override_url
            .map(str::to_string)
            .or_else(|| self.relay_url.clone())
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string())
    }

    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.token.as_str())
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
