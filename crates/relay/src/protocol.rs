// Protocol version negotiation.
//
// Clients send a protocol version string in their `hello` frame. The relay
// rejects unsupported versions with an UPGRADE_REQUIRED error.

use crate::error::{ErrorCode, RelayError};
use quizpulse_common::protocol::ws::{CURRENT_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS};
use serde_json::json;

/// Returns true if the given protocol version string is supported.
pub fn is_supported(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Validates a client-supplied protocol version. Returns `Ok(())` if
/// supported, or a `RelayError` with code `UPGRADE_REQUIRED` and
/// `details.supported_versions` if not.
pub fn require_supported(version: &str) -> Result<(), RelayError> {
    if is_supported(version) {
        Ok(())
    } else {
        Err(RelayError::new(
            ErrorCode::UpgradeRequired,
            format!("unsupported protocol version: {version}"),
        )
        .with_details(json!({
            "requested_version": version,
            "supported_versions": SUPPORTED_PROTOCOL_VERSIONS,
            "current_version": CURRENT_PROTOCOL_VERSION,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_version_is_supported() {
        assert!(is_supported(CURRENT_PROTOCOL_VERSION));
        assert!(require_supported(CURRENT_PROTOCOL_VERSION).is_ok());
    }

    #[test]
    fn unknown_version_requires_upgrade() {
        let error = require_supported("quizpulse-presence.v99").expect_err("must be rejected");
        assert_eq!(error.code(), ErrorCode::UpgradeRequired);
        assert!(error.message().contains("quizpulse-presence.v99"));
    }

    #[test]
    fn empty_version_is_rejected() {
        assert!(!is_supported(""));
    }
}
