use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::DEFAULT_SESSION_TTL_SECONDS;

/// What a session may do beyond publishing its own presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    Member,
    Admin,
}

impl SessionRole {
    pub fn allows(self, required: SessionRole) -> bool {
        self >= required
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    username: String,
    role: SessionRole,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: String,
    pub username: String,
    pub role: SessionRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Clone)]
pub struct JwtSessionService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_seconds: i64,
}

impl JwtSessionService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        Self::with_ttl(secret, DEFAULT_SESSION_TTL_SECONDS)
    }

    pub fn with_ttl(secret: &str, ttl_seconds: i64) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }
        if ttl_seconds <= 0 {
            bail!("session ttl must be positive");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_seconds,
        })
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    pub fn issue_session_token(
        &self,
        user_id: &str,
        username: &str,
        role: SessionRole,
    ) -> anyhow::Result<IssuedSession> {
        self.issue_session_token_at(user_id, username, role, current_unix_timestamp()?)
    }

    fn issue_session_token_at(
        &self,
        user_id: &str,
        username: &str,
        role: SessionRole,
        issued_at: i64,
    ) -> anyhow::Result<IssuedSession> {
        let expires_at = issued_at + self.ttl_seconds;
        let claims = SessionClaims {
            sub: user_id.to_string(),
            username: username.to_string(),
            role,
            iat: issued_at,
            exp: expires_at,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode session token")?;
        Ok(IssuedSession { token, expires_at })
    }

    pub fn validate_session_token(&self, token: &str) -> anyhow::Result<SessionIdentity> {
        let claims = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode session token")?
            .claims;

        if claims.sub.trim().is_empty() {
            bail!("session token has an empty subject");
        }

        Ok(SessionIdentity { user_id: claims.sub, username: claims.username, role: claims.role })
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
