// Presence data model shared by the relay, the CLI, and the aggregator.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one live room subscription. Allocated by the broadcast
/// channel; clients never choose their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a user is currently doing with a quiz resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Viewing,
    AttemptingQuiz,
    CompletedQuiz,
}

impl ActionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Viewing => "viewing",
            Self::AttemptingQuiz => "attempting_quiz",
            Self::CompletedQuiz => "completed_quiz",
        }
    }

    /// Quiz-related actions are the ones whose wire name mentions `quiz`.
    pub fn is_quiz(self) -> bool {
        self.as_str().contains("quiz")
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub started_at: String,
}

/// A peer's self-reported snapshot of page and activity.
///
/// Always sent as a full replacement. Unknown fields are ignored so newer
/// clients can extend the payload without breaking older monitors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub current_page: String,
    pub is_active: bool,
    pub last_active_at: String,
    pub user_id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_action: Option<CurrentAction>,
}

impl Presence {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        current_page: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            current_page: current_page.into(),
            is_active: true,
            last_active_at: format_timestamp(now),
            user_id: user_id.into(),
            username: username.into(),
            current_action: None,
        }
    }

    /// Parse a presence from raw JSON. Returns `None` for anything
    /// malformed or partial; callers treat that as "no presence".
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Move to another page. Any in-progress action stays attached.
    pub fn navigate(&self, page: impl Into<String>, now: DateTime<Utc>) -> Self {
        let mut next = self.touched(now);
        next.current_page = page.into();
        next
    }

    pub fn begin_action(
        &self,
        action_type: ActionType,
        resource_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut next = self.touched(now);
        next.current_action =
            Some(CurrentAction { action_type, resource_id, started_at: format_timestamp(now) });
        next
    }

    pub fn clear_action(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.touched(now);
        next.current_action = None;
        next
    }

    /// Going idle keeps `last_active_at` at the moment of last activity.
    pub fn set_active(&self, is_active: bool, now: DateTime<Utc>) -> Self {
        if is_active {
            self.touched(now)
        } else {
            Self { is_active: false, ..self.clone() }
        }
    }

    pub fn action_type(&self) -> Option<ActionType> {
        self.current_action.as_ref().map(|action| action.action_type)
    }

    fn touched(&self, now: DateTime<Utc>) -> Self {
        Self { is_active: true, last_active_at: format_timestamp(now), ..self.clone() }
    }
}

/// One connection in a room, with its latest presence if it has sent a
/// well-formed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub connection_id: ConnectionId,
    pub presence: Option<Presence>,
}

impl Peer {
    pub fn new(connection_id: ConnectionId, presence: Option<Presence>) -> Self {
        Self { connection_id, presence }
    }

    pub fn from_raw(connection_id: ConnectionId, raw: Option<&serde_json::Value>) -> Self {
        Self { connection_id, presence: raw.and_then(Presence::from_json) }
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
