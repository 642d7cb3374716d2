// Room identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_ROOM_ID_LEN: usize = 128;

const ADMIN_DASHBOARD_ROOM: &str = "admin-dashboard";
const QUIZ_ATTEMPT_PREFIX: &str = "quiz-attempt:";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomIdError {
    #[error("room id must not be empty")]
    Empty,
    #[error("room id exceeds {MAX_ROOM_ID_LEN} characters")]
    TooLong,
    #[error("room id contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Name of an isolated broadcast scope: `[A-Za-z0-9_.:-]{1,128}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(raw: &str) -> Result<Self, RoomIdError> {
        if raw.is_empty() {
            return Err(RoomIdError::Empty);
        }
        if raw.len() > MAX_ROOM_ID_LEN {
            return Err(RoomIdError::TooLong);
        }
        if let Some(bad) = raw.chars().find(|c| !is_room_char(*c)) {
            return Err(RoomIdError::InvalidCharacter(bad));
        }
        Ok(Self(raw.to_string()))
    }

    /// The shared room every admin monitor view observes.
    pub fn admin_dashboard() -> Self {
        Self(ADMIN_DASHBOARD_ROOM.to_string())
    }

    /// Room scoped to the attempts of a single quiz.
    pub fn quiz_attempt(quiz_id: &str) -> Result<Self, RoomIdError> {
        Self::parse(&format!("{QUIZ_ATTEMPT_PREFIX}{quiz_id}"))
    }

    /// The quiz id when this is a quiz-attempt room.
    pub fn quiz_id(&self) -> Option<&str> {
        self.0.strip_prefix(QUIZ_ATTEMPT_PREFIX).filter(|id| !id.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_room_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomId {
    type Err = RoomIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomId {
    type Error = RoomIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_known_rooms() {
        assert_eq!(RoomId::admin_dashboard().as_str(), "admin-dashboard");
        let room = RoomId::quiz_attempt("42").expect("quiz room should be valid");
        assert_eq!(room.as_str(), "quiz-attempt:42");
        assert_eq!(room.quiz_id(), Some("42"));
        assert_eq!(RoomId::admin_dashboard().quiz_id(), None);
    }

    #[test]
    fn rejects_empty_long_and_odd_ids() {
        assert_eq!(RoomId::parse(""), Err(RoomIdError::Empty));
        assert_eq!(RoomId::parse(&"a".repeat(MAX_ROOM_ID_LEN + 1)), Err(RoomIdError::TooLong));
        assert_eq!(RoomId::parse("room/1"), Err(RoomIdError::InvalidCharacter('/')));
        assert_eq!(RoomId::parse("room 1"), Err(RoomIdError::InvalidCharacter(' ')));
        assert!(RoomId::quiz_attempt("a b").is_err());
    }

    #[test]
    fn max_length_is_inclusive() {
        assert!(RoomId::parse(&"a".repeat(MAX_ROOM_ID_LEN)).is_ok());
    }

    #[test]
    fn serde_validates_on_the_way_in() {
        let room: RoomId = serde_json::from_str("\"quiz-attempt:7\"").expect("valid room");
        assert_eq!(room.quiz_id(), Some("7"));
        assert!(serde_json::from_str::<RoomId>("\"bad room\"").is_err());
        assert_eq!(serde_json::to_string(&room).expect("serialize"), "\"quiz-attempt:7\"");
    }
}
