//! Sprint model.
//!
//! Sprints are shared between issues and refreshed independently, since
//! issue search never reports a sprint closing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sprint lifecycle state.
///
/// The agile API reports `active`, `future` and `closed`. JQL and older
/// tooling call the active state `open`, so both spellings parse to
/// [`SprintState::Active`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SprintState {
    #[serde(alias = "open")]
    Active,
    Future,
    Closed,
}

impl SprintState {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 3] = [Self::Future, Self::Active, Self::Closed];

    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Future => "future",
            Self::Closed => "closed",
        }
    }

    /// Parse a stored or remote state name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" | "open" => Some(Self::Active),
            "future" => Some(Self::Future),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SprintState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sprint as last seen remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sprint {
    pub id: u64,
    pub name: String,
    pub state: SprintState,
    pub goal: Option<String>,
    pub board_id: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Sprint {
    /// Create a sprint with only identity and state set.
    pub fn new(id: u64, name: impl Into<String>, state: SprintState) -> Self {
        Self {
            id,
            name: name.into(),
            state,
            goal: None,
            board_id: None,
            started_at: None,
            ended_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_open_alias() {
        assert_eq!(SprintState::parse("open"), Some(SprintState::Active));
        assert_eq!(SprintState::parse("ACTIVE"), Some(SprintState::Active));
        assert_eq!(SprintState::parse("future"), Some(SprintState::Future));
        assert_eq!(SprintState::parse("closed"), Some(SprintState::Closed));
        assert_eq!(SprintState::parse("done"), None);
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&SprintState::Future).unwrap();
        assert_eq!(json, "\"future\"");

        let state: SprintState = serde_json::from_str("\"open\"").unwrap();
        assert_eq!(state, SprintState::Active);
    }
}
