//! Result and bookkeeping types shared by the sync engine.

use serde::{Deserialize, Serialize};

/// Step within a single issue's sync, reported on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    FetchDetail,
    FetchChangelog,
    LookupStamp,
    Store,
}

impl SyncStep {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FetchDetail => "fetch_detail",
            Self::FetchChangelog => "fetch_changelog",
            Self::LookupStamp => "lookup_stamp",
            Self::Store => "store",
        }
    }
}

impl std::fmt::Display for SyncStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a single issue sync did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Created,
    Updated,
}

/// Counters from one change-detection run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectStats {
    /// Search pages fetched.
    pub pages: usize,
    /// Stamps received across all pages.
    pub discovered: usize,
    /// Ids handed to the dispatcher (new or changed).
    pub dispatched: usize,
    /// Ids skipped because the stored stamp matched.
    pub skipped: usize,
}

/// Counters from one board dependency sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardStats {
    pub fix_versions: usize,
    pub sprints: usize,
}

/// Kind of run recorded in the run ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Issues,
    Fetch,
    Sprints,
}

impl RunKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Issues => "issues",
            Self::Fetch => "fetch",
            Self::Sprints => "sprints",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "issues" => Some(Self::Issues),
            "fetch" => Some(Self::Fetch),
            "sprints" => Some(Self::Sprints),
            _ => None,
        }
    }
}

/// Terminal (or in-flight) status of a recorded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// How a run ended, as written to the ledger.
#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub stats: DetectStats,
    pub error: Option<String>,
    pub cancelled: bool,
}

impl RunOutcome {
    /// Build the ledger outcome from a run result.
    #[must_use]
    pub fn from_result<T>(stats: DetectStats, result: &crate::error::Result<T>) -> Self {
        match result {
            Ok(_) => Self {
                stats,
                error: None,
                cancelled: false,
            },
            Err(err) => Self {
                stats,
                error: Some(err.to_string()),
                cancelled: err.is_cancelled(),
            },
        }
    }

    #[must_use]
    pub fn status(&self) -> RunStatus {
        if self.cancelled {
            RunStatus::Cancelled
        } else if self.error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        }
    }
}
