//! Issue aggregate and its fingerprint.
//!
//! An [`Issue`] is everything a sync writes for one remote record. A
//! [`Stamp`] is the slice of it that search returns cheaply, and is all the
//! change detector ever compares.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::sprint::Sprint;

/// Changelog field name for status transitions.
pub const STATUS_FIELD: &str = "status";

/// Minimal fingerprint used to detect change without fetching detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub id: u64,
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Stamp {
    /// Whether `other` describes a newer (or different) revision of this record.
    ///
    /// Only `updated_at` participates. Assumes it never moves backwards for
    /// a given id.
    #[must_use]
    pub fn differs_from(&self, other: &Stamp) -> bool {
        self.updated_at != other.updated_at
    }
}

/// A remote user account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub email: Option<String>,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub active: bool,
    pub account_type: Option<String>,
}

/// Reference to an issue's parent.
///
/// Deliberately not an [`Issue`]: the parent is stored by key only and its
/// own parent is never followed, so the hierarchy is at most one level deep
/// per record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub id: u64,
    pub key: String,
    pub summary: Option<String>,
    pub issue_type: Option<String>,
    pub status: Option<String>,
}

/// A release an issue is targeted at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixVersion {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
    pub released: bool,
    pub archived: bool,
    pub release_date: Option<NaiveDate>,
}

/// A free-form issue label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(pub String);

impl Label {
    /// Stable content hash, used as the label's row identity.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Label {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Label {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A product option from the products custom field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    pub name: String,
}

/// Aggregate progress counters (time tracking, in seconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub progress: u64,
    pub total: u64,
}

/// One observed field transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    /// History id; several entries can share one when a single edit
    /// touched more than one field.
    pub id: u64,
    pub field: String,
    pub author: Option<String>,
    pub from_value: Option<String>,
    pub to_value: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChangelogEntry {
    #[must_use]
    pub fn is_status_transition(&self) -> bool {
        self.field.eq_ignore_ascii_case(STATUS_FIELD)
    }
}

/// Full issue aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: u64,
    pub key: String,
    pub summary: String,
    pub issue_type: String,
    pub status: String,
    pub priority: Option<String>,
    pub project: String,
    pub reporter: Option<Account>,
    pub assignee: Option<Account>,
    pub parent: Option<ParentRef>,
    pub sprints: Vec<Sprint>,
    pub fix_versions: Vec<FixVersion>,
    pub labels: Vec<Label>,
    pub products: Vec<Product>,
    pub story_points: Option<f64>,
    /// Allocation field (team locality).
    pub locality: Option<String>,
    pub resolution: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub progress: Option<Progress>,
    pub changelog: Vec<ChangelogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    /// Create an issue with identity and timestamps; everything else empty.
    pub fn new(id: u64, key: impl Into<String>, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            key: key.into(),
            summary: String::new(),
            issue_type: String::new(),
            status: String::new(),
            priority: None,
            project: String::new(),
            reporter: None,
            assignee: None,
            parent: None,
            sprints: Vec::new(),
            fix_versions: Vec::new(),
            labels: Vec::new(),
            products: Vec::new(),
            story_points: None,
            locality: None,
            resolution: None,
            resolved_at: None,
            progress: None,
            changelog: Vec::new(),
            created_at,
            updated_at,
        }
    }

    /// The fingerprint of this revision.
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        Stamp {
            id: self.id,
            key: self.key.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
