//! Error types for jsync.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=store, 3=not_found, 5=remote, 130=cancelled, etc.)
//! - Step/id context for failures inside one issue's sync
//! - Recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

use crate::sync::{CancelReason, SyncStep};

/// Result type alias for jsync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Store (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,
    StoreError,

    // Not Found (exit 3)
    IssueNotFound,

    // Validation (exit 4)
    InvalidArgument,

    // Remote (exit 5)
    RemoteFetchError,

    // Decode (exit 6)
    DecodeError,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Cancellation (exit 130)
    Cancelled,
    DeadlineExceeded,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::StoreError => "STORE_ERROR",
            Self::IssueNotFound => "ISSUE_NOT_FOUND",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::RemoteFetchError => "REMOTE_FETCH_ERROR",
            Self::DecodeError => "DECODE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized
            | Self::AlreadyInitialized
            | Self::DatabaseError
            | Self::StoreError => 2,
            Self::IssueNotFound => 3,
            Self::InvalidArgument => 4,
            Self::RemoteFetchError => 5,
            Self::DecodeError => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::Cancelled | Self::DeadlineExceeded => 130,
        }
    }

    /// Whether re-running the same command may succeed without changes.
    ///
    /// The engine itself never retries; this is advice for the caller
    /// (scheduler, operator) deciding whether to re-run.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RemoteFetchError | Self::DeadlineExceeded | Self::DatabaseError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in jsync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `jsync init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("Issue not found: {id}")]
    IssueNotFound { id: u64 },

    /// A remote call failed or answered with a non-success status.
    #[error("Remote {operation} failed for {target}: {message}")]
    RemoteFetch {
        operation: &'static str,
        target: String,
        status: Option<u16>,
        message: String,
    },

    /// A remote call answered, but the body could not be understood.
    #[error("Malformed {operation} response for {target}: {message}")]
    Decode {
        operation: &'static str,
        target: String,
        message: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A store operation was rejected (constraint, missing row, bad data).
    #[error("Store {operation} failed for {target}: {message}")]
    Store {
        operation: &'static str,
        target: String,
        message: String,
    },

    /// One step of a single issue's sync failed.
    #[error("{step} failed for issue {id}: {source}")]
    Sync {
        step: SyncStep,
        id: u64,
        source: Box<Error>,
    },

    /// Refreshing one sprint failed.
    #[error("Refreshing sprint {id} failed: {source}")]
    SprintRefresh { id: u64, source: Box<Error> },

    #[error("Sync cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap this error with the sync step and issue id it happened in.
    #[must_use]
    pub fn in_step(self, step: SyncStep, id: u64) -> Self {
        Self::Sync {
            step,
            id,
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through step/sprint wrappers.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Self::Sync { source, .. } | Self::SprintRefresh { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error is a cancellation rather than a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled(_))
    }

    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self.root() {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::IssueNotFound { .. } => ErrorCode::IssueNotFound,
            Self::RemoteFetch { .. } => ErrorCode::RemoteFetchError,
            Self::Decode { .. } => ErrorCode::DecodeError,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Store { .. } => ErrorCode::StoreError,
            Self::Cancelled(CancelReason::Cancelled) => ErrorCode::Cancelled,
            Self::Cancelled(CancelReason::DeadlineExceeded) => ErrorCode::DeadlineExceeded,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Other(_) | Self::Sync { .. } | Self::SprintRefresh { .. } => {
                ErrorCode::InternalError
            }
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Whether re-running may succeed.
    ///
    /// Refines the code-level answer: client errors other than rate
    /// limiting (4xx except 429) will fail the same way again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::RemoteFetch {
                status: Some(status),
                ..
            } => *status == 429 || *status >= 500,
            other => other.error_code().is_retryable(),
        }
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self.root() {
            Self::NotInitialized => Some("Run `jsync init` to create the database".to_string()),

            Self::AlreadyInitialized { path } => Some(format!(
                "Database already exists at {}. Use `--force` to reinitialize.",
                path.display()
            )),

            Self::RemoteFetch {
                status: Some(401 | 403),
                ..
            } => Some(
                "Check JIRA_USERNAME and JIRA_API_TOKEN (or jira.username / jira.api_token \
                 in ~/.jsync/config.json)"
                    .to_string(),
            ),

            Self::RemoteFetch {
                status: Some(429), ..
            } => Some("Rate limited by Jira. Re-run the sync later.".to_string()),

            Self::IssueNotFound { id } => Some(format!(
                "Issue {id} has never been synced. Use `jsync fetch {id}` to pull it."
            )),

            Self::Config(_) => Some(
                "Set JIRA_BASE_URL, JIRA_USERNAME and JIRA_API_TOKEN, or edit ~/.jsync/config.json"
                    .to_string(),
            ),

            Self::Cancelled(CancelReason::DeadlineExceeded) => {
                Some("Raise --timeout, or narrow the --jql filter.".to_string())
            }

            Self::InvalidArgument(msg) if msg.contains("sprint state") => {
                Some("Valid sprint states: active (alias: open), future, closed".to_string())
            }

            _ => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": self.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Self::Sync { step, id, .. } = self {
            obj["error"]["step"] = serde_json::Value::String(step.as_str().to_string());
            obj["error"]["issue_id"] = serde_json::json!(id);
        }

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(status: Option<u16>) -> Error {
        Error::RemoteFetch {
            operation: "get_detail",
            target: "issue 1".into(),
            status,
            message: "boom".into(),
        }
    }

    #[test]
    fn test_step_wrapper_keeps_root_code() {
        let err = remote(Some(500)).in_step(SyncStep::FetchDetail, 42);
        assert_eq!(err.error_code(), ErrorCode::RemoteFetchError);
        assert_eq!(err.exit_code(), 5);
        assert!(err.to_string().contains("issue 42"));
    }

    #[test]
    fn test_cancelled_is_distinguishable() {
        let err = Error::Cancelled(CancelReason::Cancelled).in_step(SyncStep::Store, 3);
        assert!(err.is_cancelled());
        assert_eq!(err.exit_code(), 130);
        assert!(!remote(None).is_cancelled());
    }

    #[test]
    fn test_retryable_by_status() {
        assert!(remote(Some(503)).is_retryable());
        assert!(remote(Some(429)).is_retryable());
        assert!(!remote(Some(404)).is_retryable());
        assert!(remote(None).is_retryable());
        assert!(!Error::Decode {
            operation: "search",
            target: "jql".into(),
            message: "eof".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_structured_json_includes_step() {
        let err = remote(Some(401)).in_step(SyncStep::FetchChangelog, 9);
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "REMOTE_FETCH_ERROR");
        assert_eq!(json["error"]["step"], "fetch_changelog");
        assert_eq!(json["error"]["issue_id"], 9);
        assert!(json["error"]["hint"].is_string());
    }
}
