//! Database schema definitions.
//!
//! The schema is idempotent (`CREATE ... IF NOT EXISTS`) and applied every
//! time a store is opened.

use rusqlite::{Connection, Result};

/// Current schema version, recorded in `schema_migrations`.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the jsync database.
///
/// Timestamps are stored as INTEGER (Unix milliseconds). Remote ids are
/// stored as INTEGER primary keys so they double as the row id.
pub const SCHEMA_SQL: &str = r"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Reference Tables
-- ====================

-- Accounts: reporters and assignees, upserted on every issue write
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    email TEXT,
    display_name TEXT NOT NULL,
    avatar_url TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    account_type TEXT,
    updated_at INTEGER NOT NULL
);

-- Sprints: written by issue sync (as referenced) and by the sprint refresher
CREATE TABLE IF NOT EXISTS sprints (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    state TEXT NOT NULL CHECK (state IN ('active', 'future', 'closed')),
    goal TEXT,
    board_id INTEGER,
    started_at INTEGER,
    ended_at INTEGER,
    completed_at INTEGER,
    synced_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sprints_state ON sprints(state);

CREATE TABLE IF NOT EXISTS fix_versions (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    released INTEGER NOT NULL DEFAULT 0,
    archived INTEGER NOT NULL DEFAULT 0,
    release_date TEXT
);

CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL
);

-- ====================
-- Issues
-- ====================

-- parent_id is deliberately not a foreign key: the parent may never be synced
CREATE TABLE IF NOT EXISTS issues (
    id INTEGER PRIMARY KEY,
    key TEXT NOT NULL UNIQUE,
    summary TEXT NOT NULL,
    issue_type TEXT NOT NULL,
    status TEXT NOT NULL,
    priority TEXT,
    project TEXT NOT NULL,
    reporter_id TEXT REFERENCES accounts(id),
    assignee_id TEXT REFERENCES accounts(id),
    parent_id INTEGER,
    parent_key TEXT,
    story_points REAL,
    locality TEXT,
    resolution TEXT,
    resolved_at INTEGER,
    progress INTEGER,
    progress_total INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    synced_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);
CREATE INDEX IF NOT EXISTS idx_issues_project ON issues(project);
CREATE INDEX IF NOT EXISTS idx_issues_parent ON issues(parent_id);
CREATE INDEX IF NOT EXISTS idx_issues_updated ON issues(updated_at);

-- ====================
-- Associations (current set only, reconciled on every update)
-- ====================

CREATE TABLE IF NOT EXISTS issue_sprints (
    issue_id INTEGER NOT NULL,
    sprint_id INTEGER NOT NULL,
    PRIMARY KEY (issue_id, sprint_id),
    FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE,
    FOREIGN KEY (sprint_id) REFERENCES sprints(id)
);

CREATE INDEX IF NOT EXISTS idx_issue_sprints_sprint ON issue_sprints(sprint_id);

CREATE TABLE IF NOT EXISTS issue_fix_versions (
    issue_id INTEGER NOT NULL,
    fix_version_id INTEGER NOT NULL,
    PRIMARY KEY (issue_id, fix_version_id),
    FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE,
    FOREIGN KEY (fix_version_id) REFERENCES fix_versions(id)
);

-- Labels are identified by content hash
CREATE TABLE IF NOT EXISTS issue_labels (
    issue_id INTEGER NOT NULL,
    label_hash TEXT NOT NULL,
    label TEXT NOT NULL,
    PRIMARY KEY (issue_id, label_hash),
    FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_issue_labels_label ON issue_labels(label);

CREATE TABLE IF NOT EXISTS issue_products (
    issue_id INTEGER NOT NULL,
    product_id INTEGER NOT NULL,
    PRIMARY KEY (issue_id, product_id),
    FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE,
    FOREIGN KEY (product_id) REFERENCES products(id)
);

-- Status transitions; replaced wholesale per issue on every sync
CREATE TABLE IF NOT EXISTS changelog (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    issue_id INTEGER NOT NULL,
    history_id INTEGER NOT NULL,
    field TEXT NOT NULL,
    author TEXT,
    from_value TEXT,
    to_value TEXT,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_changelog_issue ON changelog(issue_id, created_at);

-- ====================
-- Audit and Run Ledger
-- ====================

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    actor TEXT NOT NULL,
    old_value TEXT,
    new_value TEXT,
    comment TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at DESC);

CREATE TABLE IF NOT EXISTS sync_runs (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    filter TEXT,
    status TEXT NOT NULL DEFAULT 'running'
        CHECK (status IN ('running', 'succeeded', 'failed', 'cancelled')),
    pages INTEGER NOT NULL DEFAULT 0,
    discovered INTEGER NOT NULL DEFAULT 0,
    dispatched INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    started_at INTEGER NOT NULL,
    finished_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_sync_runs_started ON sync_runs(started_at DESC);
";

/// Apply the schema to a database connection.
///
/// # Errors
///
/// Returns an error if the schema cannot be applied.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_applies_cleanly() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();

        for expected in [
            "accounts",
            "changelog",
            "events",
            "fix_versions",
            "issue_fix_versions",
            "issue_labels",
            "issue_products",
            "issue_sprints",
            "issues",
            "products",
            "sprints",
            "sync_runs",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
