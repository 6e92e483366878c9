//! SQLite storage implementation.
//!
//! [`SqliteStore`] is the production [`LocalStore`]. Every write goes through
//! [`SqliteStore::mutate`], which runs the closure in an IMMEDIATE
//! transaction and writes the audit events it collected before committing.
//! Any error rolls the whole unit back.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, Type};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, Transaction};
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::model::{
    Account, ChangelogEntry, FixVersion, Issue, Label, ParentRef, Product, Progress, Sprint,
    SprintState, Stamp,
};
use crate::storage::events::{get_events, insert_event, Event, EventType};
use crate::storage::schema::apply_schema;
use crate::storage::store::LocalStore;
use crate::sync::reconcile::{diff_sets, SetDiff};
use crate::sync::{DetectStats, RunKind, RunOutcome, RunStatus};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite-based store.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    actor: String,
}

/// Context for a mutation, collecting audit events for the transaction.
pub struct MutationContext {
    /// Name of the operation being performed.
    pub op_name: String,
    /// Actor performing the operation.
    pub actor: String,
    /// Events to write at the end of the transaction.
    pub events: Vec<Event>,
}

impl MutationContext {
    /// Create a new mutation context.
    #[must_use]
    pub fn new(op_name: &str, actor: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            actor: actor.to_string(),
            events: Vec::new(),
        }
    }

    /// Record an event for this operation.
    pub fn record_event(&mut self, entity_type: &str, entity_id: &str, event_type: EventType) {
        self.events
            .push(Event::new(entity_type, entity_id, event_type, &self.actor));
    }

    /// Record an event with old/new values for field tracking.
    pub fn record_change(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor)
                .with_values(old_value, new_value),
        );
    }

    /// Record an event with a free-form comment.
    pub fn record_comment(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        event_type: EventType,
        comment: &str,
    ) {
        self.events.push(
            Event::new(entity_type, entity_id, event_type, &self.actor).with_comment(comment),
        );
    }
}

/// Row counts for the status command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub issues: usize,
    pub sprints: usize,
    /// Sprints in `active` or `future` state.
    pub open_sprints: usize,
    pub fix_versions: usize,
    pub changelog_entries: usize,
    pub accounts: usize,
}

/// One row of the run ledger.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub id: String,
    pub kind: RunKind,
    pub filter: Option<String>,
    pub status: RunStatus,
    pub stats: DetectStats,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SqliteStore {
    /// Open a database at the given path.
    ///
    /// Creates the database and applies schema if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(timeout_ms.unwrap_or(5000)))?;
        apply_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            actor: "jsync".to_string(),
        }
    }

    /// Set the actor recorded on audit events.
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute a mutation with the transaction protocol.
    ///
    /// 1. Begins an IMMEDIATE transaction (for write locking)
    /// 2. Executes the mutation closure
    /// 3. Writes audit events
    /// 4. Commits (or rolls back on error)
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails. The transaction is rolled back on error.
    pub fn mutate<F, R>(&self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction, &mut MutationContext) -> Result<R>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

        let mut ctx = MutationContext::new(op, &self.actor);
        let result = f(&tx, &mut ctx)?;

        for event in &ctx.events {
            insert_event(&tx, event)?;
        }

        tx.commit()?;
        Ok(result)
    }

    // ================
    // Issue Operations
    // ================

    /// Get the stored fingerprint of an issue.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stamp(&self, id: u64) -> Result<Option<Stamp>> {
        let conn = self.conn();
        let stamp = conn
            .query_row(
                "SELECT id, key, created_at, updated_at FROM issues WHERE id = ?1",
                [id],
                |row| {
                    Ok(Stamp {
                        id: row.get(0)?,
                        key: row.get(1)?,
                        created_at: get_datetime(row, 2)?,
                        updated_at: get_datetime(row, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(stamp)
    }

    /// Insert a new issue aggregate.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the id already exists, or a database error.
    pub fn insert_issue(&self, issue: &Issue) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let entity_id = issue.id.to_string();

        self.mutate("create_record", |tx, ctx| {
            let exists = tx
                .query_row("SELECT 1 FROM issues WHERE id = ?1", [issue.id], |_| Ok(()))
                .optional()?
                .is_some();
            if exists {
                return Err(Error::Store {
                    operation: "create_record",
                    target: format!("issue {}", issue.id),
                    message: "issue already exists".to_string(),
                });
            }

            upsert_references(tx, issue, now)?;
            write_issue_row(tx, INSERT_ISSUE_SQL, issue, now)?;
            reconcile_associations(tx, issue, ctx)?;
            replace_changelog(tx, issue)?;

            ctx.record_comment("issue", &entity_id, EventType::IssueCreated, &issue.key);
            Ok(())
        })?;

        debug!(id = issue.id, key = %issue.key, "created issue row");
        Ok(())
    }

    /// Overwrite a stored issue aggregate, reconciling its associations.
    ///
    /// # Errors
    ///
    /// Returns `Error::IssueNotFound` if the id is not stored, or a database error.
    pub fn replace_issue(&self, issue: &Issue) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let entity_id = issue.id.to_string();

        self.mutate("update_record", |tx, ctx| {
            let previous: Option<(String, i64)> = tx
                .query_row(
                    "SELECT status, updated_at FROM issues WHERE id = ?1",
                    [issue.id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((old_status, old_updated)) = previous else {
                return Err(Error::IssueNotFound { id: issue.id });
            };

            upsert_references(tx, issue, now)?;
            write_issue_row(tx, UPDATE_ISSUE_SQL, issue, now)?;
            reconcile_associations(tx, issue, ctx)?;
            replace_changelog(tx, issue)?;

            ctx.record_change(
                "issue",
                &entity_id,
                EventType::IssueUpdated,
                DateTime::from_timestamp_millis(old_updated).map(|dt| dt.to_rfc3339()),
                Some(issue.updated_at.to_rfc3339()),
            );
            if old_status != issue.status {
                ctx.record_change(
                    "issue",
                    &entity_id,
                    EventType::IssueStatusChanged,
                    Some(old_status),
                    Some(issue.status.clone()),
                );
            }
            Ok(())
        })?;

        debug!(id = issue.id, key = %issue.key, "updated issue row");
        Ok(())
    }

    /// Load a full issue aggregate.
    ///
    /// The parent comes back as a reference only (id and key).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_issue(&self, id: u64) -> Result<Option<Issue>> {
        let conn = self.conn();
        let Some(mut issue) = conn.query_row(SELECT_ISSUE_SQL, [id], map_issue_row).optional()? else {
            return Ok(None);
        };

        issue.sprints = query_list(
            &conn,
            &format!(
                "SELECT {SPRINT_COLUMNS} FROM sprints s
                 JOIN issue_sprints l ON l.sprint_id = s.id
                 WHERE l.issue_id = ?1 ORDER BY s.id"
            ),
            id,
            map_sprint_row,
        )?;
        issue.fix_versions = query_list(
            &conn,
            "SELECT f.id, f.name, f.description, f.released, f.archived, f.release_date
             FROM fix_versions f JOIN issue_fix_versions l ON l.fix_version_id = f.id
             WHERE l.issue_id = ?1 ORDER BY f.id",
            id,
            map_fix_version_row,
        )?;
        issue.labels = query_list(
            &conn,
            "SELECT label FROM issue_labels WHERE issue_id = ?1 ORDER BY label",
            id,
            |row| Ok(Label(row.get(0)?)),
        )?;
        issue.products = query_list(
            &conn,
            "SELECT p.id, p.name FROM products p JOIN issue_products l ON l.product_id = p.id
             WHERE l.issue_id = ?1 ORDER BY p.id",
            id,
            |row| {
                Ok(Product {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )?;
        issue.changelog = query_list(
            &conn,
            "SELECT history_id, field, author, from_value, to_value, created_at
             FROM changelog WHERE issue_id = ?1 ORDER BY created_at, id",
            id,
            |row| {
                Ok(ChangelogEntry {
                    id: row.get(0)?,
                    field: row.get(1)?,
                    author: row.get(2)?,
                    from_value: row.get(3)?,
                    to_value: row.get(4)?,
                    created_at: get_datetime(row, 5)?,
                })
            },
        )?;

        Ok(Some(issue))
    }

    /// Ids of the sprints currently linked to an issue, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn issue_sprint_ids(&self, id: u64) -> Result<Vec<u64>> {
        let conn = self.conn();
        query_list(
            &conn,
            "SELECT sprint_id FROM issue_sprints WHERE issue_id = ?1 ORDER BY sprint_id",
            id,
            |row| row.get(0),
        )
    }

    /// Most recent `updated_at` across stored issues.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn last_update(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn();
        let latest = conn.query_row("SELECT MAX(updated_at) FROM issues", [], |row| {
            get_opt_datetime(row, 0)
        })?;
        Ok(latest)
    }

    /// Row counts for status output.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub fn counts(&self) -> Result<StoreCounts> {
        let conn = self.conn();
        let count = |sql: &str| -> Result<usize> {
            Ok(conn.query_row(sql, [], |row| row.get(0))?)
        };

        Ok(StoreCounts {
            issues: count("SELECT COUNT(*) FROM issues")?,
            sprints: count("SELECT COUNT(*) FROM sprints")?,
            open_sprints: count("SELECT COUNT(*) FROM sprints WHERE state IN ('active', 'future')")?,
            fix_versions: count("SELECT COUNT(*) FROM fix_versions")?,
            changelog_entries: count("SELECT COUNT(*) FROM changelog")?,
            accounts: count("SELECT COUNT(*) FROM accounts")?,
        })
    }

    /// Events recorded for an entity, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn events_for(&self, entity_type: &str, entity_id: &str, limit: Option<u32>) -> Result<Vec<Event>> {
        let conn = self.conn();
        Ok(get_events(&conn, entity_type, entity_id, limit)?)
    }

    // =================
    // Sprint Operations
    // =================

    /// Stored sprints in any of `states`, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn sprints_in_states(&self, states: &[SprintState]) -> Result<Vec<Sprint>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; states.len()].join(", ");
        let sql = format!(
            "SELECT {SPRINT_COLUMNS} FROM sprints s WHERE s.state IN ({placeholders}) ORDER BY s.id"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(states.iter().map(SprintState::as_str)),
            map_sprint_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Get one stored sprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_sprint(&self, id: u64) -> Result<Option<Sprint>> {
        let conn = self.conn();
        let sprint = conn
            .query_row(
                &format!("SELECT {SPRINT_COLUMNS} FROM sprints s WHERE s.id = ?1"),
                [id],
                map_sprint_row,
            )
            .optional()?;
        Ok(sprint)
    }

    /// Insert or overwrite a sprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_sprint(&self, sprint: &Sprint) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let entity_id = sprint.id.to_string();

        self.mutate("save_sprint", |tx, ctx| {
            let previous: Option<String> = tx
                .query_row("SELECT state FROM sprints WHERE id = ?1", [sprint.id], |row| row.get(0))
                .optional()?;

            upsert_sprint_row(tx, sprint, now)?;

            ctx.record_comment("sprint", &entity_id, EventType::SprintSaved, &sprint.name);
            if let Some(old) = previous.filter(|old| old != sprint.state.as_str()) {
                ctx.record_change(
                    "sprint",
                    &entity_id,
                    EventType::SprintStateChanged,
                    Some(old),
                    Some(sprint.state.as_str().to_string()),
                );
            }
            Ok(())
        })
    }

    // ======================
    // Fix Version Operations
    // ======================

    /// Get one stored fix version.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_fix_version(&self, id: u64) -> Result<Option<FixVersion>> {
        let conn = self.conn();
        let fix_version = conn
            .query_row(
                "SELECT id, name, description, released, archived, release_date
                 FROM fix_versions WHERE id = ?1",
                [id],
                map_fix_version_row,
            )
            .optional()?;
        Ok(fix_version)
    }

    /// Insert or overwrite a fix version.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_fix_version(&self, fix_version: &FixVersion) -> Result<()> {
        self.mutate("save_fix_version", |tx, ctx| {
            upsert_fix_version_row(tx, fix_version)?;
            let id = fix_version.id.to_string();
            ctx.record_event("fix_version", &id, EventType::FixVersionSaved);
            Ok(())
        })
    }

    // ==============
    // Run Ledger
    // ==============

    /// Record the start of a run and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn start_run(&self, kind: RunKind, filter: Option<&str>) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();

        self.mutate("start_run", |tx, ctx| {
            tx.execute(
                "INSERT INTO sync_runs (id, kind, filter, status, started_at) VALUES (?1, ?2, ?3, 'running', ?4)",
                rusqlite::params![id, kind.as_str(), filter, now],
            )?;
            ctx.record_comment("run", &id, EventType::RunStarted, kind.as_str());
            Ok(())
        })?;

        Ok(id)
    }

    /// Record how a run ended.
    ///
    /// # Errors
    ///
    /// Returns `Error::Store` if the run id is unknown, or a database error.
    pub fn finish_run(&self, run_id: &str, outcome: &RunOutcome) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let status = outcome.status();

        self.mutate("finish_run", |tx, ctx| {
            let updated = tx.execute(
                "UPDATE sync_runs
                 SET status = ?2, pages = ?3, discovered = ?4, dispatched = ?5, skipped = ?6,
                     error = ?7, finished_at = ?8
                 WHERE id = ?1",
                rusqlite::params![
                    run_id,
                    status.as_str(),
                    outcome.stats.pages,
                    outcome.stats.discovered,
                    outcome.stats.dispatched,
                    outcome.stats.skipped,
                    outcome.error,
                    now,
                ],
            )?;
            if updated == 0 {
                return Err(Error::Store {
                    operation: "finish_run",
                    target: format!("run {run_id}"),
                    message: "unknown run".to_string(),
                });
            }
            ctx.record_change(
                "run",
                run_id,
                EventType::RunFinished,
                Some(RunStatus::Running.as_str().to_string()),
                Some(status.as_str().to_string()),
            );
            Ok(())
        })
    }

    /// Most recent runs, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, kind, filter, status, pages, discovered, dispatched, skipped, error,
                    started_at, finished_at
             FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit], |row| {
            let kind: String = row.get(1)?;
            let status: String = row.get(3)?;
            Ok(RunRecord {
                id: row.get(0)?,
                kind: RunKind::parse(&kind).ok_or_else(|| bad_text(1, "run kind", &kind))?,
                filter: row.get(2)?,
                status: RunStatus::parse(&status).ok_or_else(|| bad_text(3, "run status", &status))?,
                stats: DetectStats {
                    pages: row.get(4)?,
                    discovered: row.get(5)?,
                    dispatched: row.get(6)?,
                    skipped: row.get(7)?,
                },
                error: row.get(8)?,
                started_at: get_datetime(row, 9)?,
                finished_at: get_opt_datetime(row, 10)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl LocalStore for SqliteStore {
    async fn get_stamp_by_id(&self, id: u64) -> Result<Option<Stamp>> {
        self.stamp(id)
    }

    async fn create_record(&self, issue: &Issue) -> Result<()> {
        self.insert_issue(issue)
    }

    async fn update_record(&self, issue: &Issue) -> Result<()> {
        self.replace_issue(issue)
    }

    async fn get_sprints_by_state(&self, states: &[SprintState]) -> Result<Vec<Sprint>> {
        self.sprints_in_states(states)
    }

    async fn save_sprint(&self, sprint: &Sprint) -> Result<()> {
        self.upsert_sprint(sprint)
    }

    async fn save_fix_version(&self, fix_version: &FixVersion) -> Result<()> {
        self.upsert_fix_version(fix_version)
    }
}

// ==================
// Write helpers
// ==================

const INSERT_ISSUE_SQL: &str = "INSERT INTO issues (
        id, key, summary, issue_type, status, priority, project, reporter_id, assignee_id,
        parent_id, parent_key, story_points, locality, resolution, resolved_at,
        progress, progress_total, created_at, updated_at, synced_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)";

const UPDATE_ISSUE_SQL: &str = "UPDATE issues SET
        key = ?2, summary = ?3, issue_type = ?4, status = ?5, priority = ?6, project = ?7,
        reporter_id = ?8, assignee_id = ?9, parent_id = ?10, parent_key = ?11,
        story_points = ?12, locality = ?13, resolution = ?14, resolved_at = ?15,
        progress = ?16, progress_total = ?17, created_at = ?18, updated_at = ?19, synced_at = ?20
    WHERE id = ?1";

/// Write the scalar columns. The parent goes in by reference only.
fn write_issue_row(conn: &Connection, sql: &str, issue: &Issue, now: i64) -> Result<()> {
    conn.execute(
        sql,
        rusqlite::params![
            issue.id,
            issue.key,
            issue.summary,
            issue.issue_type,
            issue.status,
            issue.priority,
            issue.project,
            issue.reporter.as_ref().map(|a| a.id.as_str()),
            issue.assignee.as_ref().map(|a| a.id.as_str()),
            issue.parent.as_ref().map(|p| p.id),
            issue.parent.as_ref().map(|p| p.key.as_str()),
            issue.story_points,
            issue.locality,
            issue.resolution,
            issue.resolved_at.map(|dt| dt.timestamp_millis()),
            issue.progress.map(|p| p.progress),
            issue.progress.map(|p| p.total),
            issue.created_at.timestamp_millis(),
            issue.updated_at.timestamp_millis(),
            now,
        ],
    )?;
    Ok(())
}

/// Upsert every row the issue references so link inserts satisfy their
/// foreign keys.
fn upsert_references(conn: &Connection, issue: &Issue, now: i64) -> Result<()> {
    for account in issue.reporter.iter().chain(issue.assignee.iter()) {
        upsert_account(conn, account, now)?;
    }
    for sprint in &issue.sprints {
        upsert_sprint_row(conn, sprint, now)?;
    }
    for fix_version in &issue.fix_versions {
        upsert_fix_version_row(conn, fix_version)?;
    }
    for product in &issue.products {
        conn.execute(
            "INSERT INTO products (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            rusqlite::params![product.id, product.name],
        )?;
    }
    Ok(())
}

fn upsert_fix_version_row(conn: &Connection, fix_version: &FixVersion) -> Result<()> {
    conn.execute(
        "INSERT INTO fix_versions (id, name, description, released, archived, release_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name, description = excluded.description,
            released = excluded.released, archived = excluded.archived,
            release_date = excluded.release_date",
        rusqlite::params![
            fix_version.id,
            fix_version.name,
            fix_version.description,
            fix_version.released,
            fix_version.archived,
            fix_version.release_date.map(|d| d.format(DATE_FORMAT).to_string()),
        ],
    )?;
    Ok(())
}

fn upsert_account(conn: &Connection, account: &Account, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO accounts (id, email, display_name, avatar_url, active, account_type, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            email = excluded.email, display_name = excluded.display_name,
            avatar_url = excluded.avatar_url, active = excluded.active,
            account_type = excluded.account_type, updated_at = excluded.updated_at",
        rusqlite::params![
            account.id,
            account.email,
            account.display_name,
            account.avatar_url,
            account.active,
            account.account_type,
            now,
        ],
    )?;
    Ok(())
}

fn upsert_sprint_row(conn: &Connection, sprint: &Sprint, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO sprints (id, name, state, goal, board_id, started_at, ended_at, completed_at, synced_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name, state = excluded.state, goal = excluded.goal,
            board_id = COALESCE(excluded.board_id, sprints.board_id),
            started_at = excluded.started_at, ended_at = excluded.ended_at,
            completed_at = excluded.completed_at, synced_at = excluded.synced_at",
        rusqlite::params![
            sprint.id,
            sprint.name,
            sprint.state.as_str(),
            sprint.goal,
            sprint.board_id,
            sprint.started_at.map(|dt| dt.timestamp_millis()),
            sprint.ended_at.map(|dt| dt.timestamp_millis()),
            sprint.completed_at.map(|dt| dt.timestamp_millis()),
            now,
        ],
    )?;
    Ok(())
}

/// Make one link table hold exactly `desired` for an issue.
///
/// Removed links are deleted, added links inserted through `insert`, and
/// unchanged links left alone.
fn reconcile_links<K>(
    conn: &Connection,
    table: &str,
    column: &str,
    issue_id: u64,
    desired: impl IntoIterator<Item = K>,
    mut insert: impl FnMut(&K) -> Result<()>,
) -> Result<SetDiff<K>>
where
    K: Ord + Clone + ToSql + FromSql,
{
    let current: Vec<K> = query_list(
        conn,
        &format!("SELECT {column} FROM {table} WHERE issue_id = ?1"),
        issue_id,
        |row| row.get(0),
    )?;
    let diff = diff_sets(current, desired);

    if !diff.removed.is_empty() {
        let mut delete =
            conn.prepare(&format!("DELETE FROM {table} WHERE issue_id = ?1 AND {column} = ?2"))?;
        for key in &diff.removed {
            delete.execute(rusqlite::params![issue_id, key])?;
        }
    }
    for key in &diff.added {
        insert(key)?;
    }

    trace!(
        table,
        issue_id,
        added = diff.added.len(),
        removed = diff.removed.len(),
        kept = diff.unchanged.len(),
        "reconciled links"
    );
    Ok(diff)
}

fn reconcile_associations(conn: &Connection, issue: &Issue, ctx: &mut MutationContext) -> Result<()> {
    let id = issue.id;

    let sprints = reconcile_links(
        conn,
        "issue_sprints",
        "sprint_id",
        id,
        issue.sprints.iter().map(|s| s.id),
        |sprint_id| {
            conn.execute(
                "INSERT INTO issue_sprints (issue_id, sprint_id) VALUES (?1, ?2)",
                rusqlite::params![id, sprint_id],
            )?;
            Ok(())
        },
    )?;

    let fix_versions = reconcile_links(
        conn,
        "issue_fix_versions",
        "fix_version_id",
        id,
        issue.fix_versions.iter().map(|f| f.id),
        |fix_version_id| {
            conn.execute(
                "INSERT INTO issue_fix_versions (issue_id, fix_version_id) VALUES (?1, ?2)",
                rusqlite::params![id, fix_version_id],
            )?;
            Ok(())
        },
    )?;

    let labels_by_hash: HashMap<String, &str> = issue
        .labels
        .iter()
        .map(|label| (label.hash(), label.as_str()))
        .collect();
    let labels = reconcile_links(
        conn,
        "issue_labels",
        "label_hash",
        id,
        labels_by_hash.keys().cloned(),
        |hash| {
            let label = labels_by_hash.get(hash).copied().unwrap_or_default();
            conn.execute(
                "INSERT INTO issue_labels (issue_id, label_hash, label) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, hash, label],
            )?;
            Ok(())
        },
    )?;

    let products = reconcile_links(
        conn,
        "issue_products",
        "product_id",
        id,
        issue.products.iter().map(|p| p.id),
        |product_id| {
            conn.execute(
                "INSERT INTO issue_products (issue_id, product_id) VALUES (?1, ?2)",
                rusqlite::params![id, product_id],
            )?;
            Ok(())
        },
    )?;

    let summary = [
        sprints.summary("sprints"),
        fix_versions.summary("fix_versions"),
        labels.summary("labels"),
        products.summary("products"),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>();

    if !summary.is_empty() {
        ctx.record_comment("issue", &id.to_string(), EventType::LinksReconciled, &summary.join(", "));
    }
    Ok(())
}

/// Replace the stored changelog for an issue wholesale.
fn replace_changelog(conn: &Connection, issue: &Issue) -> Result<()> {
    conn.execute("DELETE FROM changelog WHERE issue_id = ?1", [issue.id])?;

    let mut insert = conn.prepare(
        "INSERT INTO changelog (issue_id, history_id, field, author, from_value, to_value, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for entry in &issue.changelog {
        insert.execute(rusqlite::params![
            issue.id,
            entry.id,
            entry.field,
            entry.author,
            entry.from_value,
            entry.to_value,
            entry.created_at.timestamp_millis(),
        ])?;
    }
    Ok(())
}

// ==================
// Read helpers
// ==================

const SPRINT_COLUMNS: &str =
    "s.id, s.name, s.state, s.goal, s.board_id, s.started_at, s.ended_at, s.completed_at";

const SELECT_ISSUE_SQL: &str = "SELECT
        i.id, i.key, i.summary, i.issue_type, i.status, i.priority, i.project,
        i.parent_id, i.parent_key, i.story_points, i.locality, i.resolution, i.resolved_at,
        i.progress, i.progress_total, i.created_at, i.updated_at,
        r.id, r.email, r.display_name, r.avatar_url, r.active, r.account_type,
        a.id, a.email, a.display_name, a.avatar_url, a.active, a.account_type
    FROM issues i
    LEFT JOIN accounts r ON r.id = i.reporter_id
    LEFT JOIN accounts a ON a.id = i.assignee_id
    WHERE i.id = ?1";

fn query_list<T>(
    conn: &Connection,
    sql: &str,
    id: u64,
    map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([id], map)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn bad_text(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("unknown {what} '{value}'").into())
}

fn get_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn get_opt_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<i64>>(idx)?
        .map(|ms| {
            DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
        })
        .transpose()
}

fn map_account(row: &Row<'_>, base: usize) -> rusqlite::Result<Option<Account>> {
    let Some(id) = row.get::<_, Option<String>>(base)? else {
        return Ok(None);
    };
    Ok(Some(Account {
        id,
        email: row.get(base + 1)?,
        display_name: row.get(base + 2)?,
        avatar_url: row.get(base + 3)?,
        active: row.get(base + 4)?,
        account_type: row.get(base + 5)?,
    }))
}

fn map_issue_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let mut issue = Issue::new(row.get::<_, u64>(0)?, row.get::<_, String>(1)?, get_datetime(row, 15)?, get_datetime(row, 16)?);
    issue.summary = row.get(2)?;
    issue.issue_type = row.get(3)?;
    issue.status = row.get(4)?;
    issue.priority = row.get(5)?;
    issue.project = row.get(6)?;

    let parent_id: Option<u64> = row.get(7)?;
    let parent_key: Option<String> = row.get(8)?;
    issue.parent = parent_id.zip(parent_key).map(|(id, key)| ParentRef {
        id,
        key,
        summary: None,
        issue_type: None,
        status: None,
    });

    issue.story_points = row.get(9)?;
    issue.locality = row.get(10)?;
    issue.resolution = row.get(11)?;
    issue.resolved_at = get_opt_datetime(row, 12)?;

    let progress: Option<u64> = row.get(13)?;
    let total: Option<u64> = row.get(14)?;
    issue.progress = progress
        .zip(total)
        .map(|(progress, total)| Progress { progress, total });

    issue.reporter = map_account(row, 17)?;
    issue.assignee = map_account(row, 23)?;
    Ok(issue)
}

fn map_sprint_row(row: &Row<'_>) -> rusqlite::Result<Sprint> {
    let state: String = row.get(2)?;
    Ok(Sprint {
        id: row.get(0)?,
        name: row.get(1)?,
        state: SprintState::parse(&state).ok_or_else(|| bad_text(2, "sprint state", &state))?,
        goal: row.get(3)?,
        board_id: row.get(4)?,
        started_at: get_opt_datetime(row, 5)?,
        ended_at: get_opt_datetime(row, 6)?,
        completed_at: get_opt_datetime(row, 7)?,
    })
}

fn map_fix_version_row(row: &Row<'_>) -> rusqlite::Result<FixVersion> {
    let release_date = row
        .get::<_, Option<String>>(5)?
        .map(|raw| {
            NaiveDate::parse_from_str(&raw, DATE_FORMAT)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))
        })
        .transpose()?;

    Ok(FixVersion {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        released: row.get(3)?,
        archived: row.get(4)?,
        release_date,
    })
}
