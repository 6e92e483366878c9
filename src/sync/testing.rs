//! Scripted in-memory gateway and store for engine tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::model::{ChangelogEntry, FixVersion, Issue, Sprint, SprintState, Stamp};
use crate::remote::{Page, RemoteGateway};
use crate::storage::LocalStore;

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn stamp(id: u64, updated: i64) -> Stamp {
    Stamp {
        id,
        key: format!("P-{id}"),
        created_at: at(0),
        updated_at: at(updated),
    }
}

pub fn issue(id: u64, updated: i64) -> Issue {
    let mut issue = Issue::new(id, format!("P-{id}"), at(0), at(updated));
    issue.summary = format!("Issue {id}");
    issue.issue_type = "Story".into();
    issue.status = "To Do".into();
    issue.project = "P".into();
    issue
}

pub fn status_entry(history: u64, from: &str, to: &str, secs: i64) -> ChangelogEntry {
    ChangelogEntry {
        id: history,
        field: "status".into(),
        author: Some("ana@example.com".into()),
        from_value: Some(from.into()),
        to_value: Some(to.into()),
        created_at: at(secs),
    }
}

fn not_found(operation: &'static str, target: String) -> Error {
    Error::RemoteFetch {
        operation,
        target,
        status: Some(404),
        message: "not found".into(),
    }
}

/// Gateway answering from fixed scripts and logging every call.
#[derive(Default)]
pub struct FakeGateway {
    /// Search pages keyed by the cursor that requests them (`""` is the first).
    pub search: HashMap<String, Page<Stamp>>,
    /// Search cursors that never answer.
    pub stall_search: HashSet<String>,
    pub details: HashMap<u64, Issue>,
    /// Changelog pages keyed by `(key, cursor)`; unscripted first pages are empty.
    pub changelogs: HashMap<(String, String), Page<ChangelogEntry>>,
    pub sprints: HashMap<u64, Sprint>,
    /// Board sprint pages keyed by `(board, cursor)`.
    pub board_sprints: HashMap<(u64, String), Page<Sprint>>,
    /// Board version pages keyed by `(board, cursor)`.
    pub board_versions: HashMap<(u64, String), Page<FixVersion>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn with_search_pages(pages: Vec<(&str, Vec<Stamp>, Option<&str>)>) -> Self {
        let mut gateway = Self::default();
        for (cursor, stamps, next) in pages {
            gateway
                .search
                .insert(cursor.to_string(), Page::new(stamps, next.map(str::to_string)));
        }
        gateway
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RemoteGateway for FakeGateway {
    async fn search_lite(&self, _filter: &str, cursor: Option<&str>) -> Result<Page<Stamp>> {
        let cursor = cursor.unwrap_or_default().to_string();
        self.log(format!("search:{cursor}"));
        if self.stall_search.contains(&cursor) {
            std::future::pending::<()>().await;
        }
        self.search
            .get(&cursor)
            .cloned()
            .ok_or_else(|| not_found("search_lite", cursor))
    }

    async fn get_detail(&self, id: u64) -> Result<Issue> {
        self.log(format!("detail:{id}"));
        self.details
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("get_detail", id.to_string()))
    }

    async fn get_changelog(&self, key: &str, cursor: Option<&str>) -> Result<Page<ChangelogEntry>> {
        let cursor = cursor.unwrap_or_default().to_string();
        self.log(format!("changelog:{key}:{cursor}"));
        match self.changelogs.get(&(key.to_string(), cursor.clone())) {
            Some(page) => Ok(page.clone()),
            None if cursor.is_empty() => Ok(Page::new(Vec::new(), None)),
            None => Err(not_found("get_changelog", key.to_string())),
        }
    }

    async fn get_sprint(&self, id: u64) -> Result<Sprint> {
        self.log(format!("sprint:{id}"));
        self.sprints
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found("get_sprint", id.to_string()))
    }

    async fn list_board_sprints(&self, board_id: u64, cursor: Option<&str>) -> Result<Page<Sprint>> {
        let cursor = cursor.unwrap_or_default().to_string();
        self.log(format!("board_sprints:{board_id}:{cursor}"));
        self.board_sprints
            .get(&(board_id, cursor))
            .cloned()
            .ok_or_else(|| not_found("list_board_sprints", board_id.to_string()))
    }

    async fn list_board_versions(
        &self,
        board_id: u64,
        cursor: Option<&str>,
    ) -> Result<Page<FixVersion>> {
        let cursor = cursor.unwrap_or_default().to_string();
        self.log(format!("board_versions:{board_id}:{cursor}"));
        self.board_versions
            .get(&(board_id, cursor))
            .cloned()
            .ok_or_else(|| not_found("list_board_versions", board_id.to_string()))
    }
}

/// Store keeping aggregates in maps.
#[derive(Default)]
pub struct MemoryStore {
    pub issues: Mutex<HashMap<u64, Issue>>,
    pub sprints: Mutex<BTreeMap<u64, Sprint>>,
    pub fix_versions: Mutex<BTreeMap<u64, FixVersion>>,
    /// Ids whose writes fail.
    pub fail_writes: HashSet<u64>,
    pub writes: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn with_stamps(stamps: &[Stamp]) -> Self {
        let store = Self::default();
        {
            let mut issues = store.issues.lock().unwrap();
            for stamp in stamps {
                issues.insert(stamp.id, issue(stamp.id, stamp.updated_at.timestamp()));
            }
        }
        store
    }

    pub fn with_sprints(sprints: Vec<Sprint>) -> Self {
        let store = Self::default();
        store
            .sprints
            .lock()
            .unwrap()
            .extend(sprints.into_iter().map(|s| (s.id, s)));
        store
    }

    pub fn issue(&self, id: u64) -> Option<Issue> {
        self.issues.lock().unwrap().get(&id).cloned()
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    fn check_write(&self, id: u64) -> Result<()> {
        if self.fail_writes.contains(&id) {
            return Err(Error::Store {
                operation: "write",
                target: format!("issue {id}"),
                message: "disk full".into(),
            });
        }
        Ok(())
    }
}

impl LocalStore for MemoryStore {
    async fn get_stamp_by_id(&self, id: u64) -> Result<Option<Stamp>> {
        Ok(self.issues.lock().unwrap().get(&id).map(Issue::stamp))
    }

    async fn create_record(&self, issue: &Issue) -> Result<()> {
        self.check_write(issue.id)?;
        let mut issues = self.issues.lock().unwrap();
        if issues.contains_key(&issue.id) {
            return Err(Error::Store {
                operation: "create_record",
                target: format!("issue {}", issue.id),
                message: "issue already exists".into(),
            });
        }
        issues.insert(issue.id, issue.clone());
        self.writes.lock().unwrap().push(format!("create:{}", issue.id));
        Ok(())
    }

    async fn update_record(&self, issue: &Issue) -> Result<()> {
        self.check_write(issue.id)?;
        let mut issues = self.issues.lock().unwrap();
        let Some(slot) = issues.get_mut(&issue.id) else {
            return Err(Error::IssueNotFound { id: issue.id });
        };
        *slot = issue.clone();
        self.writes.lock().unwrap().push(format!("update:{}", issue.id));
        Ok(())
    }

    async fn get_sprints_by_state(&self, states: &[SprintState]) -> Result<Vec<Sprint>> {
        Ok(self
            .sprints
            .lock()
            .unwrap()
            .values()
            .filter(|s| states.contains(&s.state))
            .cloned()
            .collect())
    }

    async fn save_sprint(&self, sprint: &Sprint) -> Result<()> {
        self.sprints.lock().unwrap().insert(sprint.id, sprint.clone());
        self.writes.lock().unwrap().push(format!("sprint:{}", sprint.id));
        Ok(())
    }

    async fn save_fix_version(&self, fix_version: &FixVersion) -> Result<()> {
        self.check_write(fix_version.id)?;
        self.fix_versions
            .lock()
            .unwrap()
            .insert(fix_version.id, fix_version.clone());
        self.writes.lock().unwrap().push(format!("version:{}", fix_version.id));
        Ok(())
    }
}
