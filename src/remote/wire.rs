//! Serde shapes of the Jira REST and Agile responses, and their mapping to
//! domain types.
//!
//! Ids arrive as decimal strings; anything that fails to parse is a decode
//! error rather than a silent zero.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::FieldMap;
use crate::error::{Error, Result};
use crate::model::{
    Account, ChangelogEntry, FixVersion, Issue, Label, ParentRef, Product, Progress, Sprint,
    SprintState, Stamp,
};

/// Jira's datetime layout, e.g. `2024-01-15T10:30:00.000-0300`.
const JIRA_DATETIME: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

/// Parse a Jira datetime, accepting RFC 3339 as well.
pub(crate) fn parse_jira_datetime(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, JIRA_DATETIME)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn jira_datetime<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_jira_datetime(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid Jira datetime '{raw}'")))
}

fn opt_jira_datetime<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => parse_jira_datetime(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid Jira datetime '{raw}'"))),
    }
}

/// Accept an id sent either as a JSON string or a number.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

/// Parse a release date, either `YYYY-MM-DD` or a full Jira datetime.
fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_jira_datetime(raw).map(|dt| dt.date_naive()))
}

fn decode_error(operation: &'static str, target: &str, message: impl Into<String>) -> Error {
    Error::Decode {
        operation,
        target: target.to_string(),
        message: message.into(),
    }
}

fn parse_id(raw: &str, operation: &'static str, target: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| decode_error(operation, target, format!("invalid id '{raw}'")))
}

// ── Requests ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchRequest<'a> {
    pub jql: &'a str,
    pub fields: [&'static str; 2],
    pub max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChangelogRequest<'a> {
    pub issue_ids_or_keys: [&'a str; 1],
    pub field_ids: [&'static str; 1],
    pub max_results: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<&'a str>,
}

// ── Search ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchResponse {
    #[serde(default)]
    pub issues: Vec<SearchIssue>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchIssue {
    pub id: String,
    pub key: String,
    pub fields: StampFields,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StampFields {
    #[serde(deserialize_with = "jira_datetime")]
    pub created: DateTime<Utc>,
    #[serde(deserialize_with = "jira_datetime")]
    pub updated: DateTime<Utc>,
}

impl SearchIssue {
    pub fn into_stamp(self) -> Result<Stamp> {
        Ok(Stamp {
            id: parse_id(&self.id, "search_lite", &self.key)?,
            key: self.key,
            created_at: self.fields.created,
            updated_at: self.fields.updated,
        })
    }
}

// ── Issue detail ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Named {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccountResponse {
    pub account_id: String,
    pub email_address: Option<String>,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub active: bool,
    pub account_type: Option<String>,
    #[serde(default)]
    pub avatar_urls: HashMap<String, String>,
}

impl AccountResponse {
    const AVATAR_SIZES: [&'static str; 4] = ["48x48", "32x32", "24x24", "16x16"];

    fn largest_avatar(&self) -> Option<String> {
        Self::AVATAR_SIZES
            .iter()
            .find_map(|size| self.avatar_urls.get(*size).cloned())
    }

    pub fn into_account(self) -> Account {
        Account {
            avatar_url: self.largest_avatar(),
            id: self.account_id,
            email: self.email_address,
            display_name: self.display_name,
            active: self.active,
            account_type: self.account_type,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ParentResponse {
    pub id: String,
    pub key: String,
    pub fields: Option<ParentFields>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ParentFields {
    pub summary: Option<String>,
    pub status: Option<Named>,
    pub issuetype: Option<Named>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FixVersionResponse {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub released: bool,
    #[serde(default)]
    pub archived: bool,
    pub release_date: Option<String>,
}

impl FixVersionResponse {
    pub fn into_fix_version(self, operation: &'static str, target: &str) -> Result<FixVersion> {
        let release_date = self
            .release_date
            .as_deref()
            .filter(|raw| !raw.is_empty())
            .map(|raw| {
                parse_release_date(raw).ok_or_else(|| {
                    decode_error(operation, target, format!("invalid release date '{raw}'"))
                })
            })
            .transpose()?;

        Ok(FixVersion {
            id: parse_id(&self.id, operation, target)?,
            name: self.name,
            description: self.description.filter(|d| !d.is_empty()),
            released: self.released,
            archived: self.archived,
            release_date,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProgressResponse {
    #[serde(default)]
    pub progress: u64,
    #[serde(default)]
    pub total: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SprintResponse {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub state: String,
    pub goal: Option<String>,
    #[serde(alias = "boardId")]
    pub origin_board_id: Option<u64>,
    #[serde(default, deserialize_with = "opt_jira_datetime")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "opt_jira_datetime")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "opt_jira_datetime")]
    pub complete_date: Option<DateTime<Utc>>,
}

impl SprintResponse {
    pub fn into_sprint(self, operation: &'static str) -> Result<Sprint> {
        let state = SprintState::parse(&self.state).ok_or_else(|| {
            decode_error(
                operation,
                &format!("sprint {}", self.id),
                format!("unknown sprint state '{}'", self.state),
            )
        })?;

        Ok(Sprint {
            id: self.id,
            name: self.name,
            state,
            goal: self.goal.filter(|g| !g.is_empty()),
            board_id: self.origin_board_id,
            started_at: self.start_date,
            ended_at: self.end_date,
            completed_at: self.complete_date,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProductOption {
    pub id: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OptionValue {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssueResponse {
    pub id: String,
    pub key: String,
    pub fields: IssueFields,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IssueFields {
    #[serde(default)]
    pub summary: String,
    pub status: Option<Named>,
    pub priority: Option<Named>,
    pub issuetype: Option<Named>,
    pub project: Option<Named>,
    pub parent: Option<ParentResponse>,
    pub labels: Option<Vec<String>>,
    pub assignee: Option<AccountResponse>,
    pub reporter: Option<AccountResponse>,
    #[serde(rename = "fixVersions")]
    pub fix_versions: Option<Vec<FixVersionResponse>>,
    pub resolution: Option<Named>,
    #[serde(default, deserialize_with = "opt_jira_datetime")]
    pub resolutiondate: Option<DateTime<Utc>>,
    pub aggregateprogress: Option<ProgressResponse>,
    #[serde(deserialize_with = "jira_datetime")]
    pub created: DateTime<Utc>,
    #[serde(deserialize_with = "jira_datetime")]
    pub updated: DateTime<Utc>,
    /// Custom fields, looked up through the configured [`FieldMap`].
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Standard fields requested on detail fetch.
pub(crate) const DETAIL_FIELDS: [&str; 15] = [
    "summary",
    "status",
    "priority",
    "issuetype",
    "project",
    "parent",
    "labels",
    "assignee",
    "reporter",
    "fixVersions",
    "resolution",
    "resolutiondate",
    "aggregateprogress",
    "created",
    "updated",
];

impl IssueFields {
    /// Take a custom field, treating JSON `null` as absent.
    fn custom(&mut self, id: &str) -> Option<Value> {
        self.extra.remove(id).filter(|v| !v.is_null())
    }

    fn custom_as<T: serde::de::DeserializeOwned>(&mut self, id: &str, target: &str) -> Result<Option<T>> {
        self.custom(id)
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|e| decode_error("get_detail", target, format!("field {id}: {e}")))
            })
            .transpose()
    }
}

impl IssueResponse {
    /// Map to the domain aggregate. The changelog is left empty.
    pub fn into_issue(self, fields_map: &FieldMap) -> Result<Issue> {
        let target = self.key.clone();
        let mut fields = self.fields;

        let sprints = fields
            .custom_as::<Vec<SprintResponse>>(&fields_map.sprints, &target)?
            .unwrap_or_default()
            .into_iter()
            .map(|sprint| sprint.into_sprint("get_detail"))
            .collect::<Result<Vec<_>>>()?;

        let story_points = match fields.custom(&fields_map.story_points) {
            None => None,
            Some(value) => Some(value.as_f64().ok_or_else(|| {
                decode_error("get_detail", &target, format!("story points are not a number: {value}"))
            })?),
        };

        let products = fields
            .custom_as::<Vec<ProductOption>>(&fields_map.products, &target)?
            .unwrap_or_default()
            .into_iter()
            .map(|option| {
                Ok(Product {
                    id: parse_id(&option.id, "get_detail", &target)?,
                    name: option.value,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let locality = fields
            .custom_as::<OptionValue>(&fields_map.locality, &target)?
            .map(|option| option.value)
            .filter(|v| !v.is_empty());

        let fix_versions = fields
            .fix_versions
            .take()
            .unwrap_or_default()
            .into_iter()
            .map(|fv| fv.into_fix_version("get_detail", &target))
            .collect::<Result<Vec<_>>>()?;

        let parent = fields
            .parent
            .take()
            .map(|p| {
                let (summary, status, issue_type) = match p.fields {
                    Some(pf) => (pf.summary, pf.status.map(|s| s.name), pf.issuetype.map(|t| t.name)),
                    None => (None, None, None),
                };
                Ok::<_, Error>(ParentRef {
                    id: parse_id(&p.id, "get_detail", &target)?,
                    key: p.key,
                    summary,
                    status,
                    issue_type,
                })
            })
            .transpose()?;

        let mut issue = Issue::new(
            parse_id(&self.id, "get_detail", &target)?,
            self.key,
            fields.created,
            fields.updated,
        );
        issue.summary = fields.summary;
        issue.status = fields.status.unwrap_or_default().name;
        issue.issue_type = fields.issuetype.unwrap_or_default().name;
        issue.priority = fields.priority.map(|p| p.name).filter(|p| !p.is_empty());
        issue.project = fields.project.unwrap_or_default().name;
        issue.reporter = fields.reporter.map(AccountResponse::into_account);
        issue.assignee = fields.assignee.map(AccountResponse::into_account);
        issue.parent = parent;
        issue.sprints = sprints;
        issue.fix_versions = fix_versions;
        issue.labels = fields.labels.unwrap_or_default().into_iter().map(Label::from).collect();
        issue.products = products;
        issue.story_points = story_points;
        issue.locality = locality;
        issue.resolution = fields.resolution.map(|r| r.name).filter(|r| !r.is_empty());
        issue.resolved_at = fields.resolutiondate;
        issue.progress = fields.aggregateprogress.map(|p| Progress {
            progress: p.progress,
            total: p.total,
        });
        Ok(issue)
    }
}

// ── Agile listings ───────────────────────────────────────────

/// Offset-paginated Agile listing, e.g. `board/{id}/sprint`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "T: Deserialize<'de>"))]
pub(crate) struct AgileListResponse<T> {
    #[serde(default)]
    pub start_at: u64,
    #[serde(default)]
    pub is_last: bool,
    #[serde(default)]
    pub values: Vec<T>,
}

impl<T> AgileListResponse<T> {
    /// Offset of the following page, or `None` when this one is the last.
    pub fn next_cursor(&self) -> Option<String> {
        if self.is_last || self.values.is_empty() {
            return None;
        }
        Some((self.start_at + self.values.len() as u64).to_string())
    }
}

// ── Changelog ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChangelogResponse {
    #[serde(default)]
    pub issue_change_logs: Vec<IssueChangelog>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IssueChangelog {
    #[serde(default)]
    pub change_histories: Vec<History>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct History {
    pub id: String,
    pub author: Option<AccountResponse>,
    /// Epoch milliseconds.
    pub created: i64,
    #[serde(default)]
    pub items: Vec<HistoryItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryItem {
    #[serde(default)]
    pub field: String,
    pub field_id: Option<String>,
    pub from_string: Option<String>,
    #[serde(rename = "toString")]
    pub to_value: Option<String>,
}

impl ChangelogResponse {
    /// Flatten histories into one entry per changed item.
    pub fn into_entries(self, key: &str) -> Result<Vec<ChangelogEntry>> {
        let mut entries = Vec::new();
        for history in self.issue_change_logs.into_iter().flat_map(|l| l.change_histories) {
            let id = parse_id(&history.id, "get_changelog", key)?;
            let created_at = DateTime::from_timestamp_millis(history.created).ok_or_else(|| {
                decode_error("get_changelog", key, format!("invalid timestamp {}", history.created))
            })?;
            let author = history.author.map(|a| a.email_address.unwrap_or(a.display_name));

            for item in history.items {
                entries.push(ChangelogEntry {
                    id,
                    field: item.field_id.unwrap_or(item.field),
                    author: author.clone(),
                    from_value: item.from_string,
                    to_value: item.to_value,
                    created_at,
                });
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_parse_jira_datetime_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 15, 13, 30, 0).unwrap();
        assert_eq!(parse_jira_datetime("2024-01-15T10:30:00.000-0300"), Some(expected));
        assert_eq!(parse_jira_datetime("2024-01-15T13:30:00.000Z"), Some(expected));
        assert_eq!(parse_jira_datetime("yesterday"), None);
    }

    #[test]
    fn test_search_issue_rejects_bad_id() {
        let issue: SearchIssue = serde_json::from_value(json!({
            "id": "abc",
            "key": "P-1",
            "fields": {"created": "2024-01-15T10:30:00.000-0300", "updated": "2024-01-15T10:30:00.000-0300"}
        }))
        .unwrap();
        assert!(matches!(issue.into_stamp(), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_issue_mapping_reads_custom_fields() {
        let response: IssueResponse = serde_json::from_value(json!({
            "id": "10001",
            "key": "P-1",
            "fields": {
                "summary": "Do it",
                "status": {"name": "In Progress"},
                "issuetype": {"name": "Story"},
                "project": {"name": "Payments"},
                "labels": ["backend"],
                "reporter": {"accountId": "a1", "displayName": "Ana", "active": true,
                             "avatarUrls": {"16x16": "s", "48x48": "l"}},
                "assignee": null,
                "parent": {"id": "10000", "key": "P-0", "fields": {"summary": "Epic", "status": {"name": "Open"}}},
                "fixVersions": [{"id": "7", "name": "1.0", "released": false, "releaseDate": "2024-02-01"}],
                "created": "2024-01-15T10:30:00.000-0300",
                "updated": "2024-01-16T10:30:00.000-0300",
                "customfield_10020": [
                    {"id": 1, "name": "S1", "state": "closed", "boardId": 3},
                    {"id": 2, "name": "S2", "state": "active", "startDate": "2024-01-10T00:00:00.000Z"}
                ],
                "customfield_10025": 5.0,
                "customfield_10693": [{"id": "11", "value": "Cards"}],
                "customfield_10696": {"value": "Remote"}
            }
        }))
        .unwrap();

        let issue = response.into_issue(&FieldMap::default()).unwrap();
        assert_eq!(issue.id, 10001);
        assert_eq!(issue.status, "In Progress");
        assert_eq!(issue.sprints.len(), 2);
        assert_eq!(issue.sprints[0].board_id, Some(3));
        assert_eq!(issue.sprints[1].state, SprintState::Active);
        assert_eq!(issue.story_points, Some(5.0));
        assert_eq!(issue.products, vec![Product { id: 11, name: "Cards".into() }]);
        assert_eq!(issue.locality.as_deref(), Some("Remote"));
        assert_eq!(issue.parent.as_ref().map(|p| p.key.as_str()), Some("P-0"));
        assert_eq!(issue.reporter.as_ref().and_then(|r| r.avatar_url.as_deref()), Some("l"));
        assert!(issue.assignee.is_none());
        assert_eq!(
            issue.fix_versions[0].release_date,
            NaiveDate::from_ymd_opt(2024, 2, 1)
        );
        assert!(issue.changelog.is_empty());
    }

    #[test]
    fn test_issue_mapping_rejects_bad_story_points() {
        let response: IssueResponse = serde_json::from_value(json!({
            "id": "1",
            "key": "P-1",
            "fields": {
                "created": "2024-01-15T10:30:00.000-0300",
                "updated": "2024-01-15T10:30:00.000-0300",
                "customfield_10025": "lots"
            }
        }))
        .unwrap();
        assert!(matches!(response.into_issue(&FieldMap::default()), Err(Error::Decode { .. })));
    }

    #[test]
    fn test_agile_listing_offsets() {
        let page: AgileListResponse<SprintResponse> = serde_json::from_value(json!({
            "maxResults": 2,
            "startAt": 4,
            "isLast": false,
            "values": [
                {"id": 1, "name": "S1", "state": "future", "originBoardId": 9},
                {"id": 2, "name": "S2", "state": "active"}
            ]
        }))
        .unwrap();
        assert_eq!(page.next_cursor().as_deref(), Some("6"));

        let last: AgileListResponse<SprintResponse> =
            serde_json::from_value(json!({"startAt": 6, "isLast": true, "values": [
                {"id": 3, "name": "S3", "state": "closed"}
            ]}))
            .unwrap();
        assert!(last.next_cursor().is_none());

        let empty: AgileListResponse<SprintResponse> =
            serde_json::from_value(json!({"startAt": 6, "isLast": false})).unwrap();
        assert!(empty.next_cursor().is_none());
    }

    #[test]
    fn test_board_version_mapping_accepts_numeric_id_and_datetime() {
        let response: FixVersionResponse = serde_json::from_value(json!({
            "id": 10000,
            "projectId": 10000,
            "name": "2.0",
            "description": "",
            "released": true,
            "releaseDate": "2024-03-01T00:00:00.000Z"
        }))
        .unwrap();

        let version = response.into_fix_version("list_board_versions", "board 9").unwrap();
        assert_eq!(version.id, 10000);
        assert!(version.released);
        assert!(version.description.is_none());
        assert_eq!(version.release_date, NaiveDate::from_ymd_opt(2024, 3, 1));

        let bad: FixVersionResponse =
            serde_json::from_value(json!({"id": "7", "releaseDate": "soon"})).unwrap();
        assert!(matches!(
            bad.into_fix_version("list_board_versions", "board 9"),
            Err(Error::Decode { .. })
        ));
    }

    #[test]
    fn test_changelog_flattens_items() {
        let response: ChangelogResponse = serde_json::from_value(json!({
            "issueChangeLogs": [{
                "issueId": "1",
                "changeHistories": [{
                    "id": "500",
                    "author": {"accountId": "a1", "emailAddress": "ana@example.com"},
                    "created": 1_705_325_400_000_i64,
                    "items": [
                        {"field": "status", "fieldId": "status", "fromString": "To Do", "toString": "Done"}
                    ]
                }]
            }],
            "nextPageToken": "N"
        }))
        .unwrap();

        assert_eq!(response.next_page_token.as_deref(), Some("N"));
        let entries = response.into_entries("P-1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, 500);
        assert_eq!(entries[0].author.as_deref(), Some("ana@example.com"));
        assert_eq!(entries[0].to_value.as_deref(), Some("Done"));
        assert!(entries[0].is_status_transition());
    }
}
