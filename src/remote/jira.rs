//! Jira Cloud gateway over reqwest.
//!
//! Issue search and changelog use the token-paginated endpoints
//! (`/search/jql`, `/changelog/bulkfetch`); sprints and board listings come
//! from the Agile API, whose listings page by `startAt` offset.
//! Every request carries basic auth from the [`JiraConfig`] the client was
//! built with. Nothing is retried here.

use reqwest::header::ACCEPT;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::config::{FieldMap, JiraConfig};
use crate::error::{Error, Result};
use crate::model::{ChangelogEntry, FixVersion, Issue, Sprint, Stamp, STATUS_FIELD};

use super::wire::{
    AgileListResponse, ChangelogRequest, ChangelogResponse, FixVersionResponse, IssueResponse,
    SearchRequest, SearchResponse, SprintResponse, DETAIL_FIELDS,
};
use super::{Page, RemoteGateway};

/// Longest slice of an error body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Jira REST/Agile client.
pub struct JiraClient {
    client: reqwest::Client,
    base_url: String,
    username: String,
    api_token: String,
    page_size: u32,
    fields: FieldMap,
    detail_fields: String,
}

impl std::fmt::Debug for JiraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraClient")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl JiraClient {
    /// Build a client from explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the HTTP client cannot be constructed.
    pub fn new(config: JiraConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("jsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        let detail_fields = DETAIL_FIELDS
            .iter()
            .copied()
            .chain([
                config.fields.sprints.as_str(),
                config.fields.story_points.as_str(),
                config.fields.products.as_str(),
                config.fields.locality.as_str(),
            ])
            .collect::<Vec<_>>()
            .join(",");

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username,
            api_token: config.api_token,
            page_size: config.page_size,
            fields: config.fields,
            detail_fields,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/rest/api/3/{path}", self.base_url)
    }

    fn agile_url(&self, path: &str) -> String {
        format!("{}/rest/agile/1.0/{path}", self.base_url)
    }

    /// Send an authenticated request and decode a JSON body.
    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        target: &str,
        request: RequestBuilder,
    ) -> Result<T> {
        let remote_error = |status: Option<u16>, message: String| Error::RemoteFetch {
            operation,
            target: target.to_string(),
            status,
            message,
        };

        debug!(operation, target, "jira request");
        let response = request
            .basic_auth(&self.username, Some(&self.api_token))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| remote_error(e.status().map(|s| s.as_u16()), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let mut message = format!("HTTP {status}");
            let body = body.trim();
            if !body.is_empty() {
                message.push_str(": ");
                message.extend(body.chars().take(MAX_ERROR_BODY));
            }
            return Err(remote_error(Some(status.as_u16()), message));
        }

        let body = response
            .text()
            .await
            .map_err(|e| remote_error(Some(status.as_u16()), format!("Failed to read body: {e}")))?;
        trace!(operation, target, bytes = body.len(), "jira response");

        serde_json::from_str(&body).map_err(|e| Error::Decode {
            operation,
            target: target.to_string(),
            message: e.to_string(),
        })
    }

    /// Fetch one page of an offset-paginated board listing.
    async fn board_listing<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        board_id: u64,
        resource: &str,
        cursor: Option<&str>,
    ) -> Result<AgileListResponse<T>> {
        let target = format!("board {board_id}");
        let page_size = self.page_size.to_string();
        let request = self
            .client
            .get(self.agile_url(&format!("board/{board_id}/{resource}")))
            .query(&[("startAt", cursor.unwrap_or("0")), ("maxResults", page_size.as_str())]);
        self.send_json(operation, &target, request).await
    }
}

impl RemoteGateway for JiraClient {
    async fn search_lite(&self, filter: &str, cursor: Option<&str>) -> Result<Page<Stamp>> {
        let body = SearchRequest {
            jql: filter,
            fields: ["created", "updated"],
            max_results: self.page_size,
            next_page_token: cursor,
        };
        let request = self.client.post(self.api_url("search/jql")).json(&body);
        let response: SearchResponse = self.send_json("search_lite", filter, request).await?;

        let stamps = response
            .issues
            .into_iter()
            .map(super::wire::SearchIssue::into_stamp)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(stamps, response.next_page_token))
    }

    async fn get_detail(&self, id: u64) -> Result<Issue> {
        let target = format!("issue {id}");
        let request = self
            .client
            .get(self.api_url(&format!("issue/{id}")))
            .query(&[("fields", self.detail_fields.as_str())]);
        let response: IssueResponse = self.send_json("get_detail", &target, request).await?;
        response.into_issue(&self.fields)
    }

    async fn get_changelog(&self, key: &str, cursor: Option<&str>) -> Result<Page<ChangelogEntry>> {
        let body = ChangelogRequest {
            issue_ids_or_keys: [key],
            field_ids: [STATUS_FIELD],
            max_results: self.page_size,
            next_page_token: cursor,
        };
        let request = self.client.post(self.api_url("changelog/bulkfetch")).json(&body);
        let response: ChangelogResponse = self.send_json("get_changelog", key, request).await?;

        let next = response.next_page_token.clone();
        Ok(Page::new(response.into_entries(key)?, next))
    }

    async fn get_sprint(&self, id: u64) -> Result<Sprint> {
        let target = format!("sprint {id}");
        let request = self.client.get(self.agile_url(&format!("sprint/{id}")));
        let response: SprintResponse = self.send_json("get_sprint", &target, request).await?;
        response.into_sprint("get_sprint")
    }

    async fn list_board_sprints(&self, board_id: u64, cursor: Option<&str>) -> Result<Page<Sprint>> {
        let response = self
            .board_listing::<SprintResponse>("list_board_sprints", board_id, "sprint", cursor)
            .await?;
        let next = response.next_cursor();
        let sprints = response
            .values
            .into_iter()
            .map(|sprint| sprint.into_sprint("list_board_sprints"))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(sprints, next))
    }

    async fn list_board_versions(
        &self,
        board_id: u64,
        cursor: Option<&str>,
    ) -> Result<Page<FixVersion>> {
        let response = self
            .board_listing::<FixVersionResponse>("list_board_versions", board_id, "version", cursor)
            .await?;
        let target = format!("board {board_id}");
        let next = response.next_cursor();
        let versions = response
            .values
            .into_iter()
            .map(|version| version.into_fix_version("list_board_versions", &target))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(versions, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SprintState;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> JiraClient {
        JiraClient::new(JiraConfig::new(server.uri(), "bot@example.com", "token")).unwrap()
    }

    #[tokio::test]
    async fn test_search_lite_pages_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/api/3/search/jql"))
            .and(basic_auth("bot@example.com", "token"))
            .and(body_partial_json(json!({"jql": "project = P", "nextPageToken": "T"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issues": [{
                    "id": "4",
                    "key": "P-4",
                    "fields": {"created": "2024-01-15T10:30:00.000-0300", "updated": "2024-01-16T10:30:00.000-0300"}
                }]
            })))
            .mount(&server)
            .await;

        let page = client(&server).search_lite("project = P", Some("T")).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, 4);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_non_success_is_remote_fetch_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/9"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&server)
            .await;

        let err = client(&server).get_detail(9).await.unwrap_err();
        match err {
            Error::RemoteFetch { status, message, .. } => {
                assert_eq!(status, Some(404));
                assert!(message.contains("gone"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/agile/1.0/sprint/3"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server).get_sprint(3).await.unwrap_err();
        assert!(matches!(err, Error::Decode { operation: "get_sprint", .. }));
    }

    #[tokio::test]
    async fn test_get_sprint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/agile/1.0/sprint/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 3,
                "name": "Sprint 3",
                "state": "closed",
                "originBoardId": 12,
                "completeDate": "2024-01-20T12:00:00.000Z"
            })))
            .mount(&server)
            .await;

        let sprint = client(&server).get_sprint(3).await.unwrap();
        assert_eq!(sprint.state, SprintState::Closed);
        assert_eq!(sprint.board_id, Some(12));
        assert!(sprint.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_get_detail_requests_custom_fields() {
        let server = MockServer::start().await;
        let fields = client(&server).detail_fields.clone();
        assert!(fields.contains("customfield_10020"));

        Mock::given(method("GET"))
            .and(path("/rest/api/3/issue/10"))
            .and(query_param("fields", fields.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "10",
                "key": "P-10",
                "fields": {
                    "summary": "s",
                    "created": "2024-01-15T10:30:00.000-0300",
                    "updated": "2024-01-15T10:30:00.000-0300"
                }
            })))
            .mount(&server)
            .await;

        let issue = client(&server).get_detail(10).await.unwrap();
        assert_eq!(issue.key, "P-10");
    }

    #[tokio::test]
    async fn test_get_changelog_sends_key_and_status_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/api/3/changelog/bulkfetch"))
            .and(body_partial_json(json!({"issueIdsOrKeys": ["P-1"], "fieldIds": ["status"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issueChangeLogs": [],
                "nextPageToken": "next"
            })))
            .mount(&server)
            .await;

        let page = client(&server).get_changelog("P-1", None).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.next_cursor.as_deref(), Some("next"));
    }

    #[tokio::test]
    async fn test_list_board_sprints_pages_by_offset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/agile/1.0/board/9/sprint"))
            .and(query_param("startAt", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "maxResults": 2,
                "startAt": 0,
                "isLast": false,
                "values": [
                    {"id": 1, "name": "S1", "state": "closed", "originBoardId": 9},
                    {"id": 2, "name": "S2", "state": "active", "originBoardId": 9}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/agile/1.0/board/9/sprint"))
            .and(query_param("startAt", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "maxResults": 2,
                "startAt": 2,
                "isLast": true,
                "values": [{"id": 3, "name": "S3", "state": "future"}]
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let first = client.list_board_sprints(9, None).await.unwrap();
        assert_eq!(first.items.iter().map(|s| s.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));

        let last = client.list_board_sprints(9, Some("2")).await.unwrap();
        assert_eq!(last.items[0].state, SprintState::Future);
        assert!(last.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_list_board_versions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/agile/1.0/board/9/version"))
            .and(basic_auth("bot@example.com", "token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "maxResults": 50,
                "startAt": 0,
                "isLast": true,
                "values": [
                    {"id": 10000, "projectId": 1, "name": "1.0", "released": true,
                     "releaseDate": "2024-02-01T00:00:00.000Z"},
                    {"id": 10001, "projectId": 1, "name": "1.1", "released": false}
                ]
            })))
            .mount(&server)
            .await;

        let page = client(&server).list_board_versions(9, None).await.unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, 10000);
        assert!(page.items[0].release_date.is_some());
        assert!(page.items[1].release_date.is_none());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_board_listing_unknown_state_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/agile/1.0/board/9/sprint"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isLast": true,
                "values": [{"id": 1, "name": "S1", "state": "paused"}]
            })))
            .mount(&server)
            .await;

        let err = client(&server).list_board_sprints(9, None).await.unwrap_err();
        assert!(matches!(err, Error::Decode { operation: "list_board_sprints", .. }));
    }
}
