//! GitHub API client with conditional (ETag) fetching.
//!
//! A single GET against the remote is classified into a closed outcome set so
//! the sync engine handles every resolved case exhaustively. Anything the
//! client does not understand (rate limits, 5xx, auth hiccups, network
//! failures) is propagated uninterpreted as an error and counts as a
//! transient failure: no freshness bookkeeping may happen for it.

use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// GitHub API client configuration.
#[derive(Debug, Clone)]
pub struct GithubClientConfig {
    /// Base URL of the API (e.g., `https://api.github.com`).
    pub base_url: String,

    /// Installation or personal access token for authentication.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GithubClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            token: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Outcome of a single conditional fetch.
///
/// The transient-failure leg is the `Err` arm of the surrounding `Result`:
/// a value of this enum always means the attempt resolved.
#[derive(Debug, Clone)]
pub enum FetchOutcome<T> {
    /// Remote returned a full representation. The stored payload must be
    /// replaced and the new validator kept for the next conditional fetch.
    Fresh {
        payload: T,
        etag: Option<String>,
    },

    /// Remote confirmed the cached copy is current (304). Payload and
    /// validator stay untouched, but the attempt still counts as resolved.
    NotModified,

    /// Remote has no such resource right now (404). Resolved but
    /// non-destructive; the resource may reappear or access may have been
    /// transiently revoked.
    NotFound,

    /// Remote has permanently removed the resource (410).
    Gone,
}

/// An issue as returned by the remote API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteIssue {
    pub id: i64,
    pub number: i64,
    pub title: String,
    pub state: String,
    pub body: Option<String>,
    pub html_url: String,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub closed_at: Option<String>,
}

/// Seam between the sync engine and the remote transport.
///
/// The engine is generic over this trait so tests can script outcomes
/// without a network. Futures are required to be `Send` so the engine can
/// run inside a spawned background task.
pub trait IssueFetch {
    /// Conditionally fetch one issue's body.
    fn fetch_issue(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        etag: Option<&str>,
    ) -> impl std::future::Future<Output = Result<FetchOutcome<RemoteIssue>, SyncError>> + Send;

    /// Fetch an issue's timeline events.
    fn fetch_timeline(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> impl std::future::Future<Output = Result<FetchOutcome<Vec<serde_json::Value>>, SyncError>> + Send;
}

/// GitHub API client.
#[derive(Debug, Clone)]
pub struct GithubClient {
    client: Client,
    config: GithubClientConfig,
}

impl GithubClient {
    /// Create a new client with default headers installed.
    pub fn new(config: GithubClientConfig) -> Result<Self, SyncError> {
        let mut headers = header::HeaderMap::new();

        let token_value = header::HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| SyncError::configuration("Invalid token format"))?;
        headers.insert(header::AUTHORIZATION, token_value);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        // GitHub rejects requests without a user agent
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("issue-mirror"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SyncError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Build the full URL for an API path.
    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Issue a GET, attaching the stored validator when present, and classify
    /// the response.
    async fn get_conditional<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        etag: Option<&str>,
    ) -> Result<FetchOutcome<T>, SyncError> {
        let url = self.api_url(endpoint);

        let mut request = self.client.get(&url);
        if let Some(etag) = etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status();

        match status {
            StatusCode::NOT_MODIFIED => Ok(FetchOutcome::NotModified),
            StatusCode::NOT_FOUND => Ok(FetchOutcome::NotFound),
            StatusCode::GONE => Ok(FetchOutcome::Gone),
            s if s.is_success() => {
                let new_etag = response
                    .headers()
                    .get(header::ETAG)
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.to_string());

                let payload = response.json::<T>().await.map_err(|e| {
                    SyncError::internal(format!("Failed to parse response: {}", e))
                })?;

                Ok(FetchOutcome::Fresh {
                    payload,
                    etag: new_etag,
                })
            }
            s => {
                let status_code = s.as_u16();
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v.get("message")?.as_str().map(String::from))
                    .unwrap_or_else(|| format!("Request failed ({})", status_code));

                Err(SyncError::remote_api_full(&message, status_code, endpoint))
            }
        }
    }
}

impl IssueFetch for GithubClient {
    async fn fetch_issue(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
        etag: Option<&str>,
    ) -> Result<FetchOutcome<RemoteIssue>, SyncError> {
        let endpoint = format!("/repos/{}/{}/issues/{}", owner, repo, number);
        self.get_conditional(&endpoint, etag).await
    }

    async fn fetch_timeline(
        &self,
        owner: &str,
        repo: &str,
        number: i64,
    ) -> Result<FetchOutcome<Vec<serde_json::Value>>, SyncError> {
        let endpoint = format!("/repos/{}/{}/issues/{}/timeline", owner, repo, number);
        self.get_conditional(&endpoint, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_construction() {
        let client = GithubClient::new(GithubClientConfig {
            base_url: "https://api.github.com/".to_string(),
            token: "test-token".to_string(),
            timeout_secs: 30,
        })
        .unwrap();

        assert_eq!(
            client.api_url("/repos/acme/widgets/issues/7"),
            "https://api.github.com/repos/acme/widgets/issues/7"
        );
    }

    #[test]
    fn test_default_config_points_at_public_api() {
        let config = GithubClientConfig::default();
        assert_eq!(config.base_url, "https://api.github.com");
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_remote_issue_deserialization() {
        let json = r#"{
            "id": 9001,
            "number": 17,
            "title": "Panic on empty config",
            "state": "open",
            "body": null,
            "html_url": "https://example.com/acme/widgets/issues/17",
            "created_at": "2026-01-15T10:30:00Z",
            "updated_at": "2026-02-01T08:00:00Z",
            "closed_at": null,
            "labels": [{"name": "bug"}]
        }"#;

        let issue: RemoteIssue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.id, 9001);
        assert_eq!(issue.number, 17);
        assert!(issue.body.is_none());
        assert_eq!(issue.updated_at.as_deref(), Some("2026-02-01T08:00:00Z"));
    }
}
