//! Remote issue tracker client
//!
//! Every method is a single HTTP request (listing follows pagination).
//! Failures come back as [`RemoteError`] tagged retryable or not; nothing
//! here retries.

use crate::config::SyncConfig;
use crate::sync::issue::{IssueDraft, IssueState, RemoteIssue, RemoteLabel};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ETAG, HeaderMap};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: usize = 100;

/// Result type for remote calls
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors returned by the remote tracker
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("GitHub API returned {status}: {message}")]
    Http {
        status: u16,
        message: String,
        rate_limited: bool,
    },
    #[error("Request failed: {0}")]
    Transport(String),
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// HTTP status code, when the server answered
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the same call may succeed if repeated later
    pub fn retryable(&self) -> bool {
        match self {
            RemoteError::Http {
                status,
                rate_limited,
                ..
            } => *rate_limited || *status == 429 || *status >= 500,
            RemoteError::Transport(_) => true,
            RemoteError::Decode(_) => false,
        }
    }

    /// The issue or label does not exist (or was deleted)
    pub fn is_not_found(&self) -> bool {
        matches!(self.status(), Some(404) | Some(410))
    }
}

/// Fields for a new label
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelDraft {
    pub name: String,
    pub color: String,
    pub description: String,
}

/// Operations the sync engine needs from a remote tracker
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// All issues (open and closed) carrying `label`, pull requests excluded
    async fn list_issues(&self, label: &str) -> RemoteResult<Vec<RemoteIssue>>;

    async fn get_issue(&self, number: u64) -> RemoteResult<RemoteIssue>;

    /// Create an open issue with the draft's title, body and labels
    async fn create_issue(&self, draft: &IssueDraft) -> RemoteResult<RemoteIssue>;

    /// Overwrite title, body and state. Labels are left alone.
    async fn update_issue(&self, number: u64, draft: &IssueDraft) -> RemoteResult<RemoteIssue>;

    async fn close_issue(&self, number: u64) -> RemoteResult<RemoteIssue>;

    async fn assign_issue(&self, number: u64, assignees: &[String]) -> RemoteResult<()>;

    async fn add_labels(&self, number: u64, labels: &[String]) -> RemoteResult<()>;

    /// Succeeds when the label is already absent
    async fn remove_label(&self, number: u64, label: &str) -> RemoteResult<()>;

    /// `None` when the repository has no such label
    async fn get_label(&self, name: &str) -> RemoteResult<Option<RemoteLabel>>;

    async fn create_label(&self, label: &LabelDraft) -> RemoteResult<RemoteLabel>;
}

/// GitHub REST client bound to one repository
#[derive(Debug)]
pub struct GitHubClient {
    http: Client,
    base_url: Url,
    owner: String,
    repo: String,
    token: String,
    etags: Mutex<HashMap<u64, String>>,
}

impl GitHubClient {
    pub fn new(config: &SyncConfig) -> RemoteResult<Self> {
        let (owner, repo) = config
            .owner_repo()
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        let base = config.api_url.as_deref().unwrap_or(DEFAULT_API_URL);
        let base_url = Url::parse(base.trim_end_matches('/'))
            .map_err(|e| RemoteError::Decode(format!("Invalid API URL '{}': {}", base, e)))?;

        let http = Client::builder()
            .user_agent(concat!("taskdeck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: config.token.clone(),
            etags: Mutex::new(HashMap::new()),
        })
    }

    /// ETag captured the last time `number` was fetched
    pub fn etag(&self, number: u64) -> Option<String> {
        self.etags
            .lock()
            .ok()
            .and_then(|tags| tags.get(&number).cloned())
    }

    /// `{base}/repos/{owner}/{repo}/{segments...}` with each segment escaped
    fn endpoint(&self, segments: &[&str]) -> RemoteResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                RemoteError::Decode(format!("API URL cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .extend(["repos", self.owner.as_str(), self.repo.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let resp = request
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(http_error(resp).await)
        }
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> RemoteResult<T> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    fn remember_etag(&self, number: u64, headers: &HeaderMap) {
        let Some(tag) = headers.get(ETAG).and_then(|v| v.to_str().ok()) else {
            return;
        };
        if let Ok(mut tags) = self.etags.lock() {
            tags.insert(number, tag.to_string());
        }
    }
}

async fn http_error(resp: Response) -> RemoteError {
    let status = resp.status();
    let rate_limited = matches!(
        status,
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
    ) && resp
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0");

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or(text);

    RemoteError::Http {
        status: status.as_u16(),
        message,
        rate_limited,
    }
}

#[async_trait]
impl IssueTracker for GitHubClient {
    async fn list_issues(&self, label: &str) -> RemoteResult<Vec<RemoteIssue>> {
        let mut issues = Vec::new();
        let mut page = 1usize;

        loop {
            let mut url = self.endpoint(&["issues"])?;
            url.query_pairs_mut()
                .append_pair("state", "all")
                .append_pair("labels", label)
                .append_pair("per_page", &PAGE_SIZE.to_string())
                .append_pair("page", &page.to_string());

            let batch: Vec<RemoteIssue> = self.send_json(self.request(Method::GET, url)).await?;
            let count = batch.len();
            issues.extend(batch.into_iter().filter(|i| i.pull_request.is_none()));

            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        log::debug!("Listed {} issues labelled '{}'", issues.len(), label);
        Ok(issues)
    }

    async fn get_issue(&self, number: u64) -> RemoteResult<RemoteIssue> {
        let url = self.endpoint(&["issues", &number.to_string()])?;
        let resp = self.send(self.request(Method::GET, url)).await?;
        self.remember_etag(number, resp.headers());
        let etag = self.etag(number);

        let mut issue: RemoteIssue = resp
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        issue.etag = etag;
        Ok(issue)
    }

    async fn create_issue(&self, draft: &IssueDraft) -> RemoteResult<RemoteIssue> {
        let url = self.endpoint(&["issues"])?;
        let payload = json!({
            "title": draft.title,
            "body": draft.body,
            "labels": draft.labels,
        });
        self.send_json(self.request(Method::POST, url).json(&payload))
            .await
    }

    async fn update_issue(&self, number: u64, draft: &IssueDraft) -> RemoteResult<RemoteIssue> {
        let url = self.endpoint(&["issues", &number.to_string()])?;
        let payload = json!({
            "title": draft.title,
            "body": draft.body,
            "state": draft.state,
        });
        self.send_json(self.request(Method::PATCH, url).json(&payload))
            .await
    }

    async fn close_issue(&self, number: u64) -> RemoteResult<RemoteIssue> {
        let url = self.endpoint(&["issues", &number.to_string()])?;
        let payload = json!({ "state": IssueState::Closed });
        self.send_json(self.request(Method::PATCH, url).json(&payload))
            .await
    }

    async fn assign_issue(&self, number: u64, assignees: &[String]) -> RemoteResult<()> {
        let url = self.endpoint(&["issues", &number.to_string(), "assignees"])?;
        let payload = json!({ "assignees": assignees });
        self.send(self.request(Method::POST, url).json(&payload))
            .await?;
        Ok(())
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> RemoteResult<()> {
        if labels.is_empty() {
            return Ok(());
        }
        let url = self.endpoint(&["issues", &number.to_string(), "labels"])?;
        let payload = json!({ "labels": labels });
        self.send(self.request(Method::POST, url).json(&payload))
            .await?;
        Ok(())
    }

    async fn remove_label(&self, number: u64, label: &str) -> RemoteResult<()> {
        let url = self.endpoint(&["issues", &number.to_string(), "labels", label])?;
        match self.send(self.request(Method::DELETE, url)).await {
            Ok(_) => Ok(()),
            Err(e) if e.status() == Some(404) => {
                log::debug!("Label '{}' already absent from #{}", label, number);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_label(&self, name: &str) -> RemoteResult<Option<RemoteLabel>> {
        let url = self.endpoint(&["labels", name])?;
        match self.send_json(self.request(Method::GET, url)).await {
            Ok(label) => Ok(Some(label)),
            Err(e) if e.status() == Some(404) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_label(&self, label: &LabelDraft) -> RemoteResult<RemoteLabel> {
        let url = self.endpoint(&["labels"])?;
        self.send_json(self.request(Method::POST, url).json(label))
            .await
    }
}
