use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{RunId, WorkflowId};
use reqwest::header::{HeaderMap, ACCEPT, LINK};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::GithubConfig;
use crate::error::HttpError;
use crate::http::{body_excerpt, cancellable};

/// `owner/repo` pair the workflow belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repo {
    pub owner: String,
    pub name: String,
}

impl Repo {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Server-side filters for the run listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFilter {
    pub status: String,
    pub event: String,
    /// Date predicate such as `2021-10-12` or `>=2021-10-29T22:40:19Z`.
    pub created: Option<String>,
}

impl RunFilter {
    pub fn from_config(config: &GithubConfig, created: Option<String>) -> Self {
        Self {
            status: config.status.clone(),
            event: config.event.clone(),
            created,
        }
    }
}

impl Default for RunFilter {
    fn default() -> Self {
        Self {
            status: "completed".to_string(),
            event: "pull_request".to_string(),
            created: None,
        }
    }
}

/// One page of a listing and the cursor to the next one, if any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    /// Unix seconds at which the window resets.
    pub reset: i64,
}

impl RateLimit {
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.reset, 0)
    }
}

/// Rate limit status per resource (`core`, `search`, `graphql`, ...).
pub type RateLimits = BTreeMap<String, RateLimit>;

/// The slice of the GitHub Actions API the fetcher relies on.
#[async_trait]
pub trait ActionsApi: Send + Sync {
    async fn list_workflow_runs(
        &self,
        repo: &Repo,
        workflow_id: WorkflowId,
        filter: &RunFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Value>, HttpError>;

    async fn list_jobs_for_run(
        &self,
        repo: &Repo,
        run_id: RunId,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Value>, HttpError>;

    async fn rate_limits(&self) -> Result<RateLimits, HttpError>;
}

#[derive(Deserialize)]
struct WorkflowRunsResponse {
    #[serde(default)]
    workflow_runs: Vec<Value>,
}

#[derive(Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<Value>,
}

#[derive(Deserialize)]
struct RateLimitResponse {
    #[serde(default)]
    resources: RateLimits,
}

/// GitHub REST client. Without a token requests go out unauthenticated, which
/// works for public repositories at a much lower rate limit.
pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
    cancel: CancellationToken,
}

impl GithubClient {
    pub fn new(config: &GithubConfig, cancel: CancellationToken) -> Result<Self, HttpError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("gham/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| HttpError::Transport {
                url: config.api_url.clone(),
                source,
            })?;

        if config.token.is_none() {
            log::warn!("No GitHub token configured, using unauthenticated requests");
        }

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            cancel,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<(T, Option<u32>), HttpError> {
        let url = format!("{}{}", self.api_url, path);
        let mut request = self
            .http
            .get(&url)
            .query(query)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = cancellable(&self.cancel, request.send())
            .await?
            .map_err(|source| HttpError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        log_rate_limit(path, status.as_u16(), response.headers());

        if !status.is_success() {
            let body = body_excerpt(&self.cancel, response).await;
            return Err(HttpError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let next_page = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_page_from_link);

        let body = cancellable(&self.cancel, response.json::<T>())
            .await?
            .map_err(|source| HttpError::Decode { url, source })?;

        Ok((body, next_page))
    }
}

#[async_trait]
impl ActionsApi for GithubClient {
    async fn list_workflow_runs(
        &self,
        repo: &Repo,
        workflow_id: WorkflowId,
        filter: &RunFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Value>, HttpError> {
        let path = format!(
            "/repos/{}/{}/actions/workflows/{}/runs",
            repo.owner, repo.name, workflow_id
        );
        let mut query = vec![
            ("status", filter.status.clone()),
            ("event", filter.event.clone()),
            ("per_page", per_page.to_string()),
            ("page", page.to_string()),
        ];
        if let Some(created) = &filter.created {
            query.push(("created", created.clone()));
        }

        let (body, next_page) = self.get::<WorkflowRunsResponse>(&path, &query).await?;
        Ok(Page {
            items: body.workflow_runs,
            next_page,
        })
    }

    async fn list_jobs_for_run(
        &self,
        repo: &Repo,
        run_id: RunId,
        page: u32,
        per_page: u32,
    ) -> Result<Page<Value>, HttpError> {
        let path = format!("/repos/{}/{}/actions/runs/{}/jobs", repo.owner, repo.name, run_id);
        let query = [("per_page", per_page.to_string()), ("page", page.to_string())];

        let (body, next_page) = self.get::<JobsResponse>(&path, &query).await?;
        Ok(Page {
            items: body.jobs,
            next_page,
        })
    }

    async fn rate_limits(&self) -> Result<RateLimits, HttpError> {
        let (body, _) = self.get::<RateLimitResponse>("/rate_limit", &[]).await?;
        Ok(body.resources)
    }
}

fn log_rate_limit(path: &str, status: u16, headers: &HeaderMap) {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    match (header("x-ratelimit-used"), header("x-ratelimit-limit")) {
        (Some(used), Some(limit)) => {
            log::info!("requested GET {}: {} ratelimit {}/{}", path, status, used, limit)
        }
        _ => log::info!("requested GET {}: {}", path, status),
    }
}

/// Extracts the `page` query parameter of the `rel="next"` entry of a Link header.
pub fn next_page_from_link(link: &str) -> Option<u32> {
    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim();
        let is_next = pieces.any(|p| p.trim() == r#"rel="next""#);
        if !is_next {
            return None;
        }
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        let url = url::Url::parse(target).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse().ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_page_from_link() {
        let link = r#"<https://api.github.com/repositories/1/actions/workflows/2/runs?per_page=100&page=3>; rel="next", <https://api.github.com/repositories/1/actions/workflows/2/runs?per_page=100&page=10>; rel="last""#;
        assert_eq!(next_page_from_link(link), Some(3));
    }

    #[test]
    fn test_last_page_has_no_next() {
        let link = r#"<https://api.github.com/x?page=1>; rel="first", <https://api.github.com/x?page=9>; rel="prev""#;
        assert_eq!(next_page_from_link(link), None);
        assert_eq!(next_page_from_link(""), None);
    }

    #[test]
    fn test_rate_limit_reset() {
        let limit = RateLimit {
            limit: 5000,
            used: 12,
            remaining: 4988,
            reset: 1_700_000_000,
        };
        assert_eq!(limit.reset_at().unwrap().to_rfc3339(), "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn test_rate_limit_response_decodes_resources() {
        let body: RateLimitResponse = serde_json::from_str(
            r#"{"resources":{"core":{"limit":60,"used":1,"remaining":59,"reset":1}},"rate":{"limit":60}}"#,
        )
        .unwrap();
        assert_eq!(body.resources["core"].remaining, 59);
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let config = GithubConfig {
            api_url: "https://ghe.example.com/api/v3/".into(),
            ..GithubConfig::default()
        };
        let client = GithubClient::new(&config, CancellationToken::new()).unwrap();
        assert_eq!(client.api_url, "https://ghe.example.com/api/v3");
    }
}
