//! GitHub API Client
//!
//! REST client for the repository host: descriptor, recursive tree, file
//! bodies, commit history, and language statistics. Implements rate-limit
//! tracking from response headers and bounded retry with exponential
//! backoff for transient network failures.
//!
//! # Example
//!
//! ```rust,no_run
//! use repogrill::github::{GitHubClient, GitHubConfig, RepositoryHost};
//! use repogrill::types::RepoRef;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = GitHubClient::with_config(GitHubConfig::new(Some("ghp_token".into())))?;
//!     let repo = RepoRef::parse("octocat/hello-world")?;
//!
//!     let descriptor = client.get_repository(&repo).await?;
//!     println!("default branch: {}", descriptor.default_branch);
//!
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT},
    Client, StatusCode,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::github::{models::*, GitHubError, RepositoryHost, Result};
use crate::types::RepoRef;

const GITHUB_API_BASE: &str = "https://api.github.com";
const COMMITS_PER_PAGE: usize = 100;

/// Hard ceiling on commits fetched for one repository, regardless of the
/// caller-supplied limit.
const COMMIT_SAFETY_CAP: usize = 5_000;

// ============================================================================
// Client Configuration
// ============================================================================

/// GitHub client configuration
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// Personal Access Token; anonymous access when absent.
    pub token: Option<String>,

    /// API base URL (default: https://api.github.com)
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// User agent string
    pub user_agent: String,

    /// Minimum remaining rate limit before warning
    pub rate_limit_warning_threshold: i32,

    /// Concurrent commit-detail fetches
    pub detail_concurrency: usize,

    /// Retries for transient network failures
    pub max_retries: usize,

    /// Base backoff delay in milliseconds (doubled per retry, ±20% jitter)
    pub retry_base_ms: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: GITHUB_API_BASE.to_string(),
            timeout_secs: 30,
            user_agent: format!("repogrill/{}", env!("CARGO_PKG_VERSION")),
            rate_limit_warning_threshold: 100,
            detail_concurrency: 10,
            max_retries: 3,
            retry_base_ms: 500,
        }
    }
}

impl GitHubConfig {
    /// Create new config with an optional token
    pub fn new(token: Option<String>) -> Self {
        Self {
            token,
            ..Default::default()
        }
    }

    /// Set custom base URL (for GitHub Enterprise or a test host)
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

// ============================================================================
// Rate Limit Info
// ============================================================================

/// Rate limit information from response headers
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub limit: i32,
    pub remaining: i32,
    pub reset: DateTime<Utc>,
    pub used: i32,
}

impl RateLimitInfo {
    /// Parse rate limit from response headers
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let parse = |name: &str| -> Option<i32> { headers.get(name)?.to_str().ok()?.parse().ok() };

        let limit = parse("x-ratelimit-limit")?;
        let remaining = parse("x-ratelimit-remaining")?;
        let used = parse("x-ratelimit-used")?;
        let reset_timestamp: i64 = headers
            .get("x-ratelimit-reset")?
            .to_str()
            .ok()?
            .parse()
            .ok()?;
        let reset = DateTime::from_timestamp(reset_timestamp, 0)?;

        Some(Self {
            limit,
            remaining,
            reset,
            used,
        })
    }

    /// Check if rate limit is approaching exhaustion
    pub fn is_exhausted(&self, threshold: i32) -> bool {
        self.remaining < threshold
    }
}

// ============================================================================
// GitHub Client
// ============================================================================

/// Main GitHub API client
#[derive(Clone)]
pub struct GitHubClient {
    config: GitHubConfig,
    client: Client,
    cancel: CancellationToken,
    detail_semaphore: Arc<Semaphore>,
    last_rate_limit: Arc<tokio::sync::RwLock<Option<RateLimitInfo>>>,
}

impl GitHubClient {
    /// Create client with custom configuration
    pub fn with_config(config: GitHubConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(ref token) = config.token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| GitHubError::ConfigError(format!("Invalid token: {}", e)))?,
            );
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| GitHubError::ConfigError(format!("Invalid user agent: {}", e)))?,
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| GitHubError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        let detail_concurrency = config.detail_concurrency.max(1);
        Ok(Self {
            config,
            client,
            cancel: CancellationToken::new(),
            detail_semaphore: Arc::new(Semaphore::new(detail_concurrency)),
            last_rate_limit: Arc::new(tokio::sync::RwLock::new(None)),
        })
    }

    /// Attach a cancellation token; in-flight requests surrender at their
    /// next completion.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Get current rate limit info (cached from the last response)
    pub async fn get_cached_rate_limit(&self) -> Option<RateLimitInfo> {
        self.last_rate_limit.read().await.clone()
    }

    /// Update rate limit from headers
    async fn update_rate_limit(&self, headers: &HeaderMap) {
        if let Some(rate_limit) = RateLimitInfo::from_headers(headers) {
            if rate_limit.is_exhausted(self.config.rate_limit_warning_threshold) {
                warn!(
                    "GitHub API rate limit approaching: {}/{}",
                    rate_limit.remaining, rate_limit.limit
                );
            }
            *self.last_rate_limit.write().await = Some(rate_limit);
        }
    }

    /// GET with retry on transient network failures. Auth, not-found and
    /// rate-limit responses surface immediately without retrying.
    async fn get_raw(&self, url: &str) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(GitHubError::Cancelled);
            }

            debug!("GET {} (attempt {})", url, attempt + 1);
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(GitHubError::Cancelled),
                r = self.client.get(url).send() => r,
            };

            match result {
                Ok(response) => {
                    self.update_rate_limit(response.headers()).await;
                    let status = response.status();
                    if !status.is_success() {
                        return Err(self.handle_error_response(status, response).await);
                    }
                    return Ok(response);
                }
                Err(err) if err.is_timeout() || err.is_connect() => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Err(GitHubError::Timeout(err.to_string()));
                    }
                    let delay = retry_delay(self.config.retry_base_ms, attempt);
                    warn!("GitHub request failed ({}), retrying in {:?}", err, delay);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(GitHubError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => return Err(GitHubError::Request(err)),
            }
        }
    }

    /// Make authenticated GET request, deserializing the JSON body
    async fn get<T: for<'de> serde::Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self.get_raw(&url).await?;
        let data = response.json().await?;
        Ok(data)
    }

    /// Handle error response
    async fn handle_error_response(
        &self,
        status: StatusCode,
        response: reqwest::Response,
    ) -> GitHubError {
        match status {
            StatusCode::UNAUTHORIZED => {
                GitHubError::AuthError("Invalid or expired GitHub token".to_string())
            }
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                // A 403 with exhausted quota is a rate-limit response; an
                // ordinary 403 is an auth problem.
                let remaining = response
                    .headers()
                    .get("x-ratelimit-remaining")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<i64>().ok());
                if status == StatusCode::TOO_MANY_REQUESTS || remaining == Some(0) {
                    let reset_at = response
                        .headers()
                        .get("x-ratelimit-reset")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<i64>().ok())
                        .and_then(|ts| DateTime::from_timestamp(ts, 0))
                        .unwrap_or_else(Utc::now);
                    GitHubError::RateLimitExceeded { reset_at }
                } else {
                    GitHubError::AuthError("Access forbidden".to_string())
                }
            }
            StatusCode::NOT_FOUND => {
                let url = response.url().path().to_string();
                let resource_type = if url.matches('/').count() <= 3 {
                    "repository"
                } else {
                    "resource"
                };
                GitHubError::NotFound {
                    resource_type: resource_type.to_string(),
                    id: url,
                }
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                GitHubError::ApiError(format!("HTTP {}: {}", status, body))
            }
        }
    }

    /// Fetch one page of commit summaries.
    async fn list_commit_page(
        &self,
        repo: &RepoRef,
        since: Option<DateTime<Utc>>,
        page: usize,
    ) -> Result<Vec<CommitSummary>> {
        let mut path = format!(
            "/repos/{}/{}/commits?per_page={}&page={}",
            repo.owner, repo.name, COMMITS_PER_PAGE, page
        );
        if let Some(since) = since {
            path.push_str(&format!("&since={}", since.to_rfc3339()));
        }
        self.get(&path).await
    }

    /// Fetch the per-file change list for one commit.
    async fn get_commit_detail(&self, repo: &RepoRef, sha: &str) -> Result<CommitDetail> {
        self.get(&format!("/repos/{}/{}/commits/{}", repo.owner, repo.name, sha))
            .await
    }

    /// Current rate limit status as reported by the host.
    pub async fn get_rate_limit(&self) -> Result<RateLimitResponse> {
        self.get("/rate_limit").await
    }
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    async fn get_repository(&self, repo: &RepoRef) -> Result<Repository> {
        self.get(&format!("/repos/{}/{}", repo.owner, repo.name))
            .await
    }

    async fn get_recursive_tree(&self, repo: &RepoRef, branch: &str) -> Result<Vec<TreeEntry>> {
        let response: GitTreeResponse = self
            .get(&format!(
                "/repos/{}/{}/git/trees/{}?recursive=1",
                repo.owner, repo.name, branch
            ))
            .await?;
        if response.truncated {
            warn!(
                "Recursive tree for {} was truncated by the host",
                repo.full_name()
            );
        }
        Ok(response.tree)
    }

    async fn list_directory(&self, repo: &RepoRef, path: &str) -> Result<Vec<TreeEntry>> {
        #[derive(serde::Deserialize)]
        struct DirEntry {
            path: String,
            #[serde(rename = "type")]
            kind: String,
            size: Option<u64>,
        }

        let entries: Vec<DirEntry> = self
            .get(&format!(
                "/repos/{}/{}/contents/{}",
                repo.owner, repo.name, path
            ))
            .await?;

        Ok(entries
            .into_iter()
            .map(|e| TreeEntry {
                path: e.path,
                kind: if e.kind == "dir" {
                    TreeEntryKind::Dir
                } else {
                    TreeEntryKind::File
                },
                size: e.size,
            })
            .collect())
    }

    async fn get_file_content(&self, repo: &RepoRef, path: &str) -> Result<FileBody> {
        let response: ContentResponse = self
            .get(&format!(
                "/repos/{}/{}/contents/{}",
                repo.owner,
                repo.name,
                urlencoding::encode(path).replace("%2F", "/")
            ))
            .await?;

        if response.encoding != "base64" {
            return Err(GitHubError::ApiError(format!(
                "unexpected content encoding '{}' for {}",
                response.encoding, path
            )));
        }

        let compact: String = response
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = BASE64
            .decode(compact.as_bytes())
            .map_err(|e| GitHubError::ApiError(format!("base64 decode failed for {}: {}", path, e)))?;

        Ok(FileBody {
            bytes,
            reported_size: response.size,
        })
    }

    async fn get_commit_history(
        &self,
        repo: &RepoRef,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CommitRecord>> {
        let limit = limit.min(COMMIT_SAFETY_CAP);
        let mut summaries = Vec::new();
        let mut page = 1;

        while summaries.len() < limit {
            let batch = self.list_commit_page(repo, since, page).await?;
            if batch.is_empty() {
                break;
            }
            let done = batch.len() < COMMITS_PER_PAGE;
            summaries.extend(batch);
            if done {
                break;
            }
            page += 1;
        }
        summaries.truncate(limit);

        debug!(
            "Fetched {} commit summaries for {}, loading details",
            summaries.len(),
            repo.full_name()
        );

        // Details carry the per-file additions/deletions; fetch them with
        // bounded concurrency. A failed detail degrades to an empty change
        // list rather than failing the history.
        let detail_futures = summaries.into_iter().map(|summary| {
            let semaphore = Arc::clone(&self.detail_semaphore);
            let client = self.clone();
            let repo = repo.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let detail = match client.get_commit_detail(&repo, &summary.sha).await {
                    Ok(detail) => Some(detail),
                    Err(GitHubError::Cancelled) => return Err(GitHubError::Cancelled),
                    Err(err) => {
                        warn!("Commit detail fetch failed for {}: {}", summary.sha, err);
                        None
                    }
                };
                Ok(CommitRecord::from_parts(summary, detail))
            }
        });

        let results = join_all(detail_futures).await;
        results.into_iter().collect()
    }

    async fn get_languages(&self, repo: &RepoRef) -> Result<HashMap<String, i64>> {
        self.get(&format!("/repos/{}/{}/languages", repo.owner, repo.name))
            .await
    }
}

/// Exponential backoff with ±20% jitter: base × 2^(attempt−1).
fn retry_delay(base_ms: u64, attempt: usize) -> Duration {
    let backoff = base_ms.saturating_mul(1u64 << (attempt - 1).min(8));
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((backoff as f64 * jitter) as u64)
}
