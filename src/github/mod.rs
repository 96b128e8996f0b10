//! GitHub Integration Module
//!
//! Source fetching against the GitHub REST API: repository metadata, the
//! recursive file tree, file bodies, and commit history. The concrete
//! [`GitHubClient`] sits behind the [`RepositoryHost`] trait so the pipeline
//! can run against an in-memory host in tests.

pub mod client;
pub mod models;

pub use client::{GitHubClient, GitHubConfig, RateLimitInfo};
pub use models::{
    CommitFileChange, CommitRecord, ContentResponse, FileBody, Repository, TreeEntry,
    TreeEntryKind,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

use crate::types::RepoRef;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum GitHubError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("{resource_type} not found: {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Rate limit exceeded, resets at {reset_at}")]
    RateLimitExceeded { reset_at: DateTime<Utc> },

    #[error("GitHub API error: {0}")]
    ApiError(String),

    #[error("Request timed out after retries: {0}")]
    Timeout(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Request(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, GitHubError>;

// ============================================================================
// Repository Host Trait
// ============================================================================

/// The upstream repository host consumed by the pipeline.
///
/// Per-path failures are returned as errors on the individual call and are
/// never fatal to a run; rate-limit errors bubble up unchanged so the
/// caller decides retry policy.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Fetch the repository descriptor.
    async fn get_repository(&self, repo: &RepoRef) -> Result<Repository>;

    /// Fetch the complete recursive file tree of the given branch in a
    /// single call.
    async fn get_recursive_tree(&self, repo: &RepoRef, branch: &str) -> Result<Vec<TreeEntry>>;

    /// Shallow listing of one directory, used as a fallback when the
    /// recursive call fails.
    async fn list_directory(&self, repo: &RepoRef, path: &str) -> Result<Vec<TreeEntry>>;

    /// Fetch one file's raw body plus the server-reported size.
    async fn get_file_content(&self, repo: &RepoRef, path: &str) -> Result<FileBody>;

    /// Fetch commit history newest-first, including per-commit file
    /// changes, paging internally up to `limit` commits.
    async fn get_commit_history(
        &self,
        repo: &RepoRef,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<CommitRecord>>;

    /// Language byte counts as reported by the host.
    async fn get_languages(&self, repo: &RepoRef) -> Result<HashMap<String, i64>>;
}
