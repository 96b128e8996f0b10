//! GitHub Domain Models
//!
//! Type-safe representations of the GitHub REST payloads the pipeline
//! consumes, plus the domain-level commit record assembled from the
//! list-commits and get-commit endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Repository
// ============================================================================

/// Repository metadata, reduced to the fields the pipeline reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub language: Option<String>,
    /// Aggregate size in kilobytes.
    pub size: i64,
    pub default_branch: String,
    pub fork: bool,
    pub archived: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub pushed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// File Tree
// ============================================================================

/// Entry kind in the git tree. GitHub reports `blob` for files and `tree`
/// for directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeEntryKind {
    #[serde(rename = "blob", alias = "file")]
    File,
    #[serde(rename = "tree", alias = "dir")]
    Dir,
    #[serde(other)]
    Other,
}

/// One entry of the recursive file tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: TreeEntryKind,
    pub size: Option<u64>,
}

impl TreeEntry {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            kind: TreeEntryKind::File,
            size: Some(size),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == TreeEntryKind::File
    }
}

/// Response of `GET /repos/{owner}/{repo}/git/trees/{branch}?recursive=1`.
#[derive(Debug, Deserialize)]
pub struct GitTreeResponse {
    pub tree: Vec<TreeEntry>,
    #[serde(default)]
    pub truncated: bool,
}

// ============================================================================
// File Contents
// ============================================================================

/// Response of `GET /repos/{owner}/{repo}/contents/{path}` for a file.
#[derive(Debug, Deserialize)]
pub struct ContentResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub encoding: String,
    pub size: u64,
}

/// A fetched file body with the size the server reported before download.
#[derive(Debug, Clone)]
pub struct FileBody {
    pub bytes: Vec<u8>,
    pub reported_size: u64,
}

// ============================================================================
// Commits
// ============================================================================

/// Item of the list-commits endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitSummary {
    pub sha: String,
    pub commit: CommitMeta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitMeta {
    pub author: Option<CommitAuthorMeta>,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitAuthorMeta {
    pub name: Option<String>,
    pub email: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

/// Response of the get-commit endpoint, which carries per-file changes.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    pub sha: String,
    #[serde(default)]
    pub files: Vec<CommitFileEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitFileEntry {
    pub filename: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
}

/// One file touched by a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitFileChange {
    pub path: String,
    pub additions: u64,
    pub deletions: u64,
}

/// Domain-level commit record used by the churn analyzer. Assembled from
/// a commit summary plus its detail; not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub author: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub message: String,
    pub files: Vec<CommitFileChange>,
}

impl CommitRecord {
    pub fn from_parts(summary: CommitSummary, detail: Option<CommitDetail>) -> Self {
        let author = summary
            .commit
            .author
            .as_ref()
            .and_then(|a| a.name.clone().or_else(|| a.email.clone()))
            .unwrap_or_else(|| "unknown".to_string());
        let timestamp = summary.commit.author.as_ref().and_then(|a| a.date);
        let files = detail
            .map(|d| {
                d.files
                    .into_iter()
                    .map(|f| CommitFileChange {
                        path: f.filename,
                        additions: f.additions,
                        deletions: f.deletions,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            sha: summary.sha,
            author,
            timestamp,
            message: summary.commit.message,
            files,
        }
    }
}

// ============================================================================
// Rate Limits
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResponse {
    pub resources: RateLimitResources,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimitBucket,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitBucket {
    pub limit: i32,
    pub remaining: i32,
    pub reset: i64,
}
