//! Pipeline Error Types
//!
//! Error taxonomy for the analysis pipeline. Only input errors and fatal
//! conditions short-circuit a run; per-file failures travel as data on the
//! records they belong to, and degradations surface through the result
//! envelope's warning list.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::github::GitHubError;

/// Errors surfaced by the pipeline coordinator.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Malformed repository reference, unknown question type, zero count.
    /// Rejected synchronously before any I/O.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Authentication failure at the repository host.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Quota exhaustion at the repository host.
    #[error("Rate limit exceeded at the repository host")]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// The repository itself does not exist.
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    /// The repository host stayed unreachable after the retry schedule.
    #[error("Repository host unreachable: {0}")]
    HostUnreachable(String),

    /// Another worker holds the generation lock for this analysis.
    #[error("Question generation already in progress for analysis {0}")]
    GenerationInProgress(String),

    /// The caller cancelled before the composer finished.
    #[error("Pipeline cancelled")]
    Cancelled,

    /// The LLM failed for every retry and every template fallback.
    #[error("LLM generation failed: {0}")]
    Llm(String),
}

impl PipelineError {
    /// Machine-readable code for the result envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Auth(_) => "AUTH_FAILED",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::RepositoryNotFound(_) => "REPO_NOT_FOUND",
            Self::HostUnreachable(_) => "HOST_UNREACHABLE",
            Self::GenerationInProgress(_) => "GENERATION_IN_PROGRESS",
            Self::Cancelled => "CANCELLED",
            Self::Llm(_) => "LLM_FAILED",
        }
    }
}

impl From<GitHubError> for PipelineError {
    fn from(err: GitHubError) -> Self {
        match err {
            GitHubError::AuthError(msg) => Self::Auth(msg),
            GitHubError::RateLimitExceeded { reset_at } => Self::RateLimited {
                reset_at: Some(reset_at),
            },
            GitHubError::NotFound { resource_type, id } if resource_type == "repository" => {
                Self::RepositoryNotFound(id)
            }
            GitHubError::Cancelled => Self::Cancelled,
            other => Self::HostUnreachable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            PipelineError::InvalidInput("q".into()).code(),
            "INVALID_INPUT"
        );
        assert_eq!(PipelineError::Cancelled.code(), "CANCELLED");
        assert_eq!(
            PipelineError::GenerationInProgress("abc".into()).code(),
            "GENERATION_IN_PROGRESS"
        );
    }

    #[test]
    fn test_github_error_conversion() {
        let err = GitHubError::AuthError("bad token".into());
        assert!(matches!(PipelineError::from(err), PipelineError::Auth(_)));

        let err = GitHubError::NotFound {
            resource_type: "repository".into(),
            id: "octo/missing".into(),
        };
        assert!(matches!(
            PipelineError::from(err),
            PipelineError::RepositoryNotFound(_)
        ));

        let err = GitHubError::NotFound {
            resource_type: "file".into(),
            id: "src/lost.py".into(),
        };
        assert!(matches!(
            PipelineError::from(err),
            PipelineError::HostUnreachable(_)
        ));
    }
}
