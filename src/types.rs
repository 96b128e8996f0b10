//! Core Data Model
//!
//! Shared record types that flow through the analysis pipeline: repository
//! references, per-file records with their four score dimensions, fetched
//! content records, selection results, and the final analysis envelope.
//!
//! All per-dimension scores live in `[0, 1]`. The combined importance score
//! is clamped back into `[0, 1]` after path and size modifiers.

use chrono::{DateTime, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{PipelineError, Result};

/// File size above which the importance penalty kicks in (50 KB).
pub const SIZE_PENALTY_THRESHOLD: u64 = 50 * 1024;

// ============================================================================
// Repository Reference
// ============================================================================

/// Parsed reference to a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse from a full URL (`https://github.com/owner/name`) or a bare
    /// `owner/name` pair. Trailing `.git` is stripped.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::InvalidInput(
                "repository reference is empty".to_string(),
            ));
        }

        let path = if trimmed.contains("://") {
            let url = url::Url::parse(trimmed).map_err(|e| {
                PipelineError::InvalidInput(format!("invalid repository URL: {}", e))
            })?;
            url.path().trim_matches('/').to_string()
        } else {
            trimmed.trim_matches('/').to_string()
        };

        let mut parts = path.split('/');
        let owner = parts.next().unwrap_or_default();
        let name = parts.next().unwrap_or_default();
        let name = name.strip_suffix(".git").unwrap_or(name);

        if owner.is_empty() || name.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "repository reference must be owner/name, got: {}",
                input
            )));
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Key-safe form used in cache keys.
    pub fn sanitized(&self) -> String {
        format!("{}_{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Repository identity and aggregates, captured once at the start of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryDescriptor {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub primary_language: Option<String>,
    /// Aggregate size reported by the host, in kilobytes.
    pub size_kb: i64,
    /// Number of files in the recursive tree.
    pub file_count: usize,
}

// ============================================================================
// File Records & Scores
// ============================================================================

/// Coarse classification of a file by its role in the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileClass {
    Source,
    Config,
    Documentation,
    Test,
    Other,
}

impl FileClass {
    /// Classify by path conventions and extension.
    pub fn from_path(path: &str) -> Self {
        let lower = path.to_lowercase();
        let basename = lower.rsplit('/').next().unwrap_or(&lower);

        if lower.contains("test") || lower.contains("spec/") || basename.starts_with("conftest") {
            return Self::Test;
        }
        if basename.ends_with(".md") || basename.ends_with(".rst") || basename.ends_with(".txt") {
            return Self::Documentation;
        }
        let config_names = [
            "package.json",
            "tsconfig.json",
            "pyproject.toml",
            "requirements.txt",
            "cargo.toml",
            "go.mod",
            "pom.xml",
            "build.gradle",
            "dockerfile",
            "docker-compose.yml",
            "docker-compose.yaml",
            "makefile",
        ];
        if config_names.contains(&basename)
            || basename.ends_with(".yml")
            || basename.ends_with(".yaml")
            || basename.ends_with(".toml")
            || basename.ends_with(".ini")
            || basename.ends_with(".cfg")
        {
            return Self::Config;
        }
        if detect_language(path).is_some() {
            return Self::Source;
        }
        Self::Other
    }
}

/// Detect the programming language from a file extension.
pub fn detect_language(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?.to_lowercase();
    let lang = match ext.as_str() {
        "py" => "python",
        "js" | "jsx" | "mjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "java" => "java",
        "go" => "go",
        "rs" => "rust",
        "rb" => "ruby",
        "php" => "php",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        _ => return None,
    };
    Some(lang)
}

/// The four score dimensions attached to every analyzed file.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DimensionScores {
    pub metadata: f64,
    pub centrality: f64,
    pub churn: f64,
    pub complexity: f64,
}

/// Weights combining the four dimensions into one importance score.
///
/// The base split is 40% metadata, 30% centrality, 20% churn, 10%
/// complexity. A per-session perturbation nudges each weight by at most
/// ±5% and renormalizes, so repeated runs on the same repository produce
/// slightly different file orderings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImportanceWeights {
    pub metadata: f64,
    pub centrality: f64,
    pub churn: f64,
    pub complexity: f64,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            metadata: 0.4,
            centrality: 0.3,
            churn: 0.2,
            complexity: 0.1,
        }
    }
}

impl ImportanceWeights {
    /// Derive session weights from the base split, perturbed by ±5% per
    /// dimension and renormalized to sum to 1.0. The same seed always
    /// yields the same weights.
    pub fn perturbed(seed: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        let digest = hasher.finalize();
        let mut seed_bytes = [0u8; 32];
        seed_bytes.copy_from_slice(&digest);
        let mut rng = StdRng::from_seed(seed_bytes);

        let base = Self::default();
        let mut vary = |w: f64| -> f64 {
            let variation: f64 = rng.gen_range(-0.05..=0.05);
            (w + w * variation).max(0.01)
        };

        let mut weights = Self {
            metadata: vary(base.metadata),
            centrality: vary(base.centrality),
            churn: vary(base.churn),
            complexity: vary(base.complexity),
        };

        let total = weights.sum();
        weights.metadata /= total;
        weights.centrality /= total;
        weights.churn /= total;
        weights.complexity /= total;
        weights
    }

    pub fn sum(&self) -> f64 {
        self.metadata + self.centrality + self.churn + self.complexity
    }

    /// Weighted combination of the four dimensions, before modifiers.
    pub fn combine(&self, scores: &DimensionScores) -> f64 {
        self.metadata * scores.metadata
            + self.centrality * scores.centrality
            + self.churn * scores.churn
            + self.complexity * scores.complexity
    }
}

/// Size modifier applied to the combined importance score. Files at or
/// under 50 KB pass through; larger files decay exponentially with a
/// floor of 0.3.
pub fn size_penalty(size: u64) -> f64 {
    if size <= SIZE_PENALTY_THRESHOLD {
        return 1.0;
    }
    let ratio = size as f64 / SIZE_PENALTY_THRESHOLD as f64;
    (-0.1 * (ratio - 1.0)).exp().max(0.3)
}

/// A file in the repository tree with its derived scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub size: u64,
    pub language: Option<String>,
    pub class: FileClass,
    pub scores: DimensionScores,
    pub importance_score: f64,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        let language = detect_language(&path).map(str::to_string);
        let class = FileClass::from_path(&path);
        Self {
            path,
            size,
            language,
            class,
            scores: DimensionScores::default(),
            importance_score: 0.0,
        }
    }

    /// Combine the dimension scores into the final importance score,
    /// applying the path multiplier and the large-file penalty, clamped
    /// to `[0, 1]`.
    pub fn compute_importance(&mut self, weights: &ImportanceWeights, path_multiplier: f64) {
        let combined = weights.combine(&self.scores);
        let modified = combined * path_multiplier * size_penalty(self.size);
        self.importance_score = modified.clamp(0.0, 1.0);
    }
}

// ============================================================================
// Content Records
// ============================================================================

/// Why a content fetch produced no usable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum ContentFailure {
    BinaryExtension,
    BinaryContent,
    SizeExceeded { size: u64 },
    NotFound,
    DecodeFailed,
    ApiError { message: String },
}

impl ContentFailure {
    pub fn describe(&self) -> String {
        match self {
            Self::BinaryExtension => "binary_extension".to_string(),
            Self::BinaryContent => "binary_content".to_string(),
            Self::SizeExceeded { size } => format!("size_exceeded ({} bytes)", size),
            Self::NotFound => "not_found".to_string(),
            Self::DecodeFailed => "decode_failed".to_string(),
            Self::ApiError { message } => format!("api_error: {}", message),
        }
    }
}

/// The outcome of fetching one file's content. Failures are carried as
/// data; a failed record never aborts a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub path: String,
    /// Decoded text, absent on failure.
    pub text: Option<String>,
    /// Size of the raw body in bytes.
    pub size: u64,
    /// Which decoding strategy succeeded (`utf-8`, a detected label,
    /// `latin-1`, or `utf-8-lossy`).
    pub encoding: Option<String>,
    pub truncated: bool,
    pub failure: Option<ContentFailure>,
    pub fetched_at: DateTime<Utc>,
}

impl ContentRecord {
    pub fn failed(path: impl Into<String>, size: u64, failure: ContentFailure) -> Self {
        Self {
            path: path.into(),
            text: None,
            size,
            encoding: None,
            truncated: false,
            failure: Some(failure),
            fetched_at: Utc::now(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failure.is_none() && self.text.is_some()
    }
}

// ============================================================================
// Selection Results
// ============================================================================

/// How a file earned its slot in the final selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    ReservedConfigSlot,
    PagerankMmrSelection,
}

/// A selected file with its fetched content and selection metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedFile {
    pub record: FileRecord,
    pub content: ContentRecord,
    pub reason: SelectionReason,
    /// The score that drove the selection (metadata score for reserved
    /// slots, weighted PageRank for MMR picks).
    pub selected_score: f64,
    /// Human-readable reasons derived from the dominant dimensions.
    pub reasons: Vec<String>,
    pub hotspot: bool,
}

// ============================================================================
// Questions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    TechStack,
    Architecture,
    CodeAnalysis,
}

impl QuestionType {
    pub fn parse(input: &str) -> Result<Self> {
        match input.trim() {
            "tech_stack" => Ok(Self::TechStack),
            "architecture" => Ok(Self::Architecture),
            "code_analysis" => Ok(Self::CodeAnalysis),
            other => Err(PipelineError::InvalidInput(format!(
                "unknown question type: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TechStack => "tech_stack",
            Self::Architecture => "architecture",
            Self::CodeAnalysis => "code_analysis",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn parse(input: &str) -> Result<Self> {
        match input.trim() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            other => Err(PipelineError::InvalidInput(format!(
                "unknown difficulty: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

/// Whether a question came from the model or a fallback template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratedBy {
    Model,
    Template,
}

/// One generated interview question tied to a selected file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: Uuid,
    /// First line of the generated text.
    pub headline: String,
    /// Full question text including the structured sections.
    pub text: String,
    pub details_markdown: String,
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    pub file_path: String,
    pub importance_score: f64,
    /// Estimated answer time, e.g. "5-8 minutes".
    pub time_estimate: String,
    pub quality_score: f64,
    pub generated_by: GeneratedBy,
}

// ============================================================================
// Analysis Result
// ============================================================================

/// Aggregate statistics over the scored candidate set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportanceDistribution {
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    pub critical: usize,
    pub important: usize,
    pub moderate: usize,
    pub low: usize,
}

impl ImportanceDistribution {
    /// Band thresholds: critical >= 0.4, important >= 0.25, moderate >= 0.15.
    pub fn from_scores(scores: &[f64]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }
        let mut dist = Self {
            mean: scores.iter().sum::<f64>() / scores.len() as f64,
            max: scores.iter().cloned().fold(f64::MIN, f64::max),
            min: scores.iter().cloned().fold(f64::MAX, f64::min),
            ..Default::default()
        };
        for &s in scores {
            if s >= 0.4 {
                dist.critical += 1;
            } else if s >= 0.25 {
                dist.important += 1;
            } else if s >= 0.15 {
                dist.moderate += 1;
            } else {
                dist.low += 1;
            }
        }
        dist
    }
}

/// Commit-history summary for the repository as a whole.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub total_commits: usize,
    pub active_files: usize,
    /// Up to ten paths, most changed first.
    pub hotspot_files: Vec<String>,
}

/// The typed result of a full pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub analysis_id: Uuid,
    pub repository: RepositoryDescriptor,
    /// Detected language/framework -> confidence in [0, 1].
    pub tech_stack: HashMap<String, f64>,
    pub key_files: Vec<SelectedFile>,
    pub questions: Vec<QuestionRecord>,
    pub importance_distribution: ImportanceDistribution,
    pub activity: Option<ActivitySummary>,
    pub warnings: Vec<String>,
    pub success: bool,
}

/// Normalize an identifier supplied as hyphenated or plain 32-hex form
/// into a canonical UUID.
pub fn normalize_id(input: &str) -> Result<Uuid> {
    Uuid::parse_str(input.trim())
        .map_err(|_| PipelineError::InvalidInput(format!("invalid identifier: {}", input)))
}

// ============================================================================
// Tests
// ============================================================================
