//! Pipeline Coordinator Module
//!
//! Sequences the full analysis: repository descriptor, recursive tree
//! (with a shallow-listing fallback), churn from commit history, the
//! five-phase file selection, complexity scoring, importance assembly,
//! tech-stack detection, and question generation.
//!
//! The coordinator owns cancellation, the distributed generation lock,
//! and the partial-failure policy: churn and complexity degrade to
//! defaults with a warning, per-file failures ride along as data, and
//! only input errors and repository-level failures abort the run.

use async_recursion::async_recursion;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tracing::{info, warn};

use crate::cache::{CacheKey, CacheLayer, DistributedLock, LockAcquisition};
use crate::churn::{ChurnAnalysis, ChurnAnalyzer};
use crate::complexity::ComplexityAnalyzer;
use crate::composer::{ComposerConfig, PromptComposer};
use crate::content::{ContentExtractor, ExtractorConfig};
use crate::error::{PipelineError, Result};
use crate::github::{GitHubError, RepositoryHost, TreeEntry};
use crate::llm::QuestionModel;
use crate::metadata::MetadataScorer;
use crate::selector::{FileSelector, SelectionOutcome, SelectorConfig};
use crate::types::{
    normalize_id, ActivitySummary, AnalysisResult, Difficulty, DimensionScores, FileRecord,
    ImportanceDistribution, ImportanceWeights, QuestionType, RepoRef, RepositoryDescriptor,
    SelectedFile, SelectionReason,
};

/// Fallback tree listing limits when the recursive call fails.
const FALLBACK_MAX_DEPTH: usize = 3;
const FALLBACK_MAX_FILES: usize = 500;

// ============================================================================
// Options & Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Commits pulled for churn analysis.
    pub commit_limit: usize,
    /// How long a second caller waits on the generation lock.
    pub lock_wait_secs: u64,
    /// Poll interval while waiting on the lock.
    pub lock_poll_ms: u64,
    /// TTL for the cached analysis result.
    pub result_ttl_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            commit_limit: 300,
            lock_wait_secs: 50,
            lock_poll_ms: 2_000,
            result_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Per-request generation options.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub question_count: usize,
    pub difficulty: Difficulty,
    pub types: Vec<QuestionType>,
    /// Caller-supplied analysis identifier, hyphenated or plain form.
    /// A fresh identifier is minted when absent.
    pub analysis_id: Option<String>,
    /// Wait for a concurrent generation of the same analysis instead of
    /// failing fast with `GENERATION_IN_PROGRESS`.
    pub wait_for_lock: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            question_count: 9,
            difficulty: Difficulty::Medium,
            types: vec![
                QuestionType::TechStack,
                QuestionType::Architecture,
                QuestionType::CodeAnalysis,
            ],
            analysis_id: None,
            wait_for_lock: true,
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline {
    host: Arc<dyn RepositoryHost>,
    model: Arc<dyn QuestionModel>,
    extractor: Arc<ContentExtractor>,
    selector: FileSelector,
    composer: PromptComposer,
    churn: ChurnAnalyzer,
    complexity: ComplexityAnalyzer,
    metadata: MetadataScorer,
    cache: Arc<CacheLayer>,
    lock: DistributedLock,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        host: Arc<dyn RepositoryHost>,
        model: Arc<dyn QuestionModel>,
        cache: Arc<CacheLayer>,
        lock: DistributedLock,
        extractor_config: ExtractorConfig,
        selector_config: SelectorConfig,
        composer_config: ComposerConfig,
        config: PipelineConfig,
    ) -> Self {
        let extractor = Arc::new(ContentExtractor::new(
            host.clone(),
            cache.clone(),
            extractor_config,
        ));
        Self {
            host,
            model,
            selector: FileSelector::new(extractor.clone(), selector_config),
            extractor,
            composer: PromptComposer::new(composer_config),
            churn: ChurnAnalyzer::new(),
            complexity: ComplexityAnalyzer::new(),
            metadata: MetadataScorer::new(),
            cache,
            lock,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a cancellation token; every stage observes it.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn extractor(&self) -> &ContentExtractor {
        &self.extractor
    }

    /// Run the full pipeline for one repository.
    pub async fn analyze_and_generate(
        &self,
        repo_input: &str,
        opts: GenerateOptions,
    ) -> Result<AnalysisResult> {
        // Input validation happens before any I/O.
        if opts.question_count == 0 {
            return Err(PipelineError::InvalidInput(
                "question count must be positive".to_string(),
            ));
        }
        if opts.types.is_empty() {
            return Err(PipelineError::InvalidInput(
                "at least one question type is required".to_string(),
            ));
        }
        let repo = RepoRef::parse(repo_input)?;
        let analysis_id = match &opts.analysis_id {
            Some(raw) => normalize_id(raw)?,
            None => Uuid::new_v4(),
        };

        // A finished result for this analysis short-circuits everything.
        let result_key = CacheKey::questions(&analysis_id);
        if let Some(cached) = self.cache.get::<AnalysisResult>(&result_key).await {
            info!("Returning cached analysis {}", analysis_id);
            return Ok(cached);
        }

        let lock_key = CacheKey::generation_lock(&analysis_id);
        match self.lock.acquire(&lock_key).await {
            LockAcquisition::Acquired => {}
            LockAcquisition::Held => {
                if !opts.wait_for_lock {
                    return Err(PipelineError::GenerationInProgress(analysis_id.to_string()));
                }
                return self.await_concurrent_generation(&analysis_id, &result_key).await;
            }
            LockAcquisition::Unavailable => {
                warn!("Generation lock unavailable, proceeding without it");
            }
        }

        let result = self.run_locked(&repo, &analysis_id, &opts).await;
        if let Ok(ref value) = result {
            self.cache
                .set(&result_key, value, Some(self.config.result_ttl_secs))
                .await;
        }
        // Released on completion and on error alike.
        self.lock.release(&lock_key).await;
        result
    }

    /// Second caller path: poll the result cache while the first holder
    /// generates, then give up with `GENERATION_IN_PROGRESS`.
    async fn await_concurrent_generation(
        &self,
        analysis_id: &Uuid,
        result_key: &str,
    ) -> Result<AnalysisResult> {
        if self.config.lock_wait_secs == 0 {
            return Err(PipelineError::GenerationInProgress(analysis_id.to_string()));
        }
        info!(
            "Generation for {} already in progress, polling for its result",
            analysis_id
        );
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.lock_wait_secs);
        while tokio::time::Instant::now() < deadline {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if let Some(cached) = self.cache.get::<AnalysisResult>(result_key).await {
                return Ok(cached);
            }
            tokio::time::sleep(Duration::from_millis(self.config.lock_poll_ms)).await;
        }
        Err(PipelineError::GenerationInProgress(analysis_id.to_string()))
    }

    async fn run_locked(
        &self,
        repo: &RepoRef,
        analysis_id: &Uuid,
        opts: &GenerateOptions,
    ) -> Result<AnalysisResult> {
        let mut warnings: Vec<String> = Vec::new();

        // Repository descriptor; failures here are fatal.
        let repository = self.host.get_repository(repo).await.map_err(map_repo_error)?;
        info!(
            "Analyzing {} (default branch {})",
            repository.full_name, repository.default_branch
        );

        // Recursive tree with a shallow-listing fallback.
        let tree = match self
            .host
            .get_recursive_tree(repo, &repository.default_branch)
            .await
        {
            Ok(tree) => tree,
            Err(GitHubError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(err) => {
                warn!("Recursive tree failed ({}), using shallow listing", err);
                warnings.push("recursive tree unavailable; shallow listing used".to_string());
                let mut entries = Vec::new();
                self.list_tree_fallback(repo, "", 0, &mut entries).await;
                if entries.is_empty() {
                    return Err(PipelineError::HostUnreachable(err.to_string()));
                }
                entries
            }
        };
        let file_count = tree.iter().filter(|e| e.is_file()).count();
        self.check_cancel()?;

        // Commit history; churn degrades to defaults when unavailable.
        let churn = match self
            .host
            .get_commit_history(repo, None, self.config.commit_limit)
            .await
        {
            Ok(commits) => self.churn.analyze(&commits),
            Err(GitHubError::Cancelled) => return Err(PipelineError::Cancelled),
            Err(err) => {
                warn!("Commit history unavailable ({}), churn defaults apply", err);
                warnings.push("churn analysis unavailable; default scores applied".to_string());
                ChurnAnalysis::default()
            }
        };

        // Five-phase selection.
        let outcome = self.selector.select(repo, &tree, &self.cancel).await?;
        warnings.extend(outcome.warnings.iter().cloned());

        // Dimension assembly with the session-perturbed weights.
        let weights = ImportanceWeights::perturbed(&analysis_id.to_string());
        let sizes: HashMap<&str, u64> = tree
            .iter()
            .filter(|e| e.is_file())
            .map(|e| (e.path.as_str(), e.size.unwrap_or(0)))
            .collect();

        let mut all_scores: Vec<f64> = Vec::new();
        for (path, text) in &outcome.contents {
            let size = *sizes.get(path.as_str()).unwrap_or(&0);
            let record = self.build_record(path, size, Some(text), &outcome, &churn, &weights);
            all_scores.push(record.importance_score);
        }
        let importance_distribution = ImportanceDistribution::from_scores(&all_scores);

        let key_files: Vec<SelectedFile> = outcome
            .selected
            .iter()
            .map(|sel| {
                let record = self.build_record(
                    &sel.path,
                    sel.size,
                    sel.content.text.as_deref(),
                    &outcome,
                    &churn,
                    &weights,
                );
                let hotspot = churn.is_hotspot(&sel.path);
                let reasons = selection_reasons(&record, sel.reason, hotspot);
                SelectedFile {
                    record,
                    content: sel.content.clone(),
                    reason: sel.reason,
                    selected_score: sel.selected_score,
                    reasons,
                    hotspot,
                }
            })
            .collect();
        self.check_cancel()?;

        // Tech stack from host languages, degraded to extensions of the
        // selected files when the endpoint fails.
        let tech_stack = match self.host.get_languages(repo).await {
            Ok(languages) => tech_stack_from_languages(&languages, &tree),
            Err(err) => {
                warn!("Language stats unavailable ({}), deriving from selection", err);
                warnings.push("language statistics unavailable; derived from selection".to_string());
                tech_stack_from_selection(&key_files)
            }
        };

        // Question generation; cancellation inside the composer means no
        // result is emitted at all.
        let (questions, composer_warnings) = self
            .composer
            .generate_questions(
                self.model.as_ref(),
                &key_files,
                opts.question_count,
                opts.difficulty,
                &opts.types,
                &analysis_id.to_string(),
                &self.cancel,
            )
            .await?;
        warnings.extend(composer_warnings);

        let activity = (churn.total_commits > 0).then(|| ActivitySummary {
            total_commits: churn.total_commits,
            active_files: churn.per_file.len(),
            hotspot_files: churn.hotspots.iter().take(10).cloned().collect(),
        });

        Ok(AnalysisResult {
            analysis_id: *analysis_id,
            repository: RepositoryDescriptor {
                owner: repo.owner.clone(),
                name: repo.name.clone(),
                default_branch: repository.default_branch,
                primary_language: repository.language,
                size_kb: repository.size,
                file_count,
            },
            tech_stack,
            key_files,
            questions,
            importance_distribution,
            activity,
            warnings,
            success: true,
        })
    }

    /// Assemble a file record with all four dimensions and the combined
    /// importance score.
    fn build_record(
        &self,
        path: &str,
        size: u64,
        content: Option<&str>,
        outcome: &SelectionOutcome,
        churn: &ChurnAnalysis,
        weights: &ImportanceWeights,
    ) -> FileRecord {
        let mut record = FileRecord::new(path, size);
        let complexity = self
            .complexity
            .analyze(content.unwrap_or(""), record.language.as_deref());
        record.scores = DimensionScores {
            metadata: self.metadata.score(path, size, content),
            centrality: outcome
                .centrality
                .get(path)
                .copied()
                .unwrap_or(0.05)
                .clamp(0.05, 1.0),
            churn: churn.score_for(path),
            complexity: complexity.score,
        };
        record.compute_importance(weights, self.metadata.path_multiplier(path));
        record
    }

    #[async_recursion]
    async fn list_tree_fallback(
        &self,
        repo: &RepoRef,
        path: &str,
        depth: usize,
        entries: &mut Vec<TreeEntry>,
    ) {
        if depth > FALLBACK_MAX_DEPTH || entries.len() >= FALLBACK_MAX_FILES {
            return;
        }
        let listed = match self.host.list_directory(repo, path).await {
            Ok(listed) => listed,
            Err(err) => {
                warn!("Directory listing failed for '{}': {}", path, err);
                return;
            }
        };
        for entry in listed {
            if entries.len() >= FALLBACK_MAX_FILES {
                return;
            }
            if entry.is_file() {
                entries.push(entry);
            } else {
                let sub = entry.path.clone();
                self.list_tree_fallback(repo, &sub, depth + 1, entries).await;
            }
        }
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn map_repo_error(err: GitHubError) -> PipelineError {
    match err {
        GitHubError::NotFound { id, .. } => PipelineError::RepositoryNotFound(id),
        other => PipelineError::from(other),
    }
}

/// Reasons shown to the caller, derived from the dominant dimensions.
fn selection_reasons(record: &FileRecord, reason: SelectionReason, hotspot: bool) -> Vec<String> {
    let mut reasons = Vec::new();
    if reason == SelectionReason::ReservedConfigSlot {
        reasons.push("critical build manifest".to_string());
    }
    if record.scores.centrality >= 0.5 {
        reasons.push("high dependency centrality".to_string());
    }
    if hotspot {
        reasons.push("frequently changed hotspot".to_string());
    }
    if record.scores.metadata >= 0.7 {
        reasons.push("structurally important location".to_string());
    }
    if record.scores.complexity >= 0.7 {
        reasons.push("high implementation complexity".to_string());
    }
    if reasons.is_empty() {
        reasons.push("representative source file".to_string());
    }
    reasons
}

/// Language byte counts -> confidence map, boosted by manifest presence.
fn tech_stack_from_languages(
    languages: &HashMap<String, i64>,
    tree: &[TreeEntry],
) -> HashMap<String, f64> {
    let total: i64 = languages.values().sum();
    let mut stack: HashMap<String, f64> = HashMap::new();
    if total > 0 {
        for (language, bytes) in languages {
            stack.insert(
                language.to_lowercase(),
                (*bytes as f64 / total as f64).clamp(0.0, 1.0),
            );
        }
    }

    let basenames: Vec<String> = tree
        .iter()
        .filter(|e| e.is_file())
        .filter_map(|e| e.path.rsplit('/').next().map(str::to_lowercase))
        .collect();
    let has = |name: &str| basenames.iter().any(|b| b == name);

    const MANIFEST_BOOSTS: &[(&str, &str)] = &[
        ("package.json", "javascript"),
        ("tsconfig.json", "typescript"),
        ("requirements.txt", "python"),
        ("pyproject.toml", "python"),
        ("cargo.toml", "rust"),
        ("go.mod", "go"),
        ("pom.xml", "java"),
        ("build.gradle", "java"),
    ];
    for (manifest, language) in MANIFEST_BOOSTS {
        if has(manifest) {
            let entry = stack.entry((*language).to_string()).or_insert(0.0);
            *entry = (*entry + 0.1).min(1.0);
        }
    }
    if has("dockerfile") || has("docker-compose.yml") || has("docker-compose.yaml") {
        stack.insert("docker".to_string(), 0.8);
    }
    stack
}

fn tech_stack_from_selection(files: &[SelectedFile]) -> HashMap<String, f64> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut total = 0usize;
    for file in files {
        if let Some(language) = &file.record.language {
            *counts.entry(language.clone()).or_default() += 1;
            total += 1;
        }
    }
    counts
        .into_iter()
        .map(|(language, count)| (language, count as f64 / total.max(1) as f64))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tech_stack_from_languages_with_boosts() {
        let mut languages = HashMap::new();
        languages.insert("Python".to_string(), 7_500i64);
        languages.insert("JavaScript".to_string(), 2_500i64);
        let tree = vec![
            TreeEntry::file("requirements.txt", 120),
            TreeEntry::file("Dockerfile", 300),
            TreeEntry::file("src/main.py", 5_000),
        ];

        let stack = tech_stack_from_languages(&languages, &tree);
        // Byte share plus the manifest boost.
        assert!((stack["python"] - 0.85).abs() < 1e-9);
        assert!((stack["javascript"] - 0.25).abs() < 1e-9);
        assert_eq!(stack["docker"], 0.8);
        for confidence in stack.values() {
            assert!((0.0..=1.0).contains(confidence));
        }
    }

    #[test]
    fn test_selection_reasons_derivation() {
        let mut record = FileRecord::new("src/app/core/engine.py", 2_000);
        record.scores = DimensionScores {
            metadata: 0.8,
            centrality: 0.6,
            churn: 0.4,
            complexity: 0.2,
        };
        let reasons = selection_reasons(&record, SelectionReason::PagerankMmrSelection, true);
        assert!(reasons.contains(&"high dependency centrality".to_string()));
        assert!(reasons.contains(&"frequently changed hotspot".to_string()));
        assert!(reasons.contains(&"structurally important location".to_string()));

        let mut plain = FileRecord::new("src/other.py", 500);
        plain.scores = DimensionScores {
            metadata: 0.3,
            centrality: 0.05,
            churn: 0.3,
            complexity: 0.3,
        };
        let reasons = selection_reasons(&plain, SelectionReason::PagerankMmrSelection, false);
        assert_eq!(reasons, vec!["representative source file".to_string()]);
    }

    #[test]
    fn test_generate_options_defaults() {
        let opts = GenerateOptions::default();
        assert_eq!(opts.question_count, 9);
        assert_eq!(opts.types.len(), 3);
        assert!(opts.wait_for_lock);
    }
}
