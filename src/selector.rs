//! File Selector Module
//!
//! The five-phase selection pipeline that decides which files represent a
//! repository:
//!
//! 1. Candidate selection — top 50 paths by metadata score with boosting
//!    for core logic directories and hard penalties for tests and vendored
//!    code.
//! 2. Parallel fetch of the candidates under the shared semaphore.
//! 3. Dependency graph construction over the fetched set, ghost nodes
//!    included, and PageRank over the whole graph.
//! 4. Ghost lazy-load: top-ranked ghosts that exist in the tree get their
//!    bodies fetched. PageRank from phase 3 stays authoritative.
//! 5. Hybrid selection — up to two reserved slots for critical build
//!    manifests, architectural reweighting of PageRank, MMR for the
//!    remaining slots, and a defensive test post-filter.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::content::{has_binary_extension, ContentExtractor};
use crate::deps::{DependencyAnalyzer, PathIndex, CENTRALITY_FLOOR, GHOST_PREFIX};
use crate::error::{PipelineError, Result};
use crate::github::TreeEntry;
use crate::metadata::MetadataScorer;
use crate::types::{ContentRecord, RepoRef, SelectionReason};

/// Basenames eligible for the reserved configuration slots.
static RESERVED_CONFIG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(package\.json|requirements[^/]*\.txt|pyproject\.toml|Cargo\.toml|pom\.xml|build\.gradle|go\.mod|docker-compose[^/]*|Dockerfile|Makefile)$",
    )
    .unwrap()
});

/// Directories whose source files are boosted into the candidate set and
/// whose PageRank is amplified during reweighting.
const LOGIC_DIRS: &[&str] = &[
    "api/",
    "services/",
    "core/",
    "models/",
    "lib/",
    "utils/",
    "backend/app/",
    "src/app/",
];

const CANDIDATE_BOOST_DIRS: &[&str] = &[
    "api/",
    "services/",
    "core/",
    "lib/",
    "backend/app/",
    "src/app/",
];

const SOURCE_EXTENSIONS: &[&str] = &[
    ".py", ".ts", ".tsx", ".js", ".jsx", ".java", ".go", ".rs", ".cc", ".cpp", ".c", ".h",
];

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Final selection size.
    pub target_count: usize,
    /// Candidate pool fetched in phase 2.
    pub candidate_count: usize,
    /// Ghosts ranked inside this PageRank prefix are rescued.
    pub ghost_rescue_rank: usize,
    /// Slots reserved for critical build manifests.
    pub reserved_slots: usize,
    /// MMR relevance/diversity balance.
    pub mmr_lambda: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            target_count: 12,
            candidate_count: 50,
            ghost_rescue_rank: 20,
            reserved_slots: 2,
            mmr_lambda: 0.6,
        }
    }
}

// ============================================================================
// Outcome
// ============================================================================

/// One selected file before the pipeline attaches dimension scores.
#[derive(Debug, Clone)]
pub struct Selected {
    pub path: String,
    pub size: u64,
    pub reason: SelectionReason,
    pub selected_score: f64,
    pub content: ContentRecord,
}

/// Everything later stages need from the selection run.
#[derive(Debug)]
pub struct SelectionOutcome {
    pub selected: Vec<Selected>,
    /// Phase-1 metadata scores over the whole (non-excluded) tree.
    pub candidate_scores: HashMap<String, f64>,
    /// PageRank per path from phase 3 with the floor applied.
    pub centrality: HashMap<String, f64>,
    /// Fetched text bodies, reusable by the complexity analyzer.
    pub contents: HashMap<String, String>,
    pub warnings: Vec<String>,
}

// ============================================================================
// File Selector
// ============================================================================

pub struct FileSelector {
    extractor: Arc<ContentExtractor>,
    metadata: MetadataScorer,
    deps: DependencyAnalyzer,
    config: SelectorConfig,
}

impl FileSelector {
    pub fn new(extractor: Arc<ContentExtractor>, config: SelectorConfig) -> Self {
        Self {
            extractor,
            metadata: MetadataScorer::new(),
            deps: DependencyAnalyzer::new(),
            config,
        }
    }

    pub fn metadata_scorer(&self) -> &MetadataScorer {
        &self.metadata
    }

    /// Run the five phases over a repository tree.
    pub async fn select(
        &self,
        repo: &RepoRef,
        tree: &[TreeEntry],
        cancel: &CancellationToken,
    ) -> Result<SelectionOutcome> {
        let warnings: Vec<String> = Vec::new();

        let files: Vec<&TreeEntry> = tree.iter().filter(|e| e.is_file()).collect();
        let all_paths: Vec<String> = files.iter().map(|e| e.path.clone()).collect();
        let sizes: HashMap<&str, u64> = files
            .iter()
            .map(|e| (e.path.as_str(), e.size.unwrap_or(0)))
            .collect();

        // Phase 1: candidate selection by boosted metadata score.
        let candidate_scores = self.candidate_scores(&files);
        let candidates = top_candidates(&candidate_scores, self.config.candidate_count);
        info!(
            "Phase 1: {} candidates from {} files",
            candidates.len(),
            files.len()
        );
        check_cancel(cancel)?;

        // Phase 2: parallel fetch of the candidate pool.
        let mut records: HashMap<String, ContentRecord> = HashMap::new();
        let mut contents: HashMap<String, String> = HashMap::new();
        let fetched = self.extractor.extract_many(repo, &candidates).await;
        for record in fetched {
            if let Some(text) = record.text.clone() {
                contents.insert(record.path.clone(), text);
            } else if let Some(failure) = &record.failure {
                debug!("Candidate fetch failed: {} ({})", record.path, failure.describe());
            }
            records.insert(record.path.clone(), record);
        }
        info!("Phase 2: {} of {} candidates fetched", contents.len(), candidates.len());
        check_cancel(cancel)?;

        // Phase 3: dependency graph and PageRank over the whole graph.
        let mut graph = self.deps.build_graph(&contents, &all_paths);
        let ranks = graph.page_rank();
        let mut centrality: HashMap<String, f64> = ranks.clone();
        for path in contents.keys() {
            centrality
                .entry(path.clone())
                .or_insert(CENTRALITY_FLOOR);
        }
        check_cancel(cancel)?;

        // Phase 4: lazy-load ghosts ranked in the top of phase 3 that
        // exist in the tree. Scores from phase 3 stay authoritative.
        let mut ranked: Vec<(&String, &f64)> = ranks.iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(b.0)));
        let tree_set: HashSet<&str> = all_paths.iter().map(String::as_str).collect();
        let rescue: Vec<String> = ranked
            .iter()
            .take(self.config.ghost_rescue_rank)
            .filter(|(path, _)| graph.is_ghost(path) && tree_set.contains(path.as_str()))
            .map(|(path, _)| (*path).clone())
            .collect();

        if !rescue.is_empty() {
            info!("Phase 4: lazy-loading {} ghost nodes", rescue.len());
            let index = PathIndex::new(&all_paths);
            let rescued = self.extractor.extract_many(repo, &rescue).await;
            for record in rescued {
                if let Some(text) = record.text.clone() {
                    graph.absorb_ghost(&self.deps, &record.path, &text, &index);
                    contents.insert(record.path.clone(), text);
                } else {
                    warn!("Ghost rescue failed for {}", record.path);
                }
                records.insert(record.path.clone(), record);
            }
        }
        check_cancel(cancel)?;

        // Phase 5a: reserved slots for critical build manifests, ranked by
        // metadata score. Unfetched reservations get one final attempt.
        let mut reserved: Vec<Selected> = Vec::new();
        let mut reserved_paths: HashSet<String> = HashSet::new();
        let mut by_metadata: Vec<(&String, &f64)> = candidate_scores.iter().collect();
        by_metadata.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(b.0)));

        for (path, score) in by_metadata {
            if reserved.len() >= self.config.reserved_slots {
                break;
            }
            let basename = path.rsplit('/').next().unwrap_or(path);
            if !RESERVED_CONFIG_RE.is_match(basename) {
                continue;
            }
            if !records.get(path).map(|r| r.is_ok()).unwrap_or(false) {
                let record = self.extractor.extract(repo, path).await;
                if record.is_ok() {
                    if let Some(text) = record.text.clone() {
                        contents.insert(path.clone(), text);
                    }
                    records.insert(path.clone(), record);
                } else {
                    debug!("Reserved config fetch failed, skipping {}", path);
                    continue;
                }
            }
            info!("Phase 5a: reserved config slot for {}", path);
            reserved.push(Selected {
                path: path.clone(),
                size: *sizes.get(path.as_str()).unwrap_or(&0),
                reason: SelectionReason::ReservedConfigSlot,
                selected_score: *score,
                content: records[path].clone(),
            });
            reserved_paths.insert(path.clone());
        }

        // Phase 5b: architectural reweighting of PageRank.
        let weighted = reweight(&centrality, &reserved_paths);

        // Phase 5c: MMR over fetched, unreserved candidates.
        let logic_target = self.config.target_count.saturating_sub(reserved.len());
        let mmr_pool: Vec<String> = {
            let mut pool: Vec<String> = contents
                .keys()
                .filter(|p| !reserved_paths.contains(*p) && !p.starts_with(GHOST_PREFIX))
                .cloned()
                .collect();
            pool.sort();
            pool
        };
        let chosen = mmr_select(&mmr_pool, &weighted, logic_target, self.config.mmr_lambda);

        let mut selected = reserved;
        for path in chosen {
            let score = *weighted.get(&path).unwrap_or(&0.0);
            selected.push(Selected {
                path: path.clone(),
                size: *sizes.get(path.as_str()).unwrap_or(&0),
                reason: SelectionReason::PagerankMmrSelection,
                selected_score: score,
                content: records[&path].clone(),
            });
        }

        // Phase 5d: defensively drop anything test-like, even if MMR had
        // to reach for it. A smaller final set is acceptable.
        let before = selected.len();
        selected.retain(|s| !is_test_path(&s.path));
        if selected.len() < before {
            debug!("Phase 5d: dropped {} test-like paths", before - selected.len());
        }

        if selected.len() < self.config.target_count {
            debug!(
                "Selection produced {} of {} requested files",
                selected.len(),
                self.config.target_count
            );
        }

        check_cancel(cancel)?;
        Ok(SelectionOutcome {
            selected,
            candidate_scores,
            centrality,
            contents,
            warnings,
        })
    }

    /// Phase-1 scoring: metadata score plus candidate boosting. Excluded
    /// and binary-extension paths never enter the map.
    fn candidate_scores(&self, files: &[&TreeEntry]) -> HashMap<String, f64> {
        let mut scores = HashMap::new();
        for entry in files {
            let path = &entry.path;
            let size = entry.size.unwrap_or(0);
            if has_binary_extension(path) {
                continue;
            }

            let lower = path.to_lowercase();
            let is_test = lower.contains("test") || lower.contains("spec");
            let is_vendor = ["deps/", "vendor/", "node_modules/", "third_party/"]
                .iter()
                .any(|d| lower.contains(d));
            if is_test || is_vendor {
                // Demoted to the candidate floor; the post-filter removes
                // any that still slip through MMR.
                scores.insert(path.clone(), 0.01);
                continue;
            }
            if self.metadata.is_excluded(path, Some(size), None) {
                continue;
            }

            let mut score = self.metadata.score(path, size, None);
            if CANDIDATE_BOOST_DIRS.iter().any(|d| path.contains(d))
                && SOURCE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
            {
                score += 0.5;
            }
            scores.insert(path.clone(), score);
        }
        scores
    }
}

// ============================================================================
// Phase Helpers
// ============================================================================

fn check_cancel(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

fn top_candidates(scores: &HashMap<String, f64>, count: usize) -> Vec<String> {
    let mut sorted: Vec<(&String, &f64)> = scores.iter().collect();
    sorted.sort_by(|a, b| {
        b.1.partial_cmp(a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(b.0))
    });
    sorted.into_iter().take(count).map(|(p, _)| p.clone()).collect()
}

pub fn is_test_path(path: &str) -> bool {
    let lower = path.to_lowercase();
    let basename = lower.rsplit('/').next().unwrap_or(&lower);
    let parent = lower
        .rsplit('/')
        .nth(1)
        .unwrap_or("");
    for needle in ["test", "spec", "conftest"] {
        if basename.contains(needle) || parent.contains(needle) {
            return true;
        }
    }
    false
}

/// Phase-5b reweighting: reserved paths are taken out of play, tests are
/// zeroed, logic directories tripled, documentation and secondary config
/// extensions penalized.
fn reweight(centrality: &HashMap<String, f64>, reserved: &HashSet<String>) -> HashMap<String, f64> {
    let mut weighted = centrality.clone();
    for (path, score) in weighted.iter_mut() {
        if reserved.contains(path) {
            *score = -1.0;
            continue;
        }
        let lower = path.to_lowercase();
        let is_test =
            lower.contains("test") || lower.contains("spec") || lower.contains("conftest");

        if !is_test && LOGIC_DIRS.iter().any(|d| path.contains(d)) {
            *score *= 3.0;
        }
        if is_test {
            *score = 0.0;
        }
        if [".md", ".rst", ".txt"].iter().any(|e| lower.ends_with(e)) {
            *score *= 0.1;
        }
        if [".json", ".yml", ".yaml", ".xml", ".toml"]
            .iter()
            .any(|e| lower.ends_with(e))
        {
            *score *= 0.2;
        }
    }
    weighted
}

/// Greedy MMR: each round picks the candidate maximizing
/// `lambda * score - (1 - lambda) * max_similarity_to_selected`.
/// Deterministic given the same scores and candidate list.
fn mmr_select(
    candidates: &[String],
    weighted: &HashMap<String, f64>,
    target: usize,
    lambda: f64,
) -> Vec<String> {
    let mut remaining: Vec<&String> = candidates.iter().collect();
    let mut selected: Vec<String> = Vec::new();

    while selected.len() < target && !remaining.is_empty() {
        let mut best: Option<(usize, f64)> = None;
        for (i, candidate) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|s| path_similarity(candidate, s))
                .fold(0.0, f64::max);
            let score = weighted.get(*candidate).copied().unwrap_or(0.0);
            let mmr = lambda * score - (1.0 - lambda) * max_sim;
            if best.map(|(_, b)| mmr > b).unwrap_or(true) {
                best = Some((i, mmr));
            }
        }
        match best {
            Some((i, _)) => {
                selected.push(remaining.remove(i).clone());
            }
            None => break,
        }
    }
    selected
}

/// Path similarity for MMR diversity: same directory 0.8, same parent
/// 0.4, a test/test pair saturates at 1.0, and differing extensions
/// scale the result down hard.
pub fn path_similarity(a: &str, b: &str) -> f64 {
    let dir_a = parent_dir(a);
    let dir_b = parent_dir(b);

    let mut score: f64 = if dir_a == dir_b && !dir_a.is_empty() {
        0.8
    } else if !parent_dir(dir_a).is_empty() && parent_dir(dir_a) == parent_dir(dir_b) {
        0.4
    } else if dir_a.is_empty() && dir_b.is_empty() {
        0.8
    } else {
        0.0
    };

    let a_test = a.to_lowercase().contains("test");
    let b_test = b.to_lowercase().contains("test");
    if a_test && b_test {
        score = score.max(1.0);
    }

    if extension(a) != extension(b) {
        score *= 0.2;
    }
    score
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

fn extension(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or("")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheLayer};
    use crate::content::ExtractorConfig;
    use crate::github::{models::*, GitHubError, RepositoryHost, Result as GhResult};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TreeHost {
        files: HashMap<String, String>,
        fetches: AtomicUsize,
    }

    impl TreeHost {
        fn new(files: &[(&str, &str)]) -> Self {
            Self {
                files: files
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.to_string()))
                    .collect(),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RepositoryHost for TreeHost {
        async fn get_repository(&self, _repo: &RepoRef) -> GhResult<Repository> {
            unimplemented!()
        }
        async fn get_recursive_tree(
            &self,
            _repo: &RepoRef,
            _branch: &str,
        ) -> GhResult<Vec<TreeEntry>> {
            unimplemented!()
        }
        async fn list_directory(&self, _repo: &RepoRef, _path: &str) -> GhResult<Vec<TreeEntry>> {
            unimplemented!()
        }
        async fn get_file_content(&self, _repo: &RepoRef, path: &str) -> GhResult<FileBody> {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            match self.files.get(path) {
                Some(content) => Ok(FileBody {
                    bytes: content.as_bytes().to_vec(),
                    reported_size: content.len() as u64,
                }),
                None => Err(GitHubError::NotFound {
                    resource_type: "file".into(),
                    id: path.to_string(),
                }),
            }
        }
        async fn get_commit_history(
            &self,
            _repo: &RepoRef,
            _since: Option<DateTime<Utc>>,
            _limit: usize,
        ) -> GhResult<Vec<CommitRecord>> {
            Ok(Vec::new())
        }
        async fn get_languages(&self, _repo: &RepoRef) -> GhResult<HashMap<String, i64>> {
            Ok(HashMap::new())
        }
    }

    fn selector_for(files: &[(&str, &str)]) -> (FileSelector, Arc<TreeHost>) {
        let host = Arc::new(TreeHost::new(files));
        let cache = Arc::new(CacheLayer::new(CacheConfig::memory_only()).unwrap());
        let extractor = Arc::new(ContentExtractor::new(
            host.clone(),
            cache,
            ExtractorConfig::default(),
        ));
        (
            FileSelector::new(extractor, SelectorConfig::default()),
            host,
        )
    }

    fn tree_of(files: &[(&str, &str)]) -> Vec<TreeEntry> {
        files
            .iter()
            .map(|(p, c)| TreeEntry::file(*p, c.len().max(100) as u64))
            .collect()
    }

    fn repo() -> RepoRef {
        RepoRef::parse("octo/webapp").unwrap()
    }

    const PY_BODY: &str = "import os\n\ndef handler(request):\n    value = request.get('id')\n    if value:\n        return lookup(value)\n    return None\n";

    fn webapp_files() -> Vec<(&'static str, &'static str)> {
        vec![
            ("src/app/api/user.py", "from ..services import auth\n\ndef get_user(request):\n    if not auth.check(request):\n        raise PermissionError()\n    return fetch(request.id)\n"),
            ("src/app/services/auth.py", "import hashlib\n\ndef check(request):\n    token = request.headers.get('token')\n    if token is None:\n        return False\n    return verify(token)\n"),
            ("src/app/models/user.py", "class User:\n    def __init__(self, name):\n        self.name = name\n        self.active = True\n"),
            ("tests/test_user.py", "def test_user():\n    assert True\n"),
            ("package.json", "{\"name\": \"webapp\", \"dependencies\": {\"react\": \"18\"}}"),
            ("Dockerfile", "FROM python:3.11\nCOPY . /app\nRUN pip install -r requirements.txt\n"),
            ("README.md", "# webapp\nA demo service with enough length to pass size checks.\n"),
            ("assets/logo.png", "not really a png but binary-extension filtered"),
            ("legacy/big.py", PY_BODY),
        ]
    }

    #[tokio::test]
    async fn test_selection_happy_path() {
        let files = webapp_files();
        let (selector, host) = selector_for(&files);
        let tree = tree_of(&files);

        let outcome = selector
            .select(&repo(), &tree, &CancellationToken::new())
            .await
            .unwrap();

        let paths: Vec<&str> = outcome.selected.iter().map(|s| s.path.as_str()).collect();

        // Reserved slots hold the manifest and the Dockerfile.
        let reserved: Vec<&str> = outcome
            .selected
            .iter()
            .filter(|s| s.reason == SelectionReason::ReservedConfigSlot)
            .map(|s| s.path.as_str())
            .collect();
        assert!(reserved.contains(&"package.json"));
        assert!(reserved.contains(&"Dockerfile"));
        assert_eq!(reserved.len(), 2);

        // No test files survive, ever.
        assert!(paths.iter().all(|p| !p.contains("test")));

        // Core logic made it in.
        assert!(paths.contains(&"src/app/api/user.py") || paths.contains(&"src/app/services/auth.py"));

        assert!(outcome.selected.len() <= 12);

        // The binary asset was never requested from the host.
        assert!(host.files.contains_key("assets/logo.png"));
        let outcome_paths: HashSet<&str> = paths.into_iter().collect();
        assert!(!outcome_paths.contains("assets/logo.png"));
    }

    #[tokio::test]
    async fn test_candidate_boosting_and_test_penalty() {
        let files = webapp_files();
        let (selector, _) = selector_for(&files);
        let tree = tree_of(&files);
        let tree_files: Vec<&TreeEntry> = tree.iter().collect();

        let scores = selector.candidate_scores(&tree_files);

        // Boosted source beats the unboosted legacy module.
        assert!(scores["src/app/api/user.py"] > scores["legacy/big.py"]);
        // Test path crushed to the floor.
        assert_eq!(scores["tests/test_user.py"], 0.01);
        // Binary extension absent entirely.
        assert!(!scores.contains_key("assets/logo.png"));
    }

    #[tokio::test]
    async fn test_ghost_rescue_fetches_unfetched_central_file() {
        // Many fetched files import internal_lib/core.py, which itself is
        // buried (scores too low for the top-50 by being in an odd spot).
        let mut files = vec![(
            "internal_lib/core.py",
            "def core_logic():\n    return 42\n",
        )];
        let leaked: Vec<String> = (0..8)
            .map(|i| format!("src/app/api/mod_{}.py", i))
            .collect();
        let body: &'static str =
            "from internal_lib import core\n\ndef run():\n    if core.core_logic():\n        return True\n    return False\n";
        for path in &leaked {
            files.push((Box::leak(path.clone().into_boxed_str()), body));
        }

        let (selector, _) = selector_for(&files);
        // The ghost target is present in the tree but kept out of the
        // candidate pool by a tiny candidate budget.
        let mut config = SelectorConfig::default();
        config.candidate_count = 8;
        let selector = FileSelector {
            config,
            ..selector
        };

        let tree = tree_of(&files);
        let outcome = selector
            .select(&repo(), &tree, &CancellationToken::new())
            .await
            .unwrap();

        // Rescued: its content was fetched and it is eligible for MMR.
        assert!(outcome.contents.contains_key("internal_lib/core.py"));
        assert!(outcome.centrality["internal_lib/core.py"] > CENTRALITY_FLOOR);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_selection() {
        let files = webapp_files();
        let (selector, _) = selector_for(&files);
        let tree = tree_of(&files);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = selector.select(&repo(), &tree, &cancel).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[test]
    fn test_reweighting_rules() {
        let mut centrality = HashMap::new();
        centrality.insert("src/app/services/auth.py".to_string(), 0.1);
        centrality.insert("services/test_helper.py".to_string(), 0.1);
        centrality.insert("README.md".to_string(), 0.1);
        centrality.insert("config/app.yaml".to_string(), 0.1);
        centrality.insert("package.json".to_string(), 0.1);

        let reserved: HashSet<String> = ["package.json".to_string()].into();
        let weighted = reweight(&centrality, &reserved);

        assert!((weighted["src/app/services/auth.py"] - 0.3).abs() < 1e-9);
        assert_eq!(weighted["services/test_helper.py"], 0.0);
        assert!((weighted["README.md"] - 0.01).abs() < 1e-9);
        assert!((weighted["config/app.yaml"] - 0.02).abs() < 1e-9);
        assert_eq!(weighted["package.json"], -1.0);
    }

    #[test]
    fn test_mmr_deterministic_and_diverse() {
        let candidates: Vec<String> = vec![
            "api/a.py".into(),
            "api/b.py".into(),
            "services/c.py".into(),
            "models/d.py".into(),
        ];
        let mut weighted = HashMap::new();
        weighted.insert("api/a.py".to_string(), 0.9);
        weighted.insert("api/b.py".to_string(), 0.85);
        weighted.insert("services/c.py".to_string(), 0.5);
        weighted.insert("models/d.py".to_string(), 0.4);

        let first = mmr_select(&candidates, &weighted, 3, 0.6);
        let second = mmr_select(&candidates, &weighted, 3, 0.6);
        assert_eq!(first, second);

        // Top scorer goes first; diversity then favors a different
        // directory over the same-directory runner-up even though the
        // runner-up has a higher raw score.
        assert_eq!(first, vec!["api/a.py", "services/c.py", "models/d.py"]);
    }

    #[test]
    fn test_similarity_rules() {
        assert_eq!(path_similarity("api/a.py", "api/b.py"), 0.8);
        assert_eq!(path_similarity("app/api/a.py", "app/models/b.py"), 0.4);
        // Different extensions collapse similarity.
        assert!((path_similarity("api/a.py", "api/schema.json") - 0.16).abs() < 1e-9);
        // Two test files: total overlap regardless of location.
        assert_eq!(
            path_similarity("tests/test_a.py", "spec/test_b.py"),
            1.0
        );
    }

    #[test]
    fn test_is_test_path() {
        assert!(is_test_path("tests/helper.py"));
        assert!(is_test_path("app/conftest.py"));
        assert!(is_test_path("src/spec/runner.py"));
        assert!(is_test_path("foo/test_db.py"));
        assert!(!is_test_path("src/app/api/user.py"));
    }
}
