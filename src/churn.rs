//! Churn Analyzer Module
//!
//! Converts commit history into per-file change metrics: frequency,
//! recency, author diversity, bug-fix and refactor ratios, and a
//! stability score derived from the consistency of change sizes. The
//! composite churn score feeds the importance formula; hotspot and
//! stable-file classification surfaces in the analysis result.
//!
//! Churn is optional: with no history every file scores the default and
//! the pipeline proceeds unchanged.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::github::CommitRecord;

/// Score assigned to every file when commit history is unavailable.
pub const DEFAULT_CHURN_SCORE: f64 = 0.3;

/// Window for "recent" activity, in days.
const RECENT_WINDOW_DAYS: i64 = 90;

static BUG_FIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(fix(es|ed|ing)?|bugs?|hotfix|patch(es)?|issues?|errors?|exceptions?)\b").unwrap());

static REFACTOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(refactor(ing|ed)?|clean-?up|restructur(e|ing)|improv(e|ement|ements)|optimiz(e|ation|ing))\b")
        .unwrap()
});

// ============================================================================
// Per-File Metrics
// ============================================================================

/// Aggregated change metrics for one file.
#[derive(Debug, Clone, Default)]
pub struct FileChurn {
    pub commit_count: usize,
    /// Commits within the last 90 days.
    pub recent_commits: usize,
    pub author_count: usize,
    pub additions: f64,
    pub deletions: f64,
    pub last_modified: Option<DateTime<Utc>>,
    pub bug_fix_ratio: f64,
    pub refactor_ratio: f64,
    /// High for rarely and consistently changed files.
    pub stability_score: f64,
    /// Share of this file's commits that are recent.
    pub recent_activity: f64,
    /// Composite score in [0.05, 1.0].
    pub churn_score: f64,
}

impl FileChurn {
    pub fn total_changes(&self) -> f64 {
        self.additions + self.deletions
    }
}

/// Result of analyzing a repository's commit history.
#[derive(Debug, Clone, Default)]
pub struct ChurnAnalysis {
    pub per_file: HashMap<String, FileChurn>,
    /// Frequently and recently changed files, most changed first.
    pub hotspots: Vec<String>,
    pub stable_files: Vec<String>,
    pub total_commits: usize,
}

impl ChurnAnalysis {
    /// Churn score for a path, defaulting when the file has no history.
    pub fn score_for(&self, path: &str) -> f64 {
        self.per_file
            .get(path)
            .map(|m| m.churn_score)
            .unwrap_or(DEFAULT_CHURN_SCORE)
    }

    pub fn is_hotspot(&self, path: &str) -> bool {
        self.hotspots.iter().any(|p| p == path)
    }
}

// ============================================================================
// Churn Analyzer
// ============================================================================

#[derive(Default)]
pub struct ChurnAnalyzer;

impl ChurnAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, commits: &[CommitRecord]) -> ChurnAnalysis {
        self.analyze_at(commits, Utc::now())
    }

    /// Analyze against an explicit "now" so recency math is testable.
    pub fn analyze_at(&self, commits: &[CommitRecord], now: DateTime<Utc>) -> ChurnAnalysis {
        if commits.is_empty() {
            return ChurnAnalysis::default();
        }

        let recent_cutoff = now - Duration::days(RECENT_WINDOW_DAYS);

        struct Accum {
            commit_count: usize,
            recent: usize,
            authors: HashSet<String>,
            additions: f64,
            deletions: f64,
            last_modified: Option<DateTime<Utc>>,
            bug_fixes: usize,
            refactors: usize,
            change_sizes: Vec<f64>,
        }

        let mut acc: HashMap<String, Accum> = HashMap::new();

        for commit in commits {
            if commit.files.is_empty() {
                continue;
            }
            let is_fix = BUG_FIX_RE.is_match(&commit.message);
            let is_refactor = REFACTOR_RE.is_match(&commit.message);
            let is_recent = commit.timestamp.map(|t| t > recent_cutoff).unwrap_or(false);
            // A commit touching several files contributes its changes
            // split evenly between them.
            let share = 1.0 / commit.files.len() as f64;

            for file in &commit.files {
                let entry = acc.entry(file.path.clone()).or_insert_with(|| Accum {
                    commit_count: 0,
                    recent: 0,
                    authors: HashSet::new(),
                    additions: 0.0,
                    deletions: 0.0,
                    last_modified: None,
                    bug_fixes: 0,
                    refactors: 0,
                    change_sizes: Vec::new(),
                });
                entry.commit_count += 1;
                if is_recent {
                    entry.recent += 1;
                }
                entry.authors.insert(commit.author.clone());
                entry.additions += file.additions as f64 * share;
                entry.deletions += file.deletions as f64 * share;
                entry
                    .change_sizes
                    .push((file.additions + file.deletions) as f64);
                if is_fix {
                    entry.bug_fixes += 1;
                }
                if is_refactor {
                    entry.refactors += 1;
                }
                if let Some(ts) = commit.timestamp {
                    entry.last_modified = Some(match entry.last_modified {
                        Some(prev) if prev > ts => prev,
                        _ => ts,
                    });
                }
            }
        }

        let mut per_file: HashMap<String, FileChurn> = HashMap::new();
        for (path, a) in acc {
            let count = a.commit_count as f64;
            let recent_activity = a.recent as f64 / count;
            let bug_fix_ratio = a.bug_fixes as f64 / count;
            let refactor_ratio = a.refactors as f64 / count;
            let stability = stability_score(a.commit_count, recent_activity, &a.change_sizes);

            let churn_score = (0.30 * (count / 20.0).min(1.0)
                + 0.30 * recent_activity
                + 0.20 * bug_fix_ratio
                + 0.20 * (1.0 - stability))
                .clamp(0.05, 1.0);

            per_file.insert(
                path,
                FileChurn {
                    commit_count: a.commit_count,
                    recent_commits: a.recent,
                    author_count: a.authors.len(),
                    additions: a.additions,
                    deletions: a.deletions,
                    last_modified: a.last_modified,
                    bug_fix_ratio,
                    refactor_ratio,
                    stability_score: stability,
                    recent_activity,
                    churn_score,
                },
            );
        }

        let hotspots = identify_hotspots(&per_file);
        let stable_files = identify_stable(&per_file);

        ChurnAnalysis {
            per_file,
            hotspots,
            stable_files,
            total_commits: commits.len(),
        }
    }
}

/// Stability decreases with commit frequency and recent activity, and
/// increases when change sizes are consistent (low coefficient of
/// variation).
fn stability_score(commit_count: usize, recent_activity: f64, change_sizes: &[f64]) -> f64 {
    if commit_count == 0 {
        return 1.0;
    }
    let base = 1.0 / (1.0 + commit_count as f64 / 10.0);
    let activity_penalty = recent_activity * 0.3;

    let consistency_bonus = if change_sizes.len() > 1 {
        let mean = change_sizes.iter().sum::<f64>() / change_sizes.len() as f64;
        if mean > 0.0 {
            let variance = change_sizes
                .iter()
                .map(|s| (s - mean).powi(2))
                .sum::<f64>()
                / (change_sizes.len() - 1) as f64;
            let cv = variance.sqrt() / mean;
            (0.2 - cv * 0.1).max(0.0)
        } else {
            0.0
        }
    } else {
        0.0
    };

    (base - activity_penalty + consistency_bonus).clamp(0.0, 1.0)
}

/// A hotspot is in the top 20% by commit frequency with recent activity
/// above 0.5, or in the top 30% by aggregate changes.
fn identify_hotspots(per_file: &HashMap<String, FileChurn>) -> Vec<String> {
    if per_file.is_empty() {
        return Vec::new();
    }
    let freq_cut = percentile(per_file.values().map(|m| m.commit_count as f64), 0.8);
    let change_cut = percentile(per_file.values().map(|m| m.total_changes()), 0.7);

    let mut hotspots: Vec<(&String, &FileChurn)> = per_file
        .iter()
        .filter(|(_, m)| {
            (m.commit_count as f64 >= freq_cut && m.recent_activity > 0.5)
                || (m.total_changes() >= change_cut && m.total_changes() > 0.0)
        })
        .collect();
    hotspots.sort_by(|a, b| {
        b.1.total_changes()
            .partial_cmp(&a.1.total_changes())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hotspots.into_iter().map(|(p, _)| p.clone()).collect()
}

/// Stable files sit in the bottom 30% by frequency with little recent
/// activity and high stability.
fn identify_stable(per_file: &HashMap<String, FileChurn>) -> Vec<String> {
    if per_file.is_empty() {
        return Vec::new();
    }
    let freq_cut = percentile(per_file.values().map(|m| m.commit_count as f64), 0.3);
    per_file
        .iter()
        .filter(|(_, m)| {
            m.commit_count as f64 <= freq_cut
                && m.recent_activity <= 0.2
                && m.stability_score >= 0.7
        })
        .map(|(p, _)| p.clone())
        .collect()
}

fn percentile(values: impl Iterator<Item = f64>, q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

// ============================================================================
// Tests
// ============================================================================
