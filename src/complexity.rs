//! Complexity Analyzer Module
//!
//! Rule-based per-file complexity proxies: cyclomatic complexity from
//! decision-point counts, cognitive complexity weighted by nesting depth,
//! a Halstead-volume surrogate from operator/operand vocabulary, and the
//! maintainability index combining all three. No parsing or execution;
//! pattern matching only.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Metrics computed for unknown languages.
pub const DEFAULT_CYCLOMATIC: u32 = 1;
pub const DEFAULT_MAINTAINABILITY: f64 = 75.0;
pub const DEFAULT_COMPLEXITY_SCORE: f64 = 0.5;

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone)]
pub struct ComplexityMetrics {
    pub cyclomatic: u32,
    pub cognitive: u32,
    pub halstead_volume: f64,
    /// Microsoft maintainability index, clamped to [0, 100].
    pub maintainability_index: f64,
    pub lines_of_code: usize,
    /// Composite score in [0.05, 1.0]; 0.5 for unknown languages.
    pub score: f64,
}

impl Default for ComplexityMetrics {
    fn default() -> Self {
        Self {
            cyclomatic: DEFAULT_CYCLOMATIC,
            cognitive: 0,
            halstead_volume: 0.0,
            maintainability_index: DEFAULT_MAINTAINABILITY,
            lines_of_code: 0,
            score: DEFAULT_COMPLEXITY_SCORE,
        }
    }
}

// ============================================================================
// Language Decision Patterns
// ============================================================================

struct DecisionPatterns {
    languages: &'static [&'static str],
    keywords: Regex,
    /// Nesting by indentation instead of braces.
    indent_nesting: bool,
}

static DECISION_TABLES: Lazy<Vec<DecisionPatterns>> = Lazy::new(|| {
    vec![
        DecisionPatterns {
            languages: &["python"],
            keywords: Regex::new(
                r"\b(if|elif|for|while|try|except|and|or)\b|\bcase\b",
            )
            .unwrap(),
            indent_nesting: true,
        },
        DecisionPatterns {
            languages: &["javascript", "typescript", "java", "c", "cpp", "csharp", "go", "rust", "kotlin", "swift", "scala", "php", "ruby"],
            keywords: Regex::new(
                r"\b(if|else if|for|while|do|case|catch|match)\b|&&|\|\||\?[^.:]+:",
            )
            .unwrap(),
            indent_nesting: false,
        },
    ]
});

static OPERATOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\+|\-|\*|/|%|==|!=|<=|>=|<|>|=|&&|\|\||!|&|\||\^|<<|>>|\bnot\b|\band\b|\bor\b)")
        .unwrap()
});

static OPERAND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*\b|\b\d+(\.\d+)?\b").unwrap());

// ============================================================================
// Complexity Analyzer
// ============================================================================

#[derive(Default)]
pub struct ComplexityAnalyzer;

impl ComplexityAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Analyze file text. `language` comes from extension detection;
    /// unknown languages get the neutral defaults.
    pub fn analyze(&self, content: &str, language: Option<&str>) -> ComplexityMetrics {
        let Some(language) = language else {
            return ComplexityMetrics::default();
        };
        let Some(table) = DECISION_TABLES
            .iter()
            .find(|t| t.languages.contains(&language))
        else {
            return ComplexityMetrics::default();
        };
        if content.trim().is_empty() {
            return ComplexityMetrics::default();
        }

        let code_lines: Vec<&str> = content
            .lines()
            .filter(|l| {
                let t = l.trim();
                !t.is_empty() && !t.starts_with('#') && !t.starts_with("//")
            })
            .collect();
        let loc = code_lines.len().max(1);

        let cyclomatic = self.cyclomatic(&code_lines, table);
        let cognitive = self.cognitive(&code_lines, table);
        let halstead_volume = self.halstead_volume(content);
        let maintainability_index =
            maintainability(halstead_volume, cyclomatic, loc);

        let score = (0.6 * (cyclomatic as f64 / 20.0).min(1.0)
            + 0.4 * (maintainability_index / 100.0))
            .max(0.05);

        ComplexityMetrics {
            cyclomatic,
            cognitive,
            halstead_volume,
            maintainability_index,
            lines_of_code: loc,
            score,
        }
    }

    /// McCabe proxy: one plus the number of decision points.
    fn cyclomatic(&self, code_lines: &[&str], table: &DecisionPatterns) -> u32 {
        let decisions: usize = code_lines
            .iter()
            .map(|line| table.keywords.find_iter(line).count())
            .sum();
        1 + decisions as u32
    }

    /// Each decision point costs one plus its nesting level.
    fn cognitive(&self, code_lines: &[&str], table: &DecisionPatterns) -> u32 {
        let mut total = 0u32;
        let mut brace_depth: i32 = 0;

        for line in code_lines {
            let nesting = if table.indent_nesting {
                let indent = line.len() - line.trim_start().len();
                (indent / 4) as u32
            } else {
                brace_depth.max(0) as u32
            };

            let decisions = table.keywords.find_iter(line).count() as u32;
            total += decisions * (1 + nesting);

            if !table.indent_nesting {
                brace_depth += line.matches('{').count() as i32;
                brace_depth -= line.matches('}').count() as i32;
            }
        }
        total
    }

    /// Halstead volume surrogate: `N * log2(n)` over regex-extracted
    /// operator and operand vocabularies.
    fn halstead_volume(&self, content: &str) -> f64 {
        let mut unique_operators: HashSet<&str> = HashSet::new();
        let mut unique_operands: HashSet<&str> = HashSet::new();
        let mut total = 0usize;

        for m in OPERATOR_RE.find_iter(content) {
            unique_operators.insert(m.as_str());
            total += 1;
        }
        for m in OPERAND_RE.find_iter(content) {
            unique_operands.insert(m.as_str());
            total += 1;
        }

        let vocabulary = unique_operators.len() + unique_operands.len();
        if vocabulary == 0 || total == 0 {
            return 0.0;
        }
        total as f64 * (vocabulary as f64).log2()
    }
}

/// Microsoft maintainability index, clamped to [0, 100].
fn maintainability(halstead_volume: f64, cyclomatic: u32, loc: usize) -> f64 {
    let hv = halstead_volume.max(1.0);
    let mi = 171.0 - 5.2 * hv.ln() - 0.23 * cyclomatic as f64 - 16.2 * (loc as f64).ln();
    mi.clamp(0.0, 100.0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> ComplexityAnalyzer {
        ComplexityAnalyzer::new()
    }

    #[test]
    fn test_unknown_language_defaults() {
        let m = analyzer().analyze("whatever content", None);
        assert_eq!(m.cyclomatic, DEFAULT_CYCLOMATIC);
        assert_eq!(m.maintainability_index, DEFAULT_MAINTAINABILITY);
        assert_eq!(m.score, DEFAULT_COMPLEXITY_SCORE);

        let m = analyzer().analyze("contenido", Some("cobol"));
        assert_eq!(m.score, DEFAULT_COMPLEXITY_SCORE);
    }

    #[test]
    fn test_straight_line_code_is_simple() {
        let code = "x = 1\ny = 2\nz = x + y\n";
        let m = analyzer().analyze(code, Some("python"));
        assert_eq!(m.cyclomatic, 1);
        assert_eq!(m.cognitive, 0);
        assert!(m.maintainability_index > 50.0);
    }

    #[test]
    fn test_branching_increases_cyclomatic() {
        let simple = analyzer().analyze("x = 1\n", Some("python"));
        let branchy = analyzer().analyze(
            "if a:\n    pass\nelif b:\n    pass\nfor i in r:\n    while x:\n        pass\ntry:\n    pass\nexcept E:\n    pass\n",
            Some("python"),
        );
        assert!(branchy.cyclomatic > simple.cyclomatic);
        assert!(branchy.cyclomatic >= 7);
    }

    #[test]
    fn test_nesting_raises_cognitive_over_cyclomatic_ratio() {
        let flat = "if a:\n    pass\nif b:\n    pass\n";
        let nested = "if a:\n    if b:\n        if c:\n            pass\n";
        let m_flat = analyzer().analyze(flat, Some("python"));
        let m_nested = analyzer().analyze(nested, Some("python"));

        // Same number of branches, deeper nesting costs more cognitively.
        assert!(m_nested.cognitive > m_flat.cognitive);
    }

    #[test]
    fn test_c_family_operators_counted() {
        let code = "if (a && b || c) {\n    for (;;) {\n        x = y ? 1 : 2;\n    }\n}\n";
        let m = analyzer().analyze(code, Some("javascript"));
        assert!(m.cyclomatic >= 5);
        assert!(m.cognitive > 0);
    }

    #[test]
    fn test_maintainability_degrades_with_size() {
        let small = "def f():\n    return 1\n";
        let large: String = (0..400)
            .map(|i| format!("val_{} = other_{} + {} * factor\n", i, i, i))
            .collect();
        let m_small = analyzer().analyze(small, Some("python"));
        let m_large = analyzer().analyze(&large, Some("python"));
        assert!(m_small.maintainability_index > m_large.maintainability_index);
    }

    #[test]
    fn test_score_bounds() {
        let monster: String = (0..200)
            .map(|i| format!("if x{} and y{} or z{}:\n    pass\n", i, i, i))
            .collect();
        let m = analyzer().analyze(&monster, Some("python"));
        assert!(m.score >= 0.05 && m.score <= 1.0);

        let m = analyzer().analyze("", Some("python"));
        assert_eq!(m.score, DEFAULT_COMPLEXITY_SCORE);
    }
}
