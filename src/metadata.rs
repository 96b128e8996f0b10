//! Metadata Scorer Module
//!
//! Per-file structural score in `[0, 1]` computed from six weighted
//! components: structural path patterns, a content-density signal, the
//! location of the file in the tree, its extension, its size, and a
//! config-importance baseline. Also owns the exclusion rules that keep
//! dummy, test, vendored, and low-density files out of the candidate set.

use once_cell::sync::Lazy;
use regex::RegexSet;

// Component weights; they sum to 1.0.
const W_STRUCTURAL: f64 = 0.25;
const W_CONTENT: f64 = 0.25;
const W_LOCATION: f64 = 0.20;
const W_EXTENSION: f64 = 0.15;
const W_SIZE: f64 = 0.10;
const W_CONFIG: f64 = 0.05;

/// Neutral content signal used when file content is not available yet.
const CONTENT_SIGNAL_DEFAULT: f64 = 0.5;

// ============================================================================
// Pattern Tables
// ============================================================================

struct PatternCategory {
    weight: f64,
    set: RegexSet,
}

fn category(weight: f64, patterns: &[&str]) -> PatternCategory {
    PatternCategory {
        weight,
        set: RegexSet::new(patterns.iter().map(|p| format!("(?i){}", p))).unwrap(),
    }
}

static STRUCTURAL_CATEGORIES: Lazy<Vec<PatternCategory>> = Lazy::new(|| {
    vec![
        // Critical build/package configuration.
        category(
            0.98,
            &[
                r"^package\.json$",
                r"^tsconfig\.json$",
                r"^webpack\.config\.(js|ts)$",
                r"^vite\.config\.(js|ts)$",
                r"^config\.(js|ts|json|yml|yaml)$",
                r"^settings\.(json|yml|yaml|py)$",
                r"^Dockerfile$",
                r"^docker-compose\.(yml|yaml)$",
                r"^pyproject\.toml$",
                r"^requirements(-[^/]+)?\.txt$",
                r"^setup\.(py|cfg)$",
                r"^Cargo\.toml$",
                r"^go\.mod$",
                r"^pom\.xml$",
                r"^build\.gradle$",
            ],
        ),
        // Entry points.
        category(
            0.9,
            &[
                r"^(src/)?main\.(ts|js|py|java|go|rs)$",
                r"^(src/)?index\.(ts|js|html)$",
                r"^(src/)?app\.(ts|js|py|java)$",
                r"^(src/)?App\.(tsx|vue|svelte)$",
                r"^__init__\.py$",
            ],
        ),
        // Web-framework hotspots.
        category(
            0.85,
            &[
                r"settings\.py$",
                r"urls\.py$",
                r"models\.py$",
                r"views\.py$",
                r"admin\.py$",
                r"forms\.py$",
                r"serializers\.py$",
                r"^manage\.py$",
                r"wsgi\.py$",
                r"asgi\.py$",
                r"/(models|views|controllers|serializers)/.*\.py$",
            ],
        ),
        // Core modules.
        category(
            0.8,
            &[
                r"(^|/)(core|base|foundation|kernel)/",
                r"(^|/)(config|configuration)/",
                r"(^|/)(api|router|routes)/",
                r"(^|/)(models?|entities)/",
                r"(^|/)(services?|providers?)/",
                r"(^|/)(store|state|redux)/",
                r"(^|/)(types?|interfaces?)/",
            ],
        ),
        // Utilities.
        category(
            0.7,
            &[
                r"(^|/)(utils?|helpers?|tools?)/",
                r"(^|/)(lib|libraries)/",
                r"(^|/)(shared|common)/",
                r"(^|/)constants?/",
            ],
        ),
        // Build and deploy.
        category(
            0.6,
            &[
                r"^Makefile$",
                r"\.github/workflows/",
                r"\.gitlab-ci\.yml$",
                r"(^|/)scripts?/",
                r"(^|/)deploy/",
            ],
        ),
        // Components, views, pages.
        category(
            0.5,
            &[
                r"(^|/)(components?|widgets?)/",
                r"(^|/)(views?|pages?)/",
                r"(^|/)(screens?|layouts?)/",
            ],
        ),
        // Documentation.
        category(
            0.3,
            &[
                r"^README\.(md|txt|rst)$",
                r"^CHANGELOG\.(md|txt)$",
                r"^LICENSE(\.|$)",
                r"(^|/)(docs?|documentation)/",
                r"\.(md|txt|rst)$",
            ],
        ),
        // Tests.
        category(
            0.2,
            &[
                r"(^|/)(test|tests|__tests__|spec)/",
                r"\.(test|spec)\.(js|ts|py|java)$",
                r"(^|/)test_[^/]*\.py$",
                r"_test\.(go|rs)$",
            ],
        ),
    ]
});

static EXCLUSION_SET: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(
        [
            // Tests.
            r"(^|/)(test|tests|__tests__|spec)/",
            r"\.(test|spec)\.(js|ts|py|java)$",
            r"(^|/)test_[^/]*\.py$",
            r"_test\.(go|rs|py|js|ts)$",
            r"Test\.(java|kt|cs)$",
            // Dummy and sample data.
            r"(^|/)(dummy|sample|mock|fake|stub)/",
            r"(^|/)(example|examples|demo|demos)/",
            r"(^|/)(seed|seeds|fixtures?|factory)/",
            r"(^|/)(placeholder|template)s?/",
            r"\.(sample|example|dummy|mock|template)\.",
            // Vendored dependencies.
            r"(^|/)node_modules/",
            r"(^|/)vendor/",
            r"(^|/)deps/",
            r"(^|/)third_party/",
            // Migrations, seeds, schema dumps.
            r"migration[^/]*\.(sql|js|ts|py)$",
            r"seed[^/]*\.(sql|js|ts|py)$",
            // Logs, temp, backup files.
            r"\.log$",
            r"\.tmp$",
            r"\.bak$",
            r"\.backup$",
            r"~$",
            r"\.(orig|rej)$",
            // IDE directories and hidden dot-files anywhere.
            r"(^|/)\.(vscode|idea|eclipse|settings)/",
            r"(^|/)\.[^/]+$",
            // Caches.
            r"(^|/)cache/",
            r"\.cache",
        ]
        .iter()
        .map(|p| format!("(?i){}", p)),
    )
    .unwrap()
});

static SPECIAL_CONTENT_SET: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"@\w+",                                       // decorators / annotations
        r#"@(app|router)\.(get|post|put|delete|patch)"#, // route definitions
        r"\bclass\s+\w+",
        r"\binterface\s+\w+",
        r"\btype\s+\w+\s*=",
        r"\basync\s+(def|fn|function)\b",
    ])
    .unwrap()
});

// ============================================================================
// Metadata Scorer
// ============================================================================

#[derive(Default)]
pub struct MetadataScorer;

impl MetadataScorer {
    pub fn new() -> Self {
        Self
    }

    /// Six-component metadata score in `[0, 1]`. Excluded files score 0.
    pub fn score(&self, path: &str, size: u64, content: Option<&str>) -> f64 {
        if self.is_excluded(path, Some(size), content) {
            return 0.0;
        }

        let structural = self.structural_importance(path);
        let content_signal = content
            .map(|c| self.content_signal(c))
            .unwrap_or(CONTENT_SIGNAL_DEFAULT);
        let location = self.location_score(path);
        let extension = self.extension_weight(path);
        let size_score = Self::size_score(size);
        let config = self.config_importance(path);

        let total = W_STRUCTURAL * structural
            + W_CONTENT * content_signal
            + W_LOCATION * location
            + W_EXTENSION * extension
            + W_SIZE * size_score
            + W_CONFIG * config;
        total.clamp(0.0, 1.0)
    }

    /// Highest matching structural category weight; 0 when nothing matches.
    pub fn structural_importance(&self, path: &str) -> f64 {
        let normalized = path.replace('\\', "/");
        STRUCTURAL_CATEGORIES
            .iter()
            .filter(|c| c.set.is_match(&normalized))
            .map(|c| c.weight)
            .fold(0.0, f64::max)
    }

    /// Path bonus/penalty multiplier applied to the final importance
    /// score. Penalties win over bonuses; main-file basenames get 1.4.
    pub fn path_multiplier(&self, path: &str) -> f64 {
        let lower = path.to_lowercase();

        const PENALTIES: &[(&str, f64)] = &[
            ("test/", 0.3),
            ("tests/", 0.3),
            ("__tests__/", 0.3),
            ("spec/", 0.3),
            ("docs/", 0.4),
            ("doc/", 0.4),
            ("build/", 0.2),
            ("dist/", 0.2),
            ("node_modules/", 0.1),
            (".git/", 0.1),
            ("vendor/", 0.2),
        ];
        for (needle, factor) in PENALTIES {
            if lower.contains(needle) {
                return *factor;
            }
        }

        const BONUSES: &[(&str, f64)] = &[
            ("main/", 1.3),
            ("core/", 1.25),
            ("models/", 1.25),
            ("views/", 1.25),
            ("api/", 1.2),
            ("serializers/", 1.2),
            ("src/", 1.2),
            ("lib/", 1.2),
            ("app/", 1.15),
            ("components/", 1.15),
            ("utils/", 1.1),
        ];
        for (needle, factor) in BONUSES {
            if lower.contains(needle) {
                return *factor;
            }
        }

        let basename = lower.rsplit('/').next().unwrap_or(&lower);
        for main in ["main.", "index.", "app.", "__init__.py", "package.json"] {
            if basename.contains(main) {
                return 1.4;
            }
        }
        1.0
    }

    /// Exclusion rules: dummy/test/vendored paths, hidden files, tiny
    /// files, and low-code-density content.
    pub fn is_excluded(&self, path: &str, size: Option<u64>, content: Option<&str>) -> bool {
        if path.trim().is_empty() {
            return true;
        }
        if let Some(size) = size {
            if size < 50 {
                return true;
            }
        }
        if let Some(content) = content {
            if self.is_low_code_density(content) {
                return true;
            }
        }
        EXCLUSION_SET.is_match(&path.replace('\\', "/"))
    }

    /// A file is low-density when comments exceed 80%, blanks exceed 50%,
    /// imports exceed 90%, or actual code falls under 10% of lines.
    pub fn is_low_code_density(&self, content: &str) -> bool {
        if content.trim().is_empty() {
            return true;
        }
        let mut total = 0usize;
        let mut comments = 0usize;
        let mut blanks = 0usize;
        let mut imports = 0usize;

        for line in content.lines() {
            total += 1;
            let stripped = line.trim();
            if stripped.is_empty() {
                blanks += 1;
                continue;
            }
            if stripped.starts_with("//")
                || stripped.starts_with('#')
                || stripped.starts_with("/*")
                || stripped.starts_with('*')
                || stripped.starts_with("<!--")
                || stripped.starts_with("--")
                || stripped.starts_with("'''")
                || stripped.starts_with("\"\"\"")
            {
                comments += 1;
                continue;
            }
            if stripped.starts_with("import ")
                || stripped.starts_with("from ")
                || stripped.starts_with("#include")
                || stripped.starts_with("require(")
                || (stripped.starts_with("const ") && stripped.contains("require("))
                || stripped.starts_with("using ")
                || stripped.starts_with("package ")
            {
                imports += 1;
            }
        }

        if total == 0 {
            return true;
        }
        let total_f = total as f64;
        if comments as f64 / total_f > 0.8 {
            return true;
        }
        if blanks as f64 / total_f > 0.5 {
            return true;
        }
        if imports as f64 / total_f > 0.9 {
            return true;
        }
        let code = total - comments - blanks - imports;
        (code as f64 / total_f) < 0.1
    }

    /// Content-based signal: code density, declaration/route/decorator
    /// patterns, keyword density, and a balanced documentation ratio.
    pub fn content_signal(&self, content: &str) -> f64 {
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return 0.0;
        }
        let total = lines.len() as f64;
        let non_blank = lines.iter().filter(|l| !l.trim().is_empty()).count() as f64;
        let code_density = non_blank / total;

        let comment_lines = lines
            .iter()
            .filter(|l| {
                let s = l.trim();
                s.starts_with("//") || s.starts_with('#') || s.starts_with('*') || s.starts_with("/*")
            })
            .count() as f64;
        let doc_ratio = comment_lines / total;
        let doc_balance = if (0.05..=0.4).contains(&doc_ratio) {
            1.0
        } else {
            0.5
        };

        let special_matches = SPECIAL_CONTENT_SET.matches(content).iter().count() as f64;
        let special = (special_matches * 0.25).min(1.0);

        const KEYWORDS: &[&str] = &[
            "return", "if ", "for ", "while ", "match ", "switch", "try", "await",
        ];
        let keyword_hits: usize = KEYWORDS
            .iter()
            .map(|k| content.matches(k).count())
            .sum();
        let keyword_density = ((keyword_hits as f64 / total) * 4.0).min(1.0);

        (0.4 * code_density + 0.3 * special + 0.2 * keyword_density + 0.1 * doc_balance)
            .clamp(0.0, 1.0)
    }

    /// Location score by first path component, with a depth penalty of
    /// 0.1 per directory beyond three levels.
    pub fn location_score(&self, path: &str) -> f64 {
        let depth = path.matches('/').count();
        let base = if depth == 0 {
            0.95
        } else {
            let first = path.split('/').next().unwrap_or("");
            match first {
                "src" | "app" | "lib" | "core" | "backend" => 0.85,
                "utils" | "helpers" | "common" => 0.7,
                "tests" | "test" | "docs" | "examples" | "build" | "vendor" | "dist" => 0.2,
                _ => 0.5,
            }
        };
        let penalty = 0.1 * depth.saturating_sub(3) as f64;
        (base - penalty).max(0.0)
    }

    /// Baseline importance by extension: source above config above markup
    /// above docs.
    pub fn extension_weight(&self, path: &str) -> f64 {
        let basename = path.rsplit('/').next().unwrap_or(path).to_lowercase();
        if basename == "dockerfile" || basename == "makefile" {
            return 0.7;
        }
        let Some(ext) = basename.rsplit('.').next() else {
            return 0.4;
        };
        match ext {
            "py" | "ts" | "tsx" | "rs" | "go" | "java" | "kt" | "swift" => 0.9,
            "js" | "jsx" | "rb" | "php" | "cs" | "cpp" | "c" | "scala" => 0.85,
            "sql" | "sh" => 0.6,
            "json" | "yml" | "yaml" | "toml" | "ini" | "cfg" => 0.55,
            "html" | "css" | "scss" | "vue" | "svelte" => 0.5,
            "md" | "rst" | "txt" => 0.3,
            _ => 0.4,
        }
    }

    /// Log-scaled size score saturating at roughly 50 KB.
    pub fn size_score(size: u64) -> f64 {
        ((size as f64 + 1.0).ln() / 50_000f64.ln()).min(1.0)
    }

    /// Config baseline: critical manifests 1.0, tooling configs 0.8,
    /// generic config-ish names 0.6.
    pub fn config_importance(&self, path: &str) -> f64 {
        let basename = path.rsplit('/').next().unwrap_or(path).to_lowercase();
        const CRITICAL: &[&str] = &[
            "package.json",
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
            "tsconfig.json",
        ];
        if CRITICAL.contains(&basename.as_str()) {
            return 1.0;
        }
        const IMPORTANT: &[&str] = &[
            ".eslintrc",
            ".prettierrc",
            ".flake8",
            ".pylintrc",
            "rustfmt.toml",
            ".editorconfig",
            "tox.ini",
            "pytest.ini",
        ];
        if IMPORTANT.iter().any(|c| basename.starts_with(c)) {
            return 0.8;
        }
        if basename.contains("config") || basename.contains("settings") {
            return 0.6;
        }
        0.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> MetadataScorer {
        MetadataScorer::new()
    }

    #[test]
    fn test_structural_importance_categories() {
        let s = scorer();
        assert_eq!(s.structural_importance("package.json"), 0.98);
        assert_eq!(s.structural_importance("src/main.py"), 0.9);
        assert_eq!(s.structural_importance("app/serializers.py"), 0.85);
        assert_eq!(s.structural_importance("src/services/auth.py"), 0.8);
        assert_eq!(s.structural_importance("tests/test_auth.py"), 0.2);
        assert_eq!(s.structural_importance("random/file.xyz"), 0.0);
    }

    #[test]
    fn test_structural_takes_highest_category() {
        // Matches both core modules (0.8) and framework hotspots (0.85).
        let s = scorer();
        assert_eq!(s.structural_importance("app/models/user_models.py"), 0.85);
    }

    #[test]
    fn test_exclusions() {
        let s = scorer();
        assert!(s.is_excluded("tests/test_user.py", Some(1000), None));
        assert!(s.is_excluded("node_modules/lodash/index.js", Some(1000), None));
        assert!(s.is_excluded(".gitignore", Some(1000), None));
        assert!(s.is_excluded("src/.hidden", Some(1000), None));
        assert!(s.is_excluded("data/sample.mock.json", Some(1000), None));
        assert!(s.is_excluded("tiny.py", Some(20), None));

        assert!(!s.is_excluded("src/app/api/user.py", Some(1000), None));
        assert!(!s.is_excluded("package.json", Some(500), None));
    }

    #[test]
    fn test_low_code_density() {
        let s = scorer();

        let mostly_comments = "# a\n# b\n# c\n# d\nx = 1\n";
        assert!(s.is_low_code_density(mostly_comments));

        let import_only = "import a\nimport b\nimport c\nimport d\nimport e\nimport f\nimport g\nimport h\nimport i\nimport j\n";
        assert!(s.is_low_code_density(import_only));

        let real_code = "def f(x):\n    y = x + 1\n    return y\n\nclass A:\n    pass\n";
        assert!(!s.is_low_code_density(real_code));

        assert!(s.is_low_code_density(""));
    }

    #[test]
    fn test_location_score_and_depth_penalty() {
        let s = scorer();
        assert_eq!(s.location_score("README.md"), 0.95);
        assert_eq!(s.location_score("src/app/user.py"), 0.85);
        assert_eq!(s.location_score("tests/unit/test_a.py"), 0.2);

        // Depth 5 incurs a 0.2 penalty over the base.
        let deep = s.location_score("src/a/b/c/d/file.py");
        assert!((deep - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_size_score_monotonic() {
        assert!(MetadataScorer::size_score(100) < MetadataScorer::size_score(10_000));
        assert_eq!(MetadataScorer::size_score(1_000_000), 1.0);
    }

    #[test]
    fn test_config_importance() {
        let s = scorer();
        assert_eq!(s.config_importance("package.json"), 1.0);
        assert_eq!(s.config_importance("backend/Dockerfile"), 1.0);
        assert_eq!(s.config_importance("pytest.ini"), 0.8);
        assert_eq!(s.config_importance("app/config_loader.py"), 0.6);
        assert_eq!(s.config_importance("src/engine.py"), 0.0);
    }

    #[test]
    fn test_score_in_range_and_ranks_sensibly() {
        let s = scorer();
        let manifest = s.score("package.json", 800, None);
        let service = s.score("src/services/auth.py", 4_000, None);
        let doc = s.score("docs/guide.md", 4_000, None);

        for v in [manifest, service, doc] {
            assert!((0.0..=1.0).contains(&v));
        }
        assert!(manifest > doc);
        assert!(service > doc);

        // Excluded paths collapse to zero.
        assert_eq!(s.score("tests/test_auth.py", 4_000, None), 0.0);
    }

    #[test]
    fn test_path_multiplier() {
        let s = scorer();
        assert_eq!(s.path_multiplier("tests/helper.py"), 0.3);
        assert_eq!(s.path_multiplier("src/engine.py"), 1.2);
        assert_eq!(s.path_multiplier("core/kernel.py"), 1.25);
        // Penalty wins over bonus.
        assert_eq!(s.path_multiplier("src/tests/x.py"), 0.3);
        assert_eq!(s.path_multiplier("main.py"), 1.4);
        assert_eq!(s.path_multiplier("random.py"), 1.0);
    }

    #[test]
    fn test_content_signal_prefers_structured_code() {
        let s = scorer();
        let structured = "@app.get('/users')\nasync def list_users():\n    return db.query()\n\nclass UserService:\n    def get(self, id):\n        return self.repo.find(id)\n";
        let flat = "\n\n\nx\n\n\n";
        assert!(s.content_signal(structured) > s.content_signal(flat));
    }
}
