//! Dependency Analyzer Module
//!
//! Extracts import targets from source text, resolves them to repository
//! paths where possible, and builds the directed dependency graph used for
//! centrality ranking. Targets that fail resolution become *ghost nodes*
//! labeled `implicit:<target>`; resolved targets whose bodies were never
//! fetched are ghosts under their real path, which makes them eligible for
//! lazy loading later.
//!
//! Centrality is PageRank with damping 0.85 over the whole graph, ghosts
//! included, with a 0.05 floor for paths the ranking does not cover.

use once_cell::sync::Lazy;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::types::detect_language;

/// Damping factor for the PageRank random walk.
pub const PAGERANK_DAMPING: f64 = 0.85;

/// Iteration cap for PageRank convergence.
pub const PAGERANK_MAX_ITER: usize = 100;

/// Score assigned to paths outside the ranked graph.
pub const CENTRALITY_FLOOR: f64 = 0.05;

/// Prefix for unresolved import targets.
pub const GHOST_PREFIX: &str = "implicit:";

// ============================================================================
// Import Extraction
// ============================================================================

struct LanguagePatterns {
    language: &'static str,
    patterns: Vec<Regex>,
}

static IMPORT_PATTERNS: Lazy<Vec<LanguagePatterns>> = Lazy::new(|| {
    let build = |patterns: &[&str]| -> Vec<Regex> {
        patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
    };
    vec![
        LanguagePatterns {
            language: "python",
            patterns: build(&[
                r"^\s*import\s+([A-Za-z_][\w.]*)",
                r"^\s*from\s+(\.*[A-Za-z_][\w.]*|\.+)\s+import",
            ]),
        },
        LanguagePatterns {
            language: "javascript",
            patterns: build(&[
                r#"^\s*import\s+.*?\s+from\s+['"]([^'"]+)['"]"#,
                r#"^\s*import\s+['"]([^'"]+)['"]"#,
                r#"require\(\s*['"]([^'"]+)['"]\s*\)"#,
                r#"import\(\s*['"]([^'"]+)['"]\s*\)"#,
            ]),
        },
        LanguagePatterns {
            language: "typescript",
            patterns: build(&[
                r#"^\s*import\s+type\s+.*?\s+from\s+['"]([^'"]+)['"]"#,
                r#"^\s*import\s+.*?\s+from\s+['"]([^'"]+)['"]"#,
                r#"^\s*import\s+['"]([^'"]+)['"]"#,
                r#"require\(\s*['"]([^'"]+)['"]\s*\)"#,
            ]),
        },
        LanguagePatterns {
            language: "java",
            patterns: build(&[r"^\s*import\s+(?:static\s+)?([A-Za-z_][\w.]*)\s*;"]),
        },
        LanguagePatterns {
            language: "go",
            patterns: build(&[r#"^\s*import\s+(?:\w+\s+)?"([^"]+)""#]),
        },
        LanguagePatterns {
            language: "rust",
            patterns: build(&[
                r"^\s*(?:pub\s+)?use\s+([A-Za-z_][\w:]*)",
                r"^\s*extern\s+crate\s+([A-Za-z_]\w*)",
            ]),
        },
    ]
});

/// Dependency analyzer: import extraction, resolution, graph construction,
/// and PageRank centrality.
#[derive(Default)]
pub struct DependencyAnalyzer;

impl DependencyAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Extract raw import targets from file content. Relative targets keep
    /// their leading dots; absolute targets keep their full dotted path.
    pub fn extract_imports(&self, content: &str, language: &str) -> HashSet<String> {
        let mut imports = HashSet::new();
        let Some(lang) = IMPORT_PATTERNS.iter().find(|p| p.language == language) else {
            return imports;
        };

        let mut in_go_import_block = false;
        let mut in_python_doc = false;

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') && language != "python" {
                continue;
            }

            // Skip import-looking lines inside Python docstrings; this is
            // the refinement pass over the plain line scan.
            if language == "python" {
                let quotes = trimmed.matches("\"\"\"").count() + trimmed.matches("'''").count();
                if quotes % 2 == 1 {
                    in_python_doc = !in_python_doc;
                    continue;
                }
                if in_python_doc || trimmed.starts_with('#') {
                    continue;
                }
            }

            // Go import blocks: `import (` ... `)` with one quoted path per line.
            if language == "go" {
                if trimmed.starts_with("import (") {
                    in_go_import_block = true;
                    continue;
                }
                if in_go_import_block {
                    if trimmed.starts_with(')') {
                        in_go_import_block = false;
                        continue;
                    }
                    if let Some(target) = trimmed.split('"').nth(1) {
                        imports.insert(target.to_string());
                    }
                    continue;
                }
            }

            if trimmed.starts_with("//") {
                continue;
            }

            for pattern in &lang.patterns {
                if let Some(caps) = pattern.captures(line) {
                    if let Some(m) = caps.get(1) {
                        let target = m.as_str().trim();
                        if !target.is_empty() {
                            imports.insert(target.to_string());
                        }
                    }
                }
            }
        }

        imports
    }

    /// Resolve one import target to a known repository path.
    ///
    /// Relative targets resolve against the importer's directory by prefix
    /// match; absolute targets match their first component against file
    /// stems and directory names.
    pub fn resolve(
        &self,
        importer: &str,
        target: &str,
        index: &PathIndex,
    ) -> Option<String> {
        let importer_dir = parent_dir(importer);

        if let Some(stripped) = target.strip_prefix("./").or_else(|| target.strip_prefix("../")) {
            // JS-style relative path.
            let ups = target.matches("../").count();
            let mut base: Vec<&str> = importer_dir.split('/').filter(|s| !s.is_empty()).collect();
            for _ in 0..ups {
                base.pop();
            }
            let rest = stripped.trim_start_matches("../");
            let candidate = if base.is_empty() {
                rest.to_string()
            } else {
                format!("{}/{}", base.join("/"), rest)
            };
            return index.match_relative(&candidate);
        }

        if target.starts_with('.') {
            // Python-style relative module: one dot is the current package,
            // each further dot climbs one level.
            let dots = target.chars().take_while(|&c| c == '.').count();
            let module = &target[dots..];
            let mut base: Vec<&str> = importer_dir.split('/').filter(|s| !s.is_empty()).collect();
            for _ in 1..dots {
                base.pop();
            }
            let mut candidate = base.join("/");
            if !module.is_empty() {
                let module_path = module.replace('.', "/");
                if candidate.is_empty() {
                    candidate = module_path;
                } else {
                    candidate = format!("{}/{}", candidate, module_path);
                }
            }
            return index.match_relative(&candidate);
        }

        let first = target
            .split(['.', '/'])
            .next()
            .map(|s| s.split("::").next().unwrap_or(s))
            .unwrap_or(target);
        index.match_component(first, target)
    }

    /// Build the dependency graph from fetched file contents. `all_paths`
    /// is the full tree, used to resolve targets onto files that were not
    /// fetched (real-path ghosts).
    pub fn build_graph(
        &self,
        file_contents: &HashMap<String, String>,
        all_paths: &[String],
    ) -> DependencyGraph {
        let index = PathIndex::new(all_paths);
        let mut graph = DependencyGraph::new();

        for path in file_contents.keys() {
            graph.ensure_node(path);
            graph.fetched.insert(path.clone());
        }

        for (path, content) in file_contents {
            let Some(language) = detect_language(path) else {
                continue;
            };
            let imports = self.extract_imports(content, language);
            for target in imports {
                let resolved = self.resolve(path, &target, &index);
                let node = match resolved {
                    Some(resolved) if resolved != *path => resolved,
                    Some(_) => continue,
                    None => format!("{}{}", GHOST_PREFIX, target),
                };
                graph.add_edge(path, &node);
            }
        }

        debug!(
            "Dependency graph built: {} nodes, {} edges, {} ghosts",
            graph.node_count(),
            graph.edge_count(),
            graph.ghost_nodes().len()
        );
        graph
    }
}

/// Lookup tables over the repository tree used during resolution.
pub struct PathIndex {
    paths: Vec<String>,
    by_stem: HashMap<String, Vec<usize>>,
    dir_names: HashSet<String>,
}

impl PathIndex {
    pub fn new(all_paths: &[String]) -> Self {
        let paths: Vec<String> = all_paths.to_vec();
        let mut by_stem: HashMap<String, Vec<usize>> = HashMap::new();
        let mut dir_names = HashSet::new();

        for (i, path) in paths.iter().enumerate() {
            let basename = path.rsplit('/').next().unwrap_or(path);
            let stem = basename.rsplit_once('.').map(|(s, _)| s).unwrap_or(basename);
            by_stem.entry(stem.to_string()).or_default().push(i);

            let mut parts: Vec<&str> = path.split('/').collect();
            parts.pop();
            for part in parts {
                dir_names.insert(part.to_string());
            }
        }

        Self {
            paths,
            by_stem,
            dir_names,
        }
    }

    /// Match a resolved relative candidate by prefix against known paths.
    fn match_relative(&self, candidate: &str) -> Option<String> {
        let candidate = candidate.trim_matches('/');
        if candidate.is_empty() {
            return None;
        }
        // Exact file, module file, then package init.
        for probe in [
            candidate.to_string(),
            format!("{}.py", candidate),
            format!("{}.js", candidate),
            format!("{}.ts", candidate),
            format!("{}.tsx", candidate),
            format!("{}.jsx", candidate),
            format!("{}/index.js", candidate),
            format!("{}/index.ts", candidate),
            format!("{}/__init__.py", candidate),
        ] {
            if self.paths.iter().any(|p| p == &probe) {
                return Some(probe);
            }
        }
        self.paths
            .iter()
            .find(|p| p.starts_with(&format!("{}/", candidate)) || p.starts_with(candidate))
            .cloned()
    }

    /// Match an absolute target's first component against file stems and
    /// directory names. A dotted remainder narrows the choice when several
    /// files share the stem.
    fn match_component(&self, first: &str, full_target: &str) -> Option<String> {
        if let Some(indices) = self.by_stem.get(first) {
            let mut candidates: Vec<&String> = indices.iter().map(|&i| &self.paths[i]).collect();
            candidates.sort_by_key(|p| p.len());
            return candidates.first().map(|p| (*p).to_string());
        }

        if self.dir_names.contains(first) {
            // `pkg.module` -> pkg/module.<ext> when it exists.
            let dotted = full_target.replace('.', "/").replace("::", "/");
            for probe in [
                format!("{}.py", dotted),
                format!("{}.rs", dotted),
                format!("{}/__init__.py", dotted),
                format!("{}.ts", dotted),
                format!("{}.js", dotted),
            ] {
                if let Some(found) = self
                    .paths
                    .iter()
                    .find(|p| *p == &probe || p.ends_with(&format!("/{}", probe)))
                {
                    return Some(found.clone());
                }
            }

            // Bare package import: fall back to a file under the
            // directory, preferring its __init__, then the shortest path.
            let prefix = format!("{}/", first);
            let infix = format!("/{}/", first);
            let mut under: Vec<&String> = self
                .paths
                .iter()
                .filter(|p| p.starts_with(&prefix) || p.contains(&infix))
                .collect();
            if let Some(init) = under
                .iter()
                .find(|p| p.ends_with("/__init__.py"))
            {
                return Some((*init).to_string());
            }
            under.sort_by_key(|p| (p.len(), p.as_str().to_string()));
            return under.first().map(|p| (*p).to_string());
        }
        None
    }
}

// ============================================================================
// Dependency Graph
// ============================================================================

/// Directed graph over file paths. Nodes are identified by path string;
/// ghost nodes carry either a real tree path (resolved but unfetched) or
/// the `implicit:` label (unresolved).
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
    fetched: HashSet<String>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            indices: HashMap::new(),
            fetched: HashSet::new(),
        }
    }

    fn ensure_node(&mut self, path: &str) -> NodeIndex {
        if let Some(&idx) = self.indices.get(path) {
            return idx;
        }
        let idx = self.graph.add_node(path.to_string());
        self.indices.insert(path.to_string(), idx);
        idx
    }

    /// Add an edge `importer -> target`, collapsing duplicates.
    pub fn add_edge(&mut self, importer: &str, target: &str) {
        let from = self.ensure_node(importer);
        let to = self.ensure_node(target);
        if !self.graph.contains_edge(from, to) {
            self.graph.add_edge(from, to, ());
        }
    }

    /// Record lazily loaded content for a former ghost and add its
    /// out-edges. This is the single permitted mutation after construction.
    pub fn absorb_ghost(
        &mut self,
        analyzer: &DependencyAnalyzer,
        path: &str,
        content: &str,
        index: &PathIndex,
    ) {
        self.ensure_node(path);
        self.fetched.insert(path.to_string());
        if let Some(language) = detect_language(path) {
            for target in analyzer.extract_imports(content, language) {
                let node = match analyzer.resolve(path, &target, index) {
                    Some(resolved) if resolved != path => resolved,
                    Some(_) => continue,
                    None => format!("{}{}", GHOST_PREFIX, target),
                };
                self.add_edge(path, &node);
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.indices.contains_key(path)
    }

    /// A node is a ghost while its body has not been fetched.
    pub fn is_ghost(&self, path: &str) -> bool {
        self.contains(path) && !self.fetched.contains(path)
    }

    pub fn ghost_nodes(&self) -> Vec<String> {
        self.indices
            .keys()
            .filter(|p| !self.fetched.contains(*p))
            .cloned()
            .collect()
    }

    /// Every edge source is a fetched file; ghosts only accumulate
    /// in-edges until absorbed.
    pub fn edges(&self) -> Vec<(String, String)> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (self.graph[a].clone(), self.graph[b].clone()))
            .collect()
    }

    /// PageRank with uniform teleport; dangling mass is redistributed
    /// evenly. Returns path -> score over every node, ghosts included.
    pub fn page_rank(&self) -> HashMap<String, f64> {
        let n = self.graph.node_count();
        if n == 0 {
            return HashMap::new();
        }
        let n_f = n as f64;
        let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        let mut rank = vec![1.0 / n_f; n];
        let out_degree: Vec<usize> = nodes
            .iter()
            .map(|&v| self.graph.neighbors_directed(v, Direction::Outgoing).count())
            .collect();
        let position: HashMap<NodeIndex, usize> =
            nodes.iter().enumerate().map(|(i, &v)| (v, i)).collect();

        for _ in 0..PAGERANK_MAX_ITER {
            let dangling: f64 = nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| out_degree[*i] == 0)
                .map(|(i, _)| rank[i])
                .sum();

            let mut next = vec![(1.0 - PAGERANK_DAMPING) / n_f + PAGERANK_DAMPING * dangling / n_f; n];
            for (i, &v) in nodes.iter().enumerate() {
                for u in self.graph.neighbors_directed(v, Direction::Incoming) {
                    let ui = position[&u];
                    next[i] += PAGERANK_DAMPING * rank[ui] / out_degree[ui] as f64;
                }
            }

            let delta: f64 = rank
                .iter()
                .zip(next.iter())
                .map(|(a, b)| (a - b).abs())
                .sum();
            rank = next;
            if delta < 1e-6 * n_f {
                break;
            }
        }

        nodes
            .iter()
            .enumerate()
            .map(|(i, &v)| (self.graph[v].clone(), rank[i]))
            .collect()
    }

    /// Centrality lookup over a caller-specified subset, falling back to
    /// the floor for paths the ranking does not cover.
    pub fn centrality_scores(&self, paths: &[String]) -> HashMap<String, f64> {
        let ranks = self.page_rank();
        paths
            .iter()
            .map(|p| (p.clone(), *ranks.get(p).unwrap_or(&CENTRALITY_FLOOR)))
            .collect()
    }
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

// ============================================================================
// Tests
// ============================================================================
