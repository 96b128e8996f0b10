//! Content Extractor Module
//!
//! Turns a `(repository, path)` pair into a [`ContentRecord`]: binary
//! filtering by extension and by byte inspection, a 1 MB hard size cap, a
//! decoding chain (UTF-8, detected encoding, Latin-1), truncation of very
//! long files that keeps structurally important lines, and a durable
//! TTL cache in front of the host.
//!
//! Failures are data: a binary file, an oversized file, or a failed fetch
//! produces a record with a failure reason and never fails a batch.

use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::{CacheKey, CacheLayer, CONTENT_CACHE_TTL_SECS};
use crate::github::{GitHubError, RepositoryHost};
use crate::types::{ContentFailure, ContentRecord, RepoRef};

/// Hard cap on file bodies (1 MB).
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Files longer than this are truncated, not rejected.
pub const MAX_LINES: usize = 50_000;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub max_file_size: u64,
    pub max_lines: usize,
    pub cache_ttl_secs: u64,
    /// Concurrent in-flight fetches per repository.
    pub max_concurrent: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            max_lines: MAX_LINES,
            cache_ttl_secs: CONTENT_CACHE_TTL_SECS,
            max_concurrent: 10,
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Running counters; totals survive for the lifetime of the extractor.
#[derive(Default)]
pub struct ExtractorMetrics {
    pub requests: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub errors: AtomicU64,
    /// Accumulated response time in microseconds.
    pub total_response_micros: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub cache_hit_rate: f64,
    pub average_response_secs: f64,
}

impl ExtractorMetrics {
    fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let total_micros = self.total_response_micros.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests,
            cache_hits: hits,
            cache_misses: misses,
            errors: self.errors.load(Ordering::Relaxed),
            cache_hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            average_response_secs: if requests == 0 {
                0.0
            } else {
                (total_micros as f64 / requests as f64) / 1_000_000.0
            },
        }
    }
}

// ============================================================================
// Content Extractor
// ============================================================================

pub struct ContentExtractor {
    host: Arc<dyn RepositoryHost>,
    cache: Arc<CacheLayer>,
    semaphore: Arc<Semaphore>,
    config: ExtractorConfig,
    metrics: ExtractorMetrics,
}

impl ContentExtractor {
    pub fn new(
        host: Arc<dyn RepositoryHost>,
        cache: Arc<CacheLayer>,
        config: ExtractorConfig,
    ) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            host,
            cache,
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
            metrics: ExtractorMetrics::default(),
        }
    }

    /// The semaphore shared by every fetch for this repository. Selection
    /// phases that fetch directly reuse it.
    pub fn semaphore(&self) -> Arc<Semaphore> {
        Arc::clone(&self.semaphore)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Produce the content record for one path.
    pub async fn extract(&self, repo: &RepoRef, path: &str) -> ContentRecord {
        let started = Instant::now();
        self.metrics.requests.fetch_add(1, Ordering::Relaxed);

        let record = self.extract_inner(repo, path).await;

        if record.failure.is_some() {
            self.metrics.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.metrics
            .total_response_micros
            .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
        record
    }

    /// Batch extraction. Results preserve input ordering regardless of
    /// completion order; partial failures never fail the batch.
    pub async fn extract_many(&self, repo: &RepoRef, paths: &[String]) -> Vec<ContentRecord> {
        let futures = paths.iter().map(|path| self.extract(repo, path));
        join_all(futures).await
    }

    async fn extract_inner(&self, repo: &RepoRef, path: &str) -> ContentRecord {
        if has_binary_extension(path) {
            return ContentRecord::failed(path, 0, ContentFailure::BinaryExtension);
        }

        let cache_key = CacheKey::file_content(repo, path);
        if let Some(cached) = self.cache.get::<ContentRecord>(&cache_key).await {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit for {}:{}", repo, path);
            return cached;
        }
        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);

        let body = {
            let _permit = self.semaphore.acquire().await.expect("semaphore closed");
            self.host.get_file_content(repo, path).await
        };

        let body = match body {
            Ok(body) => body,
            Err(GitHubError::NotFound { .. }) => {
                return ContentRecord::failed(path, 0, ContentFailure::NotFound);
            }
            Err(err) => {
                warn!("Content fetch failed for {}: {}", path, err);
                return ContentRecord::failed(
                    path,
                    0,
                    ContentFailure::ApiError {
                        message: err.to_string(),
                    },
                );
            }
        };

        if body.reported_size > self.config.max_file_size {
            return ContentRecord::failed(
                path,
                body.reported_size,
                ContentFailure::SizeExceeded {
                    size: body.reported_size,
                },
            );
        }

        if !is_text_content(&body.bytes) {
            return ContentRecord::failed(path, body.bytes.len() as u64, ContentFailure::BinaryContent);
        }

        let (text, encoding) = decode_content(&body.bytes);

        let line_count = text.lines().count();
        let (text, truncated) = if line_count > self.config.max_lines {
            (
                truncate_preserving_important(&text, self.config.max_lines),
                true,
            )
        } else {
            (text, false)
        };

        let record = ContentRecord {
            path: path.to_string(),
            size: body.bytes.len() as u64,
            text: Some(text),
            encoding: Some(encoding),
            truncated,
            failure: None,
            fetched_at: chrono::Utc::now(),
        };

        self.cache
            .set(&cache_key, &record, Some(self.config.cache_ttl_secs))
            .await;
        record
    }
}

// ============================================================================
// Classification & Decoding
// ============================================================================

/// Extensions that are rejected before any fetch.
fn binary_extensions() -> &'static HashSet<&'static str> {
    use once_cell::sync::Lazy;
    static EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
        [
            "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "doc", "docx", "xls",
            "xlsx", "ppt", "pptx", "zip", "tar", "gz", "rar", "7z", "bz2", "xz", "exe", "dll",
            "so", "dylib", "bin", "deb", "rpm", "o", "a", "class", "pyc", "wasm", "mp3", "wav",
            "mp4", "avi", "mkv", "mov", "wmv", "ttf", "otf", "woff", "woff2", "eot",
        ]
        .into_iter()
        .collect()
    });
    &EXTENSIONS
}

/// Files with no extension are tentatively treated as text.
pub fn has_binary_extension(path: &str) -> bool {
    let basename = path.rsplit('/').next().unwrap_or(path);
    match basename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            binary_extensions().contains(ext.to_lowercase().as_str())
        }
        _ => false,
    }
}

/// Byte-level text check: a NUL in the first kilobyte or more than 30%
/// non-printable bytes means binary.
pub fn is_text_content(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return true;
    }
    let sample = &bytes[..bytes.len().min(1024)];
    if sample.contains(&0) {
        return false;
    }
    let non_printable = sample
        .iter()
        .filter(|&&b| b < 32 && !matches!(b, 9 | 10 | 13))
        .count();
    (non_printable as f64 / sample.len() as f64) <= 0.3
}

/// Decode a body: strict UTF-8 first, then the detected encoding when the
/// detector is confident, then Latin-1, which accepts any byte sequence.
/// Returns the text plus the strategy that succeeded.
pub fn decode_content(bytes: &[u8]) -> (String, String) {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), "utf-8".to_string());
    }

    let mut detector = chardetng::EncodingDetector::new();
    detector.feed(bytes, true);
    let (encoding, confident) = detector.guess_assess(None, true);
    if confident {
        let (text, _, had_errors) = encoding.decode(bytes);
        if !had_errors {
            return (text.into_owned(), encoding.name().to_lowercase());
        }
    }

    let text: String = bytes.iter().map(|&b| b as char).collect();
    (text, "latin-1".to_string())
}

// ============================================================================
// Truncation
// ============================================================================

/// Lines the truncation pass must keep: definitions, imports, ALL-CAPS
/// constant assignments, and documentation block starts.
pub fn is_important_line(line: &str) -> bool {
    let stripped = line.trim_start();

    if stripped.starts_with("def ")
        || stripped.starts_with("async def ")
        || stripped.starts_with("class ")
        || stripped.starts_with("function ")
        || stripped.starts_with("export function ")
        || stripped.starts_with("fn ")
        || stripped.starts_with("pub fn ")
        || stripped.starts_with("func ")
        || stripped.contains("function(")
    {
        return true;
    }

    if stripped.starts_with("import ")
        || stripped.starts_with("from ")
        || stripped.starts_with("require(")
        || stripped.starts_with("#include")
        || stripped.starts_with("use ")
        || stripped.starts_with("package ")
    {
        return true;
    }

    if is_constant_assignment(stripped) {
        return true;
    }

    stripped.starts_with("\"\"\"")
        || stripped.starts_with("'''")
        || stripped.starts_with("/**")
        || stripped.starts_with("/*")
        || stripped.starts_with("///")
        || stripped.starts_with("#!")
}

fn is_constant_assignment(stripped: &str) -> bool {
    let Some(eq) = stripped.find('=') else {
        return false;
    };
    let lhs = stripped[..eq].trim().trim_end_matches(':');
    !lhs.is_empty()
        && lhs
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && lhs.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

/// Keep important lines first, pad with other lines in original order,
/// and mark every discontinuity with a `... (lines X-Y skipped)` line.
pub fn truncate_preserving_important(content: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() <= max_lines {
        return content.to_string();
    }

    // A handful of slots are reserved for the skip markers themselves.
    let budget = max_lines.saturating_sub(50).max(1);

    let mut keep = vec![false; lines.len()];
    let mut kept = 0;

    for (i, line) in lines.iter().enumerate() {
        if kept >= budget {
            break;
        }
        if is_important_line(line) {
            keep[i] = true;
            kept += 1;
        }
    }
    for flag in keep.iter_mut() {
        if kept >= budget {
            break;
        }
        if !*flag {
            *flag = true;
            kept += 1;
        }
    }

    let mut result = Vec::with_capacity(kept + 16);
    let mut last_kept: Option<usize> = None;
    for (i, line) in lines.iter().enumerate() {
        if !keep[i] {
            continue;
        }
        match last_kept {
            Some(prev) if i > prev + 1 => {
                result.push(format!("... (lines {}-{} skipped)", prev + 2, i));
            }
            None if i > 0 => {
                result.push(format!("... (lines 1-{} skipped)", i));
            }
            _ => {}
        }
        result.push(line.to_string());
        last_kept = Some(i);
    }
    if let Some(prev) = last_kept {
        if prev + 1 < lines.len() {
            result.push(format!(
                "... (content truncated, showing {} of {} lines)",
                kept,
                lines.len()
            ));
        }
    }

    result.join("\n")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::github::{models::*, Result as GhResult};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    struct StaticHost {
        files: HashMap<String, Vec<u8>>,
        fetch_count: AtomicUsize,
    }

    impl StaticHost {
        fn new(files: Vec<(&str, Vec<u8>)>) -> Self {
            Self {
                files: files
                    .into_iter()
                    .map(|(p, b)| (p.to_string(), b))
                    .collect(),
                fetch_count: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RepositoryHost for StaticHost {
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
            self.fetch_count.fetch_add(1, Ordering::Relaxed);
            match self.files.get(path) {
                Some(bytes) => Ok(FileBody {
                    bytes: bytes.clone(),
                    reported_size: bytes.len() as u64,
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

    fn extractor(files: Vec<(&str, Vec<u8>)>) -> ContentExtractor {
        let host = Arc::new(StaticHost::new(files));
        let cache = Arc::new(CacheLayer::new(CacheConfig::memory_only()).unwrap());
        ContentExtractor::new(host, cache, ExtractorConfig::default())
    }

    fn repo() -> RepoRef {
        RepoRef::parse("octo/test").unwrap()
    }

    #[test]
    fn test_binary_extension_filter() {
        assert!(has_binary_extension("assets/logo.png"));
        assert!(has_binary_extension("lib/native.SO"));
        assert!(!has_binary_extension("src/main.py"));
        // No extension: tentatively text.
        assert!(!has_binary_extension("Dockerfile"));
        // A leading dot alone is not an extension.
        assert!(!has_binary_extension(".gitignore"));
    }

    #[test]
    fn test_is_text_content() {
        assert!(is_text_content(b"fn main() {}\n"));
        assert!(is_text_content(b""));
        assert!(!is_text_content(b"\x00\x01\x02binary"));

        let mostly_control: Vec<u8> = (0..100).map(|i| if i % 2 == 0 { 1 } else { b'a' }).collect();
        assert!(!is_text_content(&mostly_control));
    }

    #[test]
    fn test_decode_utf8_and_latin1() {
        let (text, enc) = decode_content("héllo".as_bytes());
        assert_eq!(text, "héllo");
        assert_eq!(enc, "utf-8");

        // 0xE9 alone is invalid UTF-8 but valid Latin-1 ("é").
        let (text, enc) = decode_content(&[b'c', b'a', b'f', 0xE9]);
        assert!(text.starts_with("caf"));
        assert_ne!(enc, "utf-8");
    }

    #[test]
    fn test_important_lines() {
        assert!(is_important_line("def handler(request):"));
        assert!(is_important_line("    class UserService:"));
        assert!(is_important_line("import os"));
        assert!(is_important_line("from app import models"));
        assert!(is_important_line("MAX_RETRIES = 3"));
        assert!(is_important_line("\"\"\"Module docstring.\"\"\""));
        assert!(!is_important_line("    return value"));
        assert!(!is_important_line("x = compute()"));
    }

    #[test]
    fn test_truncation_keeps_definitions_and_marks_gaps() {
        let mut lines = Vec::new();
        lines.push("import os".to_string());
        for i in 0..300 {
            lines.push(format!("    filler_{} = {}", i, i));
        }
        lines.push("def late_function():".to_string());
        lines.push("    return 1".to_string());
        let content = lines.join("\n");

        let truncated = truncate_preserving_important(&content, 100);
        assert!(truncated.contains("import os"));
        assert!(truncated.contains("def late_function():"));
        assert!(truncated.contains("skipped)"));
        assert!(truncated.lines().count() <= 110);
    }

    #[tokio::test]
    async fn test_extract_happy_path_and_cache_hit() {
        let ex = extractor(vec![("src/main.py", b"print('hi')\n".to_vec())]);
        let record = ex.extract(&repo(), "src/main.py").await;
        assert!(record.is_ok());
        assert_eq!(record.encoding.as_deref(), Some("utf-8"));
        assert!(!record.truncated);

        // Second extraction is served from cache.
        let again = ex.extract(&repo(), "src/main.py").await;
        assert!(again.is_ok());
        let metrics = ex.metrics();
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_misses, 1);
        assert_eq!(metrics.requests, 2);
    }

    #[tokio::test]
    async fn test_extract_binary_extension_never_fetches() {
        let ex = extractor(vec![("assets/logo.png", vec![0u8; 16])]);
        let record = ex.extract(&repo(), "assets/logo.png").await;
        assert_eq!(record.failure, Some(ContentFailure::BinaryExtension));

        // The host was never contacted.
        let metrics = ex.metrics();
        assert_eq!(metrics.cache_misses, 0);
    }

    #[tokio::test]
    async fn test_extract_size_cap() {
        let big = vec![b'a'; (MAX_FILE_SIZE + 1) as usize];
        let ex = extractor(vec![("big.txt", big)]);
        let record = ex.extract(&repo(), "big.txt").await;
        assert!(matches!(
            record.failure,
            Some(ContentFailure::SizeExceeded { .. })
        ));
        assert!(record.text.is_none());
    }

    #[tokio::test]
    async fn test_extract_binary_content_detected() {
        let ex = extractor(vec![("data.dat", vec![0u8, 1, 2, 3])]);
        let record = ex.extract(&repo(), "data.dat").await;
        assert_eq!(record.failure, Some(ContentFailure::BinaryContent));
    }

    #[tokio::test]
    async fn test_extract_many_preserves_order_with_failures() {
        let ex = extractor(vec![
            ("a.py", b"a = 1\n".to_vec()),
            ("c.py", b"c = 3\n".to_vec()),
        ]);
        let paths = vec!["a.py".to_string(), "missing.py".to_string(), "c.py".to_string()];
        let records = ex.extract_many(&repo(), &paths).await;

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].path, "a.py");
        assert!(records[0].is_ok());
        assert_eq!(records[1].failure, Some(ContentFailure::NotFound));
        assert_eq!(records[2].path, "c.py");
        assert!(records[2].is_ok());
    }
}
