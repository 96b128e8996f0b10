//! Prompt Composer Module
//!
//! Builds token-budgeted, file-type-specialized prompts that ground
//! question generation in real file content, drives the LLM with retry
//! and template fallback, and gates the results: parse, HTML rejection,
//! quality scoring, and pairwise deduplication.
//!
//! The prompt wire text is Korean, matching the format the downstream
//! interview surface expects: the first line of a generated question is
//! the headline, optionally followed by `상황:`, `요구사항:` and
//! `평가 포인트:` sections.

use rand::{rngs::StdRng, Rng, SeedableRng};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::content::is_important_line;
use crate::error::{PipelineError, Result};
use crate::llm::{generate_with_retry, QuestionModel, QUESTION_TEMPERATURE};
use crate::types::{
    Difficulty, GeneratedBy, QuestionRecord, QuestionType, SelectedFile,
};

/// Token budget for one question's prompt.
pub const MAX_TOKENS_PER_QUESTION: usize = 100_000;

/// Tokens held back from the budget for response headroom.
pub const TOKEN_SAFETY_MARGIN: usize = 10_000;

/// Hard cap on a single file's content before templating.
pub const PER_FILE_TOKEN_CAP: usize = 50_000;

/// Rough token estimate: four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct ComposerConfig {
    pub max_tokens_per_question: usize,
    pub safety_margin: usize,
    pub per_file_token_cap: usize,
    pub temperature: f64,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_question: MAX_TOKENS_PER_QUESTION,
            safety_margin: TOKEN_SAFETY_MARGIN,
            per_file_token_cap: PER_FILE_TOKEN_CAP,
            temperature: QUESTION_TEMPERATURE,
        }
    }
}

// ============================================================================
// File Classification & Focus Angles
// ============================================================================

/// Closed classification of a file's role, driving template choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Controller,
    Service,
    Model,
    Configuration,
    Utility,
    Frontend,
    General,
}

impl FileKind {
    pub fn classify(path: &str) -> Self {
        let lower = path.to_lowercase();
        let basename = lower.rsplit('/').next().unwrap_or(&lower);

        let config_names = [
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
        if config_names.contains(&basename)
            || basename.ends_with(".yml")
            || basename.ends_with(".yaml")
            || basename.ends_with(".toml")
            || basename.ends_with(".ini")
            || basename.contains("config")
            || basename.contains("settings")
        {
            return Self::Configuration;
        }
        if lower.contains("controller")
            || lower.contains("/api/")
            || lower.starts_with("api/")
            || lower.contains("views")
            || lower.contains("routes")
            || lower.contains("handler")
        {
            return Self::Controller;
        }
        if lower.contains("service") {
            return Self::Service;
        }
        if lower.contains("model") || lower.contains("entities") || lower.contains("schema") {
            return Self::Model;
        }
        if lower.contains("util") || lower.contains("helper") {
            return Self::Utility;
        }
        if lower.contains("component")
            || lower.contains("pages")
            || [".tsx", ".jsx", ".vue", ".svelte", ".css", ".html"]
                .iter()
                .any(|e| basename.ends_with(e))
        {
            return Self::Frontend;
        }
        Self::General
    }

    /// Focus angles, one of which is chosen per question for diversity.
    pub fn focus_angles(&self) -> &'static [&'static str] {
        match self {
            Self::Controller => &[
                "HTTP 요청 처리와 라우팅 구조",
                "입력 검증과 에러 핸들링 전략",
                "RESTful API 설계 원칙",
                "인증과 인가 처리 방식",
            ],
            Self::Service => &[
                "비즈니스 로직의 분리와 캡슐화",
                "트랜잭션 관리와 데이터 일관성",
                "외부 서비스 연동과 API 호출",
                "에러 처리와 롤백 전략",
            ],
            Self::Model => &[
                "데이터 모델 설계와 필드 정의 전략",
                "관계 설정과 제약 조건",
                "데이터 유효성 검사",
                "인덱스 설계와 쿼리 최적화",
            ],
            Self::Configuration => &[
                "환경별 설정 분리 전략",
                "보안 설정과 민감 정보 관리",
                "의존성 관리와 버전 호환성",
            ],
            Self::Utility => &[
                "재사용성과 추상화 수준",
                "엣지 케이스 처리",
                "성능과 메모리 효율",
            ],
            Self::Frontend => &[
                "컴포넌트 구조와 책임 분리",
                "상태 관리 전략",
                "렌더링 성능 최적화",
            ],
            Self::General => &[
                "코드 구조와 설계 패턴",
                "알고리즘과 자료구조 선택",
                "성능 최적화와 메모리 관리",
                "테스트 가능성과 확장성",
            ],
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Controller => "컨트롤러",
            Self::Service => "서비스",
            Self::Model => "데이터 모델",
            Self::Configuration => "설정 파일",
            Self::Utility => "유틸리티",
            Self::Frontend => "프론트엔드",
            Self::General => "핵심 모듈",
        }
    }
}

fn difficulty_instruction(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Easy => "초급 개발자 수준에서 기본 개념과 구현 방법에 대해 질문하세요.",
        Difficulty::Medium => "중급 개발자 수준에서 설계 선택 이유와 고려사항에 대해 질문하세요.",
        Difficulty::Hard => {
            "고급 개발자 수준에서 최적화, 확장성, 아키텍처 관점에서 심도 있게 질문하세요."
        }
    }
}

// ============================================================================
// Multi-Dimensional Context
// ============================================================================

/// The four analysis dimensions with short explanations, injected into
/// every prompt so questions can reference why a file matters.
#[derive(Debug, Clone)]
pub struct MultiDimensionalContext {
    pub structural: (f64, String),
    pub centrality: (f64, String),
    pub churn: (f64, String),
    pub complexity: (f64, String),
    pub importance: f64,
}

impl MultiDimensionalContext {
    pub fn for_file(file: &SelectedFile) -> Self {
        let s = file.record.scores;
        Self {
            structural: (s.metadata, explain_structural(s.metadata)),
            centrality: (s.centrality, explain_centrality(s.centrality)),
            churn: (s.churn, explain_churn(s.churn)),
            complexity: (s.complexity, explain_complexity(s.complexity)),
            importance: file.record.importance_score,
        }
    }

    fn render(&self) -> String {
        format!(
            "## 4차원 분석 컨텍스트\n\
             - 구조적 중요도: {:.2} ({})\n\
             - 의존성 중심성: {:.2} ({})\n\
             - 변경 빈도: {:.2} ({})\n\
             - 복잡도: {:.2} ({})\n",
            self.structural.0,
            self.structural.1,
            self.centrality.0,
            self.centrality.1,
            self.churn.0,
            self.churn.1,
            self.complexity.0,
            self.complexity.1,
        )
    }
}

fn explain_structural(score: f64) -> String {
    if score >= 0.8 {
        "entry point or framework-critical file".to_string()
    } else if score >= 0.5 {
        "sits in a core module directory".to_string()
    } else if score >= 0.2 {
        "supporting file in the project layout".to_string()
    } else {
        "peripheral to the project structure".to_string()
    }
}

fn explain_centrality(score: f64) -> String {
    if score >= 0.8 {
        "hub of the dependency graph, widely imported".to_string()
    } else if score >= 0.5 {
        "imported by several other modules".to_string()
    } else if score >= 0.2 {
        "moderately connected in the dependency graph".to_string()
    } else {
        "few modules depend on this file".to_string()
    }
}

fn explain_churn(score: f64) -> String {
    if score >= 0.8 {
        "change hotspot with heavy recent activity".to_string()
    } else if score >= 0.5 {
        "changes regularly".to_string()
    } else if score >= 0.2 {
        "occasional changes".to_string()
    } else {
        "rarely changes, stable".to_string()
    }
}

fn explain_complexity(score: f64) -> String {
    if score >= 0.8 {
        "high branching complexity, hard to maintain".to_string()
    } else if score >= 0.5 {
        "moderate complexity".to_string()
    } else if score >= 0.2 {
        "mostly straightforward logic".to_string()
    } else {
        "simple, linear code".to_string()
    }
}

// ============================================================================
// Token-Budgeted Truncation
// ============================================================================

/// Trim content to a token budget, emitting important lines first and
/// filling with the rest in original order, with skip markers at every
/// discontinuity.
pub fn truncate_to_tokens(content: &str, max_tokens: usize) -> String {
    if estimate_tokens(content) <= max_tokens {
        return content.to_string();
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut keep = vec![false; lines.len()];
    let mut spent = 0usize;
    // Leave room for the skip markers themselves.
    let budget = max_tokens.saturating_sub(64);

    for (i, line) in lines.iter().enumerate() {
        if !is_important_line(line) {
            continue;
        }
        let cost = estimate_tokens(line) + 1;
        if spent + cost > budget {
            break;
        }
        keep[i] = true;
        spent += cost;
    }
    for (i, line) in lines.iter().enumerate() {
        if keep[i] {
            continue;
        }
        let cost = estimate_tokens(line) + 1;
        if spent + cost > budget {
            continue;
        }
        keep[i] = true;
        spent += cost;
    }

    let mut out: Vec<String> = Vec::new();
    let mut last_kept: Option<usize> = None;
    for (i, line) in lines.iter().enumerate() {
        if !keep[i] {
            continue;
        }
        match last_kept {
            Some(prev) if i > prev + 1 => {
                out.push(format!("... (lines {}-{} skipped)", prev + 2, i));
            }
            None if i > 0 => out.push(format!("... (lines 1-{} skipped)", i)),
            _ => {}
        }
        out.push(line.to_string());
        last_kept = Some(i);
    }
    if let Some(prev) = last_kept {
        if prev + 1 < lines.len() {
            out.push(format!("... (lines {}-{} skipped)", prev + 2, lines.len()));
        }
    }
    out.join("\n")
}

// ============================================================================
// Prompt Templates
// ============================================================================

/// A composed prompt with its accounting, handed to the LLM.
#[derive(Debug, Clone)]
pub struct PromptPackage {
    pub prompt: String,
    pub file_path: String,
    pub token_count: usize,
}

const OUTPUT_FORMAT: &str = r#"=== 질문 생성 형식 (반드시 준수) ===
다음 형식을 정확히 따라서 생성해주세요:

**질문:**
[핵심 질문을 1-2문장으로 명확하게]

**상황:**
[간단한 맥락이나 배경 1-2문장]

**요구사항:**
- [구체적 요구사항 1]
- [구체적 요구사항 2]
- [구체적 요구사항 3]

**평가 포인트:**
- [기술적 이해도 측정 요소]
- [실무 경험 확인 요소]

=== 내용 생성 요구사항 ===
1. 위 코드에서 실제로 사용된 구체적인 함수명, 변수명, 클래스명을 질문에 포함하세요
2. 코드의 실제 로직과 구현 방식을 기반으로 질문하세요
3. "만약", "가정", "일반적으로" 같은 추상적 표현 대신 코드의 실제 내용을 직접 언급하세요
4. HTML 태그를 사용하지 말고, 같은 문장을 반복하지 마세요
5. 각 섹션은 **볼드 제목:**으로 시작하고 그 아래 내용 작성

첫 번째 줄은 반드시 핵심 질문이어야 합니다. 위 형식을 정확히 지켜서 질문 하나만 생성해주세요."#;

fn kind_guidance(kind: FileKind) -> &'static str {
    match kind {
        FileKind::Controller => {
            "이 파일은 HTTP 요청을 처리하는 컨트롤러입니다. 요청 처리 방식, 라우팅 구조, \
             에러 핸들링, 입력 검증과 보안 고려사항 관점에서 질문하세요."
        }
        FileKind::Service => {
            "이 파일은 비즈니스 로직을 처리하는 서비스입니다. 로직의 분리와 캡슐화, \
             데이터 처리, 트랜잭션 관리, 외부 서비스 연동 관점에서 질문하세요."
        }
        FileKind::Model => {
            "이 파일은 데이터 모델을 정의하는 파일입니다. 모델 설계, 관계 설정, \
             유효성 검사, 인덱스와 성능 최적화 관점에서 질문하세요."
        }
        FileKind::Configuration => {
            "이 파일은 프로젝트 설정을 관리하는 파일입니다. 환경별 설정 분리, \
             보안 설정, 의존성 관리와 버전 호환성 관점에서 질문하세요. \
             실제 설정값, 환경변수명, 의존성 정보를 직접 언급하세요."
        }
        FileKind::Utility => {
            "이 파일은 공용 유틸리티입니다. 재사용성, 엣지 케이스 처리, \
             성능과 메모리 효율 관점에서 질문하세요."
        }
        FileKind::Frontend => {
            "이 파일은 프론트엔드 코드입니다. 컴포넌트 구조, 상태 관리, \
             렌더링 성능 관점에서 질문하세요."
        }
        FileKind::General => {
            "다음은 프로젝트의 주요 파일입니다. 코드 구조와 설계 패턴, \
             알고리즘 선택, 품질과 유지보수성 관점에서 질문하세요."
        }
    }
}

fn question_type_guidance(question_type: QuestionType) -> &'static str {
    match question_type {
        QuestionType::TechStack => {
            "질문 유형: 기술 스택. 이 파일에서 실제로 사용된 라이브러리, 프레임워크, \
             도구 선택의 이유와 트레이드오프를 묻는 질문을 생성하세요."
        }
        QuestionType::Architecture => {
            "질문 유형: 아키텍처. 이 파일이 전체 시스템에서 맡는 역할, 모듈 간 의존 관계, \
             설계 결정의 근거를 묻는 질문을 생성하세요."
        }
        QuestionType::CodeAnalysis => {
            "질문 유형: 코드 분석. 이 파일의 실제 구현 로직, 코드 품질, \
             개선 가능성을 묻는 질문을 생성하세요."
        }
    }
}

// ============================================================================
// Question Parsing & Quality
// ============================================================================

const HEDGING_WORDS: &[&str] = &["일반적으로", "보통", "대개", "만약", "가정"];

const TECHNICAL_KEYWORDS: &[&str] = &[
    "구현",
    "설계",
    "아키텍처",
    "최적화",
    "성능",
    "확장성",
    "유지보수성",
];

/// Identifier extraction from a content preview: function, class, and
/// constant names the question can be expected to mention.
pub fn extract_code_elements(content: &str) -> Vec<String> {
    use once_cell::sync::Lazy;
    use regex::Regex;
    static ELEMENT_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(
            r"(?m)^\s*(?:def|class|fn|func|function)\s+([A-Za-z_][A-Za-z0-9_]*)|^\s*(?:const|let|var)\s+([A-Za-z_][A-Za-z0-9_]*)\s*=|^([A-Z][A-Z0-9_]{2,})\s*=",
        )
        .unwrap()
    });

    let mut elements = Vec::new();
    for caps in ELEMENT_RE.captures_iter(content) {
        for group in [1, 2, 3] {
            if let Some(m) = caps.get(group) {
                let name = m.as_str().to_string();
                if !elements.contains(&name) {
                    elements.push(name);
                }
            }
        }
        if elements.len() >= 20 {
            break;
        }
    }
    elements
}

fn contains_html(text: &str) -> bool {
    use once_cell::sync::Lazy;
    use regex::Regex;
    static HTML_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"</?[a-zA-Z][a-zA-Z0-9]*(\s[^>]*)?>").unwrap());
    HTML_RE.is_match(text)
}

/// Quality score out of 1.0: content grounding, identifier mentions,
/// absence of hedging, technical depth, and sensible length. Questions
/// below 0.5 are dropped and their slot refilled.
pub fn question_quality(question_text: &str, content_preview: &str) -> f64 {
    if question_text.trim().is_empty() {
        return 0.0;
    }
    let mut score = 0.0;

    // Grounded in real content.
    if !content_preview.trim().is_empty() {
        score += 0.3;
    }

    // Mentions of actual identifiers from the file.
    let lower_question = question_text.to_lowercase();
    let mentioned = extract_code_elements(content_preview)
        .iter()
        .filter(|e| lower_question.contains(&e.to_lowercase()))
        .count();
    if mentioned > 0 {
        score += (mentioned as f64 * 0.05).min(0.25);
    }

    // Concreteness: hedging words cost the bonus.
    let hedges = HEDGING_WORDS
        .iter()
        .filter(|w| question_text.contains(*w))
        .count();
    score += match hedges {
        0 => 0.2,
        1 => 0.1,
        _ => 0.0,
    };

    // Technical depth.
    let technical = TECHNICAL_KEYWORDS
        .iter()
        .filter(|w| question_text.contains(*w))
        .count();
    score += (technical as f64 * 0.03).min(0.15);

    // Length band.
    let words = question_text.split_whitespace().count();
    if (20..=80).contains(&words) {
        score += 0.1;
    } else if (10..20).contains(&words) || (81..=100).contains(&words) {
        score += 0.05;
    }

    score.min(1.0)
}

/// Similarity ratio in the difflib style: `2 * LCS / (len_a + len_b)`
/// over characters, capped to keep the pairwise pass cheap.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    const CAP: usize = 600;
    let a_chars: Vec<char> = a.chars().take(CAP).collect();
    let b_chars: Vec<char> = b.chars().take(CAP).collect();
    if a_chars.is_empty() || b_chars.is_empty() {
        return 0.0;
    }

    let mut prev = vec![0usize; b_chars.len() + 1];
    let mut current = vec![0usize; b_chars.len() + 1];
    for &ca in &a_chars {
        for (j, &cb) in b_chars.iter().enumerate() {
            current[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut prev, &mut current);
    }
    let lcs = prev[b_chars.len()];
    2.0 * lcs as f64 / (a_chars.len() + b_chars.len()) as f64
}

/// Drop near-duplicates: same source file above 0.6 similarity, or any
/// pair above 0.7. The shorter question loses.
pub fn dedup_questions(questions: Vec<QuestionRecord>) -> Vec<QuestionRecord> {
    let mut kept: Vec<QuestionRecord> = Vec::new();
    'outer: for candidate in questions {
        for existing in kept.iter_mut() {
            let ratio = text_similarity(&candidate.text, &existing.text);
            let same_file = candidate.file_path == existing.file_path;
            let duplicate = (same_file && ratio > 0.6) || (!same_file && ratio > 0.7);
            if duplicate {
                debug!(
                    "Dropping duplicate question for {} (similarity {:.2})",
                    candidate.file_path, ratio
                );
                if candidate.text.len() > existing.text.len() {
                    *existing = candidate;
                }
                continue 'outer;
            }
        }
        kept.push(candidate);
    }
    kept
}

/// Even split of `count` across `types`; the remainder lands on the
/// earliest types.
pub fn distribute_question_counts(
    count: usize,
    types: &[QuestionType],
) -> Vec<(QuestionType, usize)> {
    if types.is_empty() {
        return Vec::new();
    }
    let base = count / types.len();
    let remainder = count % types.len();
    types
        .iter()
        .enumerate()
        .map(|(i, t)| (*t, base + usize::from(i < remainder)))
        .collect()
}

fn answer_time_estimate(complexity: f64, importance: f64) -> String {
    let level = 0.6 * complexity + 0.4 * importance;
    if level < 0.35 {
        "3-5 minutes".to_string()
    } else if level < 0.65 {
        "5-8 minutes".to_string()
    } else {
        "8-12 minutes".to_string()
    }
}

// ============================================================================
// Prompt Composer
// ============================================================================

pub struct PromptComposer {
    config: ComposerConfig,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new(ComposerConfig::default())
    }
}

impl PromptComposer {
    pub fn new(config: ComposerConfig) -> Self {
        Self { config }
    }

    /// Compose the grounded prompt for one question slot. The budget
    /// invariant holds by construction: content is trimmed so the final
    /// prompt stays under `max_tokens_per_question - safety_margin`.
    pub fn compose(
        &self,
        file: &SelectedFile,
        context: &MultiDimensionalContext,
        question_type: QuestionType,
        difficulty: Difficulty,
        angle: &str,
    ) -> PromptPackage {
        let kind = FileKind::classify(&file.record.path);
        let language = file.record.language.as_deref().unwrap_or("text");
        let content = file.content.text.as_deref().unwrap_or("");

        let skeleton = self.render_prompt(
            file,
            context,
            kind,
            question_type,
            difficulty,
            angle,
            language,
            "",
        );
        let overhead = estimate_tokens(&skeleton);
        let budget = self
            .config
            .max_tokens_per_question
            .saturating_sub(self.config.safety_margin)
            .saturating_sub(overhead);
        let content_budget = budget.min(self.config.per_file_token_cap);
        let trimmed = truncate_to_tokens(content, content_budget);

        let prompt = self.render_prompt(
            file,
            context,
            kind,
            question_type,
            difficulty,
            angle,
            language,
            &trimmed,
        );
        let token_count = estimate_tokens(&prompt);

        PromptPackage {
            prompt,
            file_path: file.record.path.clone(),
            token_count,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn render_prompt(
        &self,
        file: &SelectedFile,
        context: &MultiDimensionalContext,
        kind: FileKind,
        question_type: QuestionType,
        difficulty: Difficulty,
        angle: &str,
        language: &str,
        content: &str,
    ) -> String {
        format!(
            "# 코드 분석 및 기술면접 질문 생성\n\n\
             ## 분석 대상 파일\n\
             - **파일 경로**: `{path}`\n\
             - **프로그래밍 언어**: {language}\n\
             - **파일 유형**: {label}\n\
             - **중요도 점수**: {importance:.2}/1.0\n\n\
             {context}\n\
             ## 전체 파일 내용 (완전 분석용)\n\
             ```{language}\n\
             {content}\n\
             ```\n\n\
             ## 질문 생성 지침\n\
             {kind_guidance}\n\
             {type_guidance}\n\
             이번 질문은 특히 \"{angle}\" 관점에 집중해주세요.\n\
             {difficulty}\n\n\
             {output_format}\n",
            path = file.record.path,
            language = language,
            label = kind.label(),
            importance = context.importance,
            context = context.render(),
            content = content,
            kind_guidance = kind_guidance(kind),
            type_guidance = question_type_guidance(question_type),
            angle = angle,
            difficulty = difficulty_instruction(difficulty),
            output_format = OUTPUT_FORMAT,
        )
    }

    /// Fallback question from the type-specific template. Real
    /// identifiers from the file are woven in so even template questions
    /// stay grounded and distinct across files.
    fn template_question_text(
        &self,
        file: &SelectedFile,
        question_type: QuestionType,
        angle: &str,
    ) -> String {
        let kind = FileKind::classify(&file.record.path);
        let path = &file.record.path;
        let elements = extract_code_elements(file.content.text.as_deref().unwrap_or(""));
        let identifiers = if elements.is_empty() {
            String::new()
        } else {
            format!(
                " 특히 {} 같은 구현 요소를 중심으로 설명해주세요.",
                elements
                    .iter()
                    .take(3)
                    .map(|e| format!("`{}`", e))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };
        match question_type {
            QuestionType::TechStack => format!(
                "**질문:**\n`{}` 파일에서 사용된 라이브러리와 도구들을 보고, 각 기술을 선택한 \
                 이유와 대안 기술 대비 트레이드오프를 설명해주세요.{}\n\n**평가 포인트:**\n- 기술 선택 근거에 대한 이해\n- 실무 적용 경험",
                path, identifiers
            ),
            QuestionType::Architecture => format!(
                "**질문:**\n`{}` ({})이 전체 시스템 아키텍처에서 맡는 역할과 다른 모듈과의 \
                 의존 관계를 설명하고, {} 관점에서 설계를 평가해주세요.{}\n\n**평가 포인트:**\n- 아키텍처 이해도\n- 설계 트레이드오프 분석",
                path,
                kind.label(),
                angle,
                identifiers
            ),
            QuestionType::CodeAnalysis => format!(
                "**질문:**\n이 {}의 주요 기능과 구조를 분석하고 설명해주세요. 특히 `{}`의 {} \
                 측면에서 개선할 수 있는 부분을 제시해주세요.{}\n\n**평가 포인트:**\n- 코드 분석 능력\n- 개선 방안 제시",
                kind.label(),
                path,
                angle,
                identifiers
            ),
        }
    }

    /// Generic last-resort template.
    fn generic_question_text(&self, file: &SelectedFile) -> String {
        format!(
            "**질문:**\n`{}` 파일의 주요 기능과 구조를 분석하고 설명해주세요.",
            file.record.path
        )
    }

    /// Generate the full question set: even distribution across types,
    /// model calls with retry, template fallback on exhaustion, quality
    /// gate, and deduplication. Returns the questions plus warnings.
    pub async fn generate_questions(
        &self,
        model: &dyn QuestionModel,
        selection: &[SelectedFile],
        count: usize,
        difficulty: Difficulty,
        types: &[QuestionType],
        session_seed: &str,
        cancel: &CancellationToken,
    ) -> Result<(Vec<QuestionRecord>, Vec<String>)> {
        let mut warnings = Vec::new();

        let mut files: Vec<&SelectedFile> =
            selection.iter().filter(|f| f.content.is_ok()).collect();
        files.sort_by(|a, b| {
            b.record
                .importance_score
                .partial_cmp(&a.record.importance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if files.is_empty() {
            warnings.push("no files with content available for question generation".to_string());
            return Ok((Vec::new(), warnings));
        }

        let mut rng = seeded_rng(session_seed);
        let mut questions: Vec<QuestionRecord> = Vec::new();
        let mut file_cursor = 0usize;

        for (question_type, slots) in distribute_question_counts(count, types) {
            let mut produced = 0usize;
            let mut attempts = 0usize;
            let attempt_budget = slots * 2;

            while produced < slots {
                if cancel.is_cancelled() {
                    return Err(PipelineError::Cancelled);
                }
                let file = files[file_cursor % files.len()];
                file_cursor += 1;

                let angles = FileKind::classify(&file.record.path).focus_angles();
                let angle = angles[rng.gen_range(0..angles.len())];
                let context = MultiDimensionalContext::for_file(file);
                let package = self.compose(file, &context, question_type, difficulty, angle);

                let generated = if attempts < attempt_budget {
                    attempts += 1;
                    match generate_with_retry(model, &package.prompt, self.config.temperature)
                        .await
                    {
                        Ok(text) => self.accept(file, question_type, difficulty, &text),
                        Err(err) => {
                            debug!("LLM exhausted for {}: {}", file.record.path, err);
                            None
                        }
                    }
                } else {
                    None
                };

                let record = match generated {
                    Some(record) => record,
                    None => {
                        // Type-specific template first, generic second.
                        let text = self.template_question_text(file, question_type, angle);
                        let preview = file.content.text.as_deref().unwrap_or("");
                        let record = match self.build_record(
                            file,
                            question_type,
                            difficulty,
                            &text,
                            GeneratedBy::Template,
                            preview,
                        ) {
                            Some(record) => record,
                            None => self
                                .build_record(
                                    file,
                                    question_type,
                                    difficulty,
                                    &self.generic_question_text(file),
                                    GeneratedBy::Template,
                                    preview,
                                )
                                .expect("generic template always parses"),
                        };
                        if attempts >= attempt_budget {
                            warnings.push(format!(
                                "question slot for {} filled from template after model exhaustion",
                                file.record.path
                            ));
                        }
                        record
                    }
                };
                questions.push(record);
                produced += 1;
            }
        }

        let before = questions.len();
        let mut questions = dedup_questions(questions);
        if questions.len() < before {
            debug!("Deduplication removed {} questions", before - questions.len());
        }

        // Refill slots lost to deduplication from templates when possible.
        let mut refill_idx = 0usize;
        while questions.len() < count && refill_idx < files.len() && !types.is_empty() {
            let file = files[refill_idx];
            refill_idx += 1;
            let question_type = types[questions.len() % types.len()];
            let angles = FileKind::classify(&file.record.path).focus_angles();
            let angle = angles[rng.gen_range(0..angles.len())];
            let text = self.template_question_text(file, question_type, angle);
            let preview = file.content.text.as_deref().unwrap_or("");
            if let Some(record) = self.build_record(
                file,
                question_type,
                difficulty,
                &text,
                GeneratedBy::Template,
                preview,
            ) {
                let duplicate = questions
                    .iter()
                    .any(|q| text_similarity(&q.text, &record.text) > 0.7);
                if !duplicate {
                    questions.push(record);
                }
            }
        }

        if questions.len() < count {
            warnings.push(format!(
                "generated {} of {} requested questions",
                questions.len(),
                count
            ));
        }

        info!(
            "Question generation complete: {} questions ({} warnings)",
            questions.len(),
            warnings.len()
        );
        Ok((questions, warnings))
    }

    /// Validate a model response into a question record; None means the
    /// slot should be retried or filled from a template.
    fn accept(
        &self,
        file: &SelectedFile,
        question_type: QuestionType,
        difficulty: Difficulty,
        text: &str,
    ) -> Option<QuestionRecord> {
        if contains_html(text) {
            warn!("Rejecting question with embedded HTML for {}", file.record.path);
            return None;
        }
        let preview = file.content.text.as_deref().unwrap_or("");
        let record =
            self.build_record(file, question_type, difficulty, text, GeneratedBy::Model, preview)?;
        if record.quality_score < 0.5 {
            debug!(
                "Rejecting low-quality question for {} (score {:.2})",
                file.record.path, record.quality_score
            );
            return None;
        }
        Some(record)
    }

    fn build_record(
        &self,
        file: &SelectedFile,
        question_type: QuestionType,
        difficulty: Difficulty,
        text: &str,
        generated_by: GeneratedBy,
        content_preview: &str,
    ) -> Option<QuestionRecord> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let clean = |line: &str| -> String {
            line.trim()
                .trim_start_matches("**질문:**")
                .trim_start_matches("**질문**")
                .trim_start_matches('#')
                .trim()
                .trim_matches('*')
                .trim()
                .to_string()
        };

        let lines: Vec<&str> = trimmed.lines().collect();
        let (headline_idx, headline) = lines
            .iter()
            .enumerate()
            .map(|(i, l)| (i, clean(l)))
            .find(|(_, l)| !l.is_empty())?;

        let details_markdown = lines
            .get(headline_idx + 1..)
            .map(|rest| rest.join("\n").trim().to_string())
            .unwrap_or_default();

        let quality_score = question_quality(trimmed, content_preview);

        Some(QuestionRecord {
            id: Uuid::new_v4(),
            headline,
            text: trimmed.to_string(),
            details_markdown,
            question_type,
            difficulty,
            file_path: file.record.path.clone(),
            importance_score: file.record.importance_score,
            time_estimate: answer_time_estimate(
                file.record.scores.complexity,
                file.record.importance_score,
            ),
            quality_score,
            generated_by,
        })
    }
}

fn seeded_rng(seed: &str) -> StdRng {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    StdRng::from_seed(bytes)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubModel;
    use crate::types::{
        ContentRecord, DimensionScores, FileRecord, SelectedFile, SelectionReason,
    };
    use chrono::Utc;

    fn selected(path: &str, content: &str, importance: f64) -> SelectedFile {
        let mut record = FileRecord::new(path, content.len() as u64);
        record.scores = DimensionScores {
            metadata: 0.6,
            centrality: 0.3,
            churn: 0.3,
            complexity: 0.4,
        };
        record.importance_score = importance;
        SelectedFile {
            record,
            content: ContentRecord {
                path: path.to_string(),
                text: Some(content.to_string()),
                size: content.len() as u64,
                encoding: Some("utf-8".to_string()),
                truncated: false,
                failure: None,
                fetched_at: Utc::now(),
            },
            reason: SelectionReason::PagerankMmrSelection,
            selected_score: 0.4,
            reasons: vec![],
            hotspot: false,
        }
    }

    const AUTH_PY: &str = "import hashlib\n\nMAX_ATTEMPTS = 5\n\ndef verify_token(token):\n    if token is None:\n        return False\n    digest = hashlib.sha256(token.encode()).hexdigest()\n    return check_digest(digest)\n\nclass AuthService:\n    def login(self, username, password):\n        return verify_token(make_token(username, password))\n";

    /// A model answer that clears the quality gate: mentions real
    /// identifiers, technical keywords, no hedging, sensible length.
    const GOOD_ANSWER: &str = "**질문:**\nAuthService.login이 verify_token과 hashlib.sha256을 사용해 토큰을 검증하는 구현을 설명하고, MAX_ATTEMPTS 제한을 고려한 설계 개선 방안을 제시해주세요.\n\n**상황:**\n인증 서비스의 토큰 검증 로직을 검토하고 있습니다.\n\n**요구사항:**\n- verify_token의 동작 설명\n- 해시 기반 검증의 보안 특성 분석\n- 성능 최적화 방안 제시\n\n**평가 포인트:**\n- 인증 구현 이해도\n- 설계 개선 능력";

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_file_kind_classification() {
        assert_eq!(FileKind::classify("src/app/api/user.py"), FileKind::Controller);
        assert_eq!(FileKind::classify("app/services/auth.py"), FileKind::Service);
        assert_eq!(FileKind::classify("app/models/user.py"), FileKind::Model);
        assert_eq!(FileKind::classify("package.json"), FileKind::Configuration);
        assert_eq!(FileKind::classify("Dockerfile"), FileKind::Configuration);
        assert_eq!(FileKind::classify("src/utils/strings.py"), FileKind::Utility);
        assert_eq!(FileKind::classify("src/components/App.tsx"), FileKind::Frontend);
        assert_eq!(FileKind::classify("core/engine.py"), FileKind::General);
    }

    #[test]
    fn test_focus_angle_counts() {
        for kind in [
            FileKind::Controller,
            FileKind::Service,
            FileKind::Model,
            FileKind::Configuration,
            FileKind::Utility,
            FileKind::Frontend,
            FileKind::General,
        ] {
            let angles = kind.focus_angles();
            assert!((3..=4).contains(&angles.len()), "{:?}", kind);
        }
    }

    #[test]
    fn test_distribution_even_with_remainder() {
        use QuestionType::*;
        let dist = distribute_question_counts(9, &[TechStack, Architecture, CodeAnalysis]);
        assert_eq!(dist, vec![(TechStack, 3), (Architecture, 3), (CodeAnalysis, 3)]);

        let dist = distribute_question_counts(8, &[TechStack, Architecture, CodeAnalysis]);
        assert_eq!(dist, vec![(TechStack, 3), (Architecture, 3), (CodeAnalysis, 2)]);

        let dist = distribute_question_counts(2, &[TechStack]);
        assert_eq!(dist, vec![(TechStack, 2)]);
    }

    #[test]
    fn test_truncate_to_tokens_respects_budget_and_marks_gaps() {
        let mut content = String::from("import os\n");
        for i in 0..2_000 {
            content.push_str(&format!("    filler_line_number_{} = {}\n", i, i));
        }
        content.push_str("def final_handler():\n    return 1\n");

        let truncated = truncate_to_tokens(&content, 500);
        assert!(estimate_tokens(&truncated) <= 500 + 64);
        assert!(truncated.contains("import os"));
        assert!(truncated.contains("def final_handler():"));
        assert!(truncated.contains("skipped)"));
    }

    #[test]
    fn test_compose_token_budget_invariant() {
        // A file far beyond the per-file cap still yields a prompt within
        // the question budget minus the safety margin.
        let big_content: String = (0..30_000)
            .map(|i| format!("value_{} = compute_{}()\n", i, i))
            .collect();
        let file = selected("src/app/api/big.py", &big_content, 0.8);
        let composer = PromptComposer::default();
        let context = MultiDimensionalContext::for_file(&file);

        let package = composer.compose(
            &file,
            &context,
            QuestionType::CodeAnalysis,
            Difficulty::Medium,
            "코드 구조와 설계 패턴",
        );

        assert!(package.token_count <= MAX_TOKENS_PER_QUESTION - TOKEN_SAFETY_MARGIN);
        assert!(package.prompt.contains("src/app/api/big.py"));
    }

    #[test]
    fn test_compose_includes_grounding_elements() {
        let file = selected("app/services/auth.py", AUTH_PY, 0.7);
        let composer = PromptComposer::default();
        let context = MultiDimensionalContext::for_file(&file);
        let package = composer.compose(
            &file,
            &context,
            QuestionType::Architecture,
            Difficulty::Hard,
            "트랜잭션 관리와 데이터 일관성",
        );

        // Real path, language tag, fenced content, context scores,
        // difficulty instruction, format directive.
        assert!(package.prompt.contains("`app/services/auth.py`"));
        assert!(package.prompt.contains("```python"));
        assert!(package.prompt.contains("def verify_token"));
        assert!(package.prompt.contains("4차원 분석 컨텍스트"));
        assert!(package.prompt.contains("고급 개발자"));
        assert!(package.prompt.contains("**질문:**"));
        assert!(package.prompt.contains("상황:"));
        assert!(package.prompt.contains("평가 포인트:"));
    }

    #[test]
    fn test_quality_gate_scoring() {
        let grounded = question_quality(GOOD_ANSWER, AUTH_PY);
        assert!(grounded >= 0.5, "got {}", grounded);

        // Hedged, vague, no identifiers.
        let vague = "일반적으로 만약 인증이 필요하다면 보통 어떻게 구현하나요?";
        assert!(question_quality(vague, AUTH_PY) < 0.5);

        assert_eq!(question_quality("", AUTH_PY), 0.0);
    }

    #[test]
    fn test_html_rejected() {
        assert!(contains_html("질문 <div>본문</div>"));
        assert!(contains_html("<p class=\"x\">hi</p>"));
        assert!(!contains_html("일반 텍스트 질문이며 a < b 비교를 다룹니다"));
    }

    #[test]
    fn test_text_similarity_and_dedup() {
        let a = "AuthService.login의 토큰 검증 로직을 설명해주세요";
        let b = "AuthService.login의 토큰 검증 로직을 자세히 설명해주세요";
        assert!(text_similarity(a, b) > 0.8);

        let c = "데이터베이스 인덱스 설계 전략을 설명해주세요";
        assert!(text_similarity(a, c) < 0.7);
    }

    #[test]
    fn test_dedup_same_file_drops_shorter() {
        let file = selected("a.py", AUTH_PY, 0.5);
        let composer = PromptComposer::default();
        let q1 = composer
            .build_record(
                &file,
                QuestionType::CodeAnalysis,
                Difficulty::Medium,
                "verify_token 함수의 구현 방식과 보안 특성을 설명해주세요",
                GeneratedBy::Model,
                AUTH_PY,
            )
            .unwrap();
        let q2 = composer
            .build_record(
                &file,
                QuestionType::CodeAnalysis,
                Difficulty::Medium,
                "verify_token 함수의 구현 방식과 보안 특성을 상세히 설명해주세요",
                GeneratedBy::Model,
                AUTH_PY,
            )
            .unwrap();

        let deduped = dedup_questions(vec![q1, q2]);
        assert_eq!(deduped.len(), 1);
        // The longer text survives.
        assert!(deduped[0].text.contains("상세히"));
    }

    /// Three distinct model answers that clear the quality gate and stay
    /// dissimilar enough to survive deduplication.
    const DISTINCT_ANSWERS: [&str; 3] = [
        "**질문:**\nAuthService.login이 verify_token을 호출하는 인증 흐름의 구현을 단계별로 설명하고, 해시 검증 설계의 트레이드오프를 분석해주세요.\n\n**평가 포인트:**\n- 인증 구현 이해",
        "**질문:**\nMAX_ATTEMPTS 상수가 로그인 시도 제한에서 수행하는 역할을 설명하고, 분산 환경으로의 확장성을 고려한 최적화 구현 방안을 제안해주세요.\n\n**평가 포인트:**\n- 확장성 판단",
        "**질문:**\nhashlib.sha256 기반 digest 비교 로직의 보안 특성을 평가하고, 타이밍 공격 방어를 위한 설계 개선과 성능 영향 검토를 해주세요.\n\n**평가 포인트:**\n- 보안 설계 역량",
    ];

    #[tokio::test]
    async fn test_generate_meets_count_with_even_distribution() {
        let selection = vec![
            selected("src/app/api/user.py", AUTH_PY, 0.9),
            selected("src/app/services/auth.py", AUTH_PY, 0.8),
            selected("src/app/models/user.py", AUTH_PY, 0.7),
        ];
        let model = StubModel::scripted(DISTINCT_ANSWERS.to_vec());
        let composer = PromptComposer::default();

        use QuestionType::*;
        let (questions, warnings) = composer
            .generate_questions(
                &model,
                &selection,
                3,
                Difficulty::Medium,
                &[TechStack, Architecture, CodeAnalysis],
                "analysis-xyz",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(questions.len(), 3, "warnings: {:?}", warnings);
        for qt in [TechStack, Architecture, CodeAnalysis] {
            assert_eq!(questions.iter().filter(|q| q.question_type == qt).count(), 1);
        }
        // Every question ties to a selected file and parses a headline.
        for q in &questions {
            assert!(selection.iter().any(|f| f.record.path == q.file_path));
            assert!(!q.headline.is_empty());
            assert!(q.generated_by == GeneratedBy::Model);
        }
    }

    #[tokio::test]
    async fn test_empty_model_falls_back_to_template() {
        let selection = vec![selected("src/app/api/user.py", AUTH_PY, 0.9)];
        // Always empty: retries exhaust, the template fills the slot.
        let model = StubModel::scripted(vec![]);
        let composer = PromptComposer::default();

        let (questions, warnings) = composer
            .generate_questions(
                &model,
                &selection,
                1,
                Difficulty::Medium,
                &[QuestionType::CodeAnalysis],
                "analysis-abc",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(questions.len(), 1);
        assert!(questions.iter().all(|q| q.generated_by == GeneratedBy::Template));
        assert!(!warnings.is_empty());
    }

    #[tokio::test]
    async fn test_single_empty_slot_recovers_via_template() {
        let selection = vec![
            selected("src/app/api/user.py", AUTH_PY, 0.9),
            selected("src/app/services/auth.py", AUTH_PY, 0.8),
            selected("src/app/models/user.py", AUTH_PY, 0.7),
        ];
        // The first slot exhausts its three retries on empty responses,
        // then the remaining slots answer fine.
        let mut responses = vec!["", "", ""];
        responses.extend(DISTINCT_ANSWERS);
        let model = StubModel::scripted(responses);
        let composer = PromptComposer::default();

        use QuestionType::*;
        let (questions, _) = composer
            .generate_questions(
                &model,
                &selection,
                3,
                Difficulty::Medium,
                &[TechStack, Architecture, CodeAnalysis],
                "analysis-retry",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(questions.len(), 3);
        assert!(questions.iter().any(|q| q.generated_by == GeneratedBy::Template));
        assert!(questions.iter().any(|q| q.generated_by == GeneratedBy::Model));
    }

    #[tokio::test]
    async fn test_cancellation_stops_generation() {
        let selection = vec![selected("a.py", AUTH_PY, 0.5)];
        let model = StubModel::repeating(GOOD_ANSWER);
        let composer = PromptComposer::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = composer
            .generate_questions(
                &model,
                &selection,
                3,
                Difficulty::Easy,
                &[QuestionType::CodeAnalysis],
                "s",
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[test]
    fn test_extract_code_elements() {
        let elements = extract_code_elements(AUTH_PY);
        assert!(elements.contains(&"verify_token".to_string()));
        assert!(elements.contains(&"AuthService".to_string()));
        assert!(elements.contains(&"MAX_ATTEMPTS".to_string()));
    }

    #[test]
    fn test_answer_time_bands() {
        assert_eq!(answer_time_estimate(0.1, 0.1), "3-5 minutes");
        assert_eq!(answer_time_estimate(0.5, 0.5), "5-8 minutes");
        assert_eq!(answer_time_estimate(0.9, 0.9), "8-12 minutes");
    }
}
