//! LLM Client Module
//!
//! The pipeline consumes the language model as an opaque text-in/text-out
//! collaborator behind the [`QuestionModel`] trait. The production
//! implementation speaks the OpenAI-compatible chat-completions shape over
//! reqwest; tests use the scripted [`StubModel`].
//!
//! Retry policy lives here: three attempts with exponential backoff
//! (500 ms base, doubling, ±20% jitter). An empty completion counts as a
//! failure and is retried.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Sampling temperature used for question generation.
pub const QUESTION_TEMPERATURE: f64 = 0.7;

/// Maximum generation attempts per call.
pub const MAX_LLM_RETRIES: usize = 3;

const RETRY_BASE_MS: u64 = 500;

// ============================================================================
// Error & Trait
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM response malformed: {0}")]
    Malformed(String),
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Opaque text-in/text-out language model.
#[async_trait]
pub trait QuestionModel: Send + Sync {
    /// One generation attempt; no internal retries.
    async fn generate(&self, prompt: &str, temperature: f64) -> LlmResult<String>;
}

/// Call the model with the standard retry schedule. Empty responses and
/// transport failures are retried; the last error surfaces on exhaustion.
pub async fn generate_with_retry(
    model: &dyn QuestionModel,
    prompt: &str,
    temperature: f64,
) -> LlmResult<String> {
    let mut last_err = LlmError::EmptyResponse;
    for attempt in 1..=MAX_LLM_RETRIES {
        match model.generate(prompt, temperature).await {
            Ok(text) if !text.trim().is_empty() => return Ok(text),
            Ok(_) => {
                warn!("LLM returned empty response (attempt {})", attempt);
                last_err = LlmError::EmptyResponse;
            }
            Err(err) => {
                warn!("LLM call failed (attempt {}): {}", attempt, err);
                last_err = err;
            }
        }
        if attempt < MAX_LLM_RETRIES {
            let backoff = RETRY_BASE_MS * (1 << (attempt - 1));
            let jitter = rand::thread_rng().gen_range(0.8..=1.2);
            tokio::time::sleep(Duration::from_millis((backoff as f64 * jitter) as u64)).await;
        }
    }
    Err(last_err)
}

// ============================================================================
// OpenAI-Compatible Client
// ============================================================================

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f64,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            max_tokens: 4096,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl QuestionModel for OpenAiCompatClient {
    async fn generate(&self, prompt: &str, temperature: f64) -> LlmResult<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature,
            max_tokens: self.max_tokens,
        };

        debug!(
            "LLM request: model={}, prompt={} chars",
            self.model,
            prompt.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Request(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }
}

// ============================================================================
// Stub Model (tests)
// ============================================================================

/// Deterministic model for tests: pops scripted responses in order, then
/// repeats the fallback text. Records every prompt it receives.
#[derive(Default)]
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    pub prompts: Mutex<Vec<String>>,
}

impl StubModel {
    pub fn scripted(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(text: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Some(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl QuestionModel for StubModel {
    async fn generate(&self, prompt: &str, _temperature: f64) -> LlmResult<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            return Ok(next);
        }
        match &self.fallback {
            Some(text) => Ok(text.clone()),
            None => Err(LlmError::EmptyResponse),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
