//! Configuration Module
//!
//! Aggregates the per-subsystem configurations and loads the deployment
//! settings (tokens, endpoints, Redis) from the environment. Environment
//! variables use the `REPOGRILL_` prefix; a local `.env` file is honored
//! by the binaries via dotenvy.

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::composer::ComposerConfig;
use crate::content::ExtractorConfig;
use crate::github::GitHubConfig;
use crate::pipeline::PipelineConfig;
use crate::selector::SelectorConfig;

/// LLM endpoint settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.x.ai/v1".to_string(),
            api_key: String::new(),
            model: "grok-4-1-fast-reasoning".to_string(),
        }
    }
}

/// Environment-sourced overrides.
#[derive(Debug, Default, Deserialize)]
struct EnvSettings {
    github_token: Option<String>,
    github_base_url: Option<String>,
    redis_url: Option<String>,
    llm_base_url: Option<String>,
    llm_api_key: Option<String>,
    llm_model: Option<String>,
}

/// Full configuration for a pipeline deployment.
#[derive(Debug, Clone, Default)]
pub struct RepogrillConfig {
    pub github: GitHubConfig,
    pub cache: CacheConfig,
    pub extractor: ExtractorConfig,
    pub selector: SelectorConfig,
    pub composer: ComposerConfig,
    pub pipeline: PipelineConfig,
    pub llm: LlmSettings,
}

impl RepogrillConfig {
    /// Load from `REPOGRILL_*` environment variables on top of defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let env: EnvSettings = config::Config::builder()
            .add_source(config::Environment::with_prefix("REPOGRILL"))
            .build()?
            .try_deserialize()
            .unwrap_or_default();

        let mut github = GitHubConfig::new(env.github_token);
        if let Some(base_url) = env.github_base_url {
            github = github.with_base_url(base_url);
        }

        let cache = match env.redis_url {
            Some(url) => CacheConfig::with_redis(url),
            None => CacheConfig::memory_only(),
        };

        let defaults = LlmSettings::default();
        let llm = LlmSettings {
            base_url: env.llm_base_url.unwrap_or(defaults.base_url),
            api_key: env.llm_api_key.unwrap_or(defaults.api_key),
            model: env.llm_model.unwrap_or(defaults.model),
        };

        Ok(Self {
            github,
            cache,
            llm,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_memory_only() {
        let config = RepogrillConfig::default();
        assert!(config.cache.redis_url.is_none());
        assert!(config.github.token.is_none());
        assert_eq!(config.selector.target_count, 12);
        assert_eq!(config.pipeline.lock_wait_secs, 50);
    }
}
