//! Text-Generation Provider Abstraction
//!
//! Defines the [`CompletionProvider`] trait agents call to turn a prompt
//! into text. Providers classify their failures into [`LlmError`] so the
//! workflow can tell transient faults from permanent ones.
//!
//! ## Providers
//!
//! - `openai`: OpenAI chat completions (also vLLM with a custom base URL)
//! - `demo`: deterministic offline responses

mod demo;
mod openai;

pub use demo::DemoProvider;
pub use openai::OpenAiProvider;

// Re-export error types from centralized location
pub use crate::types::{ErrorCategory, ErrorClassifier, LlmError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{LlmConfig, ProviderKind};
use crate::constants::llm as llm_constants;
use crate::types::{ReportError, Result};

// =============================================================================
// Requests and Responses
// =============================================================================

/// Which agent a prompt comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Outline,
    Content,
    Polish,
    Chart,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub kind: PromptKind,
    pub system: Option<String>,
    pub prompt: String,
    /// Overrides the provider's default when set
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(kind: PromptKind, prompt: impl Into<String>) -> Self {
        Self {
            kind,
            system: None,
            prompt: prompt.into(),
            max_tokens: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Token usage metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Create from OpenAI-style usage response
    pub fn from_openai(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            input_tokens: prompt_tokens,
            output_tokens: completion_tokens,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    pub elapsed: Duration,
    pub model: String,
}

// =============================================================================
// Provider Configuration
// =============================================================================

/// Resolved provider settings
///
/// API keys are never serialized and are redacted in debug output; the
/// provider converts the key to a `SecretString` internally.
#[derive(Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl From<&LlmConfig> for ProviderConfig {
    fn from(config: &LlmConfig) -> Self {
        Self {
            kind: config.provider,
            model: config.model.clone(),
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::from(&LlmConfig::default())
    }
}

// =============================================================================
// Provider Trait
// =============================================================================

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> std::result::Result<Completion, LlmError>;

    /// Provider name for logging
    fn name(&self) -> &str;

    /// Model name currently in use
    fn model(&self) -> &str;
}

/// Shared provider used concurrently by all agents of a run
pub type SharedProvider = Arc<dyn CompletionProvider>;

/// Create a shared provider from configuration
pub fn create_provider(config: &ProviderConfig) -> Result<SharedProvider> {
    match config.kind {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiProvider::new(config.clone())?)),
        ProviderKind::Vllm => {
            let mut vllm = config.clone();
            vllm.api_base
                .get_or_insert_with(|| llm_constants::DEFAULT_VLLM_BASE.to_string());
            Ok(Arc::new(OpenAiProvider::vllm(vllm)?))
        }
        ProviderKind::Demo => Ok(Arc::new(DemoProvider::new())),
    }
}

/// Validate a base URL, returning it without a trailing slash
pub(crate) fn normalize_api_base(api_base: &str) -> Result<String> {
    let parsed = url::Url::parse(api_base)
        .map_err(|e| ReportError::Config(format!("Invalid api_base '{}': {}", api_base, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ReportError::Config(format!(
            "api_base must be http(s), got '{}'",
            api_base
        )));
    }
    Ok(api_base.trim_end_matches('/').to_string())
}
