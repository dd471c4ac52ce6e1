//! OpenAI-Compatible Provider
//!
//! Chat Completions client used for OpenAI and for self-hosted vLLM
//! servers, which speak the same protocol and usually need no API key.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{
    Completion, CompletionProvider, CompletionRequest, ErrorCategory, ErrorClassifier, LlmError,
    ProviderConfig, TokenUsage, normalize_api_base,
};
use crate::ai::timeout::with_llm_timeout;
use crate::constants::llm as llm_constants;
use crate::types::{ReportError, Result};

/// OpenAI API provider with secure API key handling
pub struct OpenAiProvider {
    name: &'static str,
    /// Never exposed in logs or debug output
    api_key: Option<SecretString>,
    api_base: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl OpenAiProvider {
    /// OpenAI proper; an API key is required
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                ReportError::Config(
                    "OpenAI API key not found. Set OPENAI_API_KEY or REPORTFLOW_LLM__API_KEY"
                        .to_string(),
                )
            })?;
        Self::build("openai", config, Some(api_key))
    }

    /// vLLM server; the key is optional
    pub fn vllm(config: ProviderConfig) -> Result<Self> {
        let api_key = config.api_key.clone();
        Self::build("vllm", config, api_key)
    }

    fn build(name: &'static str, config: ProviderConfig, api_key: Option<String>) -> Result<Self> {
        let api_base = normalize_api_base(
            config
                .api_base
                .as_deref()
                .unwrap_or(llm_constants::DEFAULT_API_BASE),
        )?;

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReportError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name,
            api_key: api_key.map(SecretString::from),
            api_base,
            model: config.model,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
            client,
        })
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: Some(request.max_tokens.unwrap_or(self.max_tokens)),
        }
    }

    async fn send(&self, request: &CompletionRequest) -> std::result::Result<Completion, LlmError> {
        let start_time = Instant::now();
        let body = self.build_request(request);
        let url = format!("{}/chat/completions", self.api_base);

        debug!(provider = self.name, model = %self.model, kind = ?request.kind, "Sending completion request");

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key.expose_secret());
        }

        let response = http
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify(&format!("request failed: {}", e), self.name))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("API error ({}): {}", status, text),
                self.name,
            ));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            LlmError::with_provider(
                ErrorCategory::ParseError,
                format!("Failed to parse response: {}", e),
                self.name,
            )
        })?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage::from_openai(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                LlmError::with_provider(ErrorCategory::ParseError, "Empty completion", self.name)
            })?;

        Ok(Completion {
            text,
            usage,
            elapsed: start_time.elapsed(),
            model: self.model.clone(),
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> std::result::Result<Completion, LlmError> {
        with_llm_timeout(self.timeout, self.send(&request), self.name).await
    }

    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}
