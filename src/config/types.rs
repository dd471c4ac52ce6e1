//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/reportflow/) and project (.reportflow/) level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants;
use crate::format::OutputFormat;
use crate::types::{ReportError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Text-generation backend settings
    pub llm: LlmConfig,

    /// Retry, timeout and concurrency settings for runs
    pub workflow: WorkflowConfig,

    /// Submission validation limits
    pub validation: ValidationConfig,

    /// Per-agent tuning
    pub agents: AgentsConfig,

    /// Report output settings
    pub output: OutputConfig,

    /// Run record persistence
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            workflow: WorkflowConfig::default(),
            validation: ValidationConfig::default(),
            agents: AgentsConfig::default(),
            output: OutputConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `ReportError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ReportError::Config(format!(
                "LLM temperature must be between 0.0 and 2.0, got {}",
                self.llm.temperature
            )));
        }

        if self.llm.timeout_secs == 0 {
            return Err(ReportError::Config(
                "LLM timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.workflow.max_attempts == 0 {
            return Err(ReportError::Config(
                "workflow.max_attempts must be at least 1".to_string(),
            ));
        }

        if self.workflow.per_attempt_timeout_secs == 0 {
            return Err(ReportError::Config(
                "workflow.per_attempt_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.workflow.max_concurrency == 0 || self.workflow.section_concurrency == 0 {
            return Err(ReportError::Config(
                "workflow concurrency limits must be at least 1".to_string(),
            ));
        }

        if self.workflow.base_delay_ms > self.workflow.max_delay_ms {
            return Err(ReportError::Config(format!(
                "workflow.base_delay_ms ({}) exceeds workflow.max_delay_ms ({})",
                self.workflow.base_delay_ms, self.workflow.max_delay_ms
            )));
        }

        if self.workflow.backoff_factor < 1.0 {
            return Err(ReportError::Config(format!(
                "workflow.backoff_factor must be >= 1.0, got {}",
                self.workflow.backoff_factor
            )));
        }

        if self.validation.min_topic_chars == 0
            || self.validation.min_topic_chars > self.validation.max_topic_chars
        {
            return Err(ReportError::Config(format!(
                "validation topic bounds are inconsistent: min {} / max {}",
                self.validation.min_topic_chars, self.validation.max_topic_chars
            )));
        }

        if self.agents.min_sections == 0 || self.agents.min_sections > self.agents.max_sections {
            return Err(ReportError::Config(format!(
                "agents section bounds are inconsistent: min {} / max {}",
                self.agents.min_sections, self.agents.max_sections
            )));
        }

        if self.output.formats.is_empty() {
            return Err(ReportError::Config(
                "output.formats must list at least one format".to_string(),
            ));
        }

        Ok(())
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

/// Backend selector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI chat-completions API
    OpenAi,
    /// Self-hosted vLLM server speaking the OpenAI protocol
    Vllm,
    /// Offline canned responses
    #[default]
    Demo,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Vllm => write!(f, "vllm"),
            ProviderKind::Demo => write!(f, "demo"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "vllm" => Ok(ProviderKind::Vllm),
            "demo" => Ok(ProviderKind::Demo),
            _ => Err(format!(
                "Unknown provider: {}. Valid values: openai, vllm, demo",
                s
            )),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider type
    pub provider: ProviderKind,

    /// Model name
    pub model: String,

    /// API base URL (None = provider default)
    pub api_base: Option<String>,

    /// API key, never serialized to output
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Sampling temperature
    pub temperature: f32,

    /// Completion budget per request
    pub max_tokens: u32,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Demo,
            model: "gpt-4o-mini".to_string(),
            api_base: None,
            api_key: None,
            timeout_secs: constants::llm::DEFAULT_TIMEOUT_SECS,
            temperature: constants::llm::DEFAULT_TEMPERATURE,
            max_tokens: constants::llm::DEFAULT_MAX_TOKENS,
        }
    }
}

// =============================================================================
// Workflow Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Attempts per agent task, first attempt included
    pub max_attempts: u32,

    /// Deadline for a single agent invocation
    pub per_attempt_timeout_secs: u64,

    /// Backoff base delay
    pub base_delay_ms: u64,

    /// Backoff ceiling
    pub max_delay_ms: u64,

    /// Backoff multiplier per attempt
    pub backoff_factor: f64,

    /// Add random jitter to backoff delays
    pub jitter: bool,

    /// Agent invocations in flight per run
    pub max_concurrency: usize,

    /// Sections generated concurrently by the content stage
    pub section_concurrency: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::retry::DEFAULT_MAX_ATTEMPTS,
            per_attempt_timeout_secs: constants::retry::DEFAULT_PER_ATTEMPT_TIMEOUT_SECS,
            base_delay_ms: constants::retry::BASE_DELAY_MS,
            max_delay_ms: constants::retry::MAX_DELAY_MS,
            backoff_factor: constants::retry::BACKOFF_FACTOR,
            jitter: true,
            max_concurrency: constants::concurrency::DEFAULT_MAX_CONCURRENCY,
            section_concurrency: constants::concurrency::DEFAULT_SECTION_CONCURRENCY,
        }
    }
}

impl WorkflowConfig {
    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.per_attempt_timeout_secs)
    }

    /// How long an active run record may go without an update before it is
    /// treated as abandoned. A live driver writes at least once per attempt
    /// or backoff.
    pub fn stale_run_after(&self) -> Duration {
        (self.per_attempt_timeout() + Duration::from_millis(self.max_delay_ms))
            * constants::storage::STALE_RUN_FACTOR
    }
}

// =============================================================================
// Validation Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Minimum topic length (characters)
    pub min_topic_chars: usize,

    /// Maximum topic length (characters)
    pub max_topic_chars: usize,

    /// Smallest accepted target length per section
    pub min_target_length: usize,

    /// Largest accepted target length per section
    pub max_target_length: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_topic_chars: constants::validation::MIN_TOPIC_CHARS,
            max_topic_chars: constants::validation::MAX_TOPIC_CHARS,
            min_target_length: constants::validation::MIN_TARGET_LENGTH,
            max_target_length: constants::validation::MAX_TARGET_LENGTH,
        }
    }
}

// =============================================================================
// Agent Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Outline falls back to a default when fewer sections are parsed
    pub min_sections: usize,

    /// Outline is truncated to this many sections
    pub max_sections: usize,

    /// Writing style handed to the content agent
    pub writing_style: String,

    /// Charts kept per report
    pub max_charts: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            min_sections: constants::agents::MIN_SECTIONS,
            max_sections: constants::agents::MAX_SECTIONS,
            writing_style: "professional".to_string(),
            max_charts: constants::agents::MAX_CHARTS_PER_REPORT,
        }
    }
}

// =============================================================================
// Output Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory reports are written to
    pub dir: PathBuf,

    /// Formats used when a request names none
    pub formats: Vec<OutputFormat>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("outputs"),
            formats: vec![OutputFormat::Markdown],
        }
    }
}

// =============================================================================
// Storage Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Persist run records
    pub enabled: bool,

    /// Database path (None = .reportflow/runs.db)
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.llm.provider, ProviderKind::Demo);
        assert_eq!(config.workflow.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_stale_run_window_covers_attempt_and_backoff() {
        let workflow = WorkflowConfig {
            per_attempt_timeout_secs: 60,
            max_delay_ms: 30_000,
            ..Default::default()
        };
        assert_eq!(workflow.stale_run_after(), Duration::from_secs(270));
    }

    #[test]
    fn test_provider_kind() {
        assert_eq!(ProviderKind::OpenAi.to_string(), "openai");
        assert_eq!("vLLM".parse::<ProviderKind>().unwrap(), ProviderKind::Vllm);
        assert!("anthropic".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_api_key_redacted_and_not_serialized() {
        let mut config = LlmConfig::default();
        config.api_key = Some("sk-secret".to_string());

        let debug = format!("{:?}", config);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-secret"));

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.workflow.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ReportError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let mut config = Config::default();
        config.workflow.base_delay_ms = 10_000;
        config.workflow.max_delay_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_section_bounds() {
        let mut config = Config::default();
        config.agents.min_sections = 8;
        config.agents.max_sections = 4;
        assert!(config.validate().is_err());
    }
}
