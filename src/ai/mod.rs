//! AI Integration Layer
//!
//! Text-generation backends used by the agents.

pub mod provider;
pub mod timeout;

pub use provider::{
    Completion, CompletionProvider, CompletionRequest, DemoProvider, ErrorCategory,
    ErrorClassifier, LlmError, OpenAiProvider, PromptKind, ProviderConfig, SharedProvider,
    TokenUsage, create_provider,
};
pub use timeout::{with_llm_timeout, with_timeout};
