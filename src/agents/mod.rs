//! Agent Contract
//!
//! Every generation stage is an [`Agent`]: given a read-only [`RunContext`]
//! and a [`StageInput`] it returns a [`StageOutput`] or an [`AgentError`].
//! Agents never touch run state; the coordinator records what they return.
//!
//! ## Agents
//!
//! | Stage   | Agent           | Invoked                    |
//! |---------|-----------------|----------------------------|
//! | outline | `OutlineAgent`  | once                       |
//! | content | `ContentAgent`  | once per section (fan-out) |
//! | polish  | `PolishAgent`   | once                       |
//! | chart   | `ChartAgent`    | once                       |

mod chart;
mod content;
mod outline;
mod polish;
mod text;

pub use chart::{ChartAgent, parse_chart_response};
pub use content::ContentAgent;
pub use outline::{OutlineAgent, default_outline, parse_outline};
pub use polish::PolishAgent;

pub use crate::workflow::run::StageOutput;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::ai::provider::SharedProvider;
use crate::config::AgentsConfig;
use crate::types::{LlmError, ReportError, Result};
use crate::workflow::run::{RunConfig, RunId, StageName};

// =============================================================================
// Errors
// =============================================================================

/// Stage-level failure reported by an agent
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AgentError {
    /// Worth retrying
    pub transient: bool,
    pub message: String,
    /// Backend hint for the wait before the next attempt
    pub retry_after: Option<Duration>,
}

impl AgentError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::permanent("cancelled")
    }
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        Self {
            transient: err.is_retryable(),
            message: err.to_string(),
            retry_after: err.retry_after,
        }
    }
}

// =============================================================================
// Invocation Inputs
// =============================================================================

/// What one invocation works on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageInput {
    /// Whole-stage invocation (outline, polish, chart)
    Whole,
    /// One section of the content fan-out
    Section { index: usize, title: String },
}

/// Read-only view an agent gets of its run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub config: Arc<RunConfig>,
    /// 1-based attempt of this invocation
    pub attempt: u32,
    cancel: CancellationToken,
    outputs: Arc<BTreeMap<StageName, StageOutput>>,
}

impl RunContext {
    pub fn new(
        run_id: RunId,
        config: Arc<RunConfig>,
        outputs: BTreeMap<StageName, StageOutput>,
    ) -> Self {
        Self {
            run_id,
            config,
            attempt: 0,
            cancel: CancellationToken::new(),
            outputs: Arc::new(outputs),
        }
    }

    /// Same context bound to one attempt's cancellation token
    pub fn for_attempt(&self, attempt: u32, cancel: CancellationToken) -> Self {
        Self {
            attempt,
            cancel,
            ..self.clone()
        }
    }

    /// Output of a succeeded dependency stage
    pub fn output(&self, stage: StageName) -> Option<&StageOutput> {
        self.outputs.get(&stage)
    }

    /// Section titles from the outline stage
    pub fn outline(&self) -> Option<&[String]> {
        match self.output(StageName::Outline) {
            Some(StageOutput::Outline(titles)) => Some(titles),
            _ => None,
        }
    }

    /// Section bodies from the content stage
    pub fn section_bodies(&self) -> Option<&[String]> {
        match self.output(StageName::Content) {
            Some(StageOutput::Content(bodies)) => Some(bodies),
            _ => None,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Outline, or a permanent error naming the agent that needed it
    pub(crate) fn require_outline(&self, agent: &str) -> std::result::Result<&[String], AgentError> {
        self.outline()
            .ok_or_else(|| AgentError::permanent(format!("{}: outline output missing", agent)))
    }

    /// Outline titles zipped with content bodies
    pub(crate) fn require_sections(
        &self,
        agent: &str,
    ) -> std::result::Result<(&[String], &[String]), AgentError> {
        let titles = self.require_outline(agent)?;
        let bodies = self
            .section_bodies()
            .ok_or_else(|| AgentError::permanent(format!("{}: content output missing", agent)))?;
        if titles.len() != bodies.len() {
            return Err(AgentError::permanent(format!(
                "{}: {} titles but {} bodies",
                agent,
                titles.len(),
                bodies.len()
            )));
        }
        Ok((titles, bodies))
    }
}

// =============================================================================
// Agent Trait
// =============================================================================

#[async_trait]
pub trait Agent: Send + Sync {
    /// Stage this agent serves
    fn stage(&self) -> StageName;

    /// Name for logs
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        ctx: &RunContext,
        input: StageInput,
    ) -> std::result::Result<StageOutput, AgentError>;
}

pub type SharedAgent = Arc<dyn Agent>;

// =============================================================================
// Agent Set
// =============================================================================

/// One agent per stage, fixed at construction
#[derive(Clone)]
pub struct AgentSet {
    agents: BTreeMap<StageName, SharedAgent>,
}

impl std::fmt::Debug for AgentSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.agents.iter().map(|(stage, agent)| (stage, agent.name())))
            .finish()
    }
}

impl AgentSet {
    /// Build from a table of agents; each stage must appear exactly once
    pub fn from_agents(agents: impl IntoIterator<Item = SharedAgent>) -> Result<Self> {
        let mut table = BTreeMap::new();
        for agent in agents {
            let stage = agent.stage();
            if table.insert(stage, agent).is_some() {
                return Err(ReportError::Config(format!(
                    "two agents registered for stage '{}'",
                    stage
                )));
            }
        }
        for stage in StageName::ALL {
            if !table.contains_key(&stage) {
                return Err(ReportError::Config(format!(
                    "no agent registered for stage '{}'",
                    stage
                )));
            }
        }
        Ok(Self { agents: table })
    }

    /// The LLM-backed agents sharing one provider
    pub fn llm(provider: SharedProvider, config: &AgentsConfig) -> Result<Self> {
        let table: [SharedAgent; 4] = [
            Arc::new(OutlineAgent::new(provider.clone(), config)),
            Arc::new(ContentAgent::new(provider.clone(), config)),
            Arc::new(PolishAgent::new(provider.clone())),
            Arc::new(ChartAgent::new(provider, config)),
        ];
        Self::from_agents(table)
    }

    pub fn get(&self, stage: StageName) -> Option<&SharedAgent> {
        self.agents.get(&stage)
    }

    /// Copy of this set with one stage's agent swapped
    pub fn with_agent(mut self, agent: SharedAgent) -> Self {
        self.agents.insert(agent.stage(), agent);
        self
    }
}
