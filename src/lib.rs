//! ReportFlow - Multi-Agent Report Generation
//!
//! Turns a topic into a structured report by coordinating four agents over
//! a fixed stage graph: an outline, per-section content written
//! concurrently, then polishing and chart planning side by side.
//!
//! ## Core Features
//!
//! - **Workflow Coordinator**: one driver task per run, bounded concurrency,
//!   per-attempt timeouts, retry with backoff, cooperative cancellation
//! - **Graceful Degradation**: optional stages are skipped with a warning
//!   instead of failing the report
//! - **Run Store**: SQLite run records with recovery of interrupted runs
//! - **Providers**: OpenAI-compatible backends (OpenAI, vLLM) and an offline
//!   demo backend
//!
//! ## Quick Start
//!
//! ```ignore
//! use reportflow::{AgentSet, ReportRequest, WorkflowCoordinator};
//! use reportflow::ai::DemoProvider;
//!
//! let agents = AgentSet::llm(Arc::new(DemoProvider::new()), &AgentsConfig::default())?;
//! let coordinator = WorkflowCoordinator::new(agents);
//! let id = coordinator.submit(ReportRequest::new("边缘计算发展趋势"))?;
//! let result = coordinator.wait(id).await?;
//! ```
//!
//! ## Modules
//!
//! - [`workflow`]: run model, stage graph, retry policy, aggregation, coordinator
//! - [`agents`]: agent contract and the LLM-backed stage agents
//! - [`ai`]: text-generation providers and timeouts
//! - [`format`]: Markdown and JSON report files
//! - [`storage`]: SQLite persistence with connection pooling
//! - [`config`]: layered configuration

pub mod agents;
pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod format;
pub mod storage;
pub mod types;
pub mod workflow;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader, ProviderKind};

// Error Types
pub use types::error::{ErrorCategory, ReportError, Result, ResultExt, ValidationError};

// Storage
pub use storage::{Database, PoolConfig, RunStore, SharedDatabase};

// =============================================================================
// Workflow Re-exports
// =============================================================================

pub use workflow::{
    CancelAck, Document, ReportKind, ReportRequest, RetryPolicy, RunFailure, RunId, RunResult,
    RunStatus, RunStatusReport, StageName, StageStatus, WorkflowCoordinator,
};

pub use agents::{Agent, AgentError, AgentSet, RunContext, StageInput, StageOutput};

pub use ai::{CompletionProvider, SharedProvider, create_provider, with_timeout};

pub use format::{FileFormatter, OutputFormat, ReportFormatter};
