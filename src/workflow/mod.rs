//! Workflow Coordination Engine
//!
//! Sequences the generation stages of a report run:
//!
//! ```text
//! outline ──► content (fan-out per section) ──┬──► polish
//!                                             └──► chart
//! ```
//!
//! ## Modules
//!
//! - [`run`]: run state model (ids, configuration, stage records, document)
//! - [`scheduler`]: stage graph and pure eligibility queries
//! - [`retry`]: bounded attempts, per-attempt deadline, backoff
//! - [`aggregator`]: merges stage outputs into the final document
//! - [`coordinator`]: run state machine and caller-facing API

pub mod aggregator;
pub mod coordinator;
pub mod retry;
pub mod run;
pub mod scheduler;

pub use aggregator::{AggregateError, Aggregator, fingerprint};
pub use coordinator::WorkflowCoordinator;
pub use retry::{Attempted, RetryPolicy, TaskFailure};
pub use run::{
    AggregationWarning, CancelAck, ChartDescriptor, ChartType, Document, FailureKind,
    ReportKind, ReportRequest, RunConfig, RunFailure, RunId, RunResult, RunState, RunStatus,
    RunStatusReport, Section, SkipReason, StageName, StageOutput, StageState, StageStatus,
    StageStatusReport,
};
pub use scheduler::{GraphError, StageGraph, StageSpec};
