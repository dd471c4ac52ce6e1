//! Run State Model
//!
//! Data entities for one workflow execution: identifiers, the immutable
//! run configuration, per-stage execution records, the assembled document,
//! and the failure/warning values surfaced to callers.
//!
//! The coordinator is the only writer of a [`RunState`]; everything else
//! observes snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::ValidationConfig;
use crate::constants;
use crate::format::{OutputFile, OutputFormat};
use crate::types::{ValidationError, ValidationErrorKind};

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier of a run, assigned at submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, for console output
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| format!("Invalid run id '{}': {}", s, e))
    }
}

// =============================================================================
// Report Configuration
// =============================================================================

/// Kind of report, selects the outline template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    #[default]
    Research,
    Business,
    Technical,
    Academic,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Research => "research",
            ReportKind::Business => "business",
            ReportKind::Technical => "technical",
            ReportKind::Academic => "academic",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "research" => Ok(ReportKind::Research),
            "business" => Ok(ReportKind::Business),
            "technical" => Ok(ReportKind::Technical),
            "academic" => Ok(ReportKind::Academic),
            _ => Err(format!(
                "Unknown report kind: {}. Valid values: research, business, technical, academic",
                s
            )),
        }
    }
}

/// Caller input for [`submit`](crate::workflow::WorkflowCoordinator::submit)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportRequest {
    pub topic: String,
    pub report_kind: ReportKind,
    /// Target characters per section
    pub target_length: usize,
    pub enable_polish: bool,
    pub enable_charts: bool,
    /// Polish failure fails the run instead of degrading
    pub require_polish: bool,
    /// Chart failure fails the run instead of degrading
    pub require_charts: bool,
    /// Output format names (`markdown`, `json`)
    pub formats: Vec<String>,
}

impl Default for ReportRequest {
    fn default() -> Self {
        Self {
            topic: String::new(),
            report_kind: ReportKind::default(),
            target_length: constants::agents::DEFAULT_TARGET_LENGTH,
            enable_polish: true,
            enable_charts: true,
            require_polish: false,
            require_charts: false,
            formats: vec![OutputFormat::Markdown.to_string()],
        }
    }
}

impl ReportRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: ReportKind) -> Self {
        self.report_kind = kind;
        self
    }

    pub fn with_target_length(mut self, length: usize) -> Self {
        self.target_length = length;
        self
    }

    pub fn with_polish(mut self, enabled: bool) -> Self {
        self.enable_polish = enabled;
        self
    }

    pub fn with_charts(mut self, enabled: bool) -> Self {
        self.enable_charts = enabled;
        self
    }

    pub fn with_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.formats = formats.into_iter().map(Into::into).collect();
        self
    }

    /// Validate and freeze into a [`RunConfig`]
    pub fn validate(&self, limits: &ValidationConfig) -> Result<RunConfig, ValidationError> {
        let topic = self.topic.trim();
        if topic.is_empty() {
            return Err(
                ValidationError::new(ValidationErrorKind::EmptyTopic, "topic must not be empty")
                    .with_field("topic"),
            );
        }

        let chars = topic.chars().count();
        if chars < limits.min_topic_chars {
            return Err(ValidationError::new(
                ValidationErrorKind::TopicTooShort,
                format!(
                    "topic has {} characters, at least {} required",
                    chars, limits.min_topic_chars
                ),
            )
            .with_field("topic"));
        }
        if chars > limits.max_topic_chars {
            return Err(ValidationError::new(
                ValidationErrorKind::TopicTooLong,
                format!(
                    "topic has {} characters, at most {} allowed",
                    chars, limits.max_topic_chars
                ),
            )
            .with_field("topic"));
        }

        if self.formats.is_empty() {
            return Err(ValidationError::new(
                ValidationErrorKind::NoFormats,
                "at least one output format is required",
            )
            .with_field("formats"));
        }

        let mut formats = Vec::with_capacity(self.formats.len());
        for name in &self.formats {
            let format = name.parse::<OutputFormat>().map_err(|e| {
                ValidationError::new(ValidationErrorKind::UnsupportedFormat, e)
                    .with_field("formats")
            })?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }

        if !(limits.min_target_length..=limits.max_target_length).contains(&self.target_length) {
            return Err(ValidationError::new(
                ValidationErrorKind::InvalidLength,
                format!(
                    "target_length {} outside {}..={}",
                    self.target_length, limits.min_target_length, limits.max_target_length
                ),
            )
            .with_field("target_length"));
        }

        Ok(RunConfig {
            topic: topic.to_string(),
            report_kind: self.report_kind,
            target_length: self.target_length,
            enable_polish: self.enable_polish,
            enable_charts: self.enable_charts,
            require_polish: self.require_polish,
            require_charts: self.require_charts,
            formats,
        })
    }
}

/// Immutable snapshot of a validated request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub topic: String,
    pub report_kind: ReportKind,
    pub target_length: usize,
    pub enable_polish: bool,
    pub enable_charts: bool,
    pub require_polish: bool,
    pub require_charts: bool,
    pub formats: Vec<OutputFormat>,
}

impl RunConfig {
    /// Whether the stage runs at all
    pub fn is_enabled(&self, stage: StageName) -> bool {
        match stage {
            StageName::Outline | StageName::Content => true,
            StageName::Polish => self.enable_polish,
            StageName::Chart => self.enable_charts,
        }
    }

    /// Whether a failure of the stage fails the run
    pub fn is_mandatory(&self, stage: StageName) -> bool {
        match stage {
            StageName::Outline | StageName::Content => true,
            StageName::Polish => self.require_polish,
            StageName::Chart => self.require_charts,
        }
    }
}

// =============================================================================
// Run Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal states are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Legal forward transitions of the run state machine
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

// =============================================================================
// Stages
// =============================================================================

/// Pipeline stages in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageName {
    Outline,
    Content,
    Polish,
    Chart,
}

impl StageName {
    /// All stages, declaration order
    pub const ALL: [StageName; 4] = [
        StageName::Outline,
        StageName::Content,
        StageName::Polish,
        StageName::Chart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Outline => "outline",
            StageName::Content => "content",
            StageName::Polish => "polish",
            StageName::Chart => "chart",
        }
    }

    /// Position in declaration order, used for tie-breaking
    pub fn declaration_index(&self) -> usize {
        match self {
            StageName::Outline => 0,
            StageName::Content => 1,
            StageName::Polish => 2,
            StageName::Chart => 3,
        }
    }

    /// Stages that must finish successfully before this one starts
    pub fn depends_on(&self) -> &'static [StageName] {
        match self {
            StageName::Outline => &[],
            StageName::Content => &[StageName::Outline],
            StageName::Polish | StageName::Chart => &[StageName::Content],
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Idle,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Satisfies a dependency edge
    pub fn satisfies_dependency(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a stage ended `Skipped`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "lowercase")]
pub enum SkipReason {
    /// Turned off in the run configuration
    Disabled,
    /// Optional stage that failed; the run continued without it
    Degraded(String),
}

/// Stage-specific payload of a succeeded stage or section task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StageOutput {
    /// Ordered section titles
    Outline(Vec<String>),
    /// One generated section body (content fan-out sub-task)
    SectionBody { index: usize, body: String },
    /// All section bodies in outline order
    Content(Vec<String>),
    /// Revised bodies in outline order
    Polish(Vec<String>),
    /// Chart descriptors
    Chart(Vec<ChartDescriptor>),
}

impl StageOutput {
    /// Stage that produces this kind of output
    pub fn stage(&self) -> StageName {
        match self {
            StageOutput::Outline(_) => StageName::Outline,
            StageOutput::SectionBody { .. } | StageOutput::Content(_) => StageName::Content,
            StageOutput::Polish(_) => StageName::Polish,
            StageOutput::Chart(_) => StageName::Chart,
        }
    }
}

/// Execution record of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub name: StageName,
    pub depends_on: Vec<StageName>,
    pub mandatory: bool,
    /// Invocations so far (for content: the most used by any section)
    pub attempt: u32,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StageOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageState {
    pub fn new(name: StageName, mandatory: bool) -> Self {
        Self {
            name,
            depends_on: name.depends_on().to_vec(),
            mandatory,
            attempt: 0,
            status: StageStatus::Idle,
            output: None,
            error: None,
            skip_reason: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn disabled(name: StageName) -> Self {
        Self {
            status: StageStatus::Skipped,
            skip_reason: Some(SkipReason::Disabled),
            ..Self::new(name, false)
        }
    }

    /// Counts toward progress (disabled stages do not)
    pub fn is_enabled(&self) -> bool {
        self.skip_reason != Some(SkipReason::Disabled)
    }
}

// =============================================================================
// Document
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Scatter,
    Histogram,
    Box,
    Heatmap,
    Table,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
            ChartType::Scatter => "scatter",
            ChartType::Histogram => "histogram",
            ChartType::Box => "box",
            ChartType::Heatmap => "heatmap",
            ChartType::Table => "table",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bar" => Ok(ChartType::Bar),
            "line" => Ok(ChartType::Line),
            "pie" => Ok(ChartType::Pie),
            "scatter" => Ok(ChartType::Scatter),
            "histogram" => Ok(ChartType::Histogram),
            "box" => Ok(ChartType::Box),
            "heatmap" => Ok(ChartType::Heatmap),
            "table" => Ok(ChartType::Table),
            other => Err(format!("Unsupported chart type: {}", other)),
        }
    }
}

/// A chart the report should carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartDescriptor {
    pub chart_type: ChartType,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data_concept: String,
    /// 1 (low) ..= 5 (high)
    pub priority: u8,
    /// Title of the section this chart belongs to; `None` = appendix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub charts: Vec<ChartDescriptor>,
}

/// Final report, produced once per run by the aggregator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub report_kind: ReportKind,
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub appendix: Vec<ChartDescriptor>,
    /// SHA-256 over the serialized sections and appendix
    pub fingerprint: String,
}

impl Document {
    pub fn chart_count(&self) -> usize {
        self.sections.iter().map(|s| s.charts.len()).sum::<usize>() + self.appendix.len()
    }

    pub fn char_count(&self) -> usize {
        self.sections.iter().map(|s| s.body.chars().count()).sum()
    }
}

// =============================================================================
// Failures and Warnings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Agent reported a permanent error
    Permanent,
    /// Transient errors until attempts ran out
    Exhausted,
    /// Last attempt hit the per-attempt deadline
    TimedOut,
    /// Cancellation observed
    Cancelled,
    /// Stage output could not be merged
    Aggregation,
    /// Rendering the document failed
    Format,
    /// Process ended while the run was active
    Interrupted,
    /// Stage task panicked or the schedule stalled
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Permanent => "permanent",
            Self::Exhausted => "exhausted",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Aggregation => "aggregation",
            Self::Format => "format",
            Self::Interrupted => "interrupted",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First unrecoverable cause of a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// Failing stage; `None` for run-level sites (format, interruption)
    pub stage: Option<StageName>,
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
}

impl RunFailure {
    pub fn site(&self) -> &'static str {
        match (self.stage, self.kind) {
            (Some(stage), _) => stage.as_str(),
            (None, FailureKind::Format) => "format",
            (None, FailureKind::Interrupted) => "process",
            (None, _) => "run",
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts > 0 {
            write!(
                f,
                "{} failed ({}) after {} attempt(s): {}",
                self.site(),
                self.kind,
                self.attempts,
                self.message
            )
        } else {
            write!(f, "{} failed ({}): {}", self.site(), self.kind, self.message)
        }
    }
}

/// Non-fatal issue attached to a run result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregationWarning {
    /// Chart referenced a section not in the outline and was dropped
    OrphanChart { chart: String, section: String },
    /// Optional stage failed and was skipped
    StageDegraded { stage: StageName, reason: String },
}

impl fmt::Display for AggregationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrphanChart { chart, section } => write!(
                f,
                "chart '{}' dropped: section '{}' not in outline",
                chart, section
            ),
            Self::StageDegraded { stage, reason } => {
                write!(f, "{} stage skipped after failure: {}", stage, reason)
            }
        }
    }
}

// =============================================================================
// Run State
// =============================================================================

/// Mutable record of one workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub id: RunId,
    pub config: RunConfig,
    pub status: RunStatus,
    /// Planned execution order
    pub stages: Vec<StageState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
    #[serde(default)]
    pub warnings: Vec<AggregationWarning>,
    #[serde(default)]
    pub outputs: Vec<OutputFile>,
    #[serde(default)]
    pub sections_total: usize,
    #[serde(default)]
    pub sections_completed: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    pub fn new(id: RunId, config: RunConfig, stages: Vec<StageState>) -> Self {
        Self {
            id,
            config,
            status: RunStatus::Pending,
            stages,
            document: None,
            error: None,
            warnings: Vec::new(),
            outputs: Vec::new(),
            sections_total: 0,
            sections_completed: 0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn stage(&self, name: StageName) -> Option<&StageState> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_mut(&mut self, name: StageName) -> Option<&mut StageState> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    /// Apply a state machine transition; illegal transitions are ignored
    pub fn transition(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    pub fn status_report(&self) -> RunStatusReport {
        RunStatusReport {
            id: self.id,
            topic: self.config.topic.clone(),
            status: self.status,
            stages: self
                .stages
                .iter()
                .map(|s| StageStatusReport {
                    name: s.name,
                    status: s.status,
                    attempt: s.attempt,
                    mandatory: s.mandatory,
                    error: s.error.clone(),
                    skip_reason: s.skip_reason.clone(),
                })
                .collect(),
            progress_fraction: crate::workflow::scheduler::progress_fraction(&self.stages),
            sections_completed: self.sections_completed,
            sections_total: self.sections_total,
            error: self.error.clone(),
            warnings: self.warnings.clone(),
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }
}

// =============================================================================
// Caller-facing Views
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStatusReport {
    pub name: StageName,
    pub status: StageStatus,
    pub attempt: u32,
    pub mandatory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

/// Answer to `get_status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatusReport {
    pub id: RunId,
    pub topic: String,
    pub status: RunStatus,
    pub stages: Vec<StageStatusReport>,
    /// Terminal enabled stages / enabled stages
    pub progress_fraction: f64,
    pub sections_completed: usize,
    pub sections_total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunFailure>,
    #[serde(default)]
    pub warnings: Vec<AggregationWarning>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStatusReport {
    pub fn stage(&self, name: StageName) -> Option<&StageStatusReport> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// Answer to `get_result`
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    /// Not terminal yet
    Pending,
    Succeeded {
        document: Document,
        warnings: Vec<AggregationWarning>,
        outputs: Vec<OutputFile>,
    },
    Failed(RunFailure),
    /// Cancelled runs carry no document
    Cancelled,
}

impl RunResult {
    pub fn from_state(state: &RunState) -> Self {
        match state.status {
            RunStatus::Pending | RunStatus::Running => RunResult::Pending,
            RunStatus::Cancelled => RunResult::Cancelled,
            RunStatus::Failed => RunResult::Failed(state.error.clone().unwrap_or(RunFailure {
                stage: None,
                kind: FailureKind::Internal,
                message: "run failed without a recorded cause".to_string(),
                attempts: 0,
            })),
            RunStatus::Succeeded => match &state.document {
                Some(document) => RunResult::Succeeded {
                    document: document.clone(),
                    warnings: state.warnings.clone(),
                    outputs: state.outputs.clone(),
                },
                None => RunResult::Failed(RunFailure {
                    stage: None,
                    kind: FailureKind::Internal,
                    message: "succeeded run has no document".to_string(),
                    attempts: 0,
                }),
            },
        }
    }

    pub fn document(&self) -> Option<&Document> {
        match self {
            RunResult::Succeeded { document, .. } => Some(document),
            _ => None,
        }
    }
}

/// Answer to `cancel`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelAck {
    /// Signal delivered; the run drains and then ends `Cancelled`
    Requested,
    /// Run already terminal; nothing changed
    AlreadyTerminal(RunStatus),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ValidationConfig {
        ValidationConfig::default()
    }

    #[test]
    fn test_validate_accepts_short_cjk_topic() {
        let request = ReportRequest::new("十字符主题测试")
            .with_polish(false)
            .with_charts(false);
        let config = request.validate(&limits()).unwrap();
        assert_eq!(config.topic, "十字符主题测试");
        assert_eq!(config.formats, vec![OutputFormat::Markdown]);
        assert!(!config.is_enabled(StageName::Polish));
    }

    #[test]
    fn test_validate_rejections() {
        let cases = [
            (ReportRequest::new("   "), ValidationErrorKind::EmptyTopic),
            (ReportRequest::new("abcd"), ValidationErrorKind::TopicTooShort),
            (
                ReportRequest::new("x".repeat(201)),
                ValidationErrorKind::TopicTooLong,
            ),
            (
                ReportRequest::new("valid topic").with_formats(Vec::<String>::new()),
                ValidationErrorKind::NoFormats,
            ),
            (
                ReportRequest::new("valid topic").with_formats(["docx"]),
                ValidationErrorKind::UnsupportedFormat,
            ),
            (
                ReportRequest::new("valid topic").with_target_length(10),
                ValidationErrorKind::InvalidLength,
            ),
        ];

        for (request, kind) in cases {
            let err = request.validate(&limits()).unwrap_err();
            assert_eq!(err.kind, kind, "request: {:?}", request);
        }
    }

    #[test]
    fn test_validate_dedups_formats() {
        let config = ReportRequest::new("valid topic")
            .with_formats(["markdown", "json", "Markdown"])
            .validate(&limits())
            .unwrap();
        assert_eq!(config.formats, vec![OutputFormat::Markdown, OutputFormat::Json]);
    }

    #[test]
    fn test_run_status_transitions() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Cancelled));
        assert!(!RunStatus::Succeeded.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Cancelled.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Succeeded));
    }

    #[test]
    fn test_terminal_state_is_absorbing() {
        let config = ReportRequest::new("valid topic")
            .validate(&limits())
            .unwrap();
        let mut state = RunState::new(RunId::new(), config, Vec::new());
        assert!(state.transition(RunStatus::Running));
        assert!(state.transition(RunStatus::Failed));
        assert!(state.finished_at.is_some());
        assert!(!state.transition(RunStatus::Succeeded));
        assert_eq!(state.status, RunStatus::Failed);
    }

    #[test]
    fn test_run_id_parse() {
        let id = RunId::new();
        assert_eq!(id.to_string().parse::<RunId>().unwrap(), id);
        assert_eq!(id.short().len(), 8);
        assert!("not-a-uuid".parse::<RunId>().is_err());
    }

    #[test]
    fn test_failure_display_names_stage() {
        let failure = RunFailure {
            stage: Some(StageName::Outline),
            kind: FailureKind::Permanent,
            message: "bad prompt".to_string(),
            attempts: 1,
        };
        assert_eq!(
            failure.to_string(),
            "outline failed (permanent) after 1 attempt(s): bad prompt"
        );

        let format = RunFailure {
            stage: None,
            kind: FailureKind::Format,
            message: "disk full".to_string(),
            attempts: 0,
        };
        assert_eq!(format.site(), "format");
    }

    #[test]
    fn test_result_for_cancelled_has_no_document() {
        let config = ReportRequest::new("valid topic")
            .validate(&limits())
            .unwrap();
        let mut state = RunState::new(RunId::new(), config, Vec::new());
        state.transition(RunStatus::Running);
        state.transition(RunStatus::Cancelled);
        let result = RunResult::from_state(&state);
        assert_eq!(result, RunResult::Cancelled);
        assert!(result.document().is_none());
    }
}
