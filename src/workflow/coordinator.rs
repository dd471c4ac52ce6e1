//! Workflow Coordinator
//!
//! Owns every run's state machine:
//!
//! ```text
//! Pending ──► Running ──┬──► Succeeded
//!    │                  ├──► Failed
//!    └──────────────────┴──► Cancelled
//! ```
//!
//! Each run is driven by one task (the driver), the only writer of its
//! [`RunState`]. Stage invocations run as child tasks and report back
//! through the driver; callers read snapshots from a watch channel.
//!
//! ## Failure policy
//!
//! When a mandatory stage fails, nothing new is started and in-flight work
//! drains before the run ends `Failed`. An optional stage (polish, chart)
//! that fails ends `Skipped` with a warning unless the request marks it
//! required. Cancellation signals every in-flight attempt, waits for the
//! drain, discards all outputs and ends `Cancelled`.

use chrono::Utc;
use dashmap::DashMap;
use futures::{StreamExt, future, stream};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit, mpsc, watch};
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::aggregator::{AggregateError, Aggregator};
use super::retry::{Attempted, RetryPolicy, TaskFailure};
use super::run::{
    AggregationWarning, CancelAck, Document, FailureKind, ReportRequest, RunConfig, RunFailure,
    RunId, RunResult, RunState, RunStatus, RunStatusReport, SkipReason, StageName, StageOutput,
    StageStatus,
};
use super::scheduler::{self, StageGraph};
use crate::agents::{AgentError, AgentSet, RunContext, SharedAgent, StageInput};
use crate::ai::with_timeout;
use crate::config::{Config, ValidationConfig, WorkflowConfig};
use crate::format::{OutputFile, SharedFormatter};
use crate::storage::RunStore;
use crate::types::{ReportError, Result};

type TaskResult<T> = std::result::Result<Attempted<T>, TaskFailure>;
type EventSender = mpsc::UnboundedSender<StageEvent>;

/// Progress reported by stage tasks while they run
#[derive(Debug)]
enum StageEvent {
    Attempt { stage: StageName, attempt: u32 },
    SectionDone { index: usize },
}

struct StageOutcome {
    stage: StageName,
    result: TaskResult<StageOutput>,
}

#[derive(Clone)]
struct RunHandle {
    state: watch::Receiver<RunState>,
    cancel: CancellationToken,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Accepts report requests and drives them to a terminal state
#[derive(Clone)]
pub struct WorkflowCoordinator {
    agents: Arc<AgentSet>,
    limits: ValidationConfig,
    policy: RetryPolicy,
    max_concurrency: usize,
    section_concurrency: usize,
    formatter: Option<SharedFormatter>,
    store: Option<Arc<RunStore>>,
    runs: Arc<DashMap<RunId, RunHandle>>,
}

impl WorkflowCoordinator {
    pub fn new(agents: AgentSet) -> Self {
        let workflow = WorkflowConfig::default();
        Self {
            agents: Arc::new(agents),
            limits: ValidationConfig::default(),
            policy: RetryPolicy::from_config(&workflow),
            max_concurrency: workflow.max_concurrency,
            section_concurrency: workflow.section_concurrency,
            formatter: None,
            store: None,
            runs: Arc::new(DashMap::new()),
        }
    }

    /// Retry, concurrency and validation settings from a loaded config
    pub fn from_config(agents: AgentSet, config: &Config) -> Self {
        Self::new(agents)
            .with_policy(RetryPolicy::from_config(&config.workflow))
            .with_concurrency(
                config.workflow.max_concurrency,
                config.workflow.section_concurrency,
            )
            .with_limits(config.validation.clone())
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// `max_concurrency` bounds agent invocations per run,
    /// `section_concurrency` bounds the content fan-out
    pub fn with_concurrency(mut self, max_concurrency: usize, section_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self.section_concurrency = section_concurrency.max(1);
        self
    }

    pub fn with_limits(mut self, limits: ValidationConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_formatter(mut self, formatter: SharedFormatter) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn with_store(mut self, store: Arc<RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate a request and start a run for it.
    ///
    /// Returns as soon as the run is registered; the run itself proceeds on
    /// the current Tokio runtime.
    pub fn submit(&self, request: ReportRequest) -> Result<RunId> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ReportError::Config(format!("submit needs a Tokio runtime: {}", e)))?;

        let config = request.validate(&self.limits)?;
        let graph =
            StageGraph::for_config(&config).map_err(|e| ReportError::Config(e.to_string()))?;

        let id = RunId::new();
        let state = RunState::new(id, config.clone(), graph.initial_states());
        if let Some(store) = &self.store {
            store.save(&state)?;
        }

        let (sender, receiver) = watch::channel(state);
        let cancel = CancellationToken::new();
        self.runs.insert(
            id,
            RunHandle {
                state: receiver,
                cancel: cancel.clone(),
            },
        );

        let driver = Driver {
            id,
            config: Arc::new(config),
            agents: Arc::clone(&self.agents),
            policy: self.policy.clone(),
            section_concurrency: self.section_concurrency,
            permits: Arc::new(Semaphore::new(self.max_concurrency)),
            formatter: self.formatter.clone(),
            store: self.store.clone(),
            state: sender,
            cancel,
            aggregator: None,
            outputs: BTreeMap::new(),
            failure: None,
        };
        runtime.spawn(driver.drive());

        info!(run = %id, topic = %request.topic.trim(), "Run submitted");
        Ok(id)
    }

    /// Current status, from memory or the run store
    pub fn get_status(&self, id: RunId) -> Result<RunStatusReport> {
        Ok(self.snapshot(id)?.status_report())
    }

    /// Document, pending marker, or failure
    pub fn get_result(&self, id: RunId) -> Result<RunResult> {
        Ok(RunResult::from_state(&self.snapshot(id)?))
    }

    /// Request cancellation. A no-op for terminal runs.
    pub fn cancel(&self, id: RunId) -> Result<CancelAck> {
        if let Some(handle) = self.runs.get(&id) {
            let status = handle.state.borrow().status;
            if status.is_terminal() {
                return Ok(CancelAck::AlreadyTerminal(status));
            }
            handle.cancel.cancel();
            info!(run = %id, "Cancellation requested");
            return Ok(CancelAck::Requested);
        }

        let state = self.stored(id)?;
        Ok(CancelAck::AlreadyTerminal(state.status))
    }

    /// Snapshot channel of a run held in memory
    pub fn watch(&self, id: RunId) -> Result<watch::Receiver<RunState>> {
        self.runs
            .get(&id)
            .map(|handle| handle.state.clone())
            .ok_or(ReportError::RunNotFound(id))
    }

    /// Resolve once the run is terminal
    pub async fn wait(&self, id: RunId) -> Result<RunResult> {
        let Ok(mut receiver) = self.watch(id) else {
            return self.get_result(id);
        };

        match receiver.wait_for(|state| state.status.is_terminal()).await {
            Ok(state) => Ok(RunResult::from_state(&state)),
            Err(_) => Err(ReportError::RunFailed(RunFailure {
                stage: None,
                kind: FailureKind::Internal,
                message: "run driver stopped before the run finished".to_string(),
                attempts: 0,
            })),
        }
    }

    pub async fn wait_timeout(&self, id: RunId, timeout: Duration) -> Result<RunResult> {
        with_timeout(timeout, self.wait(id), "wait for run").await
    }

    /// Status of every run held in memory, oldest first
    pub fn runs(&self) -> Vec<RunStatusReport> {
        let mut reports: Vec<RunStatusReport> = self
            .runs
            .iter()
            .map(|entry| entry.state.borrow().status_report())
            .collect();
        reports.sort_by_key(|r| r.created_at);
        reports
    }

    /// Drop a terminal run from memory and the store. Active runs are kept
    /// and `false` is returned.
    pub fn purge(&self, id: RunId) -> Result<bool> {
        let status = self.snapshot(id)?.status;
        if !status.is_terminal() {
            return Ok(false);
        }

        self.runs.remove(&id);
        if let Some(store) = &self.store {
            store.purge(id)?;
        }
        info!(run = %id, "Run purged");
        Ok(true)
    }

    fn snapshot(&self, id: RunId) -> Result<RunState> {
        if let Some(handle) = self.runs.get(&id) {
            return Ok(handle.state.borrow().clone());
        }
        self.stored(id)
    }

    fn stored(&self, id: RunId) -> Result<RunState> {
        match &self.store {
            Some(store) => store.load(id)?.ok_or(ReportError::RunNotFound(id)),
            None => Err(ReportError::RunNotFound(id)),
        }
    }
}

impl std::fmt::Debug for WorkflowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCoordinator")
            .field("agents", &self.agents)
            .field("policy", &self.policy)
            .field("max_concurrency", &self.max_concurrency)
            .field("section_concurrency", &self.section_concurrency)
            .field("runs", &self.runs.len())
            .finish()
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Single writer of one run's state
struct Driver {
    id: RunId,
    config: Arc<RunConfig>,
    agents: Arc<AgentSet>,
    policy: RetryPolicy,
    section_concurrency: usize,
    permits: Arc<Semaphore>,
    formatter: Option<SharedFormatter>,
    store: Option<Arc<RunStore>>,
    state: watch::Sender<RunState>,
    cancel: CancellationToken,
    aggregator: Option<Aggregator>,
    /// Outputs of succeeded stages, handed to later stages
    outputs: BTreeMap<StageName, StageOutput>,
    /// First unrecoverable failure
    failure: Option<RunFailure>,
}

impl Driver {
    #[instrument(name = "run", skip(self), fields(run = %self.id))]
    async fn drive(mut self) {
        if self.cancel.is_cancelled() {
            self.update(|s| {
                s.transition(RunStatus::Cancelled);
            }).await;
            info!("Run cancelled before start");
            return;
        }

        self.aggregator = Some(Aggregator::new(
            self.config.topic.clone(),
            self.config.report_kind,
        ));
        self.update(|s| {
            s.transition(RunStatus::Running);
        }).await;
        info!(topic = %self.config.topic, kind = %self.config.report_kind, "Run started");

        let (events, mut inbox) = mpsc::unbounded_channel();
        let mut tasks: JoinSet<StageOutcome> = JoinSet::new();
        let mut running: HashMap<task::Id, StageName> = HashMap::new();

        loop {
            if !self.halted() {
                let ready = scheduler::eligible(&self.state.borrow().stages);
                for stage in ready {
                    self.start_stage(stage, &mut tasks, &mut running, &events).await;
                }
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                Some(event) = inbox.recv() => self.on_event(event).await,
                joined = tasks.join_next_with_id() => {
                    // Progress sent before a task finished belongs before its outcome
                    while let Ok(event) = inbox.try_recv() {
                        self.on_event(event).await;
                    }
                    match joined {
                        Some(Ok((id, outcome))) => {
                            running.remove(&id);
                            self.on_outcome(outcome.stage, outcome.result).await;
                        }
                        Some(Err(err)) => {
                            let stage = running.remove(&err.id());
                            error!(stage = ?stage, error = %err, "Stage task aborted");
                            if let Some(stage) = stage {
                                self.on_outcome(stage, Err(TaskFailure {
                                    kind: FailureKind::Internal,
                                    message: format!("stage task aborted: {}", err),
                                    attempts: 0,
                                })).await;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        self.finish().await;
    }

    fn halted(&self) -> bool {
        self.cancel.is_cancelled() || self.failure.is_some()
    }

    /// Render the document on the blocking pool
    async fn write_outputs(
        &self,
        formatter: SharedFormatter,
        document: &Document,
    ) -> Result<Vec<OutputFile>> {
        let document = document.clone();
        let formats = self.config.formats.clone();
        let id = self.id;
        task::spawn_blocking(move || formatter.write(&document, &formats, id))
            .await
            .unwrap_or_else(|e| Err(ReportError::format("output", e.to_string())))
    }

    /// Apply a change to the run state, persist it, then publish it
    ///
    /// Watchers only ever observe states that already reached the store.
    async fn update(&self, change: impl FnOnce(&mut RunState)) {
        let mut next = self.state.borrow().clone();
        change(&mut next);
        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            let snapshot = next.clone();
            match task::spawn_blocking(move || store.save(&snapshot)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Failed to persist run state"),
                Err(e) => warn!(error = %e, "Run state persistence task failed"),
            }
        }
        self.state.send_replace(next);
    }

    async fn start_stage(
        &mut self,
        stage: StageName,
        tasks: &mut JoinSet<StageOutcome>,
        running: &mut HashMap<task::Id, StageName>,
        events: &EventSender,
    ) {
        let Some(agent) = self.agents.get(stage).cloned() else {
            self.on_outcome(
                stage,
                Err(TaskFailure {
                    kind: FailureKind::Internal,
                    message: format!("no agent registered for stage '{}'", stage),
                    attempts: 0,
                }),
            ).await;
            return;
        };

        let now = Utc::now();
        self.update(|s| {
            if let Some(st) = s.stage_mut(stage) {
                st.status = StageStatus::Running;
                st.started_at = Some(now);
            }
        }).await;
        info!(stage = %stage, "Stage started");

        let job = StageJob {
            stage,
            agent,
            ctx: RunContext::new(self.id, Arc::clone(&self.config), self.outputs.clone()),
            policy: self.policy.clone(),
            cancel: self.cancel.clone(),
            permits: Arc::clone(&self.permits),
            events: events.clone(),
            section_concurrency: self.section_concurrency,
        };
        let handle = tasks.spawn(job.run());
        running.insert(handle.id(), stage);
    }

    async fn on_event(&mut self, event: StageEvent) {
        match event {
            StageEvent::Attempt { stage, attempt } => {
                debug!(stage = %stage, attempt, "Attempt started");
                self.update(|s| {
                    if let Some(st) = s.stage_mut(stage) {
                        st.attempt = st.attempt.max(attempt);
                    }
                }).await;
            }
            StageEvent::SectionDone { index } => {
                debug!(section = index, "Section completed");
                self.update(|s| s.sections_completed += 1).await;
            }
        }
    }

    async fn on_outcome(&mut self, stage: StageName, result: TaskResult<StageOutput>) {
        let now = Utc::now();

        if self.cancel.is_cancelled() {
            self.update(|s| {
                if let Some(st) = s.stage_mut(stage) {
                    st.status = StageStatus::Failed;
                    st.error = Some("cancelled".to_string());
                    st.finished_at = Some(now);
                }
            }).await;
            info!(stage = %stage, "Stage stopped by cancellation");
            return;
        }

        match result {
            Ok(Attempted { value, attempts }) => match self.apply_output(&value) {
                Ok(()) => {
                    self.outputs.insert(stage, value.clone());
                    let sections_total = self
                        .aggregator
                        .as_ref()
                        .map_or(0, Aggregator::sections_total);
                    self.update(|s| {
                        if let Some(st) = s.stage_mut(stage) {
                            st.status = StageStatus::Succeeded;
                            st.attempt = st.attempt.max(attempts);
                            st.output = Some(value);
                            st.finished_at = Some(now);
                        }
                        s.sections_total = sections_total;
                    }).await;
                    info!(stage = %stage, attempts, "Stage succeeded");
                }
                Err(err) => self.fail_stage(
                    stage,
                    TaskFailure {
                        kind: FailureKind::Aggregation,
                        message: err.to_string(),
                        attempts,
                    },
                ).await,
            },
            Err(failure) => self.fail_stage(stage, failure).await,
        }
    }

    /// Merge a stage output into the draft document
    fn apply_output(&mut self, output: &StageOutput) -> std::result::Result<(), AggregateError> {
        let aggregator = self
            .aggregator
            .as_mut()
            .ok_or(AggregateError::OutlineMissing)?;

        match output {
            StageOutput::Outline(titles) => aggregator.set_outline(titles.clone()),
            StageOutput::SectionBody { index, body } => {
                aggregator.set_section_body(*index, body.clone())
            }
            StageOutput::Content(bodies) => {
                for (index, body) in bodies.iter().enumerate() {
                    aggregator.set_section_body(index, body.clone())?;
                }
                Ok(())
            }
            StageOutput::Polish(bodies) => aggregator.apply_polish(bodies.clone()),
            StageOutput::Chart(charts) => {
                aggregator.attach_charts(charts.clone());
                Ok(())
            }
        }
    }

    async fn fail_stage(&mut self, stage: StageName, failure: TaskFailure) {
        let now = Utc::now();
        let mandatory = self
            .state
            .borrow()
            .stage(stage)
            .is_some_and(|s| s.mandatory);
        let message = failure.message.clone();

        if mandatory {
            error!(
                stage = %stage,
                kind = %failure.kind,
                attempts = failure.attempts,
                error = %failure.message,
                "Mandatory stage failed, draining"
            );
            self.update(|s| {
                if let Some(st) = s.stage_mut(stage) {
                    st.status = StageStatus::Failed;
                    st.attempt = st.attempt.max(failure.attempts);
                    st.error = Some(message);
                    st.finished_at = Some(now);
                }
            }).await;
            self.failure.get_or_insert(RunFailure {
                stage: Some(stage),
                kind: failure.kind,
                message: failure.message,
                attempts: failure.attempts,
            });
        } else {
            warn!(
                stage = %stage,
                kind = %failure.kind,
                attempts = failure.attempts,
                error = %failure.message,
                "Optional stage failed, continuing without it"
            );
            self.update(|s| {
                if let Some(st) = s.stage_mut(stage) {
                    st.status = StageStatus::Skipped;
                    st.attempt = st.attempt.max(failure.attempts);
                    st.error = Some(message.clone());
                    st.skip_reason = Some(SkipReason::Degraded(message.clone()));
                    st.finished_at = Some(now);
                }
                s.warnings.push(AggregationWarning::StageDegraded {
                    stage,
                    reason: message,
                });
            }).await;
        }
    }

    async fn fail_run(&mut self, failure: RunFailure) {
        warn!(error = %failure, "Run failed");
        self.update(|s| {
            s.error = Some(failure);
            s.transition(RunStatus::Failed);
        }).await;
    }

    async fn finish(&mut self) {
        if self.cancel.is_cancelled() {
            self.outputs.clear();
            self.aggregator = None;
            let now = Utc::now();
            self.update(|s| {
                for st in &mut s.stages {
                    st.output = None;
                    if st.status == StageStatus::Running {
                        st.status = StageStatus::Failed;
                        st.error = Some("cancelled".to_string());
                        st.finished_at = Some(now);
                    }
                }
                s.document = None;
                s.transition(RunStatus::Cancelled);
            }).await;
            info!("Run cancelled");
            return;
        }

        if self.failure.is_none() && !scheduler::is_settled(&self.state.borrow().stages) {
            self.failure = Some(RunFailure {
                stage: None,
                kind: FailureKind::Internal,
                message: "stages left unscheduled".to_string(),
                attempts: 0,
            });
        }
        if let Some(failure) = self.failure.take() {
            self.fail_run(failure).await;
            return;
        }

        let Some(aggregator) = self.aggregator.take() else {
            self.fail_run(RunFailure {
                stage: None,
                kind: FailureKind::Internal,
                message: "document already assembled".to_string(),
                attempts: 0,
            }).await;
            return;
        };

        let (document, warnings) = match aggregator.finalize() {
            Ok(assembled) => assembled,
            Err(err) => {
                self.fail_run(RunFailure {
                    stage: None,
                    kind: FailureKind::Aggregation,
                    message: err.to_string(),
                    attempts: 0,
                }).await;
                return;
            }
        };
        for warning in &warnings {
            warn!(warning = %warning, "Aggregation warning");
        }

        let outputs = match &self.formatter {
            Some(formatter) => match self.write_outputs(Arc::clone(formatter), &document).await {
                Ok(files) => files,
                Err(err) => {
                    self.fail_run(RunFailure {
                        stage: None,
                        kind: FailureKind::Format,
                        message: err.to_string(),
                        attempts: 0,
                    }).await;
                    return;
                }
            },
            None => Vec::new(),
        };

        let sections = document.sections.len();
        let charts = document.chart_count();
        self.update(|s| {
            s.document = Some(document);
            s.warnings.extend(warnings);
            s.outputs = outputs;
            s.transition(RunStatus::Succeeded);
        }).await;
        info!(sections, charts, "Run succeeded");
    }
}

// =============================================================================
// Stage Tasks
// =============================================================================

/// Everything one stage task needs, moved into the task
struct StageJob {
    stage: StageName,
    agent: SharedAgent,
    ctx: RunContext,
    policy: RetryPolicy,
    cancel: CancellationToken,
    permits: Arc<Semaphore>,
    events: EventSender,
    section_concurrency: usize,
}

impl StageJob {
    async fn run(self) -> StageOutcome {
        let result = match self.stage {
            StageName::Content => self.run_sections().await,
            _ => self.run_whole().await,
        };
        StageOutcome {
            stage: self.stage,
            result,
        }
    }

    fn report(&self, event: StageEvent) {
        // Driver gone means the run is over
        let _ = self.events.send(event);
    }

    async fn run_whole(&self) -> TaskResult<StageOutput> {
        let _permit = acquire(&self.permits, &self.cancel).await?;
        let stage = self.stage;

        self.policy
            .execute(stage.as_str(), &self.cancel, |attempt, token| {
                self.report(StageEvent::Attempt { stage, attempt });
                let ctx = self.ctx.for_attempt(attempt, token);
                let agent = Arc::clone(&self.agent);
                async move {
                    let output = agent.invoke(&ctx, StageInput::Whole).await?;
                    if output.stage() != stage || matches!(output, StageOutput::SectionBody { .. })
                    {
                        return Err(AgentError::permanent(format!(
                            "{} agent returned {} output",
                            stage,
                            output.stage()
                        )));
                    }
                    Ok::<_, AgentError>(output)
                }
            })
            .await
    }

    /// Fan out one task per section, bounded by `section_concurrency`.
    /// After the first failure no further section starts; the ones in
    /// flight finish before the stage reports.
    async fn run_sections(&self) -> TaskResult<StageOutput> {
        let Some(titles) = self.ctx.outline().map(<[String]>::to_vec) else {
            return Err(TaskFailure {
                kind: FailureKind::Permanent,
                message: "content: outline output missing".to_string(),
                attempts: 0,
            });
        };

        let halted = AtomicBool::new(false);
        let mut bodies: Vec<Option<String>> = vec![None; titles.len()];
        let mut attempts = 0u32;
        let mut first_failure: Option<TaskFailure> = None;

        let mut sections = stream::iter(titles.into_iter().enumerate())
            .take_while(|_| {
                future::ready(!halted.load(Ordering::Acquire) && !self.cancel.is_cancelled())
            })
            .map(|(index, title)| self.run_section(index, title))
            .buffer_unordered(self.section_concurrency.max(1));

        while let Some((index, result)) = sections.next().await {
            match result {
                Ok(done) => {
                    attempts = attempts.max(done.attempts);
                    bodies[index] = Some(done.value);
                    self.report(StageEvent::SectionDone { index });
                }
                Err(failure) => {
                    attempts = attempts.max(failure.attempts);
                    if !failure.is_cancelled() {
                        warn!(section = index, error = %failure, "Section failed, draining in-flight sections");
                    }
                    halted.store(true, Ordering::Release);
                    first_failure.get_or_insert(failure);
                }
            }
        }
        drop(sections);

        if let Some(failure) = first_failure {
            return Err(failure);
        }
        match bodies.into_iter().collect::<Option<Vec<String>>>() {
            Some(bodies) => Ok(Attempted {
                value: StageOutput::Content(bodies),
                attempts,
            }),
            None => Err(TaskFailure::cancelled(attempts)),
        }
    }

    async fn run_section(&self, index: usize, title: String) -> (usize, TaskResult<String>) {
        let permit = match acquire(&self.permits, &self.cancel).await {
            Ok(permit) => permit,
            Err(failure) => return (index, Err(failure)),
        };

        let task = format!("content[{}]", index);
        let result = self
            .policy
            .execute(&task, &self.cancel, |attempt, token| {
                self.report(StageEvent::Attempt {
                    stage: StageName::Content,
                    attempt,
                });
                let ctx = self.ctx.for_attempt(attempt, token);
                let agent = Arc::clone(&self.agent);
                let input = StageInput::Section {
                    index,
                    title: title.clone(),
                };
                async move {
                    match agent.invoke(&ctx, input).await? {
                        StageOutput::SectionBody { index: got, body } if got == index => {
                            Ok::<_, AgentError>(body)
                        }
                        _ => Err(AgentError::permanent(format!(
                            "content agent returned an unexpected output for section {}",
                            index
                        ))),
                    }
                }
            })
            .await;

        drop(permit);
        (index, result)
    }
}

/// Take a worker slot unless the run is cancelled first
async fn acquire<'a>(
    permits: &'a Semaphore,
    cancel: &CancellationToken,
) -> std::result::Result<SemaphorePermit<'a>, TaskFailure> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TaskFailure::cancelled(0)),
        permit = permits.acquire() => permit.map_err(|_| TaskFailure {
            kind: FailureKind::Internal,
            message: "worker pool closed".to_string(),
            attempts: 0,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::DemoProvider;
    use crate::config::AgentsConfig;

    fn demo_coordinator() -> WorkflowCoordinator {
        let agents = AgentSet::llm(Arc::new(DemoProvider::new()), &AgentsConfig::default()).unwrap();
        WorkflowCoordinator::new(agents)
            .with_policy(RetryPolicy::default().without_jitter())
    }

    #[tokio::test]
    async fn test_demo_run_succeeds_with_charts() {
        let coordinator = demo_coordinator();
        let id = coordinator.submit(ReportRequest::new("边缘计算的发展现状")).unwrap();

        let result = coordinator.wait(id).await.unwrap();
        let document = result.document().expect("document");
        assert!(document.sections.len() >= 3);
        assert!(document.chart_count() > 0);
        assert!(document.chart_count() <= AgentsConfig::default().max_charts);

        let status = coordinator.get_status(id).unwrap();
        assert_eq!(status.status, RunStatus::Succeeded);
        assert_eq!(status.progress_fraction, 1.0);
        assert_eq!(status.sections_completed, status.sections_total);
        assert!(status.stages.iter().all(|s| s.status == StageStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_validation_rejected_before_run() {
        let coordinator = demo_coordinator();
        let err = coordinator.submit(ReportRequest::new("ab")).unwrap_err();
        assert!(matches!(err, ReportError::Validation(_)));
        assert!(coordinator.runs().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let coordinator = demo_coordinator();
        let id = RunId::new();
        assert!(matches!(coordinator.get_status(id), Err(ReportError::RunNotFound(_))));
        assert!(matches!(coordinator.cancel(id), Err(ReportError::RunNotFound(_))));
        assert!(matches!(coordinator.wait(id).await, Err(ReportError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_and_purge_after_terminal() {
        let coordinator = demo_coordinator();
        let id = coordinator
            .submit(ReportRequest::new("分布式数据库选型").with_polish(false))
            .unwrap();
        coordinator.wait(id).await.unwrap();

        assert_eq!(
            coordinator.cancel(id).unwrap(),
            CancelAck::AlreadyTerminal(RunStatus::Succeeded)
        );
        assert!(coordinator.purge(id).unwrap());
        assert!(matches!(coordinator.get_status(id), Err(ReportError::RunNotFound(_))));
    }

    #[test]
    fn test_submit_outside_runtime_is_an_error() {
        let coordinator = demo_coordinator();
        let err = coordinator
            .submit(ReportRequest::new("runtime check"))
            .unwrap_err();
        assert!(matches!(err, ReportError::Config(_)));
    }
}
