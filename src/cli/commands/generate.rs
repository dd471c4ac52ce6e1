//! Generate Command
//!
//! Submits one report run and follows it to completion.
//!
//! Usage:
//!   reportflow generate --topic "边缘计算发展趋势" [--kind technical]
//!       [--length 800] [--no-polish] [--no-charts] [--format markdown,json]
//!       [--output DIR] [--provider openai] [--model gpt-4o-mini]
//!
//! Ctrl-C cancels the run; in-flight agent calls are drained before exit.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::agents::AgentSet;
use crate::ai::provider::{ProviderConfig, create_provider};
use crate::cli::progress::ConsoleRenderer;
use crate::cli::ui::Output;
use crate::config::{Config, ConfigLoader, ProviderKind};
use crate::format::{FileFormatter, OutputFormat};
use crate::storage::RunStore;
use crate::types::{ReportError, Result};
use crate::workflow::{ReportKind, ReportRequest, RunId, RunResult, WorkflowCoordinator};

#[derive(Debug, Default)]
pub struct GenerateOptions {
    pub topic: String,
    pub kind: Option<ReportKind>,
    pub length: Option<usize>,
    pub no_polish: bool,
    pub no_charts: bool,
    pub require_polish: bool,
    pub require_charts: bool,
    pub formats: Vec<OutputFormat>,
    pub output: Option<PathBuf>,
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    /// Per-attempt timeout override in seconds
    pub timeout: Option<u64>,
    pub no_store: bool,
}

impl GenerateOptions {
    /// Fold command-line overrides into the loaded configuration
    fn apply(&self, config: &mut Config) {
        if let Some(provider) = self.provider {
            config.llm.provider = provider;
        }
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if let Some(timeout) = self.timeout {
            config.workflow.per_attempt_timeout_secs = timeout;
        }
        if let Some(dir) = &self.output {
            config.output.dir = dir.clone();
        }
        if !self.formats.is_empty() {
            config.output.formats = self.formats.clone();
        }
        if self.no_store {
            config.storage.enabled = false;
        }
    }

    fn request(&self, config: &Config) -> ReportRequest {
        let mut request = ReportRequest::new(self.topic.clone())
            .with_kind(self.kind.unwrap_or_default())
            .with_polish(!self.no_polish)
            .with_charts(!self.no_charts)
            .with_formats(config.output.formats.iter().map(|f| f.to_string()));
        if let Some(length) = self.length {
            request = request.with_target_length(length);
        }
        request.require_polish = self.require_polish;
        request.require_charts = self.require_charts;
        request
    }
}

pub fn run(options: GenerateOptions) -> Result<()> {
    let mut config = ConfigLoader::load()?;
    options.apply(&mut config);
    config.validate()?;

    let output = Output::new();
    let coordinator = build_coordinator(&config)?;
    let request = options.request(&config);

    output.header(&format!("Generating report: {}", request.topic.trim()));
    output.field("Provider", config.llm.provider);
    output.field("Model", &config.llm.model);
    output.field("Output", config.output.dir.display());
    println!();

    let rt = Runtime::new()?;
    let (id, result) = rt.block_on(drive(&coordinator, request, &output))?;
    print_result(&output, id, result)
}

fn build_coordinator(config: &Config) -> Result<WorkflowCoordinator> {
    let provider = create_provider(&ProviderConfig::from(&config.llm))?;
    info!("Using provider: {} ({})", provider.name(), provider.model());

    let agents = AgentSet::llm(provider, &config.agents)?;
    let mut coordinator = WorkflowCoordinator::from_config(agents, config)
        .with_formatter(Arc::new(FileFormatter::new(config.output.dir.clone())));

    if config.storage.enabled {
        let path = ConfigLoader::runs_db_path(config);
        debug!("Run store: {}", path.display());
        let store = RunStore::open(&path)?;
        let recovered = store.recover_interrupted(config.workflow.stale_run_after())?;
        if recovered > 0 {
            warn!(runs = recovered, "Marked abandoned runs as interrupted");
        }
        coordinator = coordinator.with_store(Arc::new(store));
    }

    Ok(coordinator)
}

async fn drive(
    coordinator: &WorkflowCoordinator,
    request: ReportRequest,
    output: &Output,
) -> Result<(RunId, RunResult)> {
    let id = coordinator.submit(request)?;
    let renderer = tokio::spawn(ConsoleRenderer::new().follow(coordinator.watch(id)?));

    let result = tokio::select! {
        result = coordinator.wait(id) => result?,
        _ = tokio::signal::ctrl_c() => {
            coordinator.cancel(id)?;
            output.warning("Cancelling, waiting for in-flight work to finish...");
            coordinator.wait(id).await?
        }
    };

    if let Err(e) = renderer.await {
        debug!("Progress renderer stopped: {}", e);
    }
    Ok((id, result))
}

fn print_result(output: &Output, id: RunId, result: RunResult) -> Result<()> {
    match result {
        RunResult::Succeeded {
            document,
            warnings,
            outputs,
        } => {
            output.success(&format!("Report complete: {}", document.title));
            output.field("Run", id);
            output.field("Sections", document.sections.len());
            output.field("Charts", document.chart_count());
            output.field("Characters", document.char_count());
            for file in &outputs {
                output.field(file.format.as_str(), file.path.display());
            }
            for warning in &warnings {
                output.warning(&warning.to_string());
            }
            Ok(())
        }
        RunResult::Cancelled => {
            output.warning(&format!("Run {} cancelled", id.short()));
            Ok(())
        }
        RunResult::Failed(failure) => Err(ReportError::RunFailed(failure)),
        RunResult::Pending => Err(ReportError::Config(format!(
            "run {} still active after wait",
            id
        ))),
    }
}
