//! Runs Command
//!
//! Inspect run records kept in the run store. These commands only read and
//! delete records; a `generate` running elsewhere keeps owning its run.
//!
//! Usage:
//!   reportflow runs list [--limit 20] [-f json]
//!   reportflow runs show <id> [-f json]
//!   reportflow runs purge <id>

use crate::cli::progress::format_duration;
use crate::cli::ui::Output;
use crate::config::ConfigLoader;
use crate::storage::RunStore;
use crate::types::{ReportError, Result};
use crate::workflow::{RunId, RunState, StageStatus};

fn open_store() -> Result<RunStore> {
    let config = ConfigLoader::load()?;
    let path = ConfigLoader::runs_db_path(&config);
    if !path.exists() {
        return Err(ReportError::Config(format!(
            "No run store at {}. Generate a report first.",
            path.display()
        )));
    }
    RunStore::open(&path)
}

fn parse_id(id: &str) -> Result<RunId> {
    id.parse::<RunId>().map_err(ReportError::Config)
}

fn elapsed(state: &RunState) -> String {
    match state.finished_at {
        Some(finished) => {
            let secs = (finished - state.created_at).num_seconds().max(0) as u64;
            format_duration(secs)
        }
        None => "-".to_string(),
    }
}

pub fn list(limit: usize, format: &str) -> Result<()> {
    let store = open_store()?;
    let runs = store.list(limit)?;

    if format == "json" {
        let reports: Vec<_> = runs.iter().map(RunState::status_report).collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!(
        "{:<10} {:<10} {:<20} {:>8}  TOPIC",
        "RUN", "STATUS", "CREATED", "ELAPSED"
    );
    for run in &runs {
        println!(
            "{:<10} {:<10} {:<20} {:>8}  {}",
            run.id.short(),
            run.status,
            run.created_at.format("%Y-%m-%d %H:%M:%S"),
            elapsed(run),
            run.config.topic
        );
    }
    Ok(())
}

pub fn show(id: &str, format: &str) -> Result<()> {
    let id = parse_id(id)?;
    let store = open_store()?;
    let state = store.load(id)?.ok_or(ReportError::RunNotFound(id))?;
    let report = state.status_report();

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let output = Output::new();
    output.header(&format!("Run {}", report.id));
    output.field("Topic", &report.topic);
    output.field("Status", report.status);
    output.field(
        "Progress",
        format!("{:.0}%", report.progress_fraction * 100.0),
    );
    if report.sections_total > 0 {
        output.field(
            "Sections",
            format!("{}/{}", report.sections_completed, report.sections_total),
        );
    }
    output.field("Elapsed", elapsed(&state));

    println!();
    for stage in &report.stages {
        let detail = match (stage.status, &stage.error) {
            (StageStatus::Failed, Some(error)) => format!(" ({})", error),
            _ => String::new(),
        };
        println!(
            "  {:<8} {:<10} attempts={}{}",
            stage.name, stage.status, stage.attempt, detail
        );
    }

    if let Some(error) = &report.error {
        println!();
        output.error(&error.to_string());
    }
    for warning in &report.warnings {
        output.warning(&warning.to_string());
    }
    for file in &state.outputs {
        output.field(file.format.as_str(), file.path.display());
    }
    Ok(())
}

pub fn purge(id: &str) -> Result<()> {
    let id = parse_id(id)?;
    let store = open_store()?;
    let output = Output::new();

    match store.load(id)? {
        None => Err(ReportError::RunNotFound(id)),
        Some(state) if !state.status.is_terminal() => {
            output.warning(&format!("Run {} is still {}; not purged", id, state.status));
            Ok(())
        }
        Some(_) => {
            store.purge(id)?;
            output.success(&format!("Purged run {}", id));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        let id = RunId::new();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
        assert!(matches!(parse_id("nope"), Err(ReportError::Config(_))));
    }
}
