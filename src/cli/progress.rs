//! Live Run Progress
//!
//! Follows a run's snapshot channel and renders it to the console:
//! one line per stage transition, plus a redrawn status line with the
//! overall progress bar and the content fan-out counter.

use std::collections::HashMap;
use std::time::Instant;

use console::style;
use tokio::sync::watch;

use crate::workflow::run::{RunState, SkipReason, StageName, StageStatus};
use crate::workflow::scheduler;

const SPINNER: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
const BAR_WIDTH: usize = 30;

pub struct ConsoleRenderer {
    started: Instant,
    show_spinner: bool,
    seen: HashMap<StageName, (StageStatus, u32)>,
    ticks: usize,
}

impl ConsoleRenderer {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            show_spinner: true,
            seen: HashMap::new(),
            ticks: 0,
        }
    }

    pub fn with_spinner(mut self, show: bool) -> Self {
        self.show_spinner = show;
        self
    }

    /// Stage changes since the previous snapshot
    pub fn transitions(&mut self, state: &RunState) -> Vec<String> {
        let mut lines = Vec::new();

        for stage in &state.stages {
            let current = (stage.status, stage.attempt);
            if self.seen.get(&stage.name) == Some(&current) {
                continue;
            }
            self.seen.insert(stage.name, current);

            let line = match stage.status {
                StageStatus::Idle => continue,
                StageStatus::Running if stage.attempt > 1 => format!(
                    "{} {} retry (attempt {})",
                    style("↻").yellow(),
                    stage.name,
                    stage.attempt
                ),
                StageStatus::Running => format!("{} {} started", style("▸").cyan(), stage.name),
                StageStatus::Succeeded => format!("{} {}", style("✓").green(), stage.name),
                StageStatus::Failed => format!(
                    "{} {}: {}",
                    style("✗").red(),
                    stage.name,
                    stage.error.as_deref().unwrap_or("failed")
                ),
                StageStatus::Skipped => match &stage.skip_reason {
                    Some(SkipReason::Degraded(reason)) => format!(
                        "{} {} skipped: {}",
                        style("⚠").yellow(),
                        stage.name,
                        reason
                    ),
                    _ => format!("{} {} disabled", style("-").dim(), stage.name),
                },
            };
            lines.push(line);
        }

        lines
    }

    /// Single status line for the current snapshot
    pub fn render(&self, state: &RunState) -> String {
        let spinner = if self.show_spinner && !state.status.is_terminal() {
            format!("{} ", SPINNER[self.ticks % SPINNER.len()])
        } else {
            String::new()
        };

        let fraction = scheduler::progress_fraction(&state.stages);
        let sections = if state.sections_total > 0 {
            format!(
                " sections {}/{}",
                state.sections_completed, state.sections_total
            )
        } else {
            String::new()
        };

        format!(
            "{}{} {} {:>3.0}%{} {}",
            spinner,
            state.status,
            render_progress_bar(fraction, BAR_WIDTH),
            fraction * 100.0,
            sections,
            format_duration(self.started.elapsed().as_secs())
        )
    }

    /// Render until the run is terminal or its driver goes away
    pub async fn follow(mut self, mut receiver: watch::Receiver<RunState>) {
        loop {
            let state = receiver.borrow_and_update().clone();
            let lines = self.transitions(&state);
            if !lines.is_empty() {
                print!("\r\x1B[K");
                for line in lines {
                    println!("  {}", line);
                }
            }
            print!("\r\x1B[K{}", self.render(&state));
            self.ticks += 1;

            if state.status.is_terminal() || receiver.changed().await.is_err() {
                break;
            }
        }

        println!();
    }
}

impl Default for ConsoleRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a progress bar for a fraction in 0.0..=1.0
fn render_progress_bar(fraction: f64, width: usize) -> String {
    let filled = ((fraction.clamp(0.0, 1.0) * width as f64) as usize).min(width);
    let empty = width - filled;

    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format duration as human-readable string
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
