//! CLI output formatting

use crate::{
    core::{ExecutionStatus, StageOutcome, StageResult},
    execution::{ExecutionEvent, PipelineOutcome},
    persistence::ExecutionSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a spinner for a running stage
pub fn create_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let template = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(template);
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// One line per finished stage
pub fn format_stage_result(result: &StageResult) -> String {
    let name = format!("{}/{}", result.target, result.stage_name);
    match result.outcome {
        StageOutcome::Success => {
            let digest = result
                .digest
                .as_ref()
                .map(|d| format!(" {}", style(d.short()).dim()))
                .unwrap_or_default();
            format!(
                "{} {}{} {}",
                CHECK,
                style(name).green(),
                digest,
                style(format_duration(Duration::from_millis(result.duration_ms))).dim()
            )
        }
        StageOutcome::Failure => {
            let cause = result
                .cause
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            format!("{} {}: {}", CROSS, style(name).red(), style(cause).red())
        }
        StageOutcome::Skipped => format!(
            "{} {} {}",
            SKIP,
            style(name).dim(),
            style(format!("({})", result.skip_reason.as_deref().unwrap_or("skipped"))).dim()
        ),
    }
}

/// Format an execution event for display; `None` for events shown by the spinner
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            target,
            total_stages,
        } => Some(format!(
            "{} Running {} ({} stages, {})",
            ROCKET,
            style(target).bold(),
            total_stages,
            style(&execution_id.to_string()[..8]).dim()
        )),
        ExecutionEvent::SegmentStarted { segment } => {
            Some(format!("{} {}", INFO, style(segment).cyan().bold()))
        }
        ExecutionEvent::SegmentSkipped { segment, reason } => Some(format!(
            "{} Skipping {}: {}",
            WARN,
            style(segment).yellow(),
            reason
        )),
        ExecutionEvent::StageStarted { .. } => None,
        ExecutionEvent::StageRetrying {
            stage,
            attempt,
            max_retries,
            cause,
        } => Some(format!(
            "{} {} failed ({}), retry {}/{}",
            WARN,
            style(stage).yellow(),
            cause,
            attempt,
            max_retries
        )),
        ExecutionEvent::StageFinished { result } => Some(format_stage_result(result)),
        ExecutionEvent::PipelineCompleted {
            status, exit_code, ..
        } => Some(format!(
            "{} Finished: {} (exit code {})",
            INFO,
            format_status(*status),
            exit_code
        )),
    }
}

/// Prints events as they arrive, with a spinner while a stage runs
#[derive(Default)]
pub struct ConsoleReporter {
    spinner: Mutex<Option<ProgressBar>>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self, event: &ExecutionEvent) {
        let mut spinner = match self.spinner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(running) = spinner.take() {
            running.finish_and_clear();
        }

        if let ExecutionEvent::StageStarted {
            stage,
            description,
            attempt,
            ..
        } = event
        {
            let message = if *attempt > 1 {
                format!("{} ({}, attempt {})", stage, description, attempt)
            } else {
                format!("{} ({})", stage, description)
            };
            *spinner = Some(create_spinner(message));
        }

        if let Some(line) = format_execution_event(event) {
            println!("{}", line);
        }
    }
}

/// Horizontal rule across the terminal
pub fn separator() -> String {
    let width = term_size::dimensions_stdout()
        .map(|(w, _)| w)
        .unwrap_or(80);
    "─".repeat(width)
}

/// Final report: the failing stage's full log, then the verdict
pub fn print_outcome(outcome: &PipelineOutcome) {
    if let Some(failed) = outcome.failed_stage() {
        println!();
        println!(
            "{} Output of {}/{}:",
            CROSS,
            style(&failed.target).bold(),
            style(&failed.stage_name).bold()
        );
        println!("{}", style(separator()).dim());
        println!("{}", failed.log.trim_end());
        println!("{}", style(separator()).dim());
    }

    if let Some(reason) = &outcome.notification_error {
        println!("{} Notification not delivered: {}", WARN, reason);
    }

    println!();
    match &outcome.error {
        None => println!(
            "{} {} completed {}",
            CHECK,
            style(&outcome.target).bold(),
            style("successfully").green()
        ),
        Some(error) => println!(
            "{} {} {}: {} (exit code {})",
            CROSS,
            style(&outcome.target).bold(),
            style(error.category()).red(),
            error,
            outcome.exit_code
        ),
    }
}

/// Format execution summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Cancelled => WARN,
        _ => INFO,
    };

    format!(
        "{} {} {} - {} - {} ({}/{}) at {} [{}]",
        status_icon,
        style(&summary.execution_id.to_string()[..8]).dim(),
        style(summary.started_at.format("%Y-%m-%d %H:%M")).dim(),
        style(&summary.target_name).bold(),
        format_status(summary.status),
        summary.completed_stages,
        summary.total_stages,
        style(short(&summary.revision)).cyan(),
        summary.trigger
    )
}

fn short(revision: &str) -> &str {
    revision.get(..12).unwrap_or(revision)
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}.{}s", secs, duration.subsec_millis() / 100)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
