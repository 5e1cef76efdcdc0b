//! CLI command definitions

use crate::core::TriggerKind;
use clap::Args;

/// Run a target
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Target name, e.g. docker_build_rc_image or run_fast_tests.rc
    pub target: String,

    /// What started this run (local, pull_request, push, push_branch,
    /// schedule, workflow_dispatch); read from GITHUB_EVENT_NAME when absent
    #[arg(long, value_parser = parse_trigger)]
    pub trigger: Option<TriggerKind>,

    /// Image to build and run instead of the rc/latest/prod repositories
    #[arg(long)]
    pub image: Option<String>,

    /// Rebuild rc even if the current revision was already built
    #[arg(long)]
    pub rebuild: bool,

    /// Skip the qualification check on promotion
    #[arg(long)]
    pub assume_qualified: bool,

    /// Simulate the container engine instead of calling docker
    #[arg(long)]
    pub dry_run: bool,

    /// Send the end-of-run notification even outside CI
    #[arg(long)]
    pub notify: bool,

    /// Don't save the execution or its qualification records
    #[arg(long)]
    pub no_history: bool,

    /// Extra argument for the test command (repeatable)
    #[arg(long = "opt", allow_hyphen_values = true)]
    pub opts: Vec<String>,

    /// Environment for in-container runs (KEY=VALUE, repeatable)
    #[arg(long = "env", value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,
}

/// List available targets
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Validate settings and target definitions
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Only validate this target
    pub target: Option<String>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Target name to filter by
    #[arg(short, long)]
    pub target: Option<String>,

    /// Number of recent executions to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

pub fn parse_trigger(s: &str) -> Result<TriggerKind, String> {
    s.parse()
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
