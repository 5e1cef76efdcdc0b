//! Test tiers and trigger gating

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A named selection of the test corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestTier {
    /// Smoke check only, no tests selected
    Blank,
    Fast,
    Slow,
    Superslow,
}

impl TestTier {
    pub const ALL: [TestTier; 4] = [
        TestTier::Blank,
        TestTier::Fast,
        TestTier::Slow,
        TestTier::Superslow,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TestTier::Blank => "blank",
            TestTier::Fast => "fast",
            TestTier::Slow => "slow",
            TestTier::Superslow => "superslow",
        }
    }
}

impl fmt::Display for TestTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TestTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blank" => Ok(TestTier::Blank),
            "fast" => Ok(TestTier::Fast),
            "slow" => Ok(TestTier::Slow),
            "superslow" => Ok(TestTier::Superslow),
            other => Err(format!("unknown test tier '{}'", other)),
        }
    }
}

/// What started this invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Developer running a target from a terminal
    Local,
    WorkflowDispatch,
    PullRequest,
    Push { default_branch: bool },
    Schedule,
}

impl TriggerKind {
    /// Derive the trigger from the GitHub Actions environment
    pub fn from_env(env: &HashMap<String, String>) -> Self {
        let Some(event) = env.get("GITHUB_EVENT_NAME") else {
            return TriggerKind::Local;
        };
        match event.as_str() {
            "workflow_dispatch" => TriggerKind::WorkflowDispatch,
            "pull_request" | "pull_request_target" => TriggerKind::PullRequest,
            "schedule" => TriggerKind::Schedule,
            "push" => {
                let git_ref = env.get("GITHUB_REF").map(String::as_str).unwrap_or("");
                TriggerKind::Push {
                    default_branch: matches!(git_ref, "refs/heads/master" | "refs/heads/main"),
                }
            }
            _ => TriggerKind::Local,
        }
    }

    /// Whether the run happens inside CI
    pub fn is_ci(&self) -> bool {
        !matches!(self, TriggerKind::Local)
    }

    pub fn name(&self) -> &'static str {
        match self {
            TriggerKind::Local => "local",
            TriggerKind::WorkflowDispatch => "workflow_dispatch",
            TriggerKind::PullRequest => "pull_request",
            TriggerKind::Push { default_branch: true } => "push",
            TriggerKind::Push { default_branch: false } => "push_branch",
            TriggerKind::Schedule => "schedule",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TriggerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" | "manual" => Ok(TriggerKind::Local),
            "workflow_dispatch" => Ok(TriggerKind::WorkflowDispatch),
            "pull_request" => Ok(TriggerKind::PullRequest),
            "push" => Ok(TriggerKind::Push { default_branch: true }),
            "push_branch" => Ok(TriggerKind::Push { default_branch: false }),
            "schedule" => Ok(TriggerKind::Schedule),
            other => Err(format!("unknown trigger '{}'", other)),
        }
    }
}

/// Maps tiers to marker predicates and decides which triggers may run them
pub struct TestTierSelector;

impl TestTierSelector {
    /// Marker predicate selecting the tier's tests
    pub fn select_marker_expression(tier: TestTier) -> &'static str {
        match tier {
            TestTier::Blank => "",
            TestTier::Fast => "not slow and not superslow and not broken_deps",
            TestTier::Slow => "slow and not superslow and not broken_deps",
            TestTier::Superslow => "superslow and not broken_deps",
        }
    }

    /// Expensive tiers only run where their turnaround cost is acceptable
    pub fn is_allowed_for_trigger(tier: TestTier, trigger: &TriggerKind) -> bool {
        match tier {
            TestTier::Blank | TestTier::Fast => true,
            TestTier::Slow => matches!(
                trigger,
                TriggerKind::Local
                    | TriggerKind::WorkflowDispatch
                    | TriggerKind::Schedule
                    | TriggerKind::Push { default_branch: true }
            ),
            TestTier::Superslow => matches!(
                trigger,
                TriggerKind::Local | TriggerKind::WorkflowDispatch | TriggerKind::Schedule
            ),
        }
    }

    /// Command line running a tier inside the image
    pub fn test_command(tier: TestTier, base: &[String], opts: &[String]) -> Vec<String> {
        let mut argv = base.to_vec();
        match tier {
            TestTier::Blank => argv.push("-h".to_string()),
            _ => {
                argv.push("-m".to_string());
                argv.push(Self::select_marker_expression(tier).to_string());
                argv.extend(opts.iter().cloned());
            }
        }
        argv
    }
}
