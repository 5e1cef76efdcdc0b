//! Stage domain model

use crate::core::{artifact::ImageTag, tier::TestTier};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Broad category of a stage, used for error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Build,
    Login,
    Push,
    Pull,
    Tag,
    Test,
    Exec,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Build => "build",
            StageKind::Login => "login",
            StageKind::Push => "push",
            StageKind::Pull => "pull",
            StageKind::Tag => "tag",
            StageKind::Test => "test",
            StageKind::Exec => "exec",
        };
        f.write_str(name)
    }
}

/// The external action a stage performs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageAction {
    /// Build an image; rc builds are content-addressed by revision
    Build { tag: ImageTag, use_cache: bool },

    /// Re-tag an existing digest. `requires` lists the tiers the source
    /// digest must have passed.
    Tag {
        from: ImageTag,
        to: ImageTag,
        requires: Vec<TestTier>,
    },

    Push { tag: ImageTag },

    Pull { tag: ImageTag },

    /// Authenticate against the image registry
    Login,

    /// Run a test tier inside the image
    RunTests {
        tier: TestTier,
        tag: ImageTag,
        ci: bool,
    },

    /// Run a command inside the image
    Exec { tag: ImageTag, argv: Vec<String> },

    /// List local images of the tag's repository
    ListImages { tag: ImageTag },

    /// Report the resolved invocation settings
    PrintSetup,
}

impl StageAction {
    pub fn kind(&self) -> StageKind {
        match self {
            StageAction::Build { .. } => StageKind::Build,
            StageAction::Tag { .. } => StageKind::Tag,
            StageAction::Login => StageKind::Login,
            StageAction::Push { .. } => StageKind::Push,
            StageAction::Pull { .. } => StageKind::Pull,
            StageAction::RunTests { .. } => StageKind::Test,
            StageAction::Exec { .. } | StageAction::ListImages { .. } | StageAction::PrintSetup => {
                StageKind::Exec
            }
        }
    }

    /// Whether the action talks to the remote registry
    pub fn needs_registry(&self) -> bool {
        matches!(
            self,
            StageAction::Login | StageAction::Push { .. } | StageAction::Pull { .. }
        )
    }

    /// Human-readable summary for plans and logs
    pub fn describe(&self) -> String {
        match self {
            StageAction::Build { tag, use_cache } => {
                if *use_cache {
                    format!("build {} (with cache)", tag)
                } else {
                    format!("build {} (no cache)", tag)
                }
            }
            StageAction::Tag { from, to, requires } => {
                if requires.is_empty() {
                    format!("tag {} as {}", from, to)
                } else {
                    let tiers: Vec<_> = requires.iter().map(|t| t.name()).collect();
                    format!("tag {} as {} (requires {})", from, to, tiers.join(", "))
                }
            }
            StageAction::Push { tag } => format!("push {}", tag),
            StageAction::Pull { tag } => format!("pull {}", tag),
            StageAction::Login => "registry login".to_string(),
            StageAction::RunTests { tier, tag, ci } => {
                if *ci {
                    format!("run {} tests on {} (ci)", tier, tag)
                } else {
                    format!("run {} tests on {}", tier, tag)
                }
            }
            StageAction::Exec { tag, argv } => format!("exec on {}: {}", tag, argv.join(" ")),
            StageAction::ListImages { tag } => format!("list images for {}", tag),
            StageAction::PrintSetup => "print setup".to_string(),
        }
    }
}

/// A single unit of work in a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Stage name, unique within its segment
    pub name: String,

    pub kind: StageKind,

    /// External action to perform
    pub action: StageAction,

    /// Stages (earlier in the same segment) that must succeed first
    pub depends_on: Vec<String>,

    /// Runs even after an upstream failure; its own failure never halts
    pub best_effort: bool,

    /// Timeout in seconds (0 = no timeout)
    pub timeout_secs: u64,

    /// Pipeline-level retries after the first attempt
    pub max_retries: usize,
}

impl Stage {
    pub fn new(name: impl Into<String>, action: StageAction) -> Self {
        Self {
            name: name.into(),
            kind: action.kind(),
            action,
            depends_on: Vec::new(),
            best_effort: false,
            timeout_secs: 0,
            max_retries: 0,
        }
    }

    pub fn depends_on(mut self, stage: &str) -> Self {
        self.depends_on.push(stage.to_string());
        self
    }

    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Check if all dependencies are in the given set of succeeded stages
    pub fn dependencies_met(&self, succeeded: &HashSet<String>) -> bool {
        self.depends_on.iter().all(|dep| succeeded.contains(dep))
    }

    /// Test tier run by this stage, if any
    pub fn test_tier(&self) -> Option<TestTier> {
        match &self.action {
            StageAction::RunTests { tier, .. } => Some(*tier),
            _ => None,
        }
    }
}
