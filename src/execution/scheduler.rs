//! Execution scheduler - decides whether a stage or segment runs

use crate::core::{Segment, Stage, TestTierSelector, TriggerKind};
use std::collections::HashSet;

/// Whether a stage should run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Run,
    Skip(String),
}

/// Sequential, dependency-ordered scheduling
pub struct ExecutionScheduler;

impl ExecutionScheduler {
    /// Decide a stage's fate given what ran before it in its segment.
    ///
    /// `halted_by` names the failed stage that stopped forward progress, if
    /// any. Best-effort stages still run after it, as long as their own
    /// dependencies succeeded.
    pub fn decide(
        stage: &Stage,
        succeeded: &HashSet<String>,
        halted_by: Option<&str>,
        cancelled: bool,
    ) -> Decision {
        if cancelled {
            return Decision::Skip("cancelled".to_string());
        }

        if let Some(failed) = halted_by {
            if !stage.best_effort {
                return Decision::Skip(format!("stage '{}' failed", failed));
            }
        }

        if let Some(dep) = stage.depends_on.iter().find(|dep| !succeeded.contains(*dep)) {
            return Decision::Skip(format!("dependency '{}' did not succeed", dep));
        }

        Decision::Run
    }

    /// Tier gating: a segment running a tier its trigger does not allow is
    /// skipped, with the reason returned as the error.
    pub fn admit_segment(segment: &Segment, trigger: &TriggerKind) -> Result<(), String> {
        match segment.test_tier() {
            Some(tier) if !TestTierSelector::is_allowed_for_trigger(tier, trigger) => Err(format!(
                "{} tests are not run on {} triggers",
                tier, trigger
            )),
            _ => Ok(()),
        }
    }
}
