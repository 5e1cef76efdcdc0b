//! Execution state models

use crate::core::{artifact::Digest, stage::StageKind, tier::TestTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Exit code reported for a stage timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported for a cancelled invocation
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every required stage succeeded
    Completed,
    /// A required stage failed
    Failed,
    /// Pipeline was cancelled
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "Running" => ExecutionStatus::Running,
            "Completed" => ExecutionStatus::Completed,
            "Failed" => ExecutionStatus::Failed,
            "Cancelled" => ExecutionStatus::Cancelled,
            _ => ExecutionStatus::Pending,
        }
    }
}

/// Outcome of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageOutcome {
    Success,
    Failure,
    Skipped,
}

/// Why a stage failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCause {
    /// The underlying action exited with a non-zero status
    ExitStatus(i32),
    TimedOut(u64),
    Cancelled,
    /// The source digest lacks required qualification tiers
    NotQualified { digest: Digest, missing: Vec<TestTier> },
    MissingImage(String),
    MissingCredentials,
    /// The action could not be started or inspected
    Engine(String),
}

impl FailureCause {
    /// Process exit code this cause maps to
    pub fn exit_code(&self) -> i32 {
        match self {
            FailureCause::ExitStatus(code) if *code != 0 => *code,
            FailureCause::TimedOut(_) => TIMEOUT_EXIT_CODE,
            FailureCause::Cancelled => CANCELLED_EXIT_CODE,
            _ => 1,
        }
    }

    /// Whether a pipeline-level retry may help
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureCause::ExitStatus(_) | FailureCause::Engine(_))
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::ExitStatus(code) => write!(f, "exit code {}", code),
            FailureCause::TimedOut(secs) => write!(f, "timed out after {}s", secs),
            FailureCause::Cancelled => write!(f, "cancelled"),
            FailureCause::NotQualified { digest, missing } => {
                let tiers: Vec<_> = missing.iter().map(|t| t.name()).collect();
                write!(f, "{} has not passed {}", digest.short(), tiers.join(", "))
            }
            FailureCause::MissingImage(reference) => write!(f, "image {} not found", reference),
            FailureCause::MissingCredentials => write!(f, "registry credentials missing"),
            FailureCause::Engine(message) => write!(f, "{}", message),
        }
    }
}

/// Result of one stage execution. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage_name: String,

    /// Segment (sub-target) the stage belongs to
    pub target: String,

    pub kind: StageKind,

    pub outcome: StageOutcome,

    /// Set for failures
    pub cause: Option<FailureCause>,

    /// Captured output, verbatim
    pub log: String,

    pub duration_ms: u64,

    /// Digest of the image acted upon, when known
    pub digest: Option<Digest>,

    pub attempts: usize,

    /// Skip reason, for skipped stages
    pub skip_reason: Option<String>,
}

impl StageResult {
    pub fn success(stage_name: &str, kind: StageKind, log: String, digest: Option<Digest>) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            target: String::new(),
            kind,
            outcome: StageOutcome::Success,
            cause: None,
            log,
            duration_ms: 0,
            digest,
            attempts: 1,
            skip_reason: None,
        }
    }

    pub fn failure(stage_name: &str, kind: StageKind, cause: FailureCause, log: String) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            target: String::new(),
            kind,
            outcome: StageOutcome::Failure,
            cause: Some(cause),
            log,
            duration_ms: 0,
            digest: None,
            attempts: 1,
            skip_reason: None,
        }
    }

    pub fn skipped(stage_name: &str, kind: StageKind, reason: String) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            target: String::new(),
            kind,
            outcome: StageOutcome::Skipped,
            cause: None,
            log: String::new(),
            duration_ms: 0,
            digest: None,
            attempts: 0,
            skip_reason: Some(reason),
        }
    }

    pub fn in_target(mut self, target: &str) -> Self {
        self.target = target.to_string();
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_digest(mut self, digest: Option<Digest>) -> Self {
        self.digest = digest;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StageOutcome::Success
    }

    pub fn is_failure(&self) -> bool {
        self.outcome == StageOutcome::Failure
    }

    pub fn is_skipped(&self) -> bool {
        self.outcome == StageOutcome::Skipped
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.cause, Some(FailureCause::TimedOut(_)))
    }

    /// Exit code of the underlying action, when it ran to completion
    pub fn exit_code(&self) -> Option<i32> {
        match (&self.outcome, &self.cause) {
            (StageOutcome::Success, _) => Some(0),
            (_, Some(FailureCause::ExitStatus(code))) => Some(*code),
            _ => None,
        }
    }
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of stages
    pub total_stages: usize,

    /// Number of succeeded stages
    pub completed_stages: usize,

    /// Number of failed stages
    pub failed_stages: usize,

    /// Number of skipped stages
    pub skipped_stages: usize,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_stages: 0,
            completed_stages: 0,
            failed_stages: 0,
            skipped_stages: 0,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_stages: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_stages = total_stages;
    }

    /// Mark pipeline as finished with the given status
    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    /// Count a stage result
    pub fn record(&mut self, result: &StageResult) {
        match result.outcome {
            StageOutcome::Success => self.completed_stages += 1,
            StageOutcome::Failure => self.failed_stages += 1,
            StageOutcome::Skipped => self.skipped_stages += 1,
        }
    }

    /// Calculate progress percentage (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        (self.completed_stages + self.failed_stages + self.skipped_stages) as f64
            / self.total_stages as f64
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
