//! Persistence layer for execution history and qualification records

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

pub use crate::core::ExecutionStatus;
use crate::core::{InvocationContext, Pipeline, QualificationLedger, QualificationRecord};
use crate::execution::PipelineOutcome;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Summary of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// CLI target that was run
    pub target_name: String,

    /// Execution status
    pub status: ExecutionStatus,

    /// Source revision
    pub revision: String,

    /// What started the run
    pub trigger: String,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution completed (if complete)
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of succeeded stages
    pub completed_stages: usize,

    /// Total number of stages
    pub total_stages: usize,

    pub exit_code: i32,

    /// Last digest acted on
    pub image_digest: Option<String>,

    /// Halting error, rendered
    pub error: Option<String>,
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save an execution summary
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load an execution by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// Executions of a target, newest first
    async fn list_executions(&self, target_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// Every target with recorded executions
    async fn list_targets(&self) -> Result<Vec<String>>;

    /// Remember that a digest passed a tier
    async fn record_qualification(&self, record: &QualificationRecord) -> Result<()>;

    /// All known qualification records
    async fn load_qualifications(&self) -> Result<Vec<QualificationRecord>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    executions: RwLock<HashMap<Uuid, ExecutionSummary>>,
    by_target: RwLock<HashMap<String, Vec<Uuid>>>,
    qualifications: RwLock<Vec<QualificationRecord>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
            by_target: RwLock::new(HashMap::new()),
            qualifications: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        let is_new = execs
            .insert(execution.execution_id, execution.clone())
            .is_none();

        if is_new {
            let mut by_target = self.by_target.write().await;
            by_target
                .entry(execution.target_name.clone())
                .or_default()
                .push(execution.execution_id);
        }

        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&execution_id).cloned())
    }

    async fn list_executions(&self, target_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let by_target = self.by_target.read().await;

        let mut result: Vec<ExecutionSummary> = by_target
            .get(target_name)
            .map(|ids| ids.iter().filter_map(|id| execs.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_targets(&self) -> Result<Vec<String>> {
        let by_target = self.by_target.read().await;
        let mut targets: Vec<String> = by_target.keys().cloned().collect();
        targets.sort();
        Ok(targets)
    }

    async fn record_qualification(&self, record: &QualificationRecord) -> Result<()> {
        let mut records = self.qualifications.write().await;
        let known = records.iter().any(|r| {
            r.digest == record.digest && r.tier == record.tier && r.revision == record.revision
        });
        if !known {
            records.push(record.clone());
        }
        Ok(())
    }

    async fn load_qualifications(&self) -> Result<Vec<QualificationRecord>> {
        Ok(self.qualifications.read().await.clone())
    }
}

/// Create a summary from a finished pipeline
pub fn create_summary(
    pipeline: &Pipeline,
    outcome: &PipelineOutcome,
    ctx: &InvocationContext,
) -> ExecutionSummary {
    ExecutionSummary {
        execution_id: pipeline.state.execution_id,
        target_name: pipeline.target_name.clone(),
        status: pipeline.state.status,
        revision: ctx.revision.clone(),
        trigger: ctx.trigger.to_string(),
        started_at: pipeline.state.started_at.unwrap_or_else(Utc::now),
        completed_at: pipeline.state.completed_at,
        completed_stages: pipeline.state.completed_stages,
        total_stages: pipeline.state.total_stages,
        exit_code: outcome.exit_code,
        image_digest: outcome.image_digest.as_ref().map(ToString::to_string),
        error: outcome.error.as_ref().map(ToString::to_string),
    }
}

/// Ledger seeded from history. Unreadable history seeds nothing.
pub async fn load_ledger(store: &dyn PersistenceBackend) -> QualificationLedger {
    match store.load_qualifications().await {
        Ok(records) => QualificationLedger::seeded(records),
        Err(e) => {
            warn!("Failed to load qualification records: {:#}", e);
            QualificationLedger::new()
        }
    }
}

/// Save a finished run and the qualifications it earned. Errors are logged,
/// never returned; returns whether everything was stored.
pub async fn record_run(
    store: &dyn PersistenceBackend,
    summary: &ExecutionSummary,
    records: &[QualificationRecord],
) -> bool {
    let mut saved = true;
    if let Err(e) = store.save_execution(summary).await {
        warn!("Failed to save execution {}: {:#}", summary.execution_id, e);
        saved = false;
    }
    for record in records {
        if let Err(e) = store.record_qualification(record).await {
            warn!(
                "Failed to save qualification of {} for {}: {:#}",
                record.digest.short(),
                record.tier,
                e
            );
            saved = false;
        }
    }
    saved
}
