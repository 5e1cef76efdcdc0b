//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    core::{
        Digest, ExecutionStatus, FailureCause, InvocationContext, Pipeline, PipelineError, Segment,
        Stage, StageResult,
    },
    credentials::CredentialProvider,
    execution::{
        runner::StageRunner,
        scheduler::{Decision, ExecutionScheduler},
    },
    notify::{NotificationEvent, NotificationSink},
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        target: String,
        total_stages: usize,
    },
    SegmentStarted {
        segment: String,
    },
    SegmentSkipped {
        segment: String,
        reason: String,
    },
    StageStarted {
        segment: String,
        stage: String,
        description: String,
        attempt: usize,
    },
    StageRetrying {
        stage: String,
        attempt: usize,
        max_retries: usize,
        cause: String,
    },
    StageFinished {
        result: StageResult,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
        exit_code: i32,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// When the end-of-run notification is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyPolicy {
    Never,
    /// Only for CI triggers
    #[default]
    CiOnly,
    Always,
}

/// Final result of one invocation
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub execution_id: Uuid,
    pub target: String,
    pub status: ExecutionStatus,
    pub results: Vec<StageResult>,
    pub error: Option<PipelineError>,
    pub exit_code: i32,
    /// Set when the notification could not be delivered
    pub notification_error: Option<String>,
    /// Last digest any stage acted on
    pub image_digest: Option<Digest>,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Failed result that halted the run, if any
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.results.iter().find(|r| r.is_failure())
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine<R> {
    runner: Arc<R>,
    credentials: Arc<dyn CredentialProvider>,
    notifier: Option<Arc<dyn NotificationSink>>,
    notify_policy: NotifyPolicy,
    retry_delay: Duration,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl<R: StageRunner> ExecutionEngine<R> {
    pub fn new(runner: R, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            runner: Arc::new(runner),
            credentials,
            notifier: None,
            notify_policy: NotifyPolicy::Never,
            retry_delay: Duration::from_secs(5),
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>, policy: NotifyPolicy) -> Self {
        self.notifier = Some(notifier);
        self.notify_policy = policy;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.event_handlers.lock() {
            handlers.push(Arc::new(handler));
        }
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        let handlers = match self.event_handlers.lock() {
            Ok(handlers) => handlers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// Execute the entire pipeline
    pub async fn execute(&self, pipeline: &mut Pipeline, ctx: &mut InvocationContext) -> PipelineOutcome {
        let execution_id = pipeline.state.execution_id;
        let target = pipeline.target_name.clone();

        info!("Starting {} ({}) at revision {}", target, execution_id, ctx.revision);
        pipeline.results.clear();
        for segment in &mut pipeline.segments {
            segment.image_ref.digest = None;
        }
        pipeline.state.start(pipeline.stage_count());
        self.emit_event(ExecutionEvent::PipelineStarted {
            execution_id,
            target: target.clone(),
            total_stages: pipeline.stage_count(),
        });

        let error = match self.prepare(pipeline, ctx) {
            Ok(()) => self.run_segments(pipeline, ctx).await,
            Err(e) => {
                error!("{}", e);
                self.skip_all(pipeline, &e.to_string());
                Some(e)
            }
        };

        let status = match &error {
            None => ExecutionStatus::Completed,
            Some(PipelineError::Cancelled) => ExecutionStatus::Cancelled,
            Some(_) => ExecutionStatus::Failed,
        };
        let exit_code = error.as_ref().map(PipelineError::exit_code).unwrap_or(0);
        pipeline.state.finish(status);

        info!("{} finished: {:?} (exit code {})", target, status, exit_code);
        self.emit_event(ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
            exit_code,
        });

        let notification_error = self.send_notification(&target, ctx, error.as_ref()).await;

        PipelineOutcome {
            execution_id,
            target,
            status,
            image_digest: pipeline.artifact().and_then(|image| image.digest.clone()),
            results: pipeline.results.clone(),
            error,
            exit_code,
            notification_error,
        }
    }

    /// Validate the pipeline and resolve registry credentials, before any
    /// stage has side effects
    fn prepare(&self, pipeline: &Pipeline, ctx: &mut InvocationContext) -> Result<(), PipelineError> {
        pipeline.validate()?;

        if pipeline.requires_registry() && ctx.credentials.is_none() {
            ctx.credentials = Some(self.credentials.registry()?);
        }
        Ok(())
    }

    async fn run_segments(&self, pipeline: &mut Pipeline, ctx: &mut InvocationContext) -> Option<PipelineError> {
        let mut halted: Option<(String, PipelineError)> = None;
        let segments = pipeline.segments.clone();

        for segment in &segments {
            if ctx.cancel.is_cancelled() {
                self.skip_segment(pipeline, segment, "cancelled");
                halted.get_or_insert_with(|| (segment.target_name.clone(), PipelineError::Cancelled));
                continue;
            }
            if let Some((failed, _)) = &halted {
                let reason = format!("'{}' failed", failed);
                self.skip_segment(pipeline, segment, &reason);
                continue;
            }
            if let Err(reason) = ExecutionScheduler::admit_segment(segment, &ctx.trigger) {
                warn!("Skipping {}: {}", segment.target_name, reason);
                self.skip_segment(pipeline, segment, &reason);
                continue;
            }

            if let Some(e) = self.run_segment(pipeline, segment, ctx).await {
                halted = Some((segment.target_name.clone(), e));
            }
        }

        halted.map(|(_, e)| e)
    }

    /// Run one segment's stages in order; returns the halting error, if any
    async fn run_segment(
        &self,
        pipeline: &mut Pipeline,
        segment: &Segment,
        ctx: &mut InvocationContext,
    ) -> Option<PipelineError> {
        info!("Running {}", segment.target_name);
        self.emit_event(ExecutionEvent::SegmentStarted {
            segment: segment.target_name.clone(),
        });

        let mut succeeded: HashSet<String> = HashSet::new();
        let mut halted: Option<(String, PipelineError)> = None;

        for stage in &segment.stages {
            let decision = ExecutionScheduler::decide(
                stage,
                &succeeded,
                halted.as_ref().map(|(name, _)| name.as_str()),
                ctx.cancel.is_cancelled(),
            );

            let result = match decision {
                Decision::Skip(reason) => {
                    if ctx.cancel.is_cancelled() && halted.is_none() {
                        halted = Some((stage.name.clone(), PipelineError::Cancelled));
                    }
                    info!("Skipping {}: {}", stage.name, reason);
                    StageResult::skipped(&stage.name, stage.kind, reason)
                }
                Decision::Run => {
                    self.emit_event(ExecutionEvent::StageStarted {
                        segment: segment.target_name.clone(),
                        stage: stage.name.clone(),
                        description: stage.action.describe(),
                        attempt: 1,
                    });
                    self.run_with_retries(segment, stage, ctx).await
                }
            }
            .in_target(&segment.target_name);

            if result.is_success() {
                succeeded.insert(stage.name.clone());
                if let Some(digest) = &result.digest {
                    pipeline.resolve_artifact(&segment.target_name, digest.clone());
                }
                if let (Some(tier), Some(digest)) = (stage.test_tier(), &result.digest) {
                    info!("{} passed {} tests", digest.short(), tier);
                    let revision = ctx.revision.clone();
                    ctx.ledger.record(digest.clone(), tier, &revision);
                }
            } else if result.is_failure() {
                let cancelled = result.cause == Some(FailureCause::Cancelled);
                if stage.best_effort && !cancelled {
                    warn!("Best-effort stage {} failed: {}", stage.name, describe_cause(&result));
                } else if halted.is_none() {
                    error!("Stage {} failed: {}", stage.name, describe_cause(&result));
                    halted = Some((stage.name.clone(), PipelineError::from_failed_stage(&result)));
                }
            }

            self.record(pipeline, result);
        }

        halted.map(|(_, e)| e)
    }

    /// Pipeline-level retry policy around a single stage
    async fn run_with_retries(
        &self,
        segment: &Segment,
        stage: &Stage,
        ctx: &InvocationContext,
    ) -> StageResult {
        let mut attempt = 1;
        loop {
            let mut result = self.runner.run(stage, ctx).await;
            result.attempts = attempt;

            let retryable = result.is_failure()
                && result.cause.as_ref().is_some_and(FailureCause::is_retryable)
                && attempt <= stage.max_retries
                && !ctx.cancel.is_cancelled();
            if !retryable {
                return result;
            }

            let cause = describe_cause(&result);
            warn!(
                "Stage {} failed ({}), retrying ({}/{})",
                stage.name, cause, attempt, stage.max_retries
            );
            self.emit_event(ExecutionEvent::StageRetrying {
                stage: stage.name.clone(),
                attempt,
                max_retries: stage.max_retries,
                cause,
            });

            let waiting = Instant::now();
            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = ctx.cancel.cancelled() => {
                    let waited = waiting.elapsed().as_millis() as u64;
                    let mut cancelled =
                        StageResult::failure(&stage.name, stage.kind, FailureCause::Cancelled, result.log)
                            .with_duration(result.duration_ms + waited);
                    cancelled.attempts = attempt;
                    return cancelled;
                }
            }

            attempt += 1;
            self.emit_event(ExecutionEvent::StageStarted {
                segment: segment.target_name.clone(),
                stage: stage.name.clone(),
                description: stage.action.describe(),
                attempt,
            });
        }
    }

    fn record(&self, pipeline: &mut Pipeline, result: StageResult) {
        pipeline.state.record(&result);
        self.emit_event(ExecutionEvent::StageFinished {
            result: result.clone(),
        });
        pipeline.results.push(result);
    }

    fn skip_segment(&self, pipeline: &mut Pipeline, segment: &Segment, reason: &str) {
        self.emit_event(ExecutionEvent::SegmentSkipped {
            segment: segment.target_name.clone(),
            reason: reason.to_string(),
        });
        for stage in &segment.stages {
            let result = StageResult::skipped(&stage.name, stage.kind, reason.to_string())
                .in_target(&segment.target_name);
            self.record(pipeline, result);
        }
    }

    fn skip_all(&self, pipeline: &mut Pipeline, reason: &str) {
        let segments = pipeline.segments.clone();
        for segment in &segments {
            self.skip_segment(pipeline, segment, reason);
        }
    }

    /// Exactly one best-effort notification per invocation
    async fn send_notification(
        &self,
        target: &str,
        ctx: &InvocationContext,
        error: Option<&PipelineError>,
    ) -> Option<String> {
        let notifier = self.notifier.as_ref()?;
        let wanted = match self.notify_policy {
            NotifyPolicy::Never => false,
            NotifyPolicy::CiOnly => ctx.trigger.is_ci(),
            NotifyPolicy::Always => true,
        };
        if !wanted {
            return None;
        }

        let event = match error {
            None => NotificationEvent::Success {
                target: target.to_string(),
                revision: ctx.revision.clone(),
            },
            Some(e) => NotificationEvent::Failure {
                target: target.to_string(),
                revision: ctx.revision.clone(),
                reason: format!("{}: {}", e.category(), e),
            },
        };

        match notifier.notify(&event).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Notification failed: {}", e);
                Some(e.to_string())
            }
        }
    }
}

fn describe_cause(result: &StageResult) -> String {
    result
        .cause
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown failure".to_string())
}
