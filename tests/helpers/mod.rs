//! Shared fixtures for scenario tests

#![allow(dead_code)]

use async_trait::async_trait;
use promote::container::InMemoryEngine;
use promote::core::{
    Digest, ImageReference, ImageTag, InvocationContext, Pipeline, Settings, Target, TriggerKind,
};
use promote::credentials::{CredentialProvider, EnvCredentialProvider};
use promote::execution::{ContainerStageRunner, ExecutionEngine, NotifyPolicy, PipelineOutcome};
use promote::notify::{NotificationEvent, NotificationSink, NotifyError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const REGISTRY: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com";
pub const REVISION: &str = "4f2c9a1be07d53e8c6a9f0b1d2e3f4a5b6c7d8e9";

pub fn settings() -> Settings {
    Settings {
        ecr_repo_base_path: Some(REGISTRY.to_string()),
        revision: Some(REVISION.to_string()),
        retry_delay_ms: 1,
        ..Settings::default()
    }
}

pub fn context(trigger: TriggerKind) -> InvocationContext {
    context_with(settings(), trigger)
}

pub fn context_with(settings: Settings, trigger: TriggerKind) -> InvocationContext {
    InvocationContext::new(settings, trigger).expect("valid test settings")
}

pub fn registry_env() -> HashMap<String, String> {
    [
        ("AWS_ACCESS_KEY_ID", "AKIAEXAMPLEKEY"),
        ("AWS_SECRET_ACCESS_KEY", "wJalrXUtnFEMI/K7MDENG"),
        ("AWS_DEFAULT_REGION", "us-east-1"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn with_credentials() -> Arc<dyn CredentialProvider> {
    Arc::new(EnvCredentialProvider::from_map(registry_env()))
}

pub fn without_credentials() -> Arc<dyn CredentialProvider> {
    Arc::new(EnvCredentialProvider::from_map(HashMap::new()))
}

/// Keeps every notification it receives
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Chat API that rejects everything
pub struct FailingNotifier;

#[async_trait]
impl NotificationSink for FailingNotifier {
    async fn notify(&self, _event: &NotificationEvent) -> Result<(), NotifyError> {
        Err(NotifyError::Rejected {
            status: 401,
            body: r#"{"ok":false,"description":"Unauthorized"}"#.to_string(),
        })
    }
}

pub type TestEngine = ExecutionEngine<ContainerStageRunner<Arc<InMemoryEngine>>>;

/// In-memory container engine wired into an execution engine
pub struct Harness {
    pub containers: Arc<InMemoryEngine>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: TestEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(with_credentials(), NotifyPolicy::CiOnly)
    }

    pub fn with(credentials: Arc<dyn CredentialProvider>, policy: NotifyPolicy) -> Self {
        let containers = Arc::new(InMemoryEngine::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = ExecutionEngine::new(ContainerStageRunner::new(containers.clone()), credentials)
            .with_notifier(notifier.clone(), policy)
            .with_retry_delay(Duration::from_millis(1));
        Self {
            containers,
            notifier,
            engine,
        }
    }

    pub fn with_sink(sink: Arc<dyn NotificationSink>) -> Self {
        let mut harness = Self::new();
        harness.engine = ExecutionEngine::new(
            ContainerStageRunner::new(harness.containers.clone()),
            with_credentials(),
        )
        .with_notifier(sink, NotifyPolicy::Always)
        .with_retry_delay(Duration::from_millis(1));
        harness
    }

    /// Build and execute a target by its CLI name
    pub async fn run(&self, target: &str, ctx: &mut InvocationContext) -> (Pipeline, PipelineOutcome) {
        let target: Target = target.parse().expect("known target");
        let mut pipeline = target.build_pipeline(ctx);
        let outcome = self.engine.execute(&mut pipeline, ctx).await;
        (pipeline, outcome)
    }

    /// Put a locally built rc in place
    pub fn seed_rc(&self, ctx: &InvocationContext, content: &str) -> Digest {
        let digest = Digest::sha256(content.as_bytes());
        self.containers.seed_local(&ctx.reference(&ImageTag::Rc), digest.clone());
        digest
    }

    pub fn local(&self, ctx: &InvocationContext, tag: ImageTag) -> Option<Digest> {
        self.containers.local_digest(&ctx.reference(&tag))
    }

    pub fn remote(&self, ctx: &InvocationContext, tag: ImageTag) -> Option<Digest> {
        self.containers.remote_digest(&ctx.reference(&tag))
    }
}

pub fn reference(ctx: &InvocationContext, tag: ImageTag) -> ImageReference {
    ctx.reference(&tag)
}

/// Names of the stages that ran, in order
pub fn ran(outcome: &PipelineOutcome) -> Vec<String> {
    outcome
        .results
        .iter()
        .filter(|r| !r.is_skipped())
        .map(|r| format!("{}/{}", r.target, r.stage_name))
        .collect()
}
