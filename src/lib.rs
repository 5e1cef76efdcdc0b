//! promote - build an rc image, qualify it with tiered tests, promote it to latest and prod

pub mod cli;
pub mod container;
pub mod core;
pub mod credentials;
pub mod execution;
pub mod notify;
pub mod persistence;

// Re-export commonly used types
pub use container::{ContainerEngine, DockerCli, InMemoryEngine};
pub use core::{
    ExecutionStatus, InvocationContext, Pipeline, PipelineError, Settings, Target, TestTier,
    TriggerKind,
};
pub use credentials::{CredentialProvider, EnvCredentialProvider};
pub use execution::{CancelSignal, ContainerStageRunner, ExecutionEngine, ExecutionEvent, PipelineOutcome};
pub use notify::{NotificationEvent, NotificationSink};
