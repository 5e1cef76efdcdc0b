//! Pipeline execution engine

pub mod cancel;
pub mod engine;
pub mod runner;
pub mod scheduler;

pub use cancel::CancelSignal;
pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent, NotifyPolicy, PipelineOutcome};
pub use runner::{ContainerStageRunner, StageRunner};
pub use scheduler::{Decision, ExecutionScheduler};
