//! Core domain models
//!
//! Artifacts and their promotion lineage, stages, test tiers, pipelines and
//! the static target table.

pub mod artifact;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod stage;
pub mod state;
pub mod targets;
pub mod tier;

pub use artifact::*;
pub use config::{ConfigError, EnvMap, Settings, UNKNOWN_REVISION};
pub use context::*;
pub use error::PipelineError;
pub use pipeline::*;
pub use stage::*;
pub use state::*;
pub use targets::{Target, TestVariant};
pub use tier::*;
