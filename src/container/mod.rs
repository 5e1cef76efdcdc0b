//! Container engine abstraction
//!
//! Stages never shell out directly; they go through a [`ContainerEngine`].
//! [`DockerCli`] drives the real `docker` binary, [`InMemoryEngine`] keeps
//! images in memory for dry runs and tests.

pub mod docker;
pub mod memory;

pub use docker::DockerCli;
pub use memory::InMemoryEngine;

use crate::core::artifact::{Digest, ImageReference};
use crate::credentials::RegistryCredentials;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised when the engine itself could not be driven
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected output from {program}: {message}")]
    Output { program: String, message: String },
}

/// Exit status and combined output of one engine command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    pub exit_code: i32,
    pub log: String,
}

impl EngineOutput {
    pub fn success(log: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            log: log.into(),
        }
    }

    pub fn failure(exit_code: i32, log: impl Into<String>) -> Self {
        Self {
            exit_code,
            log: log.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An image build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Every tag the built image receives
    pub tags: Vec<ImageReference>,
    pub dockerfile: String,
    pub context: String,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub use_cache: bool,
}

/// A command run inside a throwaway container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub image: ImageReference,
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Build, tag, move and run container images
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> Result<EngineOutput, EngineError>;

    /// Digest of a local image, `None` when the reference does not exist
    async fn inspect_digest(&self, image: &ImageReference) -> Result<Option<Digest>, EngineError>;

    async fn tag(
        &self,
        source: &ImageReference,
        target: &ImageReference,
    ) -> Result<EngineOutput, EngineError>;

    async fn push(&self, image: &ImageReference) -> Result<EngineOutput, EngineError>;

    async fn pull(&self, image: &ImageReference) -> Result<EngineOutput, EngineError>;

    async fn login(
        &self,
        registry: &str,
        credentials: &RegistryCredentials,
    ) -> Result<EngineOutput, EngineError>;

    async fn run(&self, request: &RunRequest) -> Result<EngineOutput, EngineError>;

    async fn list_images(&self, repository: &str) -> Result<EngineOutput, EngineError>;
}

#[async_trait]
impl<E: ContainerEngine + ?Sized> ContainerEngine for Arc<E> {
    async fn build(&self, request: &BuildRequest) -> Result<EngineOutput, EngineError> {
        (**self).build(request).await
    }

    async fn inspect_digest(&self, image: &ImageReference) -> Result<Option<Digest>, EngineError> {
        (**self).inspect_digest(image).await
    }

    async fn tag(
        &self,
        source: &ImageReference,
        target: &ImageReference,
    ) -> Result<EngineOutput, EngineError> {
        (**self).tag(source, target).await
    }

    async fn push(&self, image: &ImageReference) -> Result<EngineOutput, EngineError> {
        (**self).push(image).await
    }

    async fn pull(&self, image: &ImageReference) -> Result<EngineOutput, EngineError> {
        (**self).pull(image).await
    }

    async fn login(
        &self,
        registry: &str,
        credentials: &RegistryCredentials,
    ) -> Result<EngineOutput, EngineError> {
        (**self).login(registry, credentials).await
    }

    async fn run(&self, request: &RunRequest) -> Result<EngineOutput, EngineError> {
        (**self).run(request).await
    }

    async fn list_images(&self, repository: &str) -> Result<EngineOutput, EngineError> {
        (**self).list_images(repository).await
    }
}
