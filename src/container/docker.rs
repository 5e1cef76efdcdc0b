//! `docker` CLI subprocess engine

use crate::container::{BuildRequest, ContainerEngine, EngineError, EngineOutput, RunRequest};
use crate::core::artifact::{Digest, ImageReference};
use crate::core::config::Settings;
use crate::credentials::RegistryCredentials;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Raw result of one subprocess
struct ProcessOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

impl ProcessOutput {
    /// stdout followed by stderr, verbatim
    fn combined(self) -> EngineOutput {
        let mut log = self.stdout;
        if !self.stderr.is_empty() {
            if !log.is_empty() && !log.ends_with('\n') {
                log.push('\n');
            }
            log.push_str(&self.stderr);
        }
        EngineOutput {
            exit_code: self.exit_code,
            log,
        }
    }
}

/// Drives the `docker` binary (and `aws` for registry login)
#[derive(Debug, Clone)]
pub struct DockerCli {
    docker: String,
    aws: String,
}

impl DockerCli {
    pub fn new(docker: impl Into<String>, aws: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
            aws: aws.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.docker.clone(), settings.aws.clone())
    }

    /// Spawn a subprocess and wait for it. The child is killed if this
    /// future is dropped.
    async fn exec(
        &self,
        program: &str,
        args: &[String],
        envs: &[(String, String)],
        stdin: Option<&[u8]>,
    ) -> Result<ProcessOutput, EngineError> {
        debug!("Spawning {} {}", program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await.map_err(|source| EngineError::Io {
                program: program.to_string(),
                source,
            })?;
            // Closing stdin signals end of input
            drop(pipe);
        }

        let output = child.wait_with_output().await.map_err(|source| EngineError::Io {
            program: program.to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        debug!(
            "{} exited with {:?} ({} bytes stdout, {} bytes stderr)",
            program,
            output.status.code(),
            stdout.len(),
            stderr.len()
        );

        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn docker(&self, args: Vec<String>) -> Result<EngineOutput, EngineError> {
        Ok(self.exec(&self.docker, &args, &[], None).await?.combined())
    }

    fn build_args(request: &BuildRequest) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--file".to_string(),
            request.dockerfile.clone(),
        ];
        if !request.use_cache {
            args.push("--no-cache".to_string());
        }
        for tag in &request.tags {
            args.push("--tag".to_string());
            args.push(tag.to_string());
        }
        for (key, value) in &request.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        for (key, value) in &request.build_args {
            args.push("--build-arg".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(request.context.clone());
        args
    }

    fn run_args(request: &RunRequest) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--rm".to_string()];
        for (key, value) in &request.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(request.image.to_string());
        args.extend(request.argv.iter().cloned());
        args
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn build(&self, request: &BuildRequest) -> Result<EngineOutput, EngineError> {
        self.docker(Self::build_args(request)).await
    }

    async fn inspect_digest(&self, image: &ImageReference) -> Result<Option<Digest>, EngineError> {
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            "{{.Id}}".to_string(),
            image.to_string(),
        ];
        let output = self.exec(&self.docker, &args, &[], None).await?;
        if output.exit_code != 0 {
            return Ok(None);
        }

        Digest::parse(output.stdout.trim())
            .map(Some)
            .map_err(|e| EngineError::Output {
                program: self.docker.clone(),
                message: e.to_string(),
            })
    }

    async fn tag(
        &self,
        source: &ImageReference,
        target: &ImageReference,
    ) -> Result<EngineOutput, EngineError> {
        self.docker(vec!["tag".to_string(), source.to_string(), target.to_string()])
            .await
    }

    async fn push(&self, image: &ImageReference) -> Result<EngineOutput, EngineError> {
        self.docker(vec!["push".to_string(), image.to_string()]).await
    }

    async fn pull(&self, image: &ImageReference) -> Result<EngineOutput, EngineError> {
        self.docker(vec!["pull".to_string(), image.to_string()]).await
    }

    async fn login(
        &self,
        registry: &str,
        credentials: &RegistryCredentials,
    ) -> Result<EngineOutput, EngineError> {
        let password = self
            .exec(
                &self.aws,
                &[
                    "ecr".to_string(),
                    "get-login-password".to_string(),
                    "--region".to_string(),
                    credentials.region.clone(),
                ],
                &credentials.env(),
                None,
            )
            .await?;

        // stdout carries the password and never reaches the log
        if password.exit_code != 0 {
            return Ok(EngineOutput::failure(password.exit_code, password.stderr));
        }

        let args = vec![
            "login".to_string(),
            "--username".to_string(),
            "AWS".to_string(),
            "--password-stdin".to_string(),
            registry.to_string(),
        ];
        let output = self
            .exec(&self.docker, &args, &[], Some(password.stdout.trim().as_bytes()))
            .await?;
        Ok(output.combined())
    }

    async fn run(&self, request: &RunRequest) -> Result<EngineOutput, EngineError> {
        self.docker(Self::run_args(request)).await
    }

    async fn list_images(&self, repository: &str) -> Result<EngineOutput, EngineError> {
        self.docker(vec![
            "image".to_string(),
            "ls".to_string(),
            repository.to_string(),
        ])
        .await
    }
}
