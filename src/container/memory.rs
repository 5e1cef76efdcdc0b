//! In-memory container engine for dry runs and tests

use crate::container::{BuildRequest, ContainerEngine, EngineError, EngineOutput, RunRequest};
use crate::core::artifact::{Digest, ImageReference};
use crate::credentials::RegistryCredentials;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    local: BTreeMap<String, Digest>,
    remote: BTreeMap<String, Digest>,
    builds: usize,
    runs: Vec<RunRequest>,
    logins: Vec<String>,
    calls: Vec<String>,
    failing_runs: HashMap<String, i32>,
    failing_builds: Option<i32>,
    failing_pushes: usize,
    rejecting_logins: Option<i32>,
    run_delay: Option<Duration>,
}

/// Images live in two maps (local daemon, remote registry) keyed by reference
#[derive(Debug, Default)]
pub struct InMemoryEngine {
    state: Mutex<State>,
    /// Materialize missing images instead of failing
    synthesize: bool,
}

fn content_digest(seed: &str) -> Digest {
    Digest::sha256(seed.as_bytes())
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine for `--dry-run`: every referenced image exists
    pub fn dry_run() -> Self {
        Self {
            state: Mutex::default(),
            synthesize: true,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lookup(&self, state: &mut State, image: &ImageReference) -> Option<Digest> {
        let key = image.to_string();
        if let Some(digest) = state.local.get(&key) {
            return Some(digest.clone());
        }
        if self.synthesize {
            let digest = content_digest(&key);
            state.local.insert(key, digest.clone());
            return Some(digest);
        }
        None
    }

    /// Place an image in the local daemon
    pub fn seed_local(&self, image: &ImageReference, digest: Digest) {
        self.state().local.insert(image.to_string(), digest);
    }

    /// Place an image in the remote registry
    pub fn seed_remote(&self, image: &ImageReference, digest: Digest) {
        self.state().remote.insert(image.to_string(), digest);
    }

    /// Runs whose argv or image contains `needle` exit with `exit_code`
    pub fn fail_runs_matching(&self, needle: &str, exit_code: i32) {
        self.state().failing_runs.insert(needle.to_string(), exit_code);
    }

    pub fn fail_builds(&self, exit_code: i32) {
        self.state().failing_builds = Some(exit_code);
    }

    /// The next `count` pushes fail
    pub fn fail_next_pushes(&self, count: usize) {
        self.state().failing_pushes = count;
    }

    /// Logins are refused with `exit_code`
    pub fn reject_logins(&self, exit_code: i32) {
        self.state().rejecting_logins = Some(exit_code);
    }

    /// Every run takes this long
    pub fn delay_runs(&self, delay: Duration) {
        self.state().run_delay = Some(delay);
    }

    pub fn local_digest(&self, image: &ImageReference) -> Option<Digest> {
        self.state().local.get(&image.to_string()).cloned()
    }

    pub fn remote_digest(&self, image: &ImageReference) -> Option<Digest> {
        self.state().remote.get(&image.to_string()).cloned()
    }

    pub fn build_count(&self) -> usize {
        self.state().builds
    }

    pub fn runs(&self) -> Vec<RunRequest> {
        self.state().runs.clone()
    }

    pub fn logins(&self) -> Vec<String> {
        self.state().logins.clone()
    }

    /// Every engine operation, in call order
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }
}

#[async_trait]
impl ContainerEngine for InMemoryEngine {
    async fn build(&self, request: &BuildRequest) -> Result<EngineOutput, EngineError> {
        let mut state = self.state();
        state.calls.push("build".to_string());

        if let Some(code) = state.failing_builds {
            return Ok(EngineOutput::failure(code, "ERROR: failed to solve: build step failed"));
        }

        state.builds += 1;
        let tags: Vec<String> = request.tags.iter().map(ToString::to_string).collect();
        let digest = content_digest(&format!("{}#{:?}#{}", tags.join(","), request.labels, state.builds));
        for tag in &tags {
            state.local.insert(tag.clone(), digest.clone());
        }

        Ok(EngineOutput::success(format!(
            "Successfully built {}\nSuccessfully tagged {}",
            digest.short(),
            tags.join(", ")
        )))
    }

    async fn inspect_digest(&self, image: &ImageReference) -> Result<Option<Digest>, EngineError> {
        let mut state = self.state();
        state.calls.push("inspect".to_string());
        Ok(self.lookup(&mut state, image))
    }

    async fn tag(
        &self,
        source: &ImageReference,
        target: &ImageReference,
    ) -> Result<EngineOutput, EngineError> {
        let mut state = self.state();
        state.calls.push("tag".to_string());

        match self.lookup(&mut state, source) {
            Some(digest) => {
                state.local.insert(target.to_string(), digest);
                Ok(EngineOutput::success(String::new()))
            }
            None => Ok(EngineOutput::failure(
                1,
                format!("Error response from daemon: No such image: {}", source),
            )),
        }
    }

    async fn push(&self, image: &ImageReference) -> Result<EngineOutput, EngineError> {
        let mut state = self.state();
        state.calls.push("push".to_string());

        if state.failing_pushes > 0 {
            state.failing_pushes -= 1;
            return Ok(EngineOutput::failure(1, "net/http: TLS handshake timeout"));
        }

        match self.lookup(&mut state, image) {
            Some(digest) => {
                state.remote.insert(image.to_string(), digest.clone());
                Ok(EngineOutput::success(format!("{}: digest: {}", image.tag, digest)))
            }
            None => Ok(EngineOutput::failure(
                1,
                format!("An image does not exist locally with the tag: {}", image.repository),
            )),
        }
    }

    async fn pull(&self, image: &ImageReference) -> Result<EngineOutput, EngineError> {
        let mut state = self.state();
        state.calls.push("pull".to_string());

        let key = image.to_string();
        let digest = match state.remote.get(&key).cloned() {
            Some(digest) => Some(digest),
            None if self.synthesize => Some(content_digest(&key)),
            None => None,
        };

        match digest {
            Some(digest) => {
                state.local.insert(key, digest.clone());
                Ok(EngineOutput::success(format!("Digest: {}\nStatus: Downloaded newer image", digest)))
            }
            None => Ok(EngineOutput::failure(1, format!("manifest for {} not found", image))),
        }
    }

    async fn login(
        &self,
        registry: &str,
        _credentials: &RegistryCredentials,
    ) -> Result<EngineOutput, EngineError> {
        let mut state = self.state();
        state.calls.push("login".to_string());
        state.logins.push(registry.to_string());
        if let Some(code) = state.rejecting_logins {
            return Ok(EngineOutput::failure(
                code,
                "An error occurred (UnrecognizedClientException) when calling the \
                 GetAuthorizationToken operation: The security token included in the request is invalid.",
            ));
        }
        Ok(EngineOutput::success("Login Succeeded"))
    }

    async fn run(&self, request: &RunRequest) -> Result<EngineOutput, EngineError> {
        let (delay, failure) = {
            let mut state = self.state();
            state.calls.push("run".to_string());
            state.runs.push(request.clone());

            let image = request.image.to_string();
            let command = request.argv.join(" ");
            let failure = state
                .failing_runs
                .iter()
                .find(|(needle, _)| command.contains(needle.as_str()) || image.contains(needle.as_str()))
                .map(|(_, code)| *code);
            (state.run_delay, failure)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let command = request.argv.join(" ");
        Ok(match failure {
            Some(code) => EngineOutput::failure(code, format!("$ {}\nFAILED", command)),
            None => EngineOutput::success(format!("$ {}\nok", command)),
        })
    }

    async fn list_images(&self, repository: &str) -> Result<EngineOutput, EngineError> {
        let mut state = self.state();
        state.calls.push("list_images".to_string());

        let prefix = format!("{}:", repository);
        let lines: Vec<String> = state
            .local
            .iter()
            .filter(|(reference, _)| reference.starts_with(&prefix))
            .map(|(reference, digest)| format!("{}  {}", reference, digest.short()))
            .collect();
        Ok(EngineOutput::success(lines.join("\n")))
    }
}
