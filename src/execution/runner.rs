//! Stage runner - performs one stage against a container engine

use crate::{
    container::{BuildRequest, ContainerEngine, EngineError, EngineOutput, RunRequest},
    core::{
        ArtifactRef, Digest, FailureCause, ImageReference, ImageTag, InvocationContext, Stage, StageAction,
        StageResult, TestTier, TestTierSelector,
    },
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

/// Performs a single stage. Never retries.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(&self, stage: &Stage, ctx: &InvocationContext) -> StageResult;
}

struct ActionOutput {
    log: String,
    digest: Option<Digest>,
}

struct ActionFailure {
    cause: FailureCause,
    log: String,
}

impl ActionFailure {
    fn new(cause: FailureCause, log: impl Into<String>) -> Self {
        Self {
            cause,
            log: log.into(),
        }
    }
}

impl From<EngineError> for ActionFailure {
    fn from(err: EngineError) -> Self {
        ActionFailure::new(FailureCause::Engine(err.to_string()), err.to_string())
    }
}

type ActionResult = Result<ActionOutput, ActionFailure>;

/// Append an engine command's output to the stage log; non-zero exit fails
fn check(output: EngineOutput, log: &mut String) -> Result<(), ActionFailure> {
    if !output.log.is_empty() {
        if !log.is_empty() && !log.ends_with('\n') {
            log.push('\n');
        }
        log.push_str(&output.log);
    }
    if output.is_success() {
        Ok(())
    } else {
        Err(ActionFailure::new(
            FailureCause::ExitStatus(output.exit_code),
            log.clone(),
        ))
    }
}

/// Runs stages through a [`ContainerEngine`]
pub struct ContainerStageRunner<E> {
    engine: E,
}

impl<E: ContainerEngine> ContainerStageRunner<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    async fn require_digest(&self, image: &ImageReference, log: &str) -> Result<Digest, ActionFailure> {
        self.engine
            .inspect_digest(image)
            .await?
            .ok_or_else(|| ActionFailure::new(FailureCause::MissingImage(image.to_string()), log))
    }

    async fn perform(&self, stage: &Stage, ctx: &InvocationContext) -> ActionResult {
        match &stage.action {
            StageAction::PrintSetup => Ok(ActionOutput {
                log: ctx.describe(),
                digest: None,
            }),
            StageAction::Login => self.login(ctx).await,
            StageAction::Build { tag, use_cache } => self.build(tag, *use_cache, ctx).await,
            StageAction::Tag { from, to, requires } => self.promote(from, to, requires, ctx).await,
            StageAction::Push { tag } => {
                let image = ctx.reference(tag);
                let mut log = String::new();
                check(self.engine.push(&image).await?, &mut log)?;
                let digest = self.engine.inspect_digest(&image).await?;
                Ok(ActionOutput { log, digest })
            }
            StageAction::Pull { tag } => {
                let image = ctx.reference(tag);
                let mut log = String::new();
                check(self.engine.pull(&image).await?, &mut log)?;
                let digest = self.engine.inspect_digest(&image).await?;
                Ok(ActionOutput { log, digest })
            }
            StageAction::RunTests { tier, tag, ci } => self.run_tests(*tier, tag, *ci, ctx).await,
            StageAction::Exec { tag, argv } => {
                let image = ctx.working_reference(tag);
                let digest = self.require_digest(&image, "").await?;
                let request = RunRequest {
                    image,
                    argv: argv.clone(),
                    env: ctx.env.clone(),
                };
                let mut log = String::new();
                check(self.engine.run(&request).await?, &mut log)?;
                Ok(ActionOutput {
                    log,
                    digest: Some(digest),
                })
            }
            StageAction::ListImages { tag } => {
                let image = ctx.working_reference(tag);
                let mut log = String::new();
                check(self.engine.list_images(&image.repository).await?, &mut log)?;
                Ok(ActionOutput { log, digest: None })
            }
        }
    }

    async fn login(&self, ctx: &InvocationContext) -> ActionResult {
        let credentials = ctx
            .credentials
            .as_ref()
            .ok_or_else(|| ActionFailure::new(FailureCause::MissingCredentials, ""))?;

        let registry = ctx
            .images
            .rc
            .registry()
            .or_else(|| ctx.images.dev.registry())
            .ok_or_else(|| {
                ActionFailure::new(
                    FailureCause::Engine(format!("no registry host in {}", ctx.images.rc)),
                    "",
                )
            })?
            .to_string();

        let mut log = String::new();
        check(self.engine.login(&registry, credentials).await?, &mut log)?;
        Ok(ActionOutput { log, digest: None })
    }

    /// Build an image. An rc build for an already-built revision re-tags the
    /// pinned image instead of rebuilding.
    async fn build(&self, tag: &ImageTag, use_cache: bool, ctx: &InvocationContext) -> ActionResult {
        let target = ctx.working_reference(tag);
        let mut tags = vec![target.clone()];
        let mut log = String::new();

        let pin = *tag == ImageTag::Rc && ctx.image_override.is_none() && ctx.pins_revision();
        if pin {
            let pinned = ctx.reference(&ImageTag::rc_pinned(&ctx.revision));
            if !ctx.force_rebuild {
                if let Some(digest) = self.engine.inspect_digest(&pinned).await? {
                    info!("Revision {} already built as {}, reusing it", ctx.revision, digest.short());
                    log.push_str(&format!("Reusing {} ({})\n", pinned, digest));
                    check(self.engine.tag(&pinned, &target).await?, &mut log)?;
                    return Ok(ActionOutput {
                        log,
                        digest: Some(digest),
                    });
                }
            }
            tags.push(pinned);
        }

        let request = BuildRequest {
            tags,
            dockerfile: ctx.settings.dockerfile.clone(),
            context: ctx.settings.build_context.clone(),
            build_args: ctx.settings.build_args.clone(),
            labels: BTreeMap::from([("revision".to_string(), ctx.revision.clone())]),
            use_cache,
        };
        check(self.engine.build(&request).await?, &mut log)?;

        let digest = self.require_digest(&target, &log).await?;
        Ok(ActionOutput {
            log,
            digest: Some(digest),
        })
    }

    /// Re-tag a qualified digest
    async fn promote(
        &self,
        from: &ImageTag,
        to: &ImageTag,
        requires: &[TestTier],
        ctx: &InvocationContext,
    ) -> ActionResult {
        let source = ctx.reference(from);
        let digest = self.require_digest(&source, "").await?;
        let promoted = ArtifactRef::new(source.repository.clone(), from.clone())
            .with_digest(digest.clone())
            .promote(to.clone())
            .map_err(|e| ActionFailure::new(FailureCause::Engine(e.to_string()), ""))?;
        let target = ctx.reference(&promoted.tag);

        if !requires.is_empty() && !ctx.assume_qualified {
            ctx.ledger.check(&digest, requires).map_err(|missing| {
                ActionFailure::new(
                    FailureCause::NotQualified {
                        digest: digest.clone(),
                        missing,
                    },
                    format!("{} is not qualified for {}", source, to),
                )
            })?;
        }

        let mut log = format!("{} -> {} ({})\n", source, target, digest);
        check(self.engine.tag(&source, &target).await?, &mut log)?;

        let tagged = self.engine.inspect_digest(&target).await?;
        if tagged != promoted.digest {
            return Err(ActionFailure::new(
                FailureCause::Engine(format!(
                    "{} does not resolve to {} after tagging",
                    target,
                    digest.short()
                )),
                log,
            ));
        }

        Ok(ActionOutput {
            log,
            digest: Some(digest),
        })
    }

    async fn run_tests(
        &self,
        tier: TestTier,
        tag: &ImageTag,
        ci: bool,
        ctx: &InvocationContext,
    ) -> ActionResult {
        let image = ctx.working_reference(tag);
        let digest = self.require_digest(&image, "").await?;

        let argv = TestTierSelector::test_command(tier, &ctx.settings.test_command, &ctx.opts);
        let mut env = ctx.env.clone();
        if ci {
            env.insert("CI".to_string(), "true".to_string());
        }
        debug!("Running {} tests in {}: {:?}", tier, image, argv);

        let request = RunRequest { image, argv, env };
        let mut log = String::new();
        check(self.engine.run(&request).await?, &mut log)?;
        Ok(ActionOutput {
            log,
            digest: Some(digest),
        })
    }
}

#[async_trait]
impl<E: ContainerEngine> StageRunner for ContainerStageRunner<E> {
    async fn run(&self, stage: &Stage, ctx: &InvocationContext) -> StageResult {
        let started = Instant::now();
        debug!("Stage {}: {}", stage.name, stage.action.describe());

        let action = async {
            if stage.timeout_secs == 0 {
                return self.perform(stage, ctx).await;
            }
            match timeout(Duration::from_secs(stage.timeout_secs), self.perform(stage, ctx)).await {
                Ok(result) => result,
                Err(_) => Err(ActionFailure::new(
                    FailureCause::TimedOut(stage.timeout_secs),
                    format!("timed out after {}s", stage.timeout_secs),
                )),
            }
        };

        // Dropping the action kills any running subprocess
        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(ActionFailure::new(FailureCause::Cancelled, "cancelled")),
            result = action => result,
        };

        let result = match outcome {
            Ok(output) => StageResult::success(&stage.name, stage.kind, output.log, output.digest),
            Err(failure) => StageResult::failure(&stage.name, stage.kind, failure.cause, failure.log),
        };
        result.with_duration(started.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::InMemoryEngine;
    use crate::core::{Settings, TriggerKind};
    use crate::credentials::RegistryCredentials;
    use std::sync::Arc;

    const REVISION: &str = "0123456789abcdef";

    fn context() -> InvocationContext {
        let settings = Settings {
            ecr_repo_base_path: Some("123.dkr.ecr.us-east-1.amazonaws.com".to_string()),
            revision: Some(REVISION.to_string()),
            ..Settings::default()
        };
        InvocationContext::new(settings, TriggerKind::Local).unwrap()
    }

    fn runner() -> (Arc<InMemoryEngine>, ContainerStageRunner<Arc<InMemoryEngine>>) {
        let engine = Arc::new(InMemoryEngine::new());
        (engine.clone(), ContainerStageRunner::new(engine))
    }

    fn build_rc() -> Stage {
        Stage::new(
            "docker_build",
            StageAction::Build {
                tag: ImageTag::Rc,
                use_cache: false,
            },
        )
    }

    fn tag_latest(requires: Vec<TestTier>) -> Stage {
        Stage::new(
            "docker_tag_latest",
            StageAction::Tag {
                from: ImageTag::Rc,
                to: ImageTag::Latest,
                requires,
            },
        )
    }

    #[tokio::test]
    async fn test_rc_build_is_pinned_and_reused() {
        let (engine, runner) = runner();
        let ctx = context();

        let first = runner.run(&build_rc(), &ctx).await;
        assert!(first.is_success(), "{}", first.log);
        let pinned = ctx.reference(&ImageTag::rc_pinned(REVISION));
        assert_eq!(engine.local_digest(&pinned), first.digest);

        let second = runner.run(&build_rc(), &ctx).await;
        assert!(second.is_success());
        assert_eq!(second.digest, first.digest);
        assert_eq!(engine.build_count(), 1);
    }

    #[tokio::test]
    async fn test_forced_rebuild_produces_new_digest() {
        let (engine, runner) = runner();
        let mut ctx = context();

        let first = runner.run(&build_rc(), &ctx).await;
        ctx.force_rebuild = true;
        let second = runner.run(&build_rc(), &ctx).await;

        assert_eq!(engine.build_count(), 2);
        assert_ne!(first.digest, second.digest);
    }

    #[tokio::test]
    async fn test_build_failure_keeps_log() {
        let (engine, runner) = runner();
        engine.fail_builds(2);

        let result = runner.run(&build_rc(), &context()).await;
        assert_eq!(result.cause, Some(FailureCause::ExitStatus(2)));
        assert!(result.log.contains("failed to solve"));
    }

    #[tokio::test]
    async fn test_promotion_requires_qualification() {
        let (engine, runner) = runner();
        let mut ctx = context();
        let built = runner.run(&build_rc(), &ctx).await;
        let digest = built.digest.clone().unwrap();

        let refused = runner.run(&tag_latest(vec![TestTier::Fast]), &ctx).await;
        assert!(matches!(
            refused.cause,
            Some(FailureCause::NotQualified { ref missing, .. }) if missing == &vec![TestTier::Fast]
        ));
        assert_eq!(engine.local_digest(&ctx.images.dev), None);

        ctx.ledger.record(digest.clone(), TestTier::Fast, REVISION);
        let promoted = runner.run(&tag_latest(vec![TestTier::Fast]), &ctx).await;
        assert!(promoted.is_success());
        assert_eq!(engine.local_digest(&ctx.images.dev), Some(digest));
    }

    #[tokio::test]
    async fn test_assume_qualified_skips_ledger() {
        let (_engine, runner) = runner();
        let mut ctx = context();
        runner.run(&build_rc(), &ctx).await;
        ctx.assume_qualified = true;

        let promoted = runner.run(&tag_latest(vec![TestTier::Fast]), &ctx).await;
        assert!(promoted.is_success());
    }

    #[tokio::test]
    async fn test_missing_source_image() {
        let (_engine, runner) = runner();
        let result = runner.run(&tag_latest(vec![]), &context()).await;
        assert!(matches!(result.cause, Some(FailureCause::MissingImage(_))));
    }

    #[tokio::test]
    async fn test_run_tests_in_ci_mode() {
        let (engine, runner) = runner();
        let ctx = context();
        engine.seed_local(&ctx.images.dev, Digest::sha256(b"latest"));

        let stage = Stage::new(
            "run_fast_tests",
            StageAction::RunTests {
                tier: TestTier::Fast,
                tag: ImageTag::Latest,
                ci: true,
            },
        );
        let result = runner.run(&stage, &ctx).await;
        assert!(result.is_success());
        assert_eq!(result.digest, Some(Digest::sha256(b"latest")));

        let runs = engine.runs();
        assert_eq!(runs[0].env.get("CI").map(String::as_str), Some("true"));
        assert_eq!(
            runs[0].argv,
            vec!["pytest", "-m", "not slow and not superslow and not broken_deps"]
        );
    }

    #[tokio::test]
    async fn test_login_without_credentials_fails() {
        let (engine, runner) = runner();
        let result = runner.run(&Stage::new("docker_login", StageAction::Login), &context()).await;
        assert_eq!(result.cause, Some(FailureCause::MissingCredentials));
        assert!(engine.logins().is_empty());
    }

    #[tokio::test]
    async fn test_login_uses_registry_host() {
        let (engine, runner) = runner();
        let mut ctx = context();
        ctx.credentials = Some(RegistryCredentials {
            access_key_id: "AKIA".to_string(),
            secret_access_key: "secret".to_string(),
            region: "us-east-1".to_string(),
        });
        let result = runner.run(&Stage::new("docker_login", StageAction::Login), &ctx).await;
        assert!(result.is_success());
        assert_eq!(engine.logins(), vec!["123.dkr.ecr.us-east-1.amazonaws.com"]);
    }

    #[tokio::test]
    async fn test_timeout() {
        let (engine, runner) = runner();
        let ctx = context();
        engine.seed_local(&ctx.images.rc, Digest::sha256(b"rc"));
        engine.delay_runs(Duration::from_secs(5));

        let stage = Stage::new(
            "docker_echo",
            StageAction::Exec {
                tag: ImageTag::Rc,
                argv: vec!["echo".to_string()],
            },
        )
        .with_timeout(1);

        let result = runner.run(&stage, &ctx).await;
        assert!(result.timed_out());
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_stage() {
        let (engine, runner) = runner();
        let ctx = context();
        engine.seed_local(&ctx.images.rc, Digest::sha256(b"rc"));
        engine.delay_runs(Duration::from_secs(30));

        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let stage = Stage::new(
            "docker_echo",
            StageAction::Exec {
                tag: ImageTag::Rc,
                argv: vec!["echo".to_string()],
            },
        );
        let result = runner.run(&stage, &ctx).await;
        assert_eq!(result.cause, Some(FailureCause::Cancelled));
        assert!(result.duration_ms < 30_000);
    }
}
