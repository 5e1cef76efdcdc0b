//! Static table of CLI targets and the pipelines they expand to

use crate::core::{
    artifact::{ArtifactRef, ImageTag},
    context::InvocationContext,
    pipeline::{Pipeline, Segment},
    stage::{Stage, StageAction},
    tier::TestTier,
};
use std::fmt;
use std::str::FromStr;

/// How a test target picks its image and environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestVariant {
    /// Local `latest` image
    Dev,
    /// Local `rc` image
    Rc,
    /// Pull `latest` from the registry and run in CI mode
    GhAction,
    /// Local `rc` image in CI mode
    GhActionRc,
}

impl TestVariant {
    pub const ALL: [TestVariant; 4] = [
        TestVariant::Dev,
        TestVariant::Rc,
        TestVariant::GhAction,
        TestVariant::GhActionRc,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            TestVariant::Dev => "",
            TestVariant::Rc => ".rc",
            TestVariant::GhAction => ".gh_action",
            TestVariant::GhActionRc => ".gh_action_rc",
        }
    }

    fn image_tag(&self) -> ImageTag {
        match self {
            TestVariant::Dev | TestVariant::GhAction => ImageTag::Latest,
            TestVariant::Rc | TestVariant::GhActionRc => ImageTag::Rc,
        }
    }

    fn ci(&self) -> bool {
        matches!(self, TestVariant::GhAction | TestVariant::GhActionRc)
    }
}

/// A named CLI target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    BuildRc { cache: bool },
    PushRc,
    TagRcLatest,
    PushLatest,
    BuildProd,
    PushProd,
    Tests { tier: TestTier, variant: TestVariant },
    PrintSetup,
    DockerEcho,
    DockerLogin,
    DockerPull,
    FastSelfTests,
    SlowSelfTests,
    SelfTests,
}

impl Target {
    /// Every valid target, in listing order
    pub fn all() -> Vec<Target> {
        let mut targets = vec![
            Target::BuildRc { cache: false },
            Target::BuildRc { cache: true },
            Target::PushRc,
            Target::TagRcLatest,
            Target::PushLatest,
            Target::BuildProd,
            Target::PushProd,
        ];
        for tier in TestTier::ALL {
            for variant in TestVariant::ALL {
                let target = Target::Tests { tier, variant };
                if target.is_valid() {
                    targets.push(target);
                }
            }
        }
        targets.extend([
            Target::PrintSetup,
            Target::DockerEcho,
            Target::DockerLogin,
            Target::DockerPull,
            Target::FastSelfTests,
            Target::SlowSelfTests,
            Target::SelfTests,
        ]);
        targets
    }

    // Blank tests are a local smoke check only
    fn is_valid(&self) -> bool {
        !matches!(
            self,
            Target::Tests {
                tier: TestTier::Blank,
                variant: TestVariant::GhAction | TestVariant::GhActionRc,
            }
        )
    }

    pub fn name(&self) -> String {
        match self {
            Target::BuildRc { cache: false } => "docker_build_rc_image".to_string(),
            Target::BuildRc { cache: true } => "docker_build_rc_image_with_cache".to_string(),
            Target::PushRc => "docker_push_rc_image".to_string(),
            Target::TagRcLatest => "docker_tag_rc_image_latest".to_string(),
            Target::PushLatest => "docker_push_latest_image".to_string(),
            Target::BuildProd => "docker_build_image.prod".to_string(),
            Target::PushProd => "docker_push_image.prod".to_string(),
            Target::Tests { tier, variant } => format!("run_{}_tests{}", tier, variant.suffix()),
            Target::PrintSetup => "print_setup".to_string(),
            Target::DockerEcho => "docker_echo".to_string(),
            Target::DockerLogin => "docker_login".to_string(),
            Target::DockerPull => "docker_pull".to_string(),
            Target::FastSelfTests => "fast_self_tests".to_string(),
            Target::SlowSelfTests => "slow_self_tests".to_string(),
            Target::SelfTests => "self_tests".to_string(),
        }
    }

    /// One-line description for `list`
    pub fn description(&self) -> String {
        match self {
            Target::BuildRc { cache: false } => "Build the rc image from scratch".to_string(),
            Target::BuildRc { cache: true } => "Build the rc image using the layer cache".to_string(),
            Target::PushRc => "Push rc and its pinned tag to the registry".to_string(),
            Target::TagRcLatest => "Promote the qualified rc digest to latest".to_string(),
            Target::PushLatest => "Push latest to the registry".to_string(),
            Target::BuildProd => "Promote the qualified rc digest to prod".to_string(),
            Target::PushProd => "Push prod and its pinned tag to the registry".to_string(),
            Target::Tests { tier, variant } => {
                let image = match variant.image_tag() {
                    ImageTag::Rc => "rc",
                    _ => "latest",
                };
                let mode = match variant {
                    TestVariant::GhAction => " after pulling it, in CI mode",
                    TestVariant::GhActionRc => " in CI mode",
                    _ => "",
                };
                format!("Run {} tests against {}{}", tier, image, mode)
            }
            Target::PrintSetup => "Print the resolved invocation settings".to_string(),
            Target::DockerEcho => "Check the rc image starts".to_string(),
            Target::DockerLogin => "Log in to the image registry".to_string(),
            Target::DockerPull => "Pull latest from the registry".to_string(),
            Target::FastSelfTests => "print_setup, docker_echo, run_blank_tests.rc".to_string(),
            Target::SlowSelfTests => {
                "docker_build_rc_image, run_fast_tests.rc, docker_build_image.prod".to_string()
            }
            Target::SelfTests => "fast_self_tests, then slow_self_tests".to_string(),
        }
    }

    /// Sub-targets of a composite, empty for leaves
    pub fn children(&self) -> Vec<Target> {
        match self {
            Target::FastSelfTests => vec![
                Target::PrintSetup,
                Target::DockerEcho,
                Target::Tests {
                    tier: TestTier::Blank,
                    variant: TestVariant::Rc,
                },
            ],
            Target::SlowSelfTests => vec![
                Target::BuildRc { cache: false },
                Target::Tests {
                    tier: TestTier::Fast,
                    variant: TestVariant::Rc,
                },
                Target::BuildProd,
            ],
            Target::SelfTests => vec![Target::FastSelfTests, Target::SlowSelfTests],
            _ => Vec::new(),
        }
    }

    pub fn is_composite(&self) -> bool {
        !self.children().is_empty()
    }

    /// Image the target's stages act on
    fn image_tag(&self) -> ImageTag {
        match self {
            Target::TagRcLatest | Target::PushLatest | Target::DockerPull => ImageTag::Latest,
            Target::BuildProd | Target::PushProd => ImageTag::Prod,
            Target::Tests { variant, .. } => variant.image_tag(),
            _ => ImageTag::Rc,
        }
    }

    /// Expand the target into its pipeline
    pub fn build_pipeline(&self, ctx: &InvocationContext) -> Pipeline {
        let children = self.children();
        if !children.is_empty() {
            let parts = children.iter().map(|child| child.build_pipeline(ctx)).collect();
            return Pipeline::compose(self.name(), parts);
        }

        let tag = self.image_tag();
        let image = ArtifactRef::new(ctx.reference(&tag).repository, tag);
        let segment = self
            .stages(ctx)
            .into_iter()
            .fold(Segment::new(self.name(), image), Segment::stage);
        Pipeline::single(segment)
    }

    fn stages(&self, ctx: &InvocationContext) -> Vec<Stage> {
        let settings = &ctx.settings;
        let retries = settings.promotion_retries;
        let login = || {
            Stage::new("docker_login", StageAction::Login).with_timeout(settings.stage_timeout_secs)
        };
        let push = |name: &str, tag: ImageTag| {
            Stage::new(name, StageAction::Push { tag })
                .depends_on("docker_login")
                .with_timeout(settings.stage_timeout_secs)
                .with_retries(retries)
        };

        match *self {
            Target::BuildRc { cache } => vec![
                Stage::new(
                    "docker_build",
                    StageAction::Build {
                        tag: ImageTag::Rc,
                        use_cache: cache,
                    },
                )
                .with_timeout(settings.build_timeout_secs),
                Stage::new("docker_image_ls", StageAction::ListImages { tag: ImageTag::Rc })
                    .depends_on("docker_build")
                    .best_effort()
                    .with_timeout(settings.stage_timeout_secs),
            ],
            Target::PushRc => {
                let mut stages = vec![login(), push("docker_push_rc", ImageTag::Rc)];
                if ctx.pins_revision() {
                    stages.push(push("docker_push_rc_pinned", ImageTag::rc_pinned(&ctx.revision)));
                }
                stages
            }
            Target::TagRcLatest => vec![Stage::new(
                "docker_tag_latest",
                StageAction::Tag {
                    from: ImageTag::Rc,
                    to: ImageTag::Latest,
                    requires: settings.latest_required_tiers.clone(),
                },
            )
            .with_timeout(settings.stage_timeout_secs)
            .with_retries(retries)],
            Target::PushLatest => vec![login(), push("docker_push_latest", ImageTag::Latest)],
            Target::BuildProd => {
                let mut stages = vec![Stage::new(
                    "docker_tag_prod",
                    StageAction::Tag {
                        from: ImageTag::Rc,
                        to: ImageTag::Prod,
                        requires: settings.prod_required_tiers.clone(),
                    },
                )
                .with_timeout(settings.stage_timeout_secs)
                .with_retries(retries)];
                if ctx.pins_revision() {
                    stages.push(
                        Stage::new(
                            "docker_tag_prod_pinned",
                            StageAction::Tag {
                                from: ImageTag::Prod,
                                to: ImageTag::prod_pinned(&ctx.revision),
                                requires: Vec::new(),
                            },
                        )
                        .depends_on("docker_tag_prod")
                        .with_timeout(settings.stage_timeout_secs)
                        .with_retries(retries),
                    );
                }
                stages.push(
                    Stage::new("docker_image_ls", StageAction::ListImages { tag: ImageTag::Prod })
                        .depends_on("docker_tag_prod")
                        .best_effort()
                        .with_timeout(settings.stage_timeout_secs),
                );
                stages
            }
            Target::PushProd => {
                let mut stages = vec![login(), push("docker_push_prod", ImageTag::Prod)];
                if ctx.pins_revision() {
                    stages.push(push("docker_push_prod_pinned", ImageTag::prod_pinned(&ctx.revision)));
                }
                stages
            }
            Target::Tests { tier, variant } => {
                let run = Stage::new(
                    format!("run_{}_tests", tier),
                    StageAction::RunTests {
                        tier,
                        tag: variant.image_tag(),
                        ci: variant.ci(),
                    },
                )
                .with_timeout(settings.test_timeout_secs);

                if variant == TestVariant::GhAction {
                    vec![
                        login(),
                        Stage::new("docker_pull", StageAction::Pull { tag: ImageTag::Latest })
                            .depends_on("docker_login")
                            .with_timeout(settings.stage_timeout_secs),
                        run.depends_on("docker_pull"),
                    ]
                } else {
                    vec![run]
                }
            }
            Target::PrintSetup => vec![Stage::new("print_setup", StageAction::PrintSetup)],
            Target::DockerEcho => vec![Stage::new(
                "docker_echo",
                StageAction::Exec {
                    tag: ImageTag::Rc,
                    argv: vec!["echo".to_string(), "Docker echo".to_string()],
                },
            )
            .with_timeout(settings.stage_timeout_secs)],
            Target::DockerLogin => vec![login()],
            Target::DockerPull => vec![
                login(),
                Stage::new("docker_pull", StageAction::Pull { tag: ImageTag::Latest })
                    .depends_on("docker_login")
                    .with_timeout(settings.stage_timeout_secs),
            ],
            Target::FastSelfTests | Target::SlowSelfTests | Target::SelfTests => Vec::new(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Target::all()
            .into_iter()
            .find(|target| target.name() == s)
            .ok_or_else(|| format!("unknown target '{}'", s))
    }
}
