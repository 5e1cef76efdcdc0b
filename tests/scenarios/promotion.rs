//! Promotion re-tags qualified digests and nothing else

use crate::helpers::*;
use promote::core::{
    Digest, ImageTag, PipelineError, QualificationLedger, QualificationRecord, TestTier,
    TriggerKind,
};

fn qualified(digest: &Digest, tier: TestTier) -> QualificationRecord {
    QualificationRecord {
        digest: digest.clone(),
        tier,
        revision: REVISION.to_string(),
        recorded_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn test_retagging_latest_twice_yields_same_mapping() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);
    let rc = harness.seed_rc(&ctx, "qualified rc");
    ctx.ledger = QualificationLedger::seeded(vec![qualified(&rc, TestTier::Fast)]);

    let (_, first) = harness.run("docker_tag_rc_image_latest", &mut ctx).await;
    assert!(first.is_success(), "{:?}", first.error);
    let after_first = harness.local(&ctx, ImageTag::Latest);

    let (_, second) = harness.run("docker_tag_rc_image_latest", &mut ctx).await;
    assert!(second.is_success());

    assert_eq!(after_first, Some(rc.clone()));
    assert_eq!(harness.local(&ctx, ImageTag::Latest), after_first);
    assert_eq!(harness.containers.build_count(), 0);
}

#[tokio::test]
async fn test_prod_digest_equals_qualified_rc() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);
    let rc = harness.seed_rc(&ctx, "qualified rc");
    ctx.ledger = QualificationLedger::seeded(vec![qualified(&rc, TestTier::Fast)]);

    let (pipeline, outcome) = harness.run("docker_build_image.prod", &mut ctx).await;

    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(harness.local(&ctx, ImageTag::Prod), Some(rc.clone()));
    assert_eq!(harness.local(&ctx, ImageTag::prod_pinned(REVISION)), Some(rc.clone()));
    assert_eq!(harness.local(&ctx, ImageTag::Rc), Some(rc.clone()));

    // the promoted artifact is a new tag carrying the rc digest
    let artifact = pipeline.artifact().expect("resolved artifact");
    assert_eq!(artifact.tag, ImageTag::Prod);
    assert_eq!(artifact.digest, Some(rc.clone()));
    assert_eq!(outcome.image_digest, Some(rc));

    let listing = pipeline
        .result("docker_build_image.prod", "docker_image_ls")
        .expect("image listing ran");
    assert!(listing.is_success());
    assert!(listing.log.contains(":prod"));
}

#[tokio::test]
async fn test_unqualified_rc_is_not_promoted() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);
    let rc = harness.seed_rc(&ctx, "untested rc");
    let other = Digest::sha256(b"some other build");
    ctx.ledger = QualificationLedger::seeded(vec![qualified(&other, TestTier::Fast)]);

    let (_, outcome) = harness.run("docker_tag_rc_image_latest", &mut ctx).await;

    assert_eq!(outcome.exit_code, 1);
    match &outcome.error {
        Some(PipelineError::NotQualified { digest, missing, .. }) => {
            assert_eq!(digest, &rc);
            assert_eq!(missing, &vec![TestTier::Fast]);
        }
        other => panic!("expected NotQualified, got {:?}", other),
    }
    assert_eq!(harness.local(&ctx, ImageTag::Latest), None);
    assert!(!harness.containers.calls().contains(&"tag".to_string()));
}

#[tokio::test]
async fn test_prod_can_require_more_tiers_than_latest() {
    let harness = Harness::new();
    let mut s = settings();
    s.prod_required_tiers = vec![TestTier::Fast, TestTier::Slow];
    let mut ctx = context_with(s, TriggerKind::Local);
    let rc = harness.seed_rc(&ctx, "fast-only rc");
    ctx.ledger = QualificationLedger::seeded(vec![qualified(&rc, TestTier::Fast)]);

    let (_, latest) = harness.run("docker_tag_rc_image_latest", &mut ctx).await;
    assert!(latest.is_success());

    let (pipeline, prod) = harness.run("docker_build_image.prod", &mut ctx).await;
    assert!(matches!(
        prod.error,
        Some(PipelineError::NotQualified { ref missing, .. }) if missing == &vec![TestTier::Slow]
    ));
    let pinned = pipeline
        .result("docker_build_image.prod", "docker_tag_prod_pinned")
        .expect("pinned tag result");
    assert!(pinned.is_skipped());
    assert_eq!(harness.local(&ctx, ImageTag::Prod), None);
}

#[tokio::test]
async fn test_assume_qualified_bypasses_ledger() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::WorkflowDispatch);
    let rc = harness.seed_rc(&ctx, "tested elsewhere");
    ctx.assume_qualified = true;

    let (_, outcome) = harness.run("docker_tag_rc_image_latest", &mut ctx).await;

    assert!(outcome.is_success());
    assert_eq!(harness.local(&ctx, ImageTag::Latest), Some(rc));
}

#[tokio::test]
async fn test_rc_rebuild_for_same_revision_reuses_digest() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);

    let (_, first) = harness.run("docker_build_rc_image", &mut ctx).await;
    let (_, second) = harness.run("docker_build_rc_image_with_cache", &mut ctx).await;

    assert!(first.is_success() && second.is_success());
    assert_eq!(harness.containers.build_count(), 1);
    assert_eq!(first.image_digest, second.image_digest);
    assert_eq!(harness.local(&ctx, ImageTag::Rc), first.image_digest);

    ctx.force_rebuild = true;
    let (_, forced) = harness.run("docker_build_rc_image", &mut ctx).await;
    assert_eq!(harness.containers.build_count(), 2);
    assert_ne!(forced.image_digest, first.image_digest);
}

#[tokio::test]
async fn test_flaky_push_is_retried() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Push {
        default_branch: true,
    });
    let rc = harness.seed_rc(&ctx, "rc");
    harness
        .containers
        .seed_local(&reference(&ctx, ImageTag::rc_pinned(REVISION)), rc.clone());
    harness.containers.fail_next_pushes(1);

    let (pipeline, outcome) = harness.run("docker_push_rc_image", &mut ctx).await;

    assert!(outcome.is_success(), "{:?}", outcome.error);
    let push = pipeline
        .result("docker_push_rc_image", "docker_push_rc")
        .expect("push result");
    assert_eq!(push.attempts, 2);
    assert_eq!(harness.remote(&ctx, ImageTag::Rc), Some(rc.clone()));
    assert_eq!(harness.remote(&ctx, ImageTag::rc_pinned(REVISION)), Some(rc));
}

#[tokio::test]
async fn test_push_failure_is_a_promotion_failure() {
    let harness = Harness::new();
    let mut s = settings();
    s.promotion_retries = 1;
    let mut ctx = context_with(s, TriggerKind::Local);
    harness.seed_rc(&ctx, "rc");
    harness.containers.fail_next_pushes(5);

    let (_, outcome) = harness.run("docker_push_rc_image", &mut ctx).await;

    assert!(matches!(outcome.error, Some(PipelineError::Promotion { .. })));
    assert_eq!(outcome.exit_code, 1);
    assert_eq!(harness.remote(&ctx, ImageTag::Rc), None);
}

#[tokio::test]
async fn test_unknown_revision_builds_and_publishes_without_pinned_tags() {
    let harness = Harness::new();
    let mut s = settings();
    s.revision = Some(promote::core::UNKNOWN_REVISION.to_string());
    let mut ctx = context_with(s, TriggerKind::Local);

    let (_, built) = harness.run("docker_build_rc_image", &mut ctx).await;
    assert!(built.is_success(), "{:?}", built.error);
    let rc = harness.local(&ctx, ImageTag::Rc).expect("built rc");

    let (_, pushed) = harness.run("docker_push_rc_image", &mut ctx).await;
    assert!(pushed.is_success(), "{:?}", pushed.error);
    assert_eq!(ran(&pushed).len(), 2);
    assert_eq!(harness.remote(&ctx, ImageTag::Rc), Some(rc.clone()));

    ctx.ledger = QualificationLedger::seeded(vec![qualified(&rc, TestTier::Fast)]);
    let (_, prod) = harness.run("docker_build_image.prod", &mut ctx).await;
    assert!(prod.is_success(), "{:?}", prod.error);
    let (_, published) = harness.run("docker_push_image.prod", &mut ctx).await;
    assert!(published.is_success(), "{:?}", published.error);
    assert_eq!(harness.remote(&ctx, ImageTag::Prod), Some(rc));

    for pinned in [
        ImageTag::rc_pinned(&ctx.revision),
        ImageTag::prod_pinned(&ctx.revision),
    ] {
        assert_eq!(harness.local(&ctx, pinned.clone()), None);
        assert_eq!(harness.remote(&ctx, pinned), None);
    }
}
