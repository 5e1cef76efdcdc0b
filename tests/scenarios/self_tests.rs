//! Composite self-test targets

use crate::helpers::*;
use promote::core::{ExecutionStatus, ImageTag, PipelineError, TestTier, TriggerKind};

#[tokio::test]
async fn test_blank_failure_stops_self_tests_before_slow_half() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);
    harness.seed_rc(&ctx, "previous rc");
    harness.containers.fail_runs_matching("pytest -h", 4);

    let (pipeline, outcome) = harness.run("self_tests", &mut ctx).await;

    assert_ne!(outcome.exit_code, 0);
    assert_eq!(outcome.exit_code, 4);
    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert!(matches!(outcome.error, Some(PipelineError::Qualification { .. })));
    assert_eq!(
        ran(&outcome),
        vec![
            "print_setup/print_setup",
            "docker_echo/docker_echo",
            "run_blank_tests.rc/run_blank_tests",
        ]
    );

    for segment in ["docker_build_rc_image", "run_fast_tests.rc", "docker_build_image.prod"] {
        let skipped: Vec<_> = outcome.results.iter().filter(|r| r.target == segment).collect();
        assert!(!skipped.is_empty(), "{} missing from results", segment);
        assert!(skipped.iter().all(|r| r.is_skipped()));
    }
    assert_eq!(harness.containers.build_count(), 0);
    assert_eq!(harness.local(&ctx, ImageTag::Prod), None);
    assert_eq!(pipeline.state.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_green_self_tests_promote_built_rc_to_prod() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);
    harness.seed_rc(&ctx, "previous rc");

    let (pipeline, outcome) = harness.run("self_tests", &mut ctx).await;

    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(outcome.status, ExecutionStatus::Completed);
    assert_eq!(harness.containers.build_count(), 1);

    let built = pipeline
        .result("docker_build_rc_image", "docker_build")
        .and_then(|r| r.digest.clone())
        .expect("build digest");
    assert_eq!(harness.local(&ctx, ImageTag::Rc), Some(built.clone()));
    assert_eq!(harness.local(&ctx, ImageTag::Prod), Some(built.clone()));
    assert_eq!(
        harness.local(&ctx, ImageTag::prod_pinned(REVISION)),
        Some(built.clone())
    );

    // blank ran against the old rc, fast against the new build
    let recorded: Vec<_> = ctx.ledger.new_records().iter().map(|r| r.tier).collect();
    assert_eq!(recorded, vec![TestTier::Blank, TestTier::Fast]);
    assert!(ctx.ledger.check(&built, &[TestTier::Fast]).is_ok());
}

#[tokio::test]
async fn test_fast_self_tests_leave_registry_alone() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);
    harness.seed_rc(&ctx, "rc");

    let (_, outcome) = harness.run("fast_self_tests", &mut ctx).await;

    assert!(outcome.is_success());
    assert!(harness.containers.logins().is_empty());
    assert!(!harness.containers.calls().iter().any(|c| c == "push" || c == "tag"));
    let echo = &harness.containers.runs()[0];
    assert_eq!(echo.argv, vec!["echo", "Docker echo"]);
    assert_eq!(echo.image, reference(&ctx, ImageTag::Rc));
}
