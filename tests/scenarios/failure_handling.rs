//! Halting failures, dependency order and timeouts

use crate::helpers::*;
use promote::core::{ExecutionStatus, FailureCause, ImageTag, PipelineError, TriggerKind};

#[tokio::test]
async fn test_gh_action_stages_follow_dependencies() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::PullRequest);
    harness
        .containers
        .seed_remote(&reference(&ctx, ImageTag::Latest), promote::core::Digest::sha256(b"latest"));

    let (_, outcome) = harness.run("run_fast_tests.gh_action", &mut ctx).await;

    assert!(outcome.is_success(), "{:?}", outcome.error);
    let order: Vec<_> = outcome.results.iter().map(|r| r.stage_name.as_str()).collect();
    assert_eq!(order, vec!["docker_login", "docker_pull", "run_fast_tests"]);
    let calls = harness.containers.calls();
    let login = calls.iter().position(|c| c == "login").unwrap();
    let pull = calls.iter().position(|c| c == "pull").unwrap();
    let run = calls.iter().position(|c| c == "run").unwrap();
    assert!(login < pull && pull < run);
}

#[tokio::test]
async fn test_failed_pull_skips_the_test_run() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::PullRequest);

    let (_, outcome) = harness.run("run_fast_tests.gh_action", &mut ctx).await;

    assert_eq!(outcome.status, ExecutionStatus::Failed);
    assert_eq!(outcome.exit_code, 1);
    assert!(outcome.results[0].is_success());
    assert!(outcome.results[1].is_failure());
    assert!(outcome.results[1].log.contains("not found"));
    assert!(outcome.results[2].is_skipped());
    assert!(harness.containers.runs().is_empty());
    assert_eq!(outcome.failed_stage().map(|r| r.stage_name.as_str()), Some("docker_pull"));
}

#[tokio::test]
async fn test_build_failure_exit_code_and_log_survive() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);
    harness.containers.fail_builds(2);

    let (pipeline, outcome) = harness.run("docker_build_rc_image", &mut ctx).await;

    assert_eq!(outcome.exit_code, 2);
    assert!(matches!(
        outcome.error,
        Some(PipelineError::Build { ref stage, cause: FailureCause::ExitStatus(2) }) if stage == "docker_build"
    ));
    let build = pipeline.first_failure().expect("failed build");
    assert!(build.log.contains("failed to solve"));
    // the listing depends on the build
    let listing = pipeline
        .result("docker_build_rc_image", "docker_image_ls")
        .expect("listing result");
    assert!(listing.is_skipped());
}

#[tokio::test]
async fn test_failing_tests_keep_their_exit_status() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);
    harness.seed_rc(&ctx, "rc");
    harness.containers.fail_runs_matching("not slow", 1);

    let (_, outcome) = harness.run("run_fast_tests.rc", &mut ctx).await;

    assert_eq!(outcome.exit_code, 1);
    assert!(matches!(outcome.error, Some(PipelineError::Qualification { .. })));
    assert!(ctx.ledger.new_records().is_empty());
    assert!(outcome.results[0].log.contains("FAILED"));
}

#[tokio::test]
async fn test_missing_image_is_reported_without_retry() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);

    let (_, outcome) = harness.run("docker_tag_rc_image_latest", &mut ctx).await;

    assert_eq!(outcome.exit_code, 1);
    let result = &outcome.results[0];
    assert!(matches!(result.cause, Some(FailureCause::MissingImage(_))));
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn test_stage_timeout_exits_124() {
    let harness = Harness::new();
    let mut s = settings();
    s.test_timeout_secs = 1;
    let mut ctx = context_with(s, TriggerKind::Local);
    harness.seed_rc(&ctx, "rc");
    harness.containers.delay_runs(std::time::Duration::from_secs(30));

    let (_, outcome) = harness.run("run_fast_tests.rc", &mut ctx).await;

    assert_eq!(outcome.exit_code, 124);
    assert!(outcome.results[0].timed_out());
    assert_eq!(outcome.status, ExecutionStatus::Failed);
}
