//! Which test tiers run for which trigger

use crate::helpers::*;
use promote::core::{ExecutionStatus, ImageTag, TriggerKind};

#[tokio::test]
async fn test_superslow_is_skipped_on_pull_requests() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::PullRequest);
    harness.seed_rc(&ctx, "rc");

    let (_, outcome) = harness.run("run_superslow_tests.rc", &mut ctx).await;

    assert_eq!(outcome.exit_code, 0);
    assert_eq!(outcome.status, ExecutionStatus::Completed);
    assert!(outcome.results.iter().all(|r| r.is_skipped()));
    let reason = outcome.results[0].skip_reason.clone().unwrap_or_default();
    assert!(reason.contains("superslow"), "{}", reason);
    assert!(harness.containers.runs().is_empty());
    assert!(ctx.ledger.new_records().is_empty());
}

#[tokio::test]
async fn test_superslow_runs_on_schedule_and_dispatch() {
    for trigger in [TriggerKind::Schedule, TriggerKind::WorkflowDispatch] {
        let harness = Harness::new();
        let mut ctx = context(trigger.clone());
        harness.seed_rc(&ctx, "rc");

        let (_, outcome) = harness.run("run_superslow_tests.rc", &mut ctx).await;

        assert!(outcome.is_success(), "{}: {:?}", trigger, outcome.error);
        let runs = harness.containers.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(
            runs[0].argv,
            vec!["pytest", "-m", "superslow and not broken_deps"]
        );
    }
}

#[tokio::test]
async fn test_gated_gh_action_skips_login_and_pull_too() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Push {
        default_branch: false,
    });

    let (_, outcome) = harness.run("run_slow_tests.gh_action", &mut ctx).await;

    assert_eq!(outcome.exit_code, 0);
    assert!(harness.containers.calls().is_empty());
}

#[tokio::test]
async fn test_opts_reach_the_test_command() {
    let harness = Harness::new();
    let mut s = settings();
    s.opts = vec!["-x".to_string(), "--maxfail=3".to_string()];
    let mut ctx = context_with(s, TriggerKind::Local);
    harness.seed_rc(&ctx, "rc");

    harness.run("run_fast_tests.rc", &mut ctx).await;

    let argv = &harness.containers.runs()[0].argv;
    assert_eq!(
        argv,
        &vec![
            "pytest",
            "-m",
            "not slow and not superslow and not broken_deps",
            "-x",
            "--maxfail=3"
        ]
    );
}

#[tokio::test]
async fn test_gh_action_rc_runs_rc_in_ci_mode() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);
    harness.seed_rc(&ctx, "rc");

    let (_, outcome) = harness.run("run_slow_tests.gh_action_rc", &mut ctx).await;

    assert!(outcome.is_success());
    let run = &harness.containers.runs()[0];
    assert_eq!(run.image, reference(&ctx, ImageTag::Rc));
    assert_eq!(run.env.get("CI").map(String::as_str), Some("true"));
    assert!(harness.containers.logins().is_empty());
}

#[tokio::test]
async fn test_unsuffixed_tests_run_against_latest() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);
    let latest = promote::core::Digest::sha256(b"latest");
    harness
        .containers
        .seed_local(&reference(&ctx, ImageTag::Latest), latest.clone());

    let (_, outcome) = harness.run("run_fast_tests", &mut ctx).await;

    assert!(outcome.is_success());
    assert_eq!(harness.containers.runs()[0].image, reference(&ctx, ImageTag::Latest));
    assert!(!harness.containers.runs()[0].env.contains_key("CI"));
    assert_eq!(ctx.ledger.new_records()[0].digest, latest);
}
