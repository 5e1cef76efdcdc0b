//! One best-effort notification per invocation

use crate::helpers::*;
use promote::core::{Digest, ExecutionStatus, ImageTag, TriggerKind};
use promote::execution::NotifyPolicy;
use promote::notify::NotificationEvent;
use std::sync::Arc;

#[tokio::test]
async fn test_green_gh_action_sends_one_success_and_touches_no_promotion_tags() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::PullRequest);
    let latest = Digest::sha256(b"published latest");
    harness
        .containers
        .seed_remote(&reference(&ctx, ImageTag::Latest), latest.clone());

    let (_, outcome) = harness.run("run_fast_tests.gh_action", &mut ctx).await;

    assert_eq!(outcome.exit_code, 0);
    assert_eq!(
        harness.notifier.events(),
        vec![NotificationEvent::Success {
            target: "run_fast_tests.gh_action".to_string(),
            revision: REVISION.to_string(),
        }]
    );
    let calls = harness.containers.calls();
    assert!(!calls.iter().any(|c| c == "tag" || c == "push" || c == "build"));
    assert_eq!(harness.local(&ctx, ImageTag::Latest), Some(latest.clone()));
    assert_eq!(harness.remote(&ctx, ImageTag::Latest), Some(latest));
    assert_eq!(harness.local(&ctx, ImageTag::Prod), None);
    assert_eq!(harness.containers.runs()[0].env.get("CI").map(String::as_str), Some("true"));
}

#[tokio::test]
async fn test_failure_notification_carries_the_reason() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Schedule);
    harness.seed_rc(&ctx, "rc");
    harness.containers.fail_runs_matching("superslow", 3);

    let (_, outcome) = harness.run("run_superslow_tests.rc", &mut ctx).await;

    assert_eq!(outcome.exit_code, 3);
    let events = harness.notifier.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        NotificationEvent::Failure { target, reason, .. } => {
            assert_eq!(target, "run_superslow_tests.rc");
            assert!(reason.starts_with("QualificationFailure"), "{}", reason);
            assert!(reason.contains("exit code 3"));
        }
        other => panic!("expected failure notification, got {:?}", other),
    }
    let body = events[0].render("ci", "runner-1");
    assert!(body.contains("status=failure"));
    assert!(body.contains(&format!("revision={}", REVISION)));
}

#[tokio::test]
async fn test_local_runs_stay_quiet_unless_forced() {
    let quiet = Harness::new();
    let mut ctx = context(TriggerKind::Local);
    quiet.run("print_setup", &mut ctx).await;
    assert!(quiet.notifier.events().is_empty());

    let forced = Harness::with(with_credentials(), NotifyPolicy::Always);
    let mut ctx = context(TriggerKind::Local);
    forced.run("print_setup", &mut ctx).await;
    assert_eq!(forced.notifier.events().len(), 1);
}

#[tokio::test]
async fn test_notification_failure_does_not_change_outcome() {
    let harness = Harness::with_sink(Arc::new(FailingNotifier));
    let mut ctx = context(TriggerKind::PullRequest);
    harness.seed_rc(&ctx, "rc");

    let (_, outcome) = harness.run("run_fast_tests.rc", &mut ctx).await;

    assert!(outcome.is_success());
    assert_eq!(outcome.status, ExecutionStatus::Completed);
    let reason = outcome.notification_error.expect("recorded notification error");
    assert!(reason.contains("401"), "{}", reason);
}
