//! Registry credentials are resolved before anything runs

use crate::helpers::*;
use promote::core::{ImageTag, PipelineError, TriggerKind};
use promote::credentials::CredentialError;
use promote::execution::NotifyPolicy;

#[tokio::test]
async fn test_missing_credentials_touch_nothing() {
    let harness = Harness::with(without_credentials(), NotifyPolicy::CiOnly);
    let mut ctx = context(TriggerKind::Push {
        default_branch: true,
    });
    harness.seed_rc(&ctx, "rc");

    let (_, outcome) = harness.run("docker_push_rc_image", &mut ctx).await;

    assert_eq!(outcome.exit_code, 1);
    assert_eq!(
        outcome.error,
        Some(PipelineError::Credential(CredentialError::Missing(
            "AWS_ACCESS_KEY_ID".to_string()
        )))
    );
    assert!(outcome.results.iter().all(|r| r.is_skipped()));
    assert!(harness.containers.calls().is_empty());
    assert_eq!(harness.remote(&ctx, ImageTag::Rc), None);

    // still exactly one failure notification on CI
    let events = harness.notifier.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].status(), "failure");
}

#[tokio::test]
async fn test_composites_without_registry_stages_need_no_credentials() {
    let harness = Harness::with(without_credentials(), NotifyPolicy::Never);
    let mut ctx = context(TriggerKind::Local);
    harness.seed_rc(&ctx, "rc");

    let (_, outcome) = harness.run("slow_self_tests", &mut ctx).await;

    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert!(ctx.credentials.is_none());
}

#[tokio::test]
async fn test_login_targets_the_registry_host() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);

    let (_, outcome) = harness.run("docker_login", &mut ctx).await;

    assert!(outcome.is_success());
    assert_eq!(harness.containers.logins(), vec![REGISTRY.to_string()]);
    let creds = ctx.credentials.as_ref().expect("resolved credentials");
    assert_eq!(creds.region, "us-east-1");
    assert!(!format!("{:?}", creds).contains("wJalrXUtnFEMI"));
}

#[tokio::test]
async fn test_rejected_login_is_reported_as_a_credential_failure() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::PullRequest);
    harness.containers.reject_logins(255);

    let (_, outcome) = harness.run("run_fast_tests.gh_action", &mut ctx).await;

    assert_eq!(outcome.exit_code, 1);
    let error = outcome.error.expect("login failure");
    assert_eq!(error.category(), "CredentialFailure");
    assert!(matches!(
        error,
        PipelineError::Credential(CredentialError::Invalid { .. })
    ));
    assert!(outcome.results[0].log.contains("security token"));
    assert_eq!(outcome.results[0].attempts, 1);
    assert!(outcome.results[1..].iter().all(|r| r.is_skipped()));
    assert!(harness.containers.runs().is_empty());

    match &harness.notifier.events()[..] {
        [promote::notify::NotificationEvent::Failure { reason, .. }] => {
            assert!(reason.starts_with("CredentialFailure"), "{}", reason)
        }
        other => panic!("expected one failure notification, got {:?}", other),
    }
}
