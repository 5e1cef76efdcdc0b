//! External cancellation

use crate::helpers::*;
use promote::core::{ExecutionStatus, FailureCause, PipelineError, TriggerKind};
use std::time::Duration;

#[tokio::test]
async fn test_cancel_during_a_stage_skips_the_rest() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);
    harness.seed_rc(&ctx, "rc");
    harness.containers.delay_runs(Duration::from_secs(30));

    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let (pipeline, outcome) = harness.run("fast_self_tests", &mut ctx).await;

    assert_eq!(outcome.status, ExecutionStatus::Cancelled);
    assert_eq!(outcome.exit_code, 130);
    assert_eq!(outcome.error, Some(PipelineError::Cancelled));

    // print_setup finished before the cancel and stays a success
    assert!(outcome.results[0].is_success());
    assert_eq!(outcome.results[1].cause, Some(FailureCause::Cancelled));
    assert!(outcome.results[2].is_skipped());
    assert_eq!(harness.containers.runs().len(), 1);
    assert_eq!(pipeline.state.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_before_start_runs_nothing() {
    let harness = Harness::new();
    let mut ctx = context(TriggerKind::Local);
    ctx.cancel.cancel();

    let (_, outcome) = harness.run("self_tests", &mut ctx).await;

    assert_eq!(outcome.exit_code, 130);
    assert!(outcome.results.iter().all(|r| r.is_skipped()));
    assert!(harness.containers.calls().is_empty());
}
