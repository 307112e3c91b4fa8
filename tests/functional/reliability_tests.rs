//! Deadlines, failure policies, the home-namespace guard, and cancellation.

use std::time::Duration;

use admission_gate::ChainSelection;
use admission_gate::PipelineError;
use admission_gate::health::HealthState;
use admission_gate::pipeline::Stage;
use admission_gate::rules::{FailurePolicy, RuleChains, RuleSpec};
use std::sync::Arc;

use crate::common::fixtures::{
    BrokenMutator, CountingMutator, CountingValidator, PLATFORM_RULES, ReviewBuilder,
    SleepyMutator, SleepyValidator, pipeline, pipeline_from_yaml, pod,
};

fn slow_spec(policy: FailurePolicy) -> RuleSpec {
    RuleSpec::new("slow-check")
        .timeout(Duration::from_millis(10))
        .failure_policy(policy)
}

// ============================================================================
// Timeout-to-policy mapping
// ============================================================================

/// A 50ms body under a 10ms deadline with IGNORE: warning, no denial.
#[tokio::test]
async fn test_timeout_ignore_allows_with_warning() {
    let chains = RuleChains::new().validator(
        slow_spec(FailurePolicy::Ignore),
        SleepyValidator(Duration::from_millis(50)),
    );
    let request = ReviewBuilder::new("t-1").pod(pod("web", &[])).request();

    let decision = pipeline(chains, None)
        .evaluate(&request, ChainSelection::Validating)
        .await;

    assert!(decision.response.allowed);
    assert_eq!(
        decision.response.warnings,
        vec!["rule slow-check failed and was ignored: timed out after 10ms".to_string()]
    );
}

/// The same rule with FAIL denies.
#[tokio::test]
async fn test_timeout_fail_denies() {
    let chains = RuleChains::new().validator(
        slow_spec(FailurePolicy::Fail),
        SleepyValidator(Duration::from_millis(50)),
    );
    let request = ReviewBuilder::new("t-2").pod(pod("web", &[])).request();

    let decision = pipeline(chains, None)
        .evaluate(&request, ChainSelection::Validating)
        .await;

    assert!(!decision.response.allowed);
    assert_eq!(
        decision.response.reason.as_deref(),
        Some("rule slow-check failed: timed out after 10ms")
    );
}

/// A timed-out mutator under IGNORE contributes no patch.
#[tokio::test]
async fn test_timed_out_mutator_contributes_nothing() {
    let chains = RuleChains::new().mutator(
        slow_spec(FailurePolicy::Ignore),
        SleepyMutator(Duration::from_millis(50)),
    );
    let request = ReviewBuilder::new("t-3").pod(pod("web", &[])).request();

    let decision = pipeline(chains, None)
        .evaluate(&request, ChainSelection::Mutating)
        .await;

    assert!(decision.response.allowed);
    assert!(decision.response.patch.is_empty());
    assert_eq!(decision.response.warnings.len(), 1);
}

/// A FAIL-policy mutator error stops everything, validators included.
#[tokio::test]
async fn test_fail_policy_mutator_stops_pipeline() {
    let validator = CountingValidator::default();
    let chains = RuleChains::new()
        .mutator(RuleSpec::new("broken"), BrokenMutator)
        .validator(RuleSpec::new("count"), validator.clone());
    let request = ReviewBuilder::new("t-4").pod(pod("web", &[])).request();

    let decision = pipeline(chains, None)
        .evaluate(&request, ChainSelection::Full)
        .await;

    assert!(!decision.response.allowed);
    assert_eq!(
        decision.response.reason.as_deref(),
        Some("rule broken failed: policy backend unreachable")
    );
    assert_eq!(validator.calls(), 0);
    assert_eq!(
        decision.trail,
        vec![Stage::Received, Stage::Mutating, Stage::Denied]
    );
}

/// Rule failures are counted by rule, cause, and policy.
#[tokio::test]
async fn test_rule_failures_recorded_in_metrics() {
    let health = Arc::new(HealthState::new());
    let chains = RuleChains::new().validator(
        slow_spec(FailurePolicy::Ignore),
        SleepyValidator(Duration::from_millis(50)),
    );
    let request = ReviewBuilder::new("t-5").pod(pod("web", &[])).request();

    pipeline(chains, None)
        .with_health(health.clone())
        .evaluate(&request, ChainSelection::Validating)
        .await;

    let encoded = health.metrics.encode();
    assert!(encoded.contains("admission_rule_failures_total"));
    assert!(encoded.contains("cause=\"timeout\""));
    assert!(encoded.contains("policy=\"ignore\""));
}

// ============================================================================
// Home namespace guard
// ============================================================================

/// Requests in the home namespace never reach a rule body.
#[tokio::test]
async fn test_home_namespace_never_runs_rules() {
    let mutator = CountingMutator::default();
    let validator = CountingValidator::default();
    let chains = RuleChains::new()
        .mutator(RuleSpec::new("m"), mutator.clone())
        .mutator(RuleSpec::new("broken"), BrokenMutator)
        .validator(RuleSpec::new("v"), validator.clone());
    let request = ReviewBuilder::new("h-1")
        .namespace("admission-system")
        .pod(pod("gate", &[("gate", "ghcr.io/unapproved/gate")]))
        .request();

    let decision = pipeline(chains, Some("admission-system"))
        .evaluate(&request, ChainSelection::Full)
        .await;

    assert!(decision.response.allowed);
    assert!(decision.response.patch.is_empty());
    assert_eq!(mutator.calls(), 0);
    assert_eq!(validator.calls(), 0);
}

/// The guard is configuration: other namespaces still run the rules.
#[tokio::test]
async fn test_other_namespaces_still_checked() {
    let pipeline = pipeline_from_yaml(PLATFORM_RULES, Some("admission-system"));
    let request = ReviewBuilder::new("h-2")
        .namespace("payments")
        .pod(pod("web", &[("a", "nginx")]))
        .request();

    let decision = pipeline.evaluate(&request, ChainSelection::Full).await;
    assert!(!decision.response.allowed);

    let request = ReviewBuilder::new("h-3")
        .namespace("admission-system")
        .pod(pod("web", &[("a", "nginx")]))
        .request();
    let decision = pipeline.evaluate(&request, ChainSelection::Full).await;
    assert!(decision.response.allowed);
}

/// Per-rule exclusions skip only that rule.
#[tokio::test]
async fn test_namespace_exclusions_are_per_rule() {
    let skipped = CountingValidator::default();
    let checked = CountingValidator::default();
    let chains = RuleChains::new()
        .validator(
            RuleSpec::new("skipped").exclude_namespace("kube-system"),
            skipped.clone(),
        )
        .validator(RuleSpec::new("checked"), checked.clone());
    let request = ReviewBuilder::new("h-4")
        .namespace("kube-system")
        .pod(pod("dns", &[]))
        .request();

    pipeline(chains, None)
        .evaluate(&request, ChainSelection::Validating)
        .await;

    assert_eq!(skipped.calls(), 0);
    assert_eq!(checked.calls(), 1);
}

// ============================================================================
// Cancellation
// ============================================================================

/// A caller giving up mid-rule gets no decision.
#[tokio::test]
async fn test_cancel_during_slow_rule() {
    let chains = RuleChains::new().validator(
        RuleSpec::new("slow").timeout(Duration::from_secs(5)),
        SleepyValidator(Duration::from_secs(2)),
    );
    let body = ReviewBuilder::new("c-1").pod(pod("web", &[])).body();

    let result = pipeline(chains, None)
        .review_until(
            &body,
            ChainSelection::Validating,
            tokio::time::sleep(Duration::from_millis(20)),
        )
        .await;

    assert!(matches!(result, Err(PipelineError::Cancelled)));
}

/// A cancel signal that never fires leaves the review untouched.
#[tokio::test]
async fn test_uncancelled_review_completes() {
    let body = ReviewBuilder::new("c-2").pod(pod("web", &[])).body();
    let result = pipeline(RuleChains::new(), None)
        .review_until(&body, ChainSelection::Full, std::future::pending())
        .await;

    let decision = result.unwrap();
    assert!(decision.response.allowed);
    assert_eq!(decision.response.uid, "c-2");
}
