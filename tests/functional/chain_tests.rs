//! Chain ordering, patch conflicts, revalidation, and idempotence.

use admission_gate::ChainSelection;
use admission_gate::admission::Operation;
use admission_gate::patch::{PatchBuilder, PatchOperation, PointerBuf, replace};
use admission_gate::pipeline::Stage;
use admission_gate::rules::{
    Mutator, RuleChains, RuleContext, RuleError, RuleSpec, Selector, Validator, Verdict,
};
use admission_gate::webhooks::policies::NamingConvention;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::common::fixtures::{
    CountingMutator, MESH_RULES, PLATFORM_RULES, ReviewBuilder, apply_patch, deployment,
    pipeline, pipeline_from_yaml, pod,
};

/// Sets `metadata.labels.<key>` to a value
struct SetLabel(&'static str, &'static str);

#[async_trait]
impl Mutator for SetLabel {
    async fn mutate(&self, ctx: &RuleContext<'_>) -> Result<Vec<PatchOperation>, RuleError> {
        let mut builder = PatchBuilder::new(ctx.object);
        builder.set(
            &PointerBuf::from_tokens(["metadata", "labels", self.0]),
            json!(self.1),
        )?;
        Ok(builder.finish())
    }
}

/// Removes the whole labels map
struct DropLabels;

#[async_trait]
impl Mutator for DropLabels {
    async fn mutate(&self, ctx: &RuleContext<'_>) -> Result<Vec<PatchOperation>, RuleError> {
        let mut builder = PatchBuilder::new(ctx.object);
        builder.remove(&PointerBuf::from_tokens(["metadata", "labels"]))?;
        Ok(builder.finish())
    }
}

/// Emits an operation the object cannot take
struct BadPatch;

#[async_trait]
impl Mutator for BadPatch {
    async fn mutate(&self, _ctx: &RuleContext<'_>) -> Result<Vec<PatchOperation>, RuleError> {
        Ok(vec![replace(
            PointerBuf::from_tokens(["spec", "missing", "field"]),
            json!(1),
        )])
    }
}

/// Sets `metadata.name`
struct Rename(&'static str);

#[async_trait]
impl Mutator for Rename {
    async fn mutate(&self, ctx: &RuleContext<'_>) -> Result<Vec<PatchOperation>, RuleError> {
        let mut builder = PatchBuilder::new(ctx.object);
        builder.set(&PointerBuf::from_tokens(["metadata", "name"]), json!(self.0))?;
        Ok(builder.finish())
    }
}

/// Denies unless the label set by an earlier mutator is present
struct RequireLabel(&'static str);

#[async_trait]
impl Validator for RequireLabel {
    async fn validate(&self, ctx: &RuleContext<'_>) -> Result<Verdict, RuleError> {
        let present = ctx
            .object
            .pointer("/metadata/labels")
            .and_then(|labels| labels.get(self.0))
            .is_some();
        Ok(if present {
            Verdict::allowed()
        } else {
            Verdict::denied(format!("label {} is required", self.0))
        })
    }
}

/// A labeling rule runs before the rule validating label presence.
#[tokio::test]
async fn test_validators_observe_post_mutation_object() {
    let chains = RuleChains::new()
        .mutator(RuleSpec::new("team"), SetLabel("team", "payments"))
        .validator(RuleSpec::new("require-team"), RequireLabel("team"));
    let request = ReviewBuilder::new("o-1").pod(pod("web", &[])).request();

    let decision = pipeline(chains, None)
        .evaluate(&request, ChainSelection::Full)
        .await;

    assert!(decision.response.allowed);
    assert_eq!(
        decision.trail,
        vec![
            Stage::Received,
            Stage::Mutating,
            Stage::RevalidatingShape,
            Stage::Validating,
            Stage::Decided,
            Stage::Allowed,
        ]
    );
}

/// Later mutators see earlier patches and never re-add the labels map.
#[tokio::test]
async fn test_mutators_compose_in_order() {
    let chains = RuleChains::new()
        .mutator(RuleSpec::new("team"), SetLabel("team", "payments"))
        .mutator(RuleSpec::new("env"), SetLabel("env", "prod"));
    let request = ReviewBuilder::new("o-2").pod(pod("web", &[])).request();

    let decision = pipeline(chains, None)
        .evaluate(&request, ChainSelection::Mutating)
        .await;

    assert_eq!(
        serde_json::to_value(&decision.response.patch).unwrap(),
        json!([
            {"op": "add", "path": "/metadata/labels", "value": {}},
            {"op": "add", "path": "/metadata/labels/team", "value": "payments"},
            {"op": "add", "path": "/metadata/labels/env", "value": "prod"},
        ])
    );
}

/// A REMOVE followed by a write beneath it names both rules.
#[tokio::test]
async fn test_patch_conflict_denies_citing_both_rules() {
    let chains = RuleChains::new()
        .mutator(RuleSpec::new("drop-labels"), DropLabels)
        .mutator(RuleSpec::new("team"), SetLabel("team", "payments"));
    let mut object = pod("web", &[]);
    object["metadata"]["labels"] = json!({"team": "search"});
    let request = ReviewBuilder::new("o-3").pod(object).request();

    let decision = pipeline(chains, None)
        .evaluate(&request, ChainSelection::Full)
        .await;

    let reason = decision.response.reason.clone().unwrap();
    assert!(!decision.response.allowed);
    assert!(decision.response.patch.is_empty());
    assert!(reason.contains("drop-labels"));
    assert!(reason.contains("team"));
    assert_eq!(
        decision.trail,
        vec![Stage::Received, Stage::Mutating, Stage::Denied]
    );
}

/// An unappliable patch is a rule failure under that rule's policy.
#[tokio::test]
async fn test_unappliable_patch_follows_failure_policy() {
    let chains = RuleChains::new()
        .mutator(
            RuleSpec::new("bad").failure_policy(admission_gate::rules::FailurePolicy::Ignore),
            BadPatch,
        )
        .mutator(RuleSpec::new("team"), SetLabel("team", "payments"));
    let request = ReviewBuilder::new("o-4").pod(pod("web", &[])).request();

    let decision = pipeline(chains, None)
        .evaluate(&request, ChainSelection::Mutating)
        .await;

    assert!(decision.response.allowed);
    assert_eq!(decision.response.patch.len(), 2);
    assert!(decision.response.warnings[0].starts_with("rule bad failed and was ignored: invalid patch"));
}

/// Selectors are evaluated before the rule body.
#[tokio::test]
async fn test_selector_skips_rule_body() {
    let counter = CountingMutator::default();
    let chains = RuleChains::new().mutator(
        RuleSpec::new("deployments").applies_to(
            Selector::any()
                .kinds(["Deployment"])
                .operations([Operation::Create]),
        ),
        counter.clone(),
    );
    let pipeline = pipeline(chains, None);

    let pod_request = ReviewBuilder::new("o-5").pod(pod("web", &[])).request();
    pipeline.evaluate(&pod_request, ChainSelection::Mutating).await;
    assert_eq!(counter.calls(), 0);

    let update = ReviewBuilder::new("o-6")
        .operation(Operation::Update)
        .deployment(deployment("payments-api-prod", &[]))
        .old_object(deployment("payments-api-prod", &[]))
        .request();
    pipeline.evaluate(&update, ChainSelection::Mutating).await;
    assert_eq!(counter.calls(), 0);

    let create = ReviewBuilder::new("o-7")
        .deployment(deployment("payments-api-prod", &[]))
        .request();
    pipeline.evaluate(&create, ChainSelection::Mutating).await;
    assert_eq!(counter.calls(), 1);
}

/// Applying the response patch and resubmitting yields an empty patch.
#[tokio::test]
async fn test_reapplication_is_idempotent() {
    let pipeline = pipeline_from_yaml(PLATFORM_RULES, None);
    let mut object = deployment(
        "payments-api-prod",
        &[("api", "mycompany.azurecr.io/api:1"), ("proxy", "mycompany.azurecr.io/proxy:2")],
    );
    object["metadata"]["annotations"] = json!({
        "kubectl.kubernetes.io/last-applied-configuration": "{}",
    });
    let request = ReviewBuilder::new("i-1").deployment(object.clone()).request();

    let first = pipeline.evaluate(&request, ChainSelection::Mutating).await;
    assert!(!first.response.patch.is_empty());

    let patched: Value = apply_patch(&object, &first.response.patch);
    let resubmitted = ReviewBuilder::new("i-2").deployment(patched).request();
    let second = pipeline.evaluate(&resubmitted, ChainSelection::Mutating).await;

    assert!(second.response.allowed);
    assert!(second.response.patch.is_empty());
}

/// A sidecar appended after resource defaulting still gets resources, and
/// the result is stable when resubmitted.
#[tokio::test]
async fn test_sidecar_after_resource_defaults_is_idempotent() {
    let pipeline = pipeline_from_yaml(MESH_RULES, None);
    let object = pod("payments-api-prod", &[("api", "mycompany.azurecr.io/api:1")]);
    let request = ReviewBuilder::new("m-1").pod(object.clone()).request();

    let first = pipeline.evaluate(&request, ChainSelection::Full).await;
    assert!(first.response.allowed, "{:?}", first.response.reason);

    let patched = apply_patch(&object, &first.response.patch);
    let containers = patched["spec"]["containers"].as_array().unwrap();
    assert_eq!(containers.len(), 2);
    assert_eq!(containers[1]["name"], json!("envoy"));
    assert_eq!(containers[1]["resources"]["limits"]["memory"], json!("256Mi"));

    let resubmitted = ReviewBuilder::new("m-2")
        .operation(Operation::Update)
        .pod(patched)
        .old_object(object)
        .request();
    let second = pipeline.evaluate(&resubmitted, ChainSelection::Full).await;
    assert!(second.response.allowed);
    assert!(second.response.patch.is_empty(), "{:?}", second.response.patch);
}

/// Validators judge the name a mutator assigned, not the submitted one.
#[tokio::test]
async fn test_naming_sees_mutated_name() {
    let chains = RuleChains::new()
        .mutator(RuleSpec::new("rename"), Rename("team-app-prod"))
        .validator(RuleSpec::new("naming"), NamingConvention::new(None).unwrap());
    let request = ReviewBuilder::new("n-1").pod(pod("MyApp", &[])).request();

    let decision = pipeline(chains, None)
        .evaluate(&request, ChainSelection::Full)
        .await;

    assert!(decision.response.allowed, "{:?}", decision.response.reason);
    assert_eq!(
        serde_json::to_value(&decision.response.patch).unwrap(),
        json!([{"op": "replace", "path": "/metadata/name", "value": "team-app-prod"}])
    );
}

/// Same request, same configuration: byte-identical responses.
#[tokio::test]
async fn test_decisions_are_deterministic() {
    let pipeline = pipeline_from_yaml(PLATFORM_RULES, None);
    let body = ReviewBuilder::new("d-1")
        .pod(pod("web", &[("a", "nginx"), ("b", "mycompany.azurecr.io/b")]))
        .body();

    let first = pipeline.review(&body, ChainSelection::Full).await.unwrap();
    let second = pipeline.review(&body, ChainSelection::Full).await.unwrap();

    let encode = |d: &admission_gate::Decision| {
        serde_json::to_vec(&d.response.clone().into_review(&d.api_version).unwrap()).unwrap()
    };
    assert_eq!(encode(&first), encode(&second));
}
