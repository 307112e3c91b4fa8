//! End-to-end scenarios for the built-in platform rules.

use admission_gate::ChainSelection;
use admission_gate::patch::OperationExt;
use admission_gate::pipeline::Stage;
use serde_json::json;

use crate::common::fixtures::{
    PLATFORM_RULES, ReviewBuilder, apply_patch, deployment, pipeline_from_yaml, pod,
};

const RESOURCES_ONLY: &str = r#"
mutators:
  - name: default-resources
    rule:
      type: resourceDefaults
      limits: {memory: 256Mi, cpu: 200m}
      requests: {memory: 128Mi, cpu: 100m}
"#;

const REGISTRY_ONLY: &str = r#"
validators:
  - name: approved-registry
    rule:
      type: imageRegistry
      approved: [mycompany.azurecr.io]
"#;

const NAMING_ONLY: &str = r#"
validators:
  - name: naming
    match:
      kinds: [Deployment]
    rule:
      type: namingConvention
"#;

// ============================================================================
// Single-rule scenarios
// ============================================================================

/// A bare container gets default resources in a single ADD.
#[tokio::test]
async fn test_resource_defaults_scenario() {
    let pipeline = pipeline_from_yaml(RESOURCES_ONLY, None);
    let request = ReviewBuilder::new("abc")
        .pod(pod("my-app", &[("app", "nginx")]))
        .request();

    let decision = pipeline.evaluate(&request, ChainSelection::Mutating).await;
    let response = decision.response;

    assert!(response.allowed);
    assert_eq!(response.uid, "abc");
    assert_eq!(
        serde_json::to_value(&response.patch).unwrap(),
        json!([{
            "op": "add",
            "path": "/spec/containers/0/resources",
            "value": {
                "limits": {"memory": "256Mi", "cpu": "200m"},
                "requests": {"memory": "128Mi", "cpu": "100m"},
            },
        }])
    );
}

/// An image outside the approved registry is denied.
#[tokio::test]
async fn test_image_registry_scenario() {
    let pipeline = pipeline_from_yaml(REGISTRY_ONLY, None);
    let request = ReviewBuilder::new("abc")
        .pod(pod("my-app", &[("app", "nginx")]))
        .request();

    let decision = pipeline.evaluate(&request, ChainSelection::Validating).await;
    let response = decision.response;

    assert!(!response.allowed);
    assert!(response.patch.is_empty());
    assert!(
        response
            .reason
            .as_deref()
            .unwrap()
            .contains("not from approved registry")
    );
    assert_eq!(decision.trail.last(), Some(&Stage::Denied));
}

/// A deployment named against the team-app-env convention is denied.
#[tokio::test]
async fn test_naming_convention_scenario() {
    let pipeline = pipeline_from_yaml(NAMING_ONLY, None);
    let request = ReviewBuilder::new("dep-1")
        .deployment(deployment("MyApp-Production", &[("web", "nginx")]))
        .request();

    let decision = pipeline.evaluate(&request, ChainSelection::Validating).await;
    assert!(!decision.response.allowed);

    let request = ReviewBuilder::new("dep-2")
        .deployment(deployment("payments-api-prod", &[("web", "nginx")]))
        .request();
    let decision = pipeline.evaluate(&request, ChainSelection::Validating).await;
    assert!(decision.response.allowed);
}

// ============================================================================
// Full platform chain
// ============================================================================

/// Mutations satisfy the limits validator; the registry validator still
/// sees the original image.
#[tokio::test]
async fn test_platform_rules_allow_compliant_deployment() {
    let pipeline = pipeline_from_yaml(PLATFORM_RULES, None);
    let object = deployment(
        "payments-api-prod",
        &[("api", "mycompany.azurecr.io/payments/api:1.4.2")],
    );
    let request = ReviewBuilder::new("u-1").deployment(object.clone()).request();

    let decision = pipeline.evaluate(&request, ChainSelection::Full).await;
    let response = decision.response;

    assert!(response.allowed, "denied: {:?}", response.reason);
    let patched = apply_patch(&object, &response.patch);
    assert_eq!(
        patched["spec"]["template"]["spec"]["containers"][0]["resources"]["limits"]["cpu"],
        "200m"
    );
    assert_eq!(
        patched["metadata"]["labels"]["app.kubernetes.io/managed-by"],
        "admission-gate"
    );
}

/// Validate-only: the limits validator sees the unmutated object.
#[tokio::test]
async fn test_validate_endpoint_ignores_mutators() {
    let pipeline = pipeline_from_yaml(PLATFORM_RULES, None);
    let request = ReviewBuilder::new("u-2")
        .deployment(deployment(
            "payments-api-prod",
            &[("api", "mycompany.azurecr.io/payments/api:1.4.2")],
        ))
        .request();

    let decision = pipeline.evaluate(&request, ChainSelection::Validating).await;
    assert!(!decision.response.allowed);
    assert_eq!(
        decision.response.reason.as_deref(),
        Some(r#"container "api" is missing resource limits: cpu, memory"#)
    );
}

/// Every violation is reported: the first as reason, the rest as warnings.
#[tokio::test]
async fn test_all_violations_reported() {
    let pipeline = pipeline_from_yaml(PLATFORM_RULES, None);
    let request = ReviewBuilder::new("u-3")
        .pod(pod("web", &[("a", "nginx"), ("b", "redis")]))
        .request();

    let decision = pipeline.evaluate(&request, ChainSelection::Validating).await;
    let response = decision.response;

    assert!(!response.allowed);
    assert!(response.reason.unwrap().contains(r#"container "a""#));
    assert!(response.warnings.iter().any(|w| w.contains(r#"container "b" image"#)));
    assert!(response.warnings.iter().any(|w| w.contains("missing resource limits")));
}

/// Annotation removal is the only REMOVE producer.
#[tokio::test]
async fn test_annotation_removal() {
    let pipeline = pipeline_from_yaml(PLATFORM_RULES, None);
    let mut object = pod("web", &[("a", "mycompany.azurecr.io/a")]);
    object["metadata"]["annotations"] = json!({
        "kubectl.kubernetes.io/last-applied-configuration": "{}",
    });
    let request = ReviewBuilder::new("u-4").pod(object).request();

    let decision = pipeline.evaluate(&request, ChainSelection::Mutating).await;
    let removes: Vec<String> = decision
        .response
        .patch
        .iter()
        .filter(|op| op.is_remove())
        .map(|op| op.target().to_string())
        .collect();
    assert_eq!(
        removes,
        vec!["/metadata/annotations/kubectl.kubernetes.io~1last-applied-configuration"]
    );
}

/// DELETE requests are evaluated against the stored object.
#[tokio::test]
async fn test_delete_uses_old_object() {
    let pipeline = pipeline_from_yaml(REGISTRY_ONLY, None);
    let body = ReviewBuilder::new("del-1")
        .operation(admission_gate::Operation::Delete)
        .pod(serde_json::Value::Null)
        .old_object(pod("web", &[("a", "nginx")]))
        .body();

    let decision = pipeline.review(&body, ChainSelection::Validating).await.unwrap();
    assert!(!decision.response.allowed);
    assert_eq!(decision.response.uid, "del-1");
}
