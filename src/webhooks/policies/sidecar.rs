//! Sidecar injection mutator.
//!
//! Appends a configured container (and the volumes it mounts) to every pod
//! spec that does not already run a container of the same name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::workload::pod_spec_path;
use crate::patch::{PatchBuilder, PatchOperation, PointerExt};
use crate::rules::{Mutator, RuleContext, RuleError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SidecarInjection {
    /// Container to append; must carry a `name`
    pub container: Value,
    /// Volumes appended alongside the container, matched by name
    #[serde(default)]
    pub volumes: Vec<Value>,
}

impl SidecarInjection {
    pub fn container_name(&self) -> Option<&str> {
        self.container.get("name").and_then(Value::as_str)
    }
}

fn has_named(list: Option<&Value>, name: &str) -> bool {
    list.and_then(Value::as_array).is_some_and(|items| {
        items
            .iter()
            .any(|item| item.get("name").and_then(Value::as_str) == Some(name))
    })
}

#[async_trait]
impl Mutator for SidecarInjection {
    async fn mutate(&self, ctx: &RuleContext<'_>) -> Result<Vec<PatchOperation>, RuleError> {
        let Some(pod_spec) = pod_spec_path(ctx.request.resource_kind()) else {
            return Ok(Vec::new());
        };
        let Some(name) = self.container_name() else {
            return Err(RuleError::failed("sidecar container has no name"));
        };
        let Some(spec) = pod_spec.lookup(ctx.object) else {
            return Ok(Vec::new());
        };
        if has_named(spec.get("containers"), name) {
            return Ok(Vec::new());
        }

        let mut builder = PatchBuilder::new(ctx.object);
        builder.append(&pod_spec.child("containers"), self.container.clone())?;
        for volume in &self.volumes {
            let volume_name = volume.get("name").and_then(Value::as_str).unwrap_or_default();
            if !has_named(spec.get("volumes"), volume_name) {
                builder.append(&pod_spec.child("volumes"), volume.clone())?;
            }
        }
        Ok(builder.finish())
    }
}
