//! Default resource requirements for containers that declare none.
//!
//! Containers that already carry `resources` are left alone, so re-running
//! the rule on its own output emits nothing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::workload::{containers, pod_spec_path};
use crate::patch::{PatchBuilder, PatchOperation, PointerExt};
use crate::rules::{Mutator, RuleContext, RuleError};

/// Limits and requests to inject
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceDefaults {
    #[serde(default)]
    pub limits: Map<String, Value>,
    #[serde(default)]
    pub requests: Map<String, Value>,
}

impl ResourceDefaults {
    /// The `resources` block written into each container
    fn block(&self) -> Value {
        let mut block = Map::new();
        if !self.limits.is_empty() {
            block.insert("limits".to_string(), Value::Object(self.limits.clone()));
        }
        if !self.requests.is_empty() {
            block.insert("requests".to_string(), Value::Object(self.requests.clone()));
        }
        Value::Object(block)
    }
}

#[async_trait]
impl Mutator for ResourceDefaults {
    async fn mutate(&self, ctx: &RuleContext<'_>) -> Result<Vec<PatchOperation>, RuleError> {
        let Some(pod_spec) = pod_spec_path(ctx.request.resource_kind()) else {
            return Ok(Vec::new());
        };

        let mut builder = PatchBuilder::new(ctx.object);
        for container in containers(ctx.object, &pod_spec) {
            if container.value.get("resources").is_none() {
                builder.set(&container.path(&pod_spec).child("resources"), self.block())?;
            }
        }
        Ok(builder.finish())
    }
}
