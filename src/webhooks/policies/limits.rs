//! Resource limit validation policy.
//!
//! Every container must declare `resources.limits` for each configured
//! resource name. Pairs with the resource defaults mutator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::workload::containers_of;
use crate::rules::{RuleContext, RuleError, Validator, Verdict};

fn default_required() -> Vec<String> {
    vec!["cpu".to_string(), "memory".to_string()]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceLimits {
    #[serde(default = "default_required")]
    pub required: Vec<String>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            required: default_required(),
        }
    }
}

#[async_trait]
impl Validator for ResourceLimits {
    async fn validate(&self, ctx: &RuleContext<'_>) -> Result<Verdict, RuleError> {
        let mut violations = containers_of(ctx.object, ctx.request.resource_kind())
            .into_iter()
            .filter_map(|container| {
                let limits = container.value.pointer("/resources/limits");
                let missing: Vec<&str> = self
                    .required
                    .iter()
                    .filter(|name| limits.and_then(|l| l.get(name.as_str())).is_none())
                    .map(String::as_str)
                    .collect();
                (!missing.is_empty()).then(|| {
                    format!(
                        "container {:?} is missing resource limits: {}",
                        container.name(),
                        missing.join(", ")
                    )
                })
            });

        let Some(reason) = violations.next() else {
            return Ok(Verdict::allowed());
        };
        Ok(violations.fold(Verdict::denied(reason), Verdict::with_warning))
    }
}
