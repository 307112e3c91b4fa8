//! Required label validation policy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::rules::{RuleContext, RuleError, Validator, Verdict};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RequiredLabels {
    pub keys: Vec<String>,
}

#[async_trait]
impl Validator for RequiredLabels {
    async fn validate(&self, ctx: &RuleContext<'_>) -> Result<Verdict, RuleError> {
        let labels = ctx.object.pointer("/metadata/labels");
        let missing: Vec<&str> = self
            .keys
            .iter()
            .filter(|key| labels.and_then(|l| l.get(key.as_str())).is_none())
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(Verdict::allowed())
        } else {
            Ok(Verdict::denied(format!(
                "missing required labels: {}",
                missing.join(", ")
            )))
        }
    }
}
