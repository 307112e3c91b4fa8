//! Label injection mutator.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::patch::{PatchBuilder, PatchOperation, PointerBuf};
use crate::rules::{Mutator, RuleContext, RuleError};

/// Ensures `metadata.labels` carries the configured pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LabelInjection {
    pub labels: BTreeMap<String, String>,
}

#[async_trait]
impl Mutator for LabelInjection {
    async fn mutate(&self, ctx: &RuleContext<'_>) -> Result<Vec<PatchOperation>, RuleError> {
        let mut builder = PatchBuilder::new(ctx.object);
        for (key, value) in &self.labels {
            builder.set(
                &PointerBuf::from_tokens(["metadata", "labels", key.as_str()]),
                Value::String(value.clone()),
            )?;
        }
        Ok(builder.finish())
    }
}
