//! Annotation removal mutator. The only built-in rule that emits `remove`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::patch::{PatchBuilder, PatchOperation, PointerBuf};
use crate::rules::{Mutator, RuleContext, RuleError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AnnotationRemoval {
    /// Annotation keys to strip when present
    pub keys: Vec<String>,
}

#[async_trait]
impl Mutator for AnnotationRemoval {
    async fn mutate(&self, ctx: &RuleContext<'_>) -> Result<Vec<PatchOperation>, RuleError> {
        let mut builder = PatchBuilder::new(ctx.object);
        for key in &self.keys {
            builder.remove(&PointerBuf::from_tokens([
                "metadata",
                "annotations",
                key.as_str(),
            ]))?;
        }
        Ok(builder.finish())
    }
}
