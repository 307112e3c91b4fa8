//! Approved image registry validation policy.
//!
//! Every container image, init containers included, must come from one of
//! the approved prefixes. A prefix only matches at a path boundary, so
//! `mycompany.azurecr.io` does not approve `mycompany.azurecr.io.evil.com/x`.
//! All offending containers are reported: the first as the denial reason,
//! the rest as warnings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::workload::containers_of;
use crate::rules::{RuleContext, RuleError, Validator, Verdict};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ImageRegistry {
    /// Allowed image prefixes, e.g. `mycompany.azurecr.io`
    pub approved: Vec<String>,
}

impl ImageRegistry {
    fn is_approved(&self, image: &str) -> bool {
        !image.is_empty() && self.approved.iter().any(|prefix| under_prefix(image, prefix))
    }
}

fn under_prefix(image: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return false;
    }
    image
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

#[async_trait]
impl Validator for ImageRegistry {
    async fn validate(&self, ctx: &RuleContext<'_>) -> Result<Verdict, RuleError> {
        let approved = self.approved.join(", ");
        let mut violations = containers_of(ctx.object, ctx.request.resource_kind())
            .into_iter()
            .filter(|c| !self.is_approved(c.image()))
            .map(|c| {
                format!(
                    "container {:?} image {:?} is not from approved registry ({})",
                    c.name(),
                    c.image(),
                    approved
                )
            });

        let Some(reason) = violations.next() else {
            return Ok(Verdict::allowed());
        };
        Ok(violations.fold(Verdict::denied(reason), Verdict::with_warning))
    }
}
