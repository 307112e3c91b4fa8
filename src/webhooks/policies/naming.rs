//! Naming convention validation policy.
//!
//! `metadata.name` must match a pattern; the default enforces `team-app-env`
//! (three lowercase alphanumeric words separated by dashes).

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::rules::{RuleContext, RuleError, Validator, Verdict};

/// Pattern enforced when none is configured
pub const DEFAULT_NAME_PATTERN: &str = "^[a-z0-9]+-[a-z0-9]+-[a-z0-9]+$";

#[derive(Debug, Clone)]
pub struct NamingConvention {
    pattern: Regex,
}

impl NamingConvention {
    pub fn new(pattern: Option<&str>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern.unwrap_or(DEFAULT_NAME_PATTERN))?,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

#[async_trait]
impl Validator for NamingConvention {
    async fn validate(&self, ctx: &RuleContext<'_>) -> Result<Verdict, RuleError> {
        let name = ctx
            .object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .or_else(|| ctx.request.object_name());
        let Some(name) = name else {
            // generateName: the final name is not known yet
            return Ok(Verdict::allowed()
                .with_warning("object has no name yet; naming convention not checked"));
        };
        if self.pattern.is_match(name) {
            Ok(Verdict::allowed())
        } else {
            Ok(Verdict::denied(format!(
                "name {name:?} does not match naming convention {}",
                self.pattern.as_str()
            )))
        }
    }
}
