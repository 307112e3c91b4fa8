//! Applicability predicate over operation, kind, group, version, and namespace.

use serde::{Deserialize, Serialize};

use crate::admission::{AdmissionRequest, Operation};

/// Wildcard entry accepted in every list
pub const WILDCARD: &str = "*";

/// Which requests a rule applies to. An empty list matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Selector {
    pub operations: Vec<Operation>,
    pub kinds: Vec<String>,
    pub groups: Vec<String>,
    pub versions: Vec<String>,
    pub namespaces: Vec<String>,
}

impl Selector {
    /// Matches every request
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn operations(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.operations = operations.into_iter().collect();
        self
    }

    #[must_use]
    pub fn kinds<S: Into<String>>(mut self, kinds: impl IntoIterator<Item = S>) -> Self {
        self.kinds = kinds.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn groups<S: Into<String>>(mut self, groups: impl IntoIterator<Item = S>) -> Self {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn namespaces<S: Into<String>>(mut self, namespaces: impl IntoIterator<Item = S>) -> Self {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches(&self, request: &AdmissionRequest) -> bool {
        (self.operations.is_empty() || self.operations.contains(&request.operation))
            && list_matches(&self.kinds, request.resource_kind())
            && list_matches(&self.groups, request.resource_group())
            && list_matches(&self.versions, request.resource_version())
            && list_matches(&self.namespaces, &request.namespace)
    }
}

fn list_matches(list: &[String], value: &str) -> bool {
    list.is_empty() || list.iter().any(|entry| entry == WILDCARD || entry == value)
}
