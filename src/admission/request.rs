//! Typed admission request, built from the wire `request` object.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::authentication::v1::UserInfo;
use kube::core::admission::{self, AdmissionRequest as KubeRequest};
use kube::core::{DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AdmissionError;

/// The operation being admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "CREATE"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
            Operation::Connect => write!(f, "CONNECT"),
        }
    }
}

impl From<admission::Operation> for Operation {
    fn from(operation: admission::Operation) -> Self {
        match operation {
            admission::Operation::Create => Operation::Create,
            admission::Operation::Update => Operation::Update,
            admission::Operation::Delete => Operation::Delete,
            admission::Operation::Connect => Operation::Connect,
        }
    }
}

impl FromStr for Operation {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Operation::Create),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            "CONNECT" => Ok(Operation::Connect),
            other => Err(AdmissionError::MalformedRequest(format!(
                "unknown operation {other:?}"
            ))),
        }
    }
}

/// One admission request. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionRequest {
    /// Correlation id, echoed verbatim in the response
    pub uid: String,
    pub operation: Operation,
    /// Empty for cluster-scoped resources
    pub namespace: String,
    pub name: Option<String>,
    /// Schema of `object`
    pub kind: GroupVersionKind,
    /// The submitted resource. Always a map at the root.
    pub object: Value,
    /// Previous state, present for UPDATE and DELETE
    pub old_object: Option<Value>,
    pub dry_run: bool,
    pub user_info: Option<UserInfo>,
}

impl AdmissionRequest {
    /// Create a request with the given identity and object; other fields default.
    pub fn new(
        uid: impl Into<String>,
        operation: Operation,
        namespace: impl Into<String>,
        kind: GroupVersionKind,
        object: Value,
    ) -> Self {
        Self {
            uid: uid.into(),
            operation,
            namespace: namespace.into(),
            name: None,
            kind,
            object,
            old_object: None,
            dry_run: false,
            user_info: None,
        }
    }

    /// Set the previous object (UPDATE/DELETE)
    pub fn with_old_object(mut self, old_object: Value) -> Self {
        self.old_object = Some(old_object);
        self
    }

    pub fn resource_kind(&self) -> &str {
        &self.kind.kind
    }

    pub fn resource_group(&self) -> &str {
        &self.kind.group
    }

    pub fn resource_version(&self) -> &str {
        &self.kind.version
    }

    /// Whether the resource is cluster-scoped
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }

    /// Name of the object, from the request or from `metadata.name`
    pub fn object_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty()).or_else(|| {
            self.object
                .get("metadata")
                .and_then(|m| m.get("name"))
                .and_then(Value::as_str)
        })
    }
}

impl TryFrom<KubeRequest<DynamicObject>> for AdmissionRequest {
    type Error = AdmissionError;

    fn try_from(request: KubeRequest<DynamicObject>) -> Result<Self, Self::Error> {
        if request.uid.is_empty() {
            return Err(malformed("missing uid"));
        }
        let operation = Operation::from(request.operation);

        let old_object = request.old_object.map(to_tree).transpose()?;
        if operation == Operation::Update && old_object.is_none() {
            return Err(malformed("missing oldObject for UPDATE"));
        }

        // DELETE carries a null object; the stored state stands in for it.
        let object = match (request.object, operation) {
            (Some(object), _) => to_tree(object)?,
            (None, Operation::Delete) => old_object
                .clone()
                .ok_or_else(|| malformed("missing object and oldObject for DELETE"))?,
            (None, _) => return Err(malformed("missing object")),
        };

        Ok(Self {
            uid: request.uid,
            operation,
            namespace: request.namespace.unwrap_or_default(),
            name: Some(request.name).filter(|name| !name.is_empty()),
            kind: request.kind,
            object,
            old_object,
            dry_run: request.dry_run,
            user_info: Some(request.user_info),
        })
    }
}

fn to_tree(object: DynamicObject) -> Result<Value, AdmissionError> {
    serde_json::to_value(object).map_err(|e| malformed(&e.to_string()))
}

fn malformed(detail: &str) -> AdmissionError {
    AdmissionError::MalformedRequest(detail.to_string())
}
