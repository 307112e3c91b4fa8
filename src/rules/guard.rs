//! Reliability wrapper around every rule invocation.
//!
//! Enforces the rule's deadline, maps failures through its failure policy, and
//! refuses to run any rule for requests in the server's own namespace. The
//! guard knows nothing about what a rule does.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, error, warn};

use super::{FailurePolicy, RuleError, RuleSpec};
use crate::admission::AdmissionRequest;
use crate::error::AdmissionError;

/// A rule failure, kept for metrics and logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub rule: String,
    pub error: AdmissionError,
    pub policy: FailurePolicy,
}

/// Outcome of one guarded invocation
#[derive(Debug)]
pub enum Invocation<T> {
    /// The request targets the home namespace; the body never ran
    Shielded,
    /// The body produced a result in time
    Completed(T),
    /// The body failed under `Ignore`; the chain continues
    Recovered { failure: RuleFailure, warning: String },
    /// The body failed under `Fail`; processing must stop with `reason`
    Aborted { failure: RuleFailure, reason: String },
}

/// Wraps rule invocations. Holds the home namespace passed in at construction.
#[derive(Debug, Clone, Default)]
pub struct Guard {
    home_namespace: Option<String>,
}

impl Guard {
    pub fn new(home_namespace: Option<String>) -> Self {
        Self {
            home_namespace: home_namespace.filter(|ns| !ns.is_empty()),
        }
    }

    pub fn home_namespace(&self) -> Option<&str> {
        self.home_namespace.as_deref()
    }

    /// Whether requests in `namespace` are never intercepted
    pub fn shields(&self, namespace: &str) -> bool {
        self.home_namespace.as_deref() == Some(namespace)
    }

    /// Run a rule body under the rule's deadline and failure policy.
    ///
    /// On expiry the in-flight body is dropped, which cancels it at its next
    /// suspension point. A panicking body counts as an execution error.
    pub async fn invoke<T, F, Fut>(
        &self,
        spec: &RuleSpec,
        request: &AdmissionRequest,
        body: F,
    ) -> Invocation<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RuleError>>,
    {
        if self.shields(&request.namespace) {
            debug!(
                uid = %request.uid,
                rule = %spec.name,
                namespace = %request.namespace,
                "Skipping rule for request in home namespace"
            );
            return Invocation::Shielded;
        }

        let guarded = AssertUnwindSafe(body()).catch_unwind();
        let error = match tokio::time::timeout(spec.timeout, guarded).await {
            Ok(Ok(Ok(value))) => return Invocation::Completed(value),
            Ok(Ok(Err(err))) => AdmissionError::RuleExecution {
                rule: spec.name.clone(),
                cause: err.to_string(),
            },
            Ok(Err(payload)) => AdmissionError::RuleExecution {
                rule: spec.name.clone(),
                cause: format!("panicked: {}", panic_message(payload.as_ref())),
            },
            Err(_) => AdmissionError::RuleTimeout {
                rule: spec.name.clone(),
                timeout: spec.timeout,
            },
        };
        self.on_failure(spec, &request.uid, error)
    }

    /// Apply the rule's failure policy to an error
    pub fn on_failure<T>(&self, spec: &RuleSpec, uid: &str, error: AdmissionError) -> Invocation<T> {
        let cause = describe(&error);
        let failure = RuleFailure {
            rule: spec.name.clone(),
            error,
            policy: spec.failure_policy,
        };
        match spec.failure_policy {
            FailurePolicy::Ignore => {
                warn!(uid = %uid, rule = %spec.name, cause = %cause, "Rule failed, ignoring per failure policy");
                Invocation::Recovered {
                    warning: format!("rule {} failed and was ignored: {}", spec.name, cause),
                    failure,
                }
            }
            FailurePolicy::Fail => {
                error!(uid = %uid, rule = %spec.name, cause = %cause, "Rule failed, denying per failure policy");
                Invocation::Aborted {
                    reason: format!("rule {} failed: {}", spec.name, cause),
                    failure,
                }
            }
        }
    }
}

/// Failure cause without the rule name
fn describe(error: &AdmissionError) -> String {
    match error {
        AdmissionError::RuleTimeout { timeout, .. } => {
            format!("timed out after {}ms", timeout.as_millis())
        }
        AdmissionError::RuleExecution { cause, .. } => cause.clone(),
        other => other.to_string(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
