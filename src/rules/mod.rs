//! Rule model: mutators and validators, their registration, and evaluation.
//!
//! - `selector`: cheap applicability predicate evaluated before a rule body
//! - `guard`: per-invocation deadline, failure policy, and home-namespace guard
//! - `engine`: ordered evaluation of the mutator and validator chains

pub mod engine;
pub mod guard;
pub mod selector;

pub use engine::{MutationOutcome, RuleEngine, ValidationOutcome};
pub use guard::{Guard, Invocation, RuleFailure};
pub use selector::Selector;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::admission::AdmissionRequest;
use crate::patch::{PatchError, PatchOperation};

/// Default deadline for a rule body
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// What happens when a rule body errors or times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Deny the request and stop processing
    #[default]
    Fail,
    /// Skip the rule with a warning and continue
    Ignore,
}

/// Whether a mutator runs again when a later mutator changed the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReinvocationPolicy {
    /// Run at most once per request
    Never,
    /// Run once more if a mutator after it changed the object
    #[default]
    IfNeeded,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Fail => "fail",
            FailurePolicy::Ignore => "ignore",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Fail => write!(f, "Fail"),
            FailurePolicy::Ignore => write!(f, "Ignore"),
        }
    }
}

/// Error returned by a rule body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// The rule could not reach a verdict
    #[error("{0}")]
    Failed(String),

    /// The rule produced an unusable patch
    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl RuleError {
    pub fn failed(message: impl Into<String>) -> Self {
        RuleError::Failed(message.into())
    }
}

/// Verdict of a validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the validation passed
    pub allowed: bool,
    /// Reason for denial (if not allowed)
    pub reason: Option<String>,
    /// Non-fatal findings surfaced to the client
    pub warnings: Vec<String>,
}

impl Verdict {
    /// Create an allowed verdict
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            warnings: Vec::new(),
        }
    }

    /// Create a denied verdict
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            warnings: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// What a rule body sees
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// The request being admitted
    pub request: &'a AdmissionRequest,
    /// The object as it currently stands: for mutators, after every earlier
    /// mutator's patch; for validators, the post-mutation object
    pub object: &'a Value,
}

impl<'a> RuleContext<'a> {
    pub fn new(request: &'a AdmissionRequest, object: &'a Value) -> Self {
        Self { request, object }
    }

    /// The previous object for UPDATE/DELETE
    pub fn old_object(&self) -> Option<&'a Value> {
        self.request.old_object.as_ref()
    }

    pub fn is_update(&self) -> bool {
        self.request.operation == crate::admission::Operation::Update
    }
}

/// A rule that may alter the object through patch operations
#[async_trait]
pub trait Mutator: Send + Sync {
    /// Operations to apply, in order. Must be empty when the object already
    /// has the desired shape.
    async fn mutate(&self, ctx: &RuleContext<'_>) -> Result<Vec<PatchOperation>, RuleError>;
}

/// A rule that renders an allow/deny verdict
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, ctx: &RuleContext<'_>) -> Result<Verdict, RuleError>;
}

/// Registration attributes shared by every rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    /// Unique within its chain
    pub name: String,
    pub applies_to: Selector,
    pub failure_policy: FailurePolicy,
    /// Only consulted for mutators
    pub reinvocation: ReinvocationPolicy,
    pub timeout: Duration,
    /// Namespaces the rule never applies to
    pub namespace_exclusions: BTreeSet<String>,
}

impl RuleSpec {
    /// A rule matching everything, failing closed, with the default timeout
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            applies_to: Selector::default(),
            failure_policy: FailurePolicy::default(),
            reinvocation: ReinvocationPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            namespace_exclusions: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn applies_to(mut self, selector: Selector) -> Self {
        self.applies_to = selector;
        self
    }

    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn reinvocation(mut self, policy: ReinvocationPolicy) -> Self {
        self.reinvocation = policy;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn exclude_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace_exclusions.insert(namespace.into());
        self
    }

    /// Whether this rule should run for the request
    pub fn is_applicable(&self, request: &AdmissionRequest) -> bool {
        !self.namespace_exclusions.contains(&request.namespace) && self.applies_to.matches(request)
    }
}

/// A registered rule: its attributes and its shared, read-only body
pub struct Rule<B: ?Sized> {
    pub spec: RuleSpec,
    pub body: Arc<B>,
}

impl<B: ?Sized> Rule<B> {
    pub fn new(spec: RuleSpec, body: Arc<B>) -> Self {
        Self { spec, body }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

impl<B: ?Sized> Clone for Rule<B> {
    fn clone(&self) -> Self {
        Self {
            spec: self.spec.clone(),
            body: Arc::clone(&self.body),
        }
    }
}

impl<B: ?Sized> fmt::Debug for Rule<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("spec", &self.spec).finish()
    }
}

pub type MutatingRule = Rule<dyn Mutator>;
pub type ValidatingRule = Rule<dyn Validator>;

/// The two ordered chains, loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct RuleChains {
    pub mutators: Vec<MutatingRule>,
    pub validators: Vec<ValidatingRule>,
}

impl RuleChains {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn mutator(mut self, spec: RuleSpec, body: impl Mutator + 'static) -> Self {
        self.mutators.push(Rule::new(spec, Arc::new(body)));
        self
    }

    #[must_use]
    pub fn validator(mut self, spec: RuleSpec, body: impl Validator + 'static) -> Self {
        self.validators.push(Rule::new(spec, Arc::new(body)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty() && self.validators.is_empty()
    }
}
