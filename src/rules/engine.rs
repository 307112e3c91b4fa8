//! Ordered evaluation of the mutator and validator chains.
//!
//! Registration order is the only ordering signal. Within a request every rule
//! runs sequentially, since later rules may depend on earlier patches.

use serde_json::Value;
use tracing::{debug, warn};

use super::guard::{Guard, Invocation, RuleFailure};
use super::{MutatingRule, ReinvocationPolicy, RuleChains, RuleContext, ValidatingRule};
use crate::admission::AdmissionRequest;
use crate::error::AdmissionError;
use crate::patch::{PatchError, PatchOperation, RulePatch, WorkingCopy};

/// Result of running the mutator chain
#[derive(Debug, Clone, Default)]
pub struct MutationOutcome {
    /// Non-empty patches, one entry per rule, in chain order
    pub patches: Vec<RulePatch>,
    pub warnings: Vec<String>,
    pub failures: Vec<RuleFailure>,
    /// Terminal error that stopped the chain: `Denied` or `PatchConflict`
    pub halted: Option<AdmissionError>,
}

impl MutationOutcome {
    /// Record an ignored failure. A reinvoked rule failing the same way
    /// again adds no second warning.
    fn recover(&mut self, failure: RuleFailure, warning: String) {
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
        self.failures.push(failure);
    }

    /// Concatenation of every rule's operations
    pub fn operations(&self) -> Vec<PatchOperation> {
        self.patches
            .iter()
            .flat_map(|p| p.operations.iter().cloned())
            .collect()
    }
}

/// What one mutator invocation did to the working copy
enum Step {
    Changed,
    Unchanged,
    Halted,
}

/// Result of running the validator chain
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    /// First denial reason; authoritative
    pub denial: Option<String>,
    /// Later denial reasons and rule warnings, in chain order
    pub warnings: Vec<String>,
    pub failures: Vec<RuleFailure>,
    /// Set when a `Fail` policy failure stopped the chain
    pub aborted: bool,
}

/// Holds the immutable chains and the guard applied to each invocation.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    chains: RuleChains,
    guard: Guard,
}

impl RuleEngine {
    pub fn new(chains: RuleChains, guard: Guard) -> Self {
        Self { chains, guard }
    }

    pub fn mutators(&self) -> &[MutatingRule] {
        &self.chains.mutators
    }

    pub fn validators(&self) -> &[ValidatingRule] {
        &self.chains.validators
    }

    pub fn guard(&self) -> &Guard {
        &self.guard
    }

    /// Run every applicable mutator in order.
    ///
    /// Each rule sees the object with all earlier patches applied. A rule
    /// whose patch cannot be applied is treated as a failed rule; a patch that
    /// conflicts with another rule's halts the chain.
    ///
    /// When a mutator changed the object, the `IfNeeded` mutators that ran
    /// before it are invoked once more against the result, so that their
    /// output covers what later rules added.
    pub async fn run_mutators(&self, request: &AdmissionRequest) -> MutationOutcome {
        let mut working = WorkingCopy::new(request.object.clone());
        let mut outcome = MutationOutcome::default();

        let applicable: Vec<&MutatingRule> = self
            .chains
            .mutators
            .iter()
            .filter(|rule| rule.spec.is_applicable(request))
            .collect();

        let mut last_change = None;
        for (position, rule) in applicable.iter().enumerate() {
            match self.mutate_once(rule, request, &mut working, &mut outcome).await {
                Step::Changed => last_change = Some(position),
                Step::Unchanged => {}
                Step::Halted => return outcome,
            }
        }

        let Some(last_change) = last_change else {
            return outcome;
        };
        for rule in applicable
            .iter()
            .take(last_change)
            .filter(|rule| rule.spec.reinvocation == ReinvocationPolicy::IfNeeded)
        {
            debug!(uid = %request.uid, rule = %rule.name(), "Reinvoking mutator");
            if let Step::Halted = self.mutate_once(rule, request, &mut working, &mut outcome).await {
                break;
            }
        }

        outcome
    }

    /// Invoke one mutator and commit its patch to `working`
    async fn mutate_once(
        &self,
        rule: &MutatingRule,
        request: &AdmissionRequest,
        working: &mut WorkingCopy,
        outcome: &mut MutationOutcome,
    ) -> Step {
        let invocation = {
            let ctx = RuleContext::new(request, working.tree());
            self.guard
                .invoke(&rule.spec, request, || rule.body.mutate(&ctx))
                .await
        };

        let operations = match invocation {
            Invocation::Shielded => return Step::Unchanged,
            Invocation::Completed(operations) => operations,
            Invocation::Recovered { failure, warning } => {
                outcome.recover(failure, warning);
                return Step::Unchanged;
            }
            Invocation::Aborted { failure, reason } => {
                outcome.failures.push(failure);
                outcome.halted = Some(AdmissionError::Denied(reason));
                return Step::Halted;
            }
        };

        if operations.is_empty() {
            debug!(uid = %request.uid, rule = %rule.name(), "Mutator made no changes");
            return Step::Unchanged;
        }

        match working.apply(rule.name(), &operations) {
            Ok(()) => {
                debug!(
                    uid = %request.uid,
                    rule = %rule.name(),
                    operations = operations.len(),
                    "Mutator patch applied"
                );
                outcome.patches.push(RulePatch {
                    rule: rule.name().to_string(),
                    operations,
                });
                Step::Changed
            }
            Err(PatchError::Conflict {
                path,
                first_rule,
                second_rule,
            }) => {
                warn!(uid = %request.uid, path = %path, first_rule = %first_rule, second_rule = %second_rule, "Conflicting mutator patches");
                outcome.halted = Some(AdmissionError::PatchConflict {
                    path,
                    first_rule,
                    second_rule,
                });
                Step::Halted
            }
            Err(err) => {
                let error = AdmissionError::RuleExecution {
                    rule: rule.name().to_string(),
                    cause: format!("invalid patch: {err}"),
                };
                match self.guard.on_failure::<()>(&rule.spec, &request.uid, error) {
                    Invocation::Recovered { failure, warning } => {
                        outcome.recover(failure, warning);
                        Step::Unchanged
                    }
                    Invocation::Aborted { failure, reason } => {
                        outcome.failures.push(failure);
                        outcome.halted = Some(AdmissionError::Denied(reason));
                        Step::Halted
                    }
                    Invocation::Shielded | Invocation::Completed(()) => Step::Unchanged,
                }
            }
        }
    }

    /// Run every applicable validator against the post-mutation object.
    ///
    /// All validators run so every violation is reported; the first denial
    /// is the reason, later ones become warnings. Only a `Fail` policy
    /// failure stops the chain early.
    pub async fn run_validators(&self, request: &AdmissionRequest, object: &Value) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();
        let ctx = RuleContext::new(request, object);

        for rule in self
            .chains
            .validators
            .iter()
            .filter(|rule| rule.spec.is_applicable(request))
        {
            match self
                .guard
                .invoke(&rule.spec, request, || rule.body.validate(&ctx))
                .await
            {
                Invocation::Shielded => {}
                Invocation::Completed(verdict) => {
                    if !verdict.allowed {
                        let reason = verdict
                            .reason
                            .unwrap_or_else(|| format!("denied by rule {}", rule.name()));
                        debug!(uid = %request.uid, rule = %rule.name(), reason = %reason, "Validator denied request");
                        record_denial(&mut outcome, reason);
                    }
                    outcome.warnings.extend(verdict.warnings);
                }
                Invocation::Recovered { failure, warning } => {
                    outcome.warnings.push(warning);
                    outcome.failures.push(failure);
                }
                Invocation::Aborted { failure, reason } => {
                    outcome.failures.push(failure);
                    record_denial(&mut outcome, reason);
                    outcome.aborted = true;
                    break;
                }
            }
        }

        outcome
    }
}

fn record_denial(outcome: &mut ValidationOutcome, reason: String) {
    if outcome.denial.is_none() {
        outcome.denial = Some(reason);
    } else {
        outcome.warnings.push(reason);
    }
}
