//! Decision pipeline: parse, mutate, re-materialize, validate, respond.
//!
//! One run per admission review. The pipeline is the only entry point into
//! the rule engine and owns stage ordering; see `state_machine` for the
//! transition table.

pub mod state_machine;

pub use state_machine::{PipelineEvent, PipelineRun, PipelineStateMachine, Stage, TransitionResult};

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionRequest, AdmissionResponse, IncomingReview};
use crate::error::AdmissionError;
use crate::health::HealthState;
use crate::patch::WorkingCopy;
use crate::rules::{MutationOutcome, RuleEngine, RuleFailure, ValidationOutcome};

/// Which chains a review runs through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainSelection {
    /// Mutators only (`/mutate`)
    Mutating,
    /// Validators only (`/validate`)
    Validating,
    /// Mutators, then validators against the mutated object (`/review`)
    Full,
}

impl ChainSelection {
    /// Endpoint label used in logs and metrics
    pub fn endpoint(&self) -> &'static str {
        match self {
            ChainSelection::Mutating => "mutate",
            ChainSelection::Validating => "validate",
            ChainSelection::Full => "review",
        }
    }

    fn runs_mutators(&self) -> bool {
        matches!(self, ChainSelection::Mutating | ChainSelection::Full)
    }

    fn runs_validators(&self) -> bool {
        matches!(self, ChainSelection::Validating | ChainSelection::Full)
    }
}

/// Errors that prevent a review from producing a decision at all
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The body is not JSON; there is nothing to echo a uid from
    #[error("request body is not valid JSON: {0}")]
    InvalidBody(#[from] serde_json::Error),

    /// The caller went away before a decision was reached
    #[error("review cancelled before a decision was reached")]
    Cancelled,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// API version to answer with, echoed from the review
    pub api_version: String,
    pub response: AdmissionResponse,
    /// Stages visited, ending in a terminal stage
    pub trail: Vec<Stage>,
}

impl Decision {
    /// The terminal stage this run ended in
    pub fn stage(&self) -> Stage {
        self.trail.last().copied().unwrap_or(Stage::Errored)
    }

    /// Metric label for the outcome
    pub fn label(&self) -> &'static str {
        match self.stage() {
            Stage::Allowed => "allowed",
            Stage::Errored => "errored",
            _ => "denied",
        }
    }
}

/// Orchestrates one admission review at a time; shareable across tasks.
#[derive(Clone)]
pub struct Pipeline {
    engine: Arc<RuleEngine>,
    machine: Arc<PipelineStateMachine>,
    health: Option<Arc<HealthState>>,
}

impl Pipeline {
    pub fn new(engine: RuleEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            machine: Arc::new(PipelineStateMachine::new()),
            health: None,
        }
    }

    /// Record review and rule-failure metrics into `health`
    #[must_use]
    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// Run a raw request body through the pipeline.
    ///
    /// Fails only when the body is not JSON. Every other defect, including a
    /// malformed review, yields a denial.
    pub async fn review(&self, body: &[u8], selection: ChainSelection) -> Result<Decision, PipelineError> {
        let review = IncomingReview::from_slice(body)?;
        Ok(self.decide(review, selection).await)
    }

    /// Like [`Pipeline::review`], abandoning the run when `cancel` resolves
    /// first. The in-flight rule is dropped and the working copy discarded.
    pub async fn review_until<C>(
        &self,
        body: &[u8],
        selection: ChainSelection,
        cancel: C,
    ) -> Result<Decision, PipelineError>
    where
        C: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            () = cancel => {
                debug!(endpoint = selection.endpoint(), "Review cancelled by caller");
                Err(PipelineError::Cancelled)
            }
            decision = self.review(body, selection) => decision,
        }
    }

    /// Decide a parsed review
    pub async fn decide(&self, review: IncomingReview, selection: ChainSelection) -> Decision {
        let started = Instant::now();
        let IncomingReview {
            api_version,
            uid,
            request,
        } = review;

        let (response, trail, failures) = match request {
            Ok(request) => self.run(&request, selection).await,
            Err(err) => {
                let mut run = PipelineRun::new();
                run.advance(&self.machine, PipelineEvent::ParseFailed);
                warn!(uid = %uid, endpoint = selection.endpoint(), error = %err, "Rejecting malformed admission request");
                (
                    AdmissionResponse::deny(uid, err.to_string()),
                    run.trail().to_vec(),
                    Vec::new(),
                )
            }
        };

        let decision = Decision {
            api_version,
            response,
            trail,
        };
        self.record(selection, &decision, &failures, started);
        decision
    }

    /// Decide an already-parsed request
    pub async fn evaluate(&self, request: &AdmissionRequest, selection: ChainSelection) -> Decision {
        let started = Instant::now();
        let (response, trail, failures) = self.run(request, selection).await;
        let decision = Decision {
            api_version: crate::admission::API_VERSION_V1.to_string(),
            response,
            trail,
        };
        self.record(selection, &decision, &failures, started);
        decision
    }

    async fn run(
        &self,
        request: &AdmissionRequest,
        selection: ChainSelection,
    ) -> (AdmissionResponse, Vec<Stage>, Vec<RuleFailure>) {
        let mut run = PipelineRun::new();
        run.advance(&self.machine, PipelineEvent::Parsed);

        let mutation = if selection.runs_mutators() {
            self.engine.run_mutators(request).await
        } else {
            MutationOutcome::default()
        };
        let mut warnings = mutation.warnings.clone();
        let mut failures = mutation.failures.clone();

        if let Some(halt) = &mutation.halted {
            let event = match halt {
                AdmissionError::PatchConflict { .. } => PipelineEvent::PatchConflict,
                _ => PipelineEvent::RuleFailed,
            };
            run.advance(&self.machine, event);
            let response = self.deny(request, halt.to_string(), warnings);
            return (response, run.trail().to_vec(), failures);
        }
        run.advance(&self.machine, PipelineEvent::MutationsApplied);

        // Validators see the object as it would be stored.
        let mut shape = WorkingCopy::new(request.object.clone());
        if let Err(err) = shape.apply_all(&mutation.patches) {
            run.advance(&self.machine, PipelineEvent::PatchConflict);
            let response = self.deny(request, format!("patch could not be materialized: {err}"), warnings);
            return (response, run.trail().to_vec(), failures);
        }
        let object = shape.into_tree();
        run.advance(&self.machine, PipelineEvent::ShapeMaterialized);

        let validation = if selection.runs_validators() {
            self.engine.run_validators(request, &object).await
        } else {
            ValidationOutcome::default()
        };
        warnings.extend(validation.warnings);
        failures.extend(validation.failures);

        if let Some(reason) = validation.denial {
            let event = if validation.aborted {
                PipelineEvent::RuleFailed
            } else {
                PipelineEvent::ValidationDenied
            };
            run.advance(&self.machine, event);
            let response = self.deny(request, reason, warnings);
            return (response, run.trail().to_vec(), failures);
        }

        run.advance(&self.machine, PipelineEvent::ValidationPassed);
        let stage = run.advance(&self.machine, PipelineEvent::ResponseEmitted);

        let patch = mutation.operations();
        let response = if stage == Stage::Allowed {
            info!(
                uid = %request.uid,
                kind = %request.resource_kind(),
                namespace = %request.namespace,
                name = request.object_name().unwrap_or_default(),
                operations = patch.len(),
                "Admission allowed"
            );
            AdmissionResponse::allow(request.uid.clone())
                .with_patch(patch)
                .with_warnings(warnings)
        } else {
            AdmissionResponse::deny(request.uid.clone(), "internal pipeline error").with_warnings(warnings)
        };
        (response, run.trail().to_vec(), failures)
    }

    fn deny(&self, request: &AdmissionRequest, reason: String, warnings: Vec<String>) -> AdmissionResponse {
        info!(
            uid = %request.uid,
            kind = %request.resource_kind(),
            namespace = %request.namespace,
            name = request.object_name().unwrap_or_default(),
            reason = %reason,
            "Admission denied"
        );
        AdmissionResponse::deny(request.uid.clone(), reason).with_warnings(warnings)
    }

    fn record(&self, selection: ChainSelection, decision: &Decision, failures: &[RuleFailure], started: Instant) {
        let Some(health) = &self.health else {
            return;
        };
        let metrics = &health.metrics;
        metrics.record_review(
            selection.endpoint(),
            decision.label(),
            started.elapsed().as_secs_f64(),
        );
        for failure in failures {
            metrics.record_rule_failure(
                &failure.rule,
                failure.error.cause_label(),
                failure.policy.as_str(),
            );
        }
    }
}
