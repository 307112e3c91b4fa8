//! Formal finite state machine for one admission review.
//!
//! Every review walks the same stages in order. The transition table makes
//! the allowed paths explicit and gives each run an audit trail of stages.

use std::fmt;

use tracing::error;

/// Stages of a single pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Wire payload received, not yet parsed
    Received,
    /// Mutator chain in progress
    Mutating,
    /// Accumulated patch being applied to a fresh copy of the object
    RevalidatingShape,
    /// Validator chain in progress against the post-mutation object
    Validating,
    /// Allow decision reached, response not yet emitted
    Decided,
    /// Response emitted with `allowed = true`
    Allowed,
    /// Response emitted with `allowed = false`
    Denied,
    /// Request could not be processed; a denial was synthesized
    Errored,
}

impl Stage {
    /// Terminal stages have no outgoing transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Allowed | Stage::Denied | Stage::Errored)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Received => write!(f, "Received"),
            Stage::Mutating => write!(f, "Mutating"),
            Stage::RevalidatingShape => write!(f, "RevalidatingShape"),
            Stage::Validating => write!(f, "Validating"),
            Stage::Decided => write!(f, "Decided"),
            Stage::Allowed => write!(f, "Allowed"),
            Stage::Denied => write!(f, "Denied"),
            Stage::Errored => write!(f, "Errored"),
        }
    }
}

/// Events that move a review between stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineEvent {
    /// The wire payload decoded into a request
    Parsed,
    /// The wire payload was malformed
    ParseFailed,
    /// Every applicable mutator ran (or was skipped)
    MutationsApplied,
    /// A `Fail`-policy rule failed
    RuleFailed,
    /// Two mutators emitted incompatible operations
    PatchConflict,
    /// The post-mutation object was built
    ShapeMaterialized,
    /// No validator denied the request
    ValidationPassed,
    /// At least one validator denied the request
    ValidationDenied,
    /// The allow response was written
    ResponseEmitted,
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::Parsed => write!(f, "Parsed"),
            PipelineEvent::ParseFailed => write!(f, "ParseFailed"),
            PipelineEvent::MutationsApplied => write!(f, "MutationsApplied"),
            PipelineEvent::RuleFailed => write!(f, "RuleFailed"),
            PipelineEvent::PatchConflict => write!(f, "PatchConflict"),
            PipelineEvent::ShapeMaterialized => write!(f, "ShapeMaterialized"),
            PipelineEvent::ValidationPassed => write!(f, "ValidationPassed"),
            PipelineEvent::ValidationDenied => write!(f, "ValidationDenied"),
            PipelineEvent::ResponseEmitted => write!(f, "ResponseEmitted"),
        }
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    /// Source stage
    pub from: Stage,
    /// Target stage
    pub to: Stage,
    /// Event that triggers this transition
    pub event: PipelineEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl Transition {
    const fn new(from: Stage, to: Stage, event: PipelineEvent, description: &'static str) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: Stage,
        to: Stage,
        event: PipelineEvent,
        description: &'static str,
    },
    /// Transition was not valid for the current stage
    InvalidTransition { current: Stage, event: PipelineEvent },
}

/// Transition table shared by every pipeline run
pub struct PipelineStateMachine {
    transitions: Vec<Transition>,
}

impl Default for PipelineStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStateMachine {
    /// Create a new state machine with the defined transition table
    pub fn new() -> Self {
        Self {
            transitions: vec![
                // === Received ===
                Transition::new(
                    Stage::Received,
                    Stage::Mutating,
                    PipelineEvent::Parsed,
                    "Request decoded, starting mutator chain",
                ),
                Transition::new(
                    Stage::Received,
                    Stage::Errored,
                    PipelineEvent::ParseFailed,
                    "Malformed request, synthesizing denial",
                ),
                // === Mutating ===
                Transition::new(
                    Stage::Mutating,
                    Stage::RevalidatingShape,
                    PipelineEvent::MutationsApplied,
                    "Mutator chain finished",
                ),
                Transition::new(
                    Stage::Mutating,
                    Stage::Denied,
                    PipelineEvent::RuleFailed,
                    "Mutator failed under Fail policy",
                ),
                Transition::new(
                    Stage::Mutating,
                    Stage::Denied,
                    PipelineEvent::PatchConflict,
                    "Mutators emitted conflicting operations",
                ),
                // === RevalidatingShape ===
                Transition::new(
                    Stage::RevalidatingShape,
                    Stage::Validating,
                    PipelineEvent::ShapeMaterialized,
                    "Post-mutation object ready for validators",
                ),
                Transition::new(
                    Stage::RevalidatingShape,
                    Stage::Denied,
                    PipelineEvent::PatchConflict,
                    "Accumulated patch could not be materialized",
                ),
                // === Validating ===
                Transition::new(
                    Stage::Validating,
                    Stage::Decided,
                    PipelineEvent::ValidationPassed,
                    "Every validator allowed the request",
                ),
                Transition::new(
                    Stage::Validating,
                    Stage::Denied,
                    PipelineEvent::ValidationDenied,
                    "A validator denied the request",
                ),
                Transition::new(
                    Stage::Validating,
                    Stage::Denied,
                    PipelineEvent::RuleFailed,
                    "Validator failed under Fail policy",
                ),
                // === Decided ===
                Transition::new(
                    Stage::Decided,
                    Stage::Allowed,
                    PipelineEvent::ResponseEmitted,
                    "Allow response emitted",
                ),
                // Allowed, Denied, and Errored are terminal.
            ],
        }
    }

    /// Attempt to transition to a new stage based on an event
    pub fn transition(&self, current: &Stage, event: PipelineEvent) -> TransitionResult {
        match self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    /// Check if a transition is valid
    pub fn can_transition(&self, from: &Stage, event: &PipelineEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Get all valid events for a given stage
    pub fn valid_events(&self, stage: &Stage) -> Vec<&PipelineEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == *stage)
            .map(|t| &t.event)
            .collect()
    }
}

/// Position of one review in the state machine, with the stages it visited
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    stage: Stage,
    trail: Vec<Stage>,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRun {
    pub fn new() -> Self {
        Self {
            stage: Stage::Received,
            trail: vec![Stage::Received],
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Stages visited so far, oldest first
    pub fn trail(&self) -> &[Stage] {
        &self.trail
    }

    /// Apply `event` and return the new stage.
    ///
    /// An event with no matching transition moves the run to `Errored`.
    pub fn advance(&mut self, machine: &PipelineStateMachine, event: PipelineEvent) -> Stage {
        let next = match machine.transition(&self.stage, event) {
            TransitionResult::Success { to, .. } => to,
            TransitionResult::InvalidTransition { current, event } => {
                error!(stage = %current, event = %event, "Invalid pipeline transition");
                Stage::Errored
            }
        };
        self.stage = next;
        self.trail.push(next);
        next
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    #[test]
    fn test_received_to_mutating() {
        let sm = PipelineStateMachine::new();

        match sm.transition(&Stage::Received, PipelineEvent::Parsed) {
            TransitionResult::Success { from, to, .. } => {
                assert_eq!(from, Stage::Received);
                assert_eq!(to, Stage::Mutating);
            }
            _ => panic!("Expected successful transition"),
        }
    }

    #[test]
    fn test_happy_path_trail() {
        let sm = PipelineStateMachine::new();
        let mut run = PipelineRun::new();
        for event in [
            PipelineEvent::Parsed,
            PipelineEvent::MutationsApplied,
            PipelineEvent::ShapeMaterialized,
            PipelineEvent::ValidationPassed,
            PipelineEvent::ResponseEmitted,
        ] {
            run.advance(&sm, event);
        }
        assert_eq!(
            run.trail(),
            &[
                Stage::Received,
                Stage::Mutating,
                Stage::RevalidatingShape,
                Stage::Validating,
                Stage::Decided,
                Stage::Allowed,
            ]
        );
    }

    #[test]
    fn test_parse_failure_errors() {
        let sm = PipelineStateMachine::new();
        let mut run = PipelineRun::new();
        assert_eq!(run.advance(&sm, PipelineEvent::ParseFailed), Stage::Errored);
    }

    #[test]
    fn test_rule_failure_skips_validation() {
        let sm = PipelineStateMachine::new();
        let mut run = PipelineRun::new();
        run.advance(&sm, PipelineEvent::Parsed);
        assert_eq!(run.advance(&sm, PipelineEvent::RuleFailed), Stage::Denied);
    }

    #[test]
    fn test_invalid_transition_errors() {
        let sm = PipelineStateMachine::new();
        let result = sm.transition(&Stage::Received, PipelineEvent::ValidationPassed);
        assert!(matches!(result, TransitionResult::InvalidTransition { .. }));

        let mut run = PipelineRun::new();
        assert_eq!(
            run.advance(&sm, PipelineEvent::ResponseEmitted),
            Stage::Errored
        );
    }

    #[test]
    fn test_terminal_stages_have_no_events() {
        let sm = PipelineStateMachine::new();
        for stage in [Stage::Allowed, Stage::Denied, Stage::Errored] {
            assert!(stage.is_terminal());
            assert!(sm.valid_events(&stage).is_empty());
        }
        assert!(!Stage::Decided.is_terminal());
    }

    #[test]
    fn test_can_transition() {
        let sm = PipelineStateMachine::new();
        assert!(sm.can_transition(&Stage::Mutating, &PipelineEvent::PatchConflict));
        assert!(!sm.can_transition(&Stage::Validating, &PipelineEvent::PatchConflict));
    }
}
