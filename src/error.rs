//! Error types for the admission pipeline.
//!
//! The taxonomy separates policy outcomes (a denial is an expected path) from
//! faults in rule bodies, malformed payloads, and patch materialization.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced while processing a single admission review.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Unparsable or structurally incomplete wire payload
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// A rule body exceeded its deadline
    #[error("rule {rule} timed out after {}ms", timeout.as_millis())]
    RuleTimeout { rule: String, timeout: Duration },

    /// A rule body returned an error or panicked
    #[error("rule {rule} raised an error: {cause}")]
    RuleExecution { rule: String, cause: String },

    /// Terminal denial carrying the authoritative reason
    #[error("{0}")]
    Denied(String),

    /// Two mutators emitted incompatible operations on the same path
    #[error(
        "patch conflict at {path}: rule {second_rule} conflicts with rule {first_rule}"
    )]
    PatchConflict {
        path: String,
        first_rule: String,
        second_rule: String,
    },
}

impl AdmissionError {
    /// Check if this error aborts the whole pipeline run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AdmissionError::Denied(_) | AdmissionError::PatchConflict { .. }
        )
    }

    /// Short label used for metrics and log fields
    pub fn cause_label(&self) -> &'static str {
        match self {
            AdmissionError::MalformedRequest(_) => "malformed",
            AdmissionError::RuleTimeout { .. } => "timeout",
            AdmissionError::RuleExecution { .. } => "error",
            AdmissionError::Denied(_) => "denied",
            AdmissionError::PatchConflict { .. } => "conflict",
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, AdmissionError>;
