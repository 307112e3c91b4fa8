//! Built-in admission rules.
//!
//! Rules are organized by chain:
//! - Mutators: resource defaults, label injection, sidecar injection,
//!   annotation removal
//! - Validators: image registry, naming convention, required labels,
//!   resource limits
//!
//! Each is an independent `Mutator` or `Validator`; `BuiltinRule` is the
//! configuration form selected by the `type` key.

pub mod annotations;
pub mod labels;
pub mod limits;
pub mod naming;
pub mod registry;
pub mod required_labels;
pub mod resources;
pub mod sidecar;
pub mod workload;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use annotations::AnnotationRemoval;
pub use labels::LabelInjection;
pub use limits::ResourceLimits;
pub use naming::{DEFAULT_NAME_PATTERN, NamingConvention};
pub use registry::ImageRegistry;
pub use required_labels::RequiredLabels;
pub use resources::ResourceDefaults;
pub use sidecar::SidecarInjection;

use crate::rules::{Mutator, Validator};

/// Which chain a rule belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainKind {
    Mutating,
    Validating,
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainKind::Mutating => write!(f, "mutating"),
            ChainKind::Validating => write!(f, "validating"),
        }
    }
}

/// Configuration of a built-in rule body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BuiltinRule {
    ResourceDefaults(ResourceDefaults),
    LabelInjection(LabelInjection),
    SidecarInjection(SidecarInjection),
    AnnotationRemoval(AnnotationRemoval),
    ImageRegistry(ImageRegistry),
    NamingConvention {
        #[serde(default)]
        pattern: Option<String>,
    },
    RequiredLabels(RequiredLabels),
    ResourceLimits(ResourceLimits),
}

/// A constructed rule body
pub enum BuiltRule {
    Mutator(Arc<dyn Mutator>),
    Validator(Arc<dyn Validator>),
}

impl BuiltinRule {
    /// The `type` key of this rule
    pub fn type_name(&self) -> &'static str {
        match self {
            BuiltinRule::ResourceDefaults(_) => "resourceDefaults",
            BuiltinRule::LabelInjection(_) => "labelInjection",
            BuiltinRule::SidecarInjection(_) => "sidecarInjection",
            BuiltinRule::AnnotationRemoval(_) => "annotationRemoval",
            BuiltinRule::ImageRegistry(_) => "imageRegistry",
            BuiltinRule::NamingConvention { .. } => "namingConvention",
            BuiltinRule::RequiredLabels(_) => "requiredLabels",
            BuiltinRule::ResourceLimits(_) => "resourceLimits",
        }
    }

    pub fn chain(&self) -> ChainKind {
        match self {
            BuiltinRule::ResourceDefaults(_)
            | BuiltinRule::LabelInjection(_)
            | BuiltinRule::SidecarInjection(_)
            | BuiltinRule::AnnotationRemoval(_) => ChainKind::Mutating,
            BuiltinRule::ImageRegistry(_)
            | BuiltinRule::NamingConvention { .. }
            | BuiltinRule::RequiredLabels(_)
            | BuiltinRule::ResourceLimits(_) => ChainKind::Validating,
        }
    }

    /// Construct the rule body. Fails only on an invalid naming pattern.
    pub fn build(self) -> Result<BuiltRule, regex::Error> {
        Ok(match self {
            BuiltinRule::ResourceDefaults(rule) => BuiltRule::Mutator(Arc::new(rule)),
            BuiltinRule::LabelInjection(rule) => BuiltRule::Mutator(Arc::new(rule)),
            BuiltinRule::SidecarInjection(rule) => BuiltRule::Mutator(Arc::new(rule)),
            BuiltinRule::AnnotationRemoval(rule) => BuiltRule::Mutator(Arc::new(rule)),
            BuiltinRule::ImageRegistry(rule) => BuiltRule::Validator(Arc::new(rule)),
            BuiltinRule::NamingConvention { pattern } => {
                BuiltRule::Validator(Arc::new(NamingConvention::new(pattern.as_deref())?))
            }
            BuiltinRule::RequiredLabels(rule) => BuiltRule::Validator(Arc::new(rule)),
            BuiltinRule::ResourceLimits(rule) => BuiltRule::Validator(Arc::new(rule)),
        })
    }
}
