//! admission-gate library crate
//!
//! A Kubernetes dynamic admission webhook server core: ordered mutator and
//! validator chains behind `/mutate`, `/validate`, and `/review`, with
//! per-rule deadlines, failure policies, and a home-namespace guard.
//!
//! Dependency order, leaves first: `admission` → `patch` → `rules` →
//! `pipeline` → `webhooks`.

pub mod admission;
pub mod config;
pub mod error;
pub mod health;
pub mod patch;
pub mod pipeline;
pub mod rules;
pub mod webhooks;

pub use admission::{AdmissionRequest, AdmissionResponse, Operation};
pub use config::{ConfigError, RuleFile, Settings};
pub use error::AdmissionError;
pub use health::HealthState;
pub use pipeline::{ChainSelection, Decision, Pipeline, PipelineError};
pub use rules::{RuleChains, RuleEngine};
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, WebhookListener,
    WebhookState, create_webhook_router,
};
