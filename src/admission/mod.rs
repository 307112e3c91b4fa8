//! Admission request model and the AdmissionReview wire envelope.
//!
//! The object tree is kept schemaless (`serde_json::Value`); rules navigate it
//! by path at runtime.

pub mod request;
pub mod response;
pub mod review;

pub use request::{AdmissionRequest, Operation};
pub use response::{AdmissionResponse, decode_patch};
pub use review::{API_VERSION_V1, IncomingReview, REVIEW_KIND, invalid_review};

// GVK type used in `AdmissionRequest::kind`
pub use kube::core::GroupVersionKind;
// Wire envelope types
pub use kube::core::admission::{AdmissionResponse as WireResponse, AdmissionReview};
