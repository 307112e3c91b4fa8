//! The AdmissionReview envelope wrapping requests and responses.

use kube::core::admission::{AdmissionRequest as KubeRequest, AdmissionResponse as KubeResponse, AdmissionReview};
use kube::core::{DynamicObject, TypeMeta};
use serde_json::Value;

use super::request::AdmissionRequest;
use crate::error::AdmissionError;

/// The `kind` of every review envelope
pub const REVIEW_KIND: &str = "AdmissionReview";
/// The API version answered when the request does not name one
pub const API_VERSION_V1: &str = "admission.k8s.io/v1";

/// A review received on the wire. Parsing of the inner request may have
/// failed; the envelope still carries what is needed to answer.
#[derive(Debug, Clone)]
pub struct IncomingReview {
    pub api_version: String,
    /// Best-effort uid, so malformed requests can still be correlated
    pub uid: String,
    pub request: Result<AdmissionRequest, AdmissionError>,
}

impl IncomingReview {
    /// Parse a request body.
    ///
    /// Returns `Err` only when the body is not JSON at all; every other
    /// defect is reported through `request`.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(body)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<AdmissionReview<DynamicObject>>(value.clone()) {
            Ok(review) => Self::from_review(review),
            Err(e) => Self::unreadable(&value, e),
        }
    }

    fn from_review(review: AdmissionReview<DynamicObject>) -> Self {
        let api_version = answer_version(&review.types);
        let uid = review
            .request
            .as_ref()
            .map(|request| request.uid.clone())
            .unwrap_or_default();

        let request = if review.types.kind != REVIEW_KIND {
            Err(AdmissionError::MalformedRequest(format!(
                "unexpected kind {:?}",
                review.types.kind
            )))
        } else {
            TryInto::<KubeRequest<DynamicObject>>::try_into(review)
                .map_err(|_| AdmissionError::MalformedRequest("missing request".to_string()))
                .and_then(AdmissionRequest::try_from)
        };

        Self {
            api_version,
            uid,
            request,
        }
    }

    /// The envelope did not match the schema. Recover what correlation data
    /// the raw body still offers.
    fn unreadable(value: &Value, err: serde_json::Error) -> Self {
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .unwrap_or(API_VERSION_V1)
            .to_string();
        let uid = value
            .pointer("/request/uid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Self {
            api_version,
            uid,
            request: Err(AdmissionError::MalformedRequest(err.to_string())),
        }
    }
}

fn answer_version(types: &TypeMeta) -> String {
    if types.api_version.is_empty() {
        API_VERSION_V1.to_string()
    } else {
        types.api_version.clone()
    }
}

/// Review for a body that could not be read at all
pub fn invalid_review(reason: impl ToString) -> AdmissionReview<DynamicObject> {
    let mut response = KubeResponse::invalid(reason);
    response.types = TypeMeta {
        api_version: API_VERSION_V1.to_string(),
        kind: REVIEW_KIND.to_string(),
    };
    response.result.code = 400;
    response.into_review()
}
