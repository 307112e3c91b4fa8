//! Admission decision and its `admission.k8s.io/v1` wire form.

use json_patch::Patch;
use kube::core::admission::{AdmissionResponse as KubeResponse, AdmissionReview, SerializePatchError};
use kube::core::{DynamicObject, Status, TypeMeta};

use super::review::REVIEW_KIND;
use crate::patch::PatchOperation;

/// Decision for one admission request.
///
/// A denied response never carries a patch; `deny` and `with_patch` enforce it.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    pub patch: Vec<PatchOperation>,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
}

impl AdmissionResponse {
    /// An allowed response without patch or warnings
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            patch: Vec::new(),
            reason: None,
            warnings: Vec::new(),
        }
    }

    /// A denied response. Any patch is dropped.
    pub fn deny(uid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            patch: Vec::new(),
            reason: Some(reason.into()),
            warnings: Vec::new(),
        }
    }

    /// Attach a patch. Ignored on a denied response.
    #[must_use]
    pub fn with_patch(mut self, patch: Vec<PatchOperation>) -> Self {
        if self.allowed {
            self.patch = patch;
        }
        self
    }

    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Encode into the review envelope answered to the API server.
    ///
    /// Denials carry a 403 `Forbidden` status with the reason as message.
    pub fn into_review(
        self,
        api_version: &str,
    ) -> Result<AdmissionReview<DynamicObject>, SerializePatchError> {
        let mut response = KubeResponse::invalid(String::new());
        response.types = TypeMeta {
            api_version: api_version.to_string(),
            kind: REVIEW_KIND.to_string(),
        };
        response.uid = self.uid;
        response.allowed = self.allowed;
        response.result = if self.allowed {
            Status::success()
        } else {
            Status::failure(self.reason.as_deref().unwrap_or_default(), "Forbidden").with_code(403)
        };
        if self.allowed && !self.patch.is_empty() {
            response = response.with_patch(Patch(self.patch))?;
        }
        response.warnings = (!self.warnings.is_empty()).then_some(self.warnings);
        Ok(response.into_review())
    }
}

/// Operations carried by a wire response, empty when there is no patch
pub fn decode_patch(response: &KubeResponse) -> Result<Vec<PatchOperation>, serde_json::Error> {
    match &response.patch {
        Some(bytes) => Ok(serde_json::from_slice::<Patch>(bytes)?.0),
        None => Ok(Vec::new()),
    }
}
