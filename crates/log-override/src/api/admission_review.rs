use serde::{Deserialize, Serialize};

pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";
/// Clusters still sending `admission.k8s.io/v1beta1` reviews need
/// `--admission-api-version admission.k8s.io/v1beta1`
pub const DEFAULT_ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resource: String,
}

/// This models the admission/v1/AdmissionRequest object of Kubernetes.
/// Only the fields the webhook looks at are typed, the objects are kept
/// as opaque JSON documents.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default)]
    pub kind: GroupVersionKind,
    #[serde(default)]
    pub resource: GroupVersionResource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_info: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_object: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

/// This models the admission/v1/AdmissionResponse object of Kubernetes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    /// Copied over from the corresponding AdmissionRequest
    pub uid: String,

    pub allowed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<PatchType>,

    /// Base64 encoded JSON patch (RFC 6902)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

/// PatchType is the type of patch being used to represent the mutated object
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub enum PatchType {
    #[serde(rename = "JSONPatch")]
    #[default]
    JSONPatch,
}

impl AdmissionResponse {
    pub fn allow(uid: String) -> AdmissionResponse {
        AdmissionResponse {
            uid,
            allowed: true,
            ..Default::default()
        }
    }

    pub fn allow_with_patch(uid: String, patch: String) -> AdmissionResponse {
        AdmissionResponse {
            uid,
            allowed: true,
            patch_type: Some(PatchType::JSONPatch),
            patch: Some(patch),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    pub response: AdmissionResponse,
}

impl AdmissionReviewResponse {
    pub fn new(api_version: &str, response: AdmissionResponse) -> Self {
        AdmissionReviewResponse {
            api_version: Some(api_version.to_owned()),
            kind: Some(ADMISSION_REVIEW_KIND.to_owned()),
            response,
        }
    }
}
