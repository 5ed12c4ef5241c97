use base64::{Engine as _, engine::general_purpose};
use json_patch::{Patch, PatchOperation};

use crate::errors::PatchError;

/// A JSON patch in both of the forms needed by the admission response:
/// the plain text is logged, the base64 one travels inside of the review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPatch {
    pub plain: String,
    pub base64: String,
}

/// Serialize the operations, in order, to the JSON Patch wire format.
/// Operations without a value (`remove`) do not carry a `value` field.
pub fn encode(patches: &[PatchOperation]) -> Result<EncodedPatch, PatchError> {
    let plain = serde_json::to_string(patches).map_err(PatchError::Serialize)?;
    let base64 = general_purpose::STANDARD.encode(plain.as_bytes());
    Ok(EncodedPatch { plain, base64 })
}

/// Inverse of [`encode`], starting from the base64 form
pub fn decode(base64: &str) -> Result<Vec<PatchOperation>, PatchError> {
    let raw = general_purpose::STANDARD.decode(base64)?;
    let patch: Patch = serde_json::from_slice(&raw).map_err(PatchError::Deserialize)?;
    Ok(patch.0)
}
