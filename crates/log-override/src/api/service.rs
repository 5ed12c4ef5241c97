use axum::http::{HeaderMap, header};
use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, info};

use crate::{
    api::admission_review::{
        ADMISSION_REVIEW_KIND, AdmissionRequest, AdmissionResponse, AdmissionReviewRequest,
    },
    errors::AdmissionError,
    injector::{self, InjectionSettings},
    patch,
};

const DEPLOYMENT_KIND: &str = "Deployment";

/// Only `application/json` bodies are accepted, media type parameters such
/// as the charset are ignored.
pub(crate) fn check_content_type(headers: &HeaderMap) -> Result<(), AdmissionError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    match content_type.parse::<mime::Mime>() {
        Ok(media_type)
            if media_type.type_() == mime::APPLICATION && media_type.subtype() == mime::JSON =>
        {
            Ok(())
        }
        _ => Err(AdmissionError::UnsupportedContentType(
            content_type.to_owned(),
        )),
    }
}

/// Parse the body and make sure it is an AdmissionReview, using the accepted
/// API version, about a Deployment.
/// Returns the API version of the review together with its request.
pub(crate) fn validate_review(
    body: &[u8],
    accepted_api_version: &str,
) -> Result<(String, AdmissionRequest), AdmissionError> {
    let review: AdmissionReviewRequest =
        serde_json::from_slice(body).map_err(AdmissionError::MalformedReview)?;

    let kind = review.kind.unwrap_or_default();
    if kind != ADMISSION_REVIEW_KIND {
        return Err(AdmissionError::UnexpectedKind(kind));
    }

    let api_version = review.api_version.unwrap_or_default();
    if api_version != accepted_api_version {
        return Err(AdmissionError::UnsupportedApiVersion {
            found: api_version,
            expected: accepted_api_version.to_owned(),
        });
    }

    let request = review.request.ok_or(AdmissionError::MissingRequest)?;
    if request.kind.kind != DEPLOYMENT_KIND {
        return Err(AdmissionError::UnexpectedResource(request.kind.kind));
    }

    Ok((api_version, request))
}

/// Decide the response for a validated request. The request is always
/// allowed, a patch is attached when the Deployment needs the override
/// volume.
pub(crate) fn mutate(
    request: &AdmissionRequest,
    settings: &InjectionSettings,
) -> Result<AdmissionResponse, AdmissionError> {
    let object = request
        .object
        .clone()
        .ok_or(AdmissionError::MissingObject)?;
    let deployment: Deployment =
        serde_json::from_value(object).map_err(AdmissionError::MalformedDeployment)?;

    let patches = injector::build_patches(&deployment, settings)?;
    if patches.is_empty() {
        debug!("no changes needed, allowing the request");
        return Ok(AdmissionResponse::allow(request.uid.clone()));
    }

    let encoded = patch::encode(&patches)?;
    info!(
        deployment = deployment.metadata.name.as_deref().unwrap_or_default(),
        patch = encoded.plain.as_str(),
        "patching deployment"
    );

    Ok(AdmissionResponse::allow_with_patch(
        request.uid.clone(),
        encoded.base64,
    ))
}
