use axum::{
    Json,
    body::Bytes,
    extract,
    http::{HeaderMap, StatusCode},
};
use std::sync::Arc;
use tracing::{Span, debug, warn};

use crate::api::{
    admission_review::{AdmissionRequest, AdmissionResponse, AdmissionReviewResponse},
    api_error::ApiError,
    service::{check_content_type, mutate, validate_review},
    state::ApiServerState,
};

#[tracing::instrument(
    name = "mutate",
    fields(
        request_uid=tracing::field::Empty,
        host=crate::config::HOSTNAME.as_str(),
        name=tracing::field::Empty,
        namespace=tracing::field::Empty,
        operation=tracing::field::Empty,
        kind=tracing::field::Empty,
        dry_run=tracing::field::Empty,
        allowed=tracing::field::Empty,
        mutated=tracing::field::Empty,
    ),
    skip_all)]
/// Mutate a Deployment so that it mounts the log override ConfigMap.
/// Requests are never denied, malformed ones are rejected with a 400.
pub(crate) async fn mutate_handler(
    extract::State(state): extract::State<Arc<ApiServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AdmissionReviewResponse>, ApiError> {
    check_content_type(&headers).map_err(reject)?;

    let (api_version, request) =
        validate_review(&body, &state.admission_api_version).map_err(reject)?;
    populate_span_with_admission_request_data(&request);
    debug!(request = ?request, "admission request");

    let response = mutate(&request, &state.injection_settings).map_err(reject)?;
    populate_span_with_admission_response_data(&response);

    Ok(Json(AdmissionReviewResponse::new(&api_version, response)))
}

pub(crate) async fn healthz_handler() -> StatusCode {
    StatusCode::OK
}

pub(crate) async fn readiness_handler() -> StatusCode {
    StatusCode::OK
}

fn reject(error: crate::errors::AdmissionError) -> ApiError {
    warn!(error = %error, "rejecting admission request");
    ApiError::from(error)
}

fn populate_span_with_admission_request_data(adm_req: &AdmissionRequest) {
    Span::current().record("request_uid", adm_req.uid.as_str());
    Span::current().record("kind", adm_req.kind.kind.as_str());
    Span::current().record("name", adm_req.name.clone().unwrap_or_default().as_str());
    Span::current().record(
        "namespace",
        adm_req.namespace.clone().unwrap_or_default().as_str(),
    );
    Span::current().record("operation", adm_req.operation.as_str());
    Span::current().record("dry_run", adm_req.dry_run.unwrap_or_default());
}

fn populate_span_with_admission_response_data(response: &AdmissionResponse) {
    Span::current().record("allowed", response.allowed);
    Span::current().record("mutated", response.patch.is_some());
}
