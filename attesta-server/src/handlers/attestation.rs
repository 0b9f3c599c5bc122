//! Registration endpoints

use attesta_core::{
    AttestationOptionsRequest, AttestationOptionsResponse, AttestationResultRequest,
    AttestationResultResponse,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};

use super::AppState;
use crate::error::ApiError;

/// POST /attestation/options
///
/// Issues creation options and records a pending registration.
pub async fn attestation_options_handler(
    State(state): State<AppState>,
    payload: Result<Json<AttestationOptionsRequest>, JsonRejection>,
) -> Result<Json<AttestationOptionsResponse>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.attestation.options(&request).await?))
}

/// POST /attestation/result
///
/// Verifies the authenticator's attestation and registers the credential.
pub async fn attestation_result_handler(
    State(state): State<AppState>,
    payload: Result<Json<AttestationResultRequest>, JsonRejection>,
) -> Result<Json<AttestationResultResponse>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.attestation.verify(&request).await?))
}
