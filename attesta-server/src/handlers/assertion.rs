//! Authentication endpoints

use attesta_core::{
    AssertionOptionsRequest, AssertionOptionsResponse, AssertionResultRequest,
    AssertionResultResponse,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};

use super::AppState;
use crate::error::ApiError;

/// POST /assertion/options
pub async fn assertion_options_handler(
    State(state): State<AppState>,
    payload: Result<Json<AssertionOptionsRequest>, JsonRejection>,
) -> Result<Json<AssertionOptionsResponse>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.assertion.options(&request).await?))
}

/// POST /assertion/result
///
/// A counter regression answers 409 and leaves the credential compromised.
pub async fn assertion_result_handler(
    State(state): State<AppState>,
    payload: Result<Json<AssertionResultRequest>, JsonRejection>,
) -> Result<Json<AssertionResultResponse>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.assertion.verify(&request).await?))
}
