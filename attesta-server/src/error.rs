//! API error handling module
//!
//! Maps ceremony errors to HTTP responses. Internal details are logged; the
//! client receives a sanitized `errorMessage` and a stable `code`.

use attesta_core::{ErrorKind, Fido2Error};
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request body missing, not JSON, or not the expected shape
    #[error("Bad request: {0}")]
    BadRequest(#[from] JsonRejection),

    /// Ceremony error from the verification engine
    #[error("{0}")]
    Fido2(#[from] Fido2Error),
}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(rejection) => rejection.status(),
            Self::Fido2(e) => match e.kind() {
                ErrorKind::ClientData
                | ErrorKind::CeremonyNotFound
                | ErrorKind::DomainMismatch
                | ErrorKind::Parse
                | ErrorKind::UnsupportedFormat
                | ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
                ErrorKind::Trust => StatusCode::FORBIDDEN,
                ErrorKind::Replay => StatusCode::CONFLICT,
                ErrorKind::MetadataFetch => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Storage | ErrorKind::Randomness => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error code for programmatic error handling
    fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Fido2(e) => e.kind().code(),
        }
    }

    /// Get sanitized error message for client response
    fn client_message(&self) -> String {
        match self {
            Self::Fido2(e) => match e.kind() {
                // Client data failures get a generic denial
                ErrorKind::ClientData | ErrorKind::CeremonyNotFound | ErrorKind::DomainMismatch => {
                    "Ceremony denied".to_string()
                }
                ErrorKind::Parse => "Malformed authenticator data".to_string(),
                ErrorKind::Trust => "Authenticator not trusted".to_string(),
                ErrorKind::Replay => {
                    "Credential flagged as compromised, re-registration required".to_string()
                }
                ErrorKind::MetadataFetch => "Metadata service unavailable".to_string(),
                ErrorKind::Storage | ErrorKind::Randomness => "Internal error".to_string(),
                ErrorKind::UnsupportedFormat | ErrorKind::InvalidRequest => e.message().to_string(),
            },
            Self::BadRequest(rejection) => rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();
        let ceremony_id = match &self {
            Self::Fido2(e) => e.ceremony_id().map(str::to_owned),
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                code,
                ceremony_id = ?ceremony_id,
                error = %internal_message,
                "Server error"
            );
        } else {
            tracing::warn!(
                status = %status,
                code,
                ceremony_id = ?ceremony_id,
                error = %internal_message,
                "Ceremony rejected"
            );
        }

        let body = serde_json::json!({
            "status": "failed",
            "errorMessage": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}
