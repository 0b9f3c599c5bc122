//! Error types for the verification engine
//!
//! Binary decoding failures are reported as [`ParseError`]. Everything a
//! ceremony can fail with collapses into [`Fido2Error`], which carries an
//! [`ErrorKind`], a human-readable message and, once known, the ceremony id.

use thiserror::Error;

/// Authenticator data / CBOR decoding failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("buffer truncated: needed {needed} bytes for {field}, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("{0} leftover bytes after authenticator data")]
    Leftover(usize),

    #[error("CBOR decoding failed: {0}")]
    Cbor(String),

    #[error("unsupported COSE key: {0}")]
    UnsupportedKey(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Error category, one per failure class of a ceremony
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing clientDataJSON field, wrong ceremony type
    ClientData,
    /// No pending ceremony for the presented challenge (absent or consumed)
    CeremonyNotFound,
    /// clientDataJSON origin differs from the ceremony domain
    DomainMismatch,
    /// Truncated or leftover authenticator data buffer
    Parse,
    /// Signature, chain or authenticator status failure
    Trust,
    /// Attestation statement format without a registered handler
    UnsupportedFormat,
    /// Signature counter did not increase
    Replay,
    /// Remote metadata unreachable, hash mismatch or unparsable
    MetadataFetch,
    /// Request payload failed validation
    InvalidRequest,
    /// Persistence collaborator failure
    Storage,
    /// Operating system randomness source unavailable
    Randomness,
}

impl ErrorKind {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ClientData => "CLIENT_DATA_INVALID",
            Self::CeremonyNotFound => "CEREMONY_NOT_FOUND",
            Self::DomainMismatch => "DOMAIN_MISMATCH",
            Self::Parse => "PARSE_ERROR",
            Self::Trust => "TRUST_ERROR",
            Self::UnsupportedFormat => "UNSUPPORTED_FORMAT",
            Self::Replay => "REPLAY_DETECTED",
            Self::MetadataFetch => "METADATA_FETCH_ERROR",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Storage => "STORAGE_ERROR",
            Self::Randomness => "RANDOMNESS_UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ClientData => "client data error",
            Self::CeremonyNotFound => "ceremony not found",
            Self::DomainMismatch => "domain mismatch",
            Self::Parse => "parse error",
            Self::Trust => "trust error",
            Self::UnsupportedFormat => "unsupported format",
            Self::Replay => "replay detected",
            Self::MetadataFetch => "metadata fetch error",
            Self::InvalidRequest => "invalid request",
            Self::Storage => "storage error",
            Self::Randomness => "randomness unavailable",
        };
        f.write_str(name)
    }
}

/// Terminal ceremony error
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct Fido2Error {
    kind: ErrorKind,
    message: String,
    ceremony_id: Option<String>,
}

impl Fido2Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            ceremony_id: None,
        }
    }

    /// Create a client data error
    pub fn client_data(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ClientData, message)
    }

    /// Create a ceremony-not-found error for the presented challenge
    pub fn ceremony_not_found(challenge: &str) -> Self {
        Self::new(
            ErrorKind::CeremonyNotFound,
            format!("no pending ceremony for challenge {challenge}"),
        )
    }

    /// Create a domain mismatch error
    pub fn domain_mismatch(expected: &str, actual: &str) -> Self {
        Self::new(
            ErrorKind::DomainMismatch,
            format!("origin {actual} does not match domain {expected}"),
        )
    }

    /// Create a trust error
    pub fn trust(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Trust, message)
    }

    /// Create an unsupported format error
    pub fn unsupported_format(fmt: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedFormat,
            format!("unsupported attestation format {fmt}"),
        )
    }

    /// Create a replay error for a counter that did not increase
    pub fn replay(old_counter: u32, new_counter: u32) -> Self {
        Self::new(
            ErrorKind::Replay,
            format!("counter did not increase (stored {old_counter}, presented {new_counter})"),
        )
    }

    /// Create a metadata fetch error
    pub fn metadata_fetch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MetadataFetch, message)
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// Create a randomness error
    pub fn randomness(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Randomness, message)
    }

    /// Attach the ceremony id, keeping an id that is already set
    pub fn with_ceremony(mut self, ceremony_id: impl Into<String>) -> Self {
        if self.ceremony_id.is_none() {
            self.ceremony_id = Some(ceremony_id.into());
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn ceremony_id(&self) -> Option<&str> {
        self.ceremony_id.as_deref()
    }
}

impl From<ParseError> for Fido2Error {
    fn from(err: ParseError) -> Self {
        Self::new(ErrorKind::Parse, err.to_string())
    }
}

impl From<openssl::error::ErrorStack> for Fido2Error {
    fn from(err: openssl::error::ErrorStack) -> Self {
        Self::trust(format!("crypto failure: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Fido2Error>;
