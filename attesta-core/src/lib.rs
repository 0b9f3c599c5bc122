//! Attesta Core - WebAuthn attestation and assertion verification
//!
//! This crate runs the relying-party side of WebAuthn registration and
//! authentication ceremonies and evaluates authenticator trust against FIDO
//! metadata.
//!
//! # Features
//!
//! - Strict authenticator data parsing (no leftover bytes)
//! - Attestation formats: none, packed, fido-u2f, android-key,
//!   android-safetynet, tpm, apple and surrogate
//! - COSE signature verification (ECDSA, RSA PKCS#1 v1.5 and PSS)
//! - Metadata trust store with signed TOC ingestion, status gate and remote
//!   statement fetch
//! - Single-use challenges and signature counter replay detection
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use attesta_core::{
//!     AttestationOptionsRequest, AttestationService, Fido2Config, MemoryCeremonyStore,
//!     TrustStore,
//! };
//!
//! # async fn example() -> attesta_core::Result<()> {
//! let config = Arc::new(Fido2Config::from_env());
//! let trust = Arc::new(TrustStore::from_config(&config)?);
//! let store = Arc::new(MemoryCeremonyStore::new(config.challenge_ttl));
//! let registrations = AttestationService::new(config, store, trust);
//!
//! let options = registrations
//!     .options(&AttestationOptionsRequest {
//!         username: Some("alice".into()),
//!         display_name: Some("Alice".into()),
//!         attestation: Some("direct".into()),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("challenge: {}", options.challenge);
//! # Ok(())
//! # }
//! ```

pub mod attestation;
pub mod authenticator_data;
pub mod ceremony;
pub mod certificate;
pub mod challenge;
pub mod client_data;
pub mod config;
pub mod cose;
pub mod error;
pub mod metadata;
pub mod signature;
pub mod types;
pub mod verifiers;

// Re-export main types for convenience
pub use attestation::{
    AttestationFormat, AttestationFormatProcessor, AttestationObject, AttestationStatement,
    AttestationType, CredentialTrustResult, FormatContext, FormatRegistry,
};
pub use authenticator_data::{AttestedCredentialData, AuthenticatorData, AuthenticatorFlags};
pub use ceremony::{
    AllowAll, AssertionService, AttestationService, CeremonyEntry, CeremonyInterceptor,
    CeremonyKind, CeremonyPhase, CeremonyStatus, CeremonyStore, MemoryCeremonyStore,
};
pub use certificate::{CertificateValidator, OpensslCertificateValidator};
pub use challenge::generate_challenge;
pub use client_data::{ClientData, ClientDataType};
pub use config::Fido2Config;
pub use cose::CoseKey;
pub use error::{ErrorKind, Fido2Error, ParseError, Result};
pub use metadata::{
    AnchorSource, MetadataFetcher, MetadataStatement, StatusReport, TocEntry, TrustAnchors,
    TrustStore, TrustStoreStats,
};
pub use signature::{CoseAlgorithm, VerificationKey};
pub use types::*;

#[cfg(feature = "network")]
pub use metadata::HttpMetadataFetcher;
