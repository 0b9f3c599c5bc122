//! Registration and authentication ceremonies
//!
//! A ceremony starts `Pending` when options are issued and reaches a
//! terminal status in `verify`. Entries are persisted through a
//! [`CeremonyStore`]; the challenge is claimed exactly once.

mod assertion;
mod attestation;
mod memory;

pub use assertion::AssertionService;
pub use attestation::AttestationService;
pub use memory::{CeremonyStoreStats, MemoryCeremonyStore};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::client_data::ClientData;
use crate::config::Fido2Config;
use crate::error::{Fido2Error, Result};
use crate::types::{CredentialDescriptor, UserVerification};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

impl std::fmt::Display for CeremonyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registration => f.write_str("registration"),
            Self::Authentication => f.write_str("authentication"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CeremonyStatus {
    Pending,
    Registered,
    Authenticated,
    Compromised,
    Failed,
}

impl CeremonyStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Persisted state of one ceremony.
///
/// A `Registered` registration entry doubles as the stored credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CeremonyEntry {
    pub id: String,
    pub kind: CeremonyKind,
    pub username: String,
    /// base64url user handle shared by all registrations of a username
    pub user_id: String,
    pub challenge: String,
    pub domain: String,
    pub status: CeremonyStatus,
    /// base64url credential id
    pub credential_id: Option<String>,
    /// base64url COSE key
    pub credential_public_key: Option<String>,
    pub signature_counter: u32,
    pub attestation_type: Option<String>,
    pub transports: Vec<String>,
    pub user_verification: UserVerification,
    pub raw_request: Option<String>,
    pub raw_response: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CeremonyEntry {
    pub fn pending(
        kind: CeremonyKind,
        username: impl Into<String>,
        user_id: impl Into<String>,
        challenge: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            username: username.into(),
            user_id: user_id.into(),
            challenge: challenge.into(),
            domain: domain.into(),
            status: CeremonyStatus::Pending,
            credential_id: None,
            credential_public_key: None,
            signature_counter: 0,
            attestation_type: None,
            transports: Vec::new(),
            user_verification: UserVerification::Preferred,
            raw_request: None,
            raw_response: None,
            created_at: Utc::now(),
        }
    }

    /// Descriptor echoed back to the client, if a credential is attached.
    pub fn descriptor(&self) -> Option<CredentialDescriptor> {
        self.credential_id
            .as_ref()
            .map(|id| CredentialDescriptor::public_key(id.clone(), self.transports.clone()))
    }

    /// Whether this is a usable credential for `domain`.
    pub fn is_active_credential(&self, domain: &str) -> bool {
        self.kind == CeremonyKind::Registration
            && self.status == CeremonyStatus::Registered
            && self.domain == domain
            && self.credential_id.is_some()
    }
}

/// Persistence collaborator for ceremony entries
#[async_trait]
pub trait CeremonyStore: Send + Sync {
    /// Persist a new entry.
    async fn save(&self, entry: CeremonyEntry) -> Result<()>;

    /// Atomically find and consume the pending entry for `challenge`.
    ///
    /// A second claim of the same challenge returns `None`.
    async fn claim_by_challenge(
        &self,
        kind: CeremonyKind,
        challenge: &str,
    ) -> Result<Option<CeremonyEntry>>;

    /// Store the new state of an entry, keyed by its id.
    async fn update(&self, entry: &CeremonyEntry) -> Result<()>;

    /// Atomically move the signature counter of registration `id` from
    /// `expected` to `counter`.
    ///
    /// Returns `false`, leaving the entry untouched, when the stored counter
    /// is no longer `expected` or the registration is no longer active.
    async fn compare_and_update_counter(&self, id: &str, expected: u32, counter: u32)
        -> Result<bool>;

    async fn find_all_by_username(
        &self,
        kind: CeremonyKind,
        username: &str,
    ) -> Result<Vec<CeremonyEntry>>;

    /// Drop pending entries past their lifetime. Returns how many were removed.
    async fn cleanup_expired(&self) -> usize;
}

/// Ceremony phase reported to a [`CeremonyInterceptor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyPhase {
    AttestationOptions,
    AttestationVerify,
    AssertionOptions,
    AssertionVerify,
}

impl CeremonyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AttestationOptions => "attestation_options",
            Self::AttestationVerify => "attestation_verify",
            Self::AssertionOptions => "assertion_options",
            Self::AssertionVerify => "assertion_verify",
        }
    }
}

/// Hook consulted before every ceremony phase.
pub trait CeremonyInterceptor: Send + Sync {
    /// `false` stops the ceremony.
    fn allow(&self, phase: CeremonyPhase, payload: &serde_json::Value) -> bool {
        let _ = (phase, payload);
        true
    }
}

/// Interceptor that lets everything through
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl CeremonyInterceptor for AllowAll {}

pub(crate) fn intercept<T: Serialize>(
    interceptor: &dyn CeremonyInterceptor,
    phase: CeremonyPhase,
    payload: &T,
) -> Result<()> {
    let value = serde_json::to_value(payload).map_err(|e| {
        Fido2Error::invalid_request(format!("{} payload is not serializable: {e}", phase.as_str()))
    })?;
    if !interceptor.allow(phase, &value) {
        tracing::info!(phase = phase.as_str(), "Ceremony stopped by interceptor");
        return Err(Fido2Error::invalid_request(format!(
            "{} rejected by interceptor",
            phase.as_str()
        )));
    }
    Ok(())
}

/// Effective domain of a ceremony: the host of `documentDomain` when it is a
/// URL, the value itself otherwise, or the configured RP id.
pub(crate) fn effective_domain(document_domain: Option<&str>, rp_id: &str) -> String {
    match document_domain.map(str::trim).filter(|d| !d.is_empty()) {
        Some(domain) => Url::parse(domain)
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
            .unwrap_or_else(|| domain.to_string()),
        None => rp_id.to_string(),
    }
}

/// Ceremonies on the RP id must come from the configured RP origin; other
/// effective domains are matched by host.
pub(crate) fn verify_origin(
    client_data: &ClientData,
    domain: &str,
    config: &Fido2Config,
) -> Result<()> {
    if domain == config.rp_id {
        client_data.ensure_exact_origin(&config.rp_origin)
    } else {
        client_data.ensure_origin(domain)
    }
}

pub(crate) fn encode_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}
