//! Application state module
//!
//! Defines shared state accessible across all request handlers.

use std::sync::Arc;

use attesta_core::{
    AssertionService, AttestationService, Fido2Config, MemoryCeremonyStore, Result, TrustStore,
};

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    pub attestation: Arc<AttestationService>,
    pub assertion: Arc<AssertionService>,
    pub trust: Arc<TrustStore>,
    pub ceremonies: Arc<MemoryCeremonyStore>,
    pub fido2: Arc<Fido2Config>,
}

impl AppState {
    /// State with the trust store built from the configured folders
    pub fn from_config(fido2: Fido2Config) -> Result<Self> {
        let trust = TrustStore::from_config(&fido2)?;
        Ok(Self::with_trust_store(fido2, trust))
    }

    /// State with an empty trust store (for testing)
    pub fn in_memory(fido2: Fido2Config) -> Self {
        Self::with_trust_store(fido2, TrustStore::new())
    }

    pub fn with_trust_store(fido2: Fido2Config, trust: TrustStore) -> Self {
        let fido2 = Arc::new(fido2);
        let trust = Arc::new(trust);
        let ceremonies = Arc::new(MemoryCeremonyStore::new(fido2.challenge_ttl));

        Self {
            attestation: Arc::new(AttestationService::new(
                fido2.clone(),
                ceremonies.clone(),
                trust.clone(),
            )),
            assertion: Arc::new(AssertionService::new(fido2.clone(), ceremonies.clone())),
            trust,
            ceremonies,
            fido2,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("rp_id", &self.fido2.rp_id)
            .field("trust", &self.trust)
            .field("ceremonies", &self.ceremonies)
            .finish()
    }
}
