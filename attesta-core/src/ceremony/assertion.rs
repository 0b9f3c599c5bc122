//! Authentication ceremony

use std::sync::Arc;

use super::{
    effective_domain, intercept, verify_origin, AllowAll, CeremonyEntry, CeremonyInterceptor,
    CeremonyKind, CeremonyPhase, CeremonyStatus, CeremonyStore,
};
use crate::authenticator_data::AuthenticatorData;
use crate::challenge::generate_challenge;
use crate::client_data::{decode_base64url, ClientData, ClientDataType};
use crate::config::Fido2Config;
use crate::cose::CoseKey;
use crate::error::{ErrorKind, Fido2Error, Result};
use crate::signature::{self, VerificationKey};
use crate::types::{
    AssertionOptionsRequest, AssertionOptionsResponse, AssertionResultRequest,
    AssertionResultResponse, CredentialDescriptor,
};
use crate::verifiers::{self, AssertionPayload};

/// Runs authentication ceremonies
pub struct AssertionService {
    config: Arc<Fido2Config>,
    store: Arc<dyn CeremonyStore>,
    interceptor: Arc<dyn CeremonyInterceptor>,
}

impl AssertionService {
    pub fn new(config: Arc<Fido2Config>, store: Arc<dyn CeremonyStore>) -> Self {
        Self {
            config,
            store,
            interceptor: Arc::new(AllowAll),
        }
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn CeremonyInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    /// Issue request options for the user's credentials on this domain.
    pub async fn options(
        &self,
        request: &AssertionOptionsRequest,
    ) -> Result<AssertionOptionsResponse> {
        intercept(
            self.interceptor.as_ref(),
            CeremonyPhase::AssertionOptions,
            request,
        )?;
        let mut user_verification = verifiers::verify_assertion_options(request)?;
        if request.user_verification.is_none() {
            user_verification = self.config.user_verification;
        }
        let username = request.username.as_deref().unwrap_or_default();
        let domain = effective_domain(request.document_domain.as_deref(), &self.config.rp_id);

        let registrations: Vec<CeremonyEntry> = self
            .store
            .find_all_by_username(CeremonyKind::Registration, username)
            .await?
            .into_iter()
            .filter(|r| r.is_active_credential(&domain))
            .collect();
        if registrations.is_empty() {
            return Err(Fido2Error::invalid_request(format!(
                "no registered credentials for {username} on {domain}"
            )));
        }
        let allow_credentials = registrations
            .iter()
            .filter_map(CeremonyEntry::descriptor)
            .collect();

        let challenge = generate_challenge()?;
        let response = AssertionOptionsResponse {
            user_verification,
            challenge: challenge.clone(),
            rp_id: domain.clone(),
            allow_credentials,
            extensions: request.extensions.clone(),
        };

        let mut entry = CeremonyEntry::pending(
            CeremonyKind::Authentication,
            username,
            registrations[0].user_id.clone(),
            &challenge,
            &domain,
        );
        entry.user_verification = user_verification;
        entry.raw_request = serde_json::to_string(request).ok();
        entry.raw_response = serde_json::to_string(&response).ok();
        self.store.save(entry).await?;

        tracing::info!(
            username,
            domain = %domain,
            challenge = %challenge,
            "Authentication ceremony started"
        );
        Ok(response)
    }

    /// Verify an assertion against the stored credential.
    pub async fn verify(&self, request: &AssertionResultRequest) -> Result<AssertionResultResponse> {
        intercept(
            self.interceptor.as_ref(),
            CeremonyPhase::AssertionVerify,
            request,
        )?;
        let payload = verifiers::verify_assertion_payload(request)?;
        let client_data = ClientData::decode(&payload.client_data_json)?;
        client_data.ensure_type(ClientDataType::Get)?;

        let mut entry = self
            .store
            .claim_by_challenge(CeremonyKind::Authentication, &client_data.challenge)
            .await?
            .ok_or_else(|| {
                tracing::warn!(challenge = %client_data.challenge, "No pending authentication");
                Fido2Error::ceremony_not_found(&client_data.challenge)
            })?;
        entry.raw_response = serde_json::to_string(request).ok();

        let user_handle = request
            .response
            .as_ref()
            .and_then(|r| r.user_handle.as_deref())
            .filter(|h| !h.is_empty());

        match self
            .authenticate(&mut entry, &payload, &client_data, user_handle)
            .await
        {
            Ok(authenticated_credentials) => {
                entry.status = CeremonyStatus::Authenticated;
                self.store.update(&entry).await?;
                tracing::info!(
                    ceremony_id = %entry.id,
                    username = %entry.username,
                    counter = entry.signature_counter,
                    "Assertion verified"
                );
                Ok(AssertionResultResponse {
                    status: "ok".to_string(),
                    error_message: String::new(),
                    authenticated_credentials,
                })
            }
            Err(e) => {
                entry.status = CeremonyStatus::Failed;
                if let Err(store_err) = self.store.update(&entry).await {
                    tracing::error!(error = %store_err, "Failed to persist failed authentication");
                }
                tracing::warn!(ceremony_id = %entry.id, error = %e, "Authentication failed");
                Err(e.with_ceremony(&entry.id))
            }
        }
    }

    async fn authenticate(
        &self,
        entry: &mut CeremonyEntry,
        payload: &AssertionPayload,
        client_data: &ClientData,
        user_handle: Option<&str>,
    ) -> Result<CredentialDescriptor> {
        verify_origin(client_data, &entry.domain, &self.config)?;

        let auth_data = AuthenticatorData::parse(&payload.authenticator_data)?;
        verifiers::verify_rp_id_hash(&auth_data, &entry.domain)?;
        verifiers::verify_user_present(auth_data.flags)?;
        verifiers::verify_user_verification_option(entry.user_verification, auth_data.flags)?;

        let registration = self.find_registration(entry, &payload.credential_id).await?;
        if let Some(handle) = user_handle {
            if handle.trim_end_matches('=') != registration.user_id {
                return Err(Fido2Error::trust("userHandle does not match credential owner"));
            }
        }

        let key_bytes = registration
            .credential_public_key
            .as_deref()
            .ok_or_else(|| Fido2Error::trust("registration has no public key"))
            .and_then(|key| {
                decode_base64url(key)
                    .map_err(|_| Fido2Error::trust("stored public key is not base64url"))
            })?;
        let credential_key = CoseKey::from_cbor(&key_bytes)?;
        let public_key = credential_key.to_public_key()?;
        let alg = credential_key.algorithm()?;

        let mut signed = auth_data.as_bytes().to_vec();
        signed.extend_from_slice(client_data.hash());
        signature::ensure_valid(
            &payload.signature,
            &signed,
            VerificationKey::PublicKey(&public_key),
            alg,
        )?;

        let registration = self
            .advance_counter(entry, &payload.credential_id, registration, auth_data.counter)
            .await?;

        entry.credential_id = registration.credential_id.clone();
        entry.credential_public_key = registration.credential_public_key.clone();
        entry.transports = registration.transports.clone();
        entry.signature_counter = auth_data.counter;

        registration
            .descriptor()
            .ok_or_else(|| Fido2Error::trust("registration has no credential id"))
    }

    /// Move the stored counter to `presented`. A lost compare-and-update
    /// re-reads the registration and checks the counter again, so two
    /// assertions presenting the same counter cannot both succeed.
    async fn advance_counter(
        &self,
        entry: &CeremonyEntry,
        credential_id: &str,
        mut registration: CeremonyEntry,
        presented: u32,
    ) -> Result<CeremonyEntry> {
        loop {
            if let Err(e) = verifiers::verify_counter(registration.signature_counter, presented) {
                if e.kind() == ErrorKind::Replay {
                    registration.status = CeremonyStatus::Compromised;
                    self.store.update(&registration).await?;
                    tracing::warn!(
                        registration_id = %registration.id,
                        credential_id = ?registration.credential_id,
                        stored = registration.signature_counter,
                        presented,
                        "Counter regression, credential marked compromised"
                    );
                }
                return Err(e);
            }

            if self
                .store
                .compare_and_update_counter(&registration.id, registration.signature_counter, presented)
                .await?
            {
                registration.signature_counter = presented;
                return Ok(registration);
            }

            tracing::debug!(
                registration_id = %registration.id,
                "Counter moved concurrently, re-reading registration"
            );
            registration = self.find_registration(entry, credential_id).await?;
        }
    }

    /// The user's active registration for `credential_id` on the ceremony
    /// domain.
    async fn find_registration(
        &self,
        entry: &CeremonyEntry,
        credential_id: &str,
    ) -> Result<CeremonyEntry> {
        let credential_id = credential_id.trim_end_matches('=');
        let registration = self
            .store
            .find_all_by_username(CeremonyKind::Registration, &entry.username)
            .await?
            .into_iter()
            .find(|r| r.domain == entry.domain && r.credential_id.as_deref() == Some(credential_id))
            .ok_or_else(|| Fido2Error::trust("credential is not registered for this user"))?;

        match registration.status {
            CeremonyStatus::Registered => Ok(registration),
            CeremonyStatus::Compromised => Err(Fido2Error::trust(
                "credential is marked compromised, re-registration required",
            )),
            _ => Err(Fido2Error::trust("credential registration is not complete")),
        }
    }
}

impl std::fmt::Debug for AssertionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionService")
            .field("rp_id", &self.config.rp_id)
            .finish()
    }
}
