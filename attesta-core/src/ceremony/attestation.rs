//! Registration ceremony

use std::sync::Arc;

use super::{
    effective_domain, encode_base64url, intercept, verify_origin, AllowAll, CeremonyEntry,
    CeremonyInterceptor, CeremonyKind, CeremonyPhase, CeremonyStatus, CeremonyStore,
};
use crate::attestation::{AttestationObject, FormatContext, FormatRegistry};
use crate::challenge::generate_challenge;
use crate::client_data::{ClientData, ClientDataType};
use crate::config::Fido2Config;
use crate::error::{Fido2Error, Result};
use crate::metadata::{TrustAnchors, TrustStore};
use crate::types::{
    AttestationOptionsRequest, AttestationOptionsResponse, AttestationResultRequest,
    AttestationResultResponse, CredentialDescriptor, PubKeyCredParam, RelyingParty, UserEntity,
    UserVerification, PUBLIC_KEY_TYPE,
};
use crate::verifiers::{self, AttestationPayload};

/// Runs registration ceremonies
pub struct AttestationService {
    config: Arc<Fido2Config>,
    store: Arc<dyn CeremonyStore>,
    trust: Arc<TrustStore>,
    formats: FormatRegistry,
    interceptor: Arc<dyn CeremonyInterceptor>,
}

impl AttestationService {
    pub fn new(
        config: Arc<Fido2Config>,
        store: Arc<dyn CeremonyStore>,
        trust: Arc<TrustStore>,
    ) -> Self {
        Self {
            config,
            store,
            trust,
            formats: FormatRegistry::with_defaults(),
            interceptor: Arc::new(AllowAll),
        }
    }

    pub fn with_formats(mut self, formats: FormatRegistry) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_interceptor(mut self, interceptor: Arc<dyn CeremonyInterceptor>) -> Self {
        self.interceptor = interceptor;
        self
    }

    /// Issue creation options and persist a pending registration.
    pub async fn options(
        &self,
        request: &AttestationOptionsRequest,
    ) -> Result<AttestationOptionsResponse> {
        intercept(
            self.interceptor.as_ref(),
            CeremonyPhase::AttestationOptions,
            request,
        )?;
        let attestation = verifiers::verify_attestation_options(request)?;
        let username = request.username.as_deref().unwrap_or_default();
        let display_name = request.display_name.as_deref().unwrap_or_default();
        let domain = effective_domain(request.document_domain.as_deref(), &self.config.rp_id);

        let registrations = self
            .store
            .find_all_by_username(CeremonyKind::Registration, username)
            .await?;
        let user_id = registrations
            .first()
            .map(|r| r.user_id.clone())
            .unwrap_or_else(|| encode_base64url(uuid::Uuid::new_v4().as_bytes()));
        let exclude_credentials: Vec<CredentialDescriptor> = registrations
            .iter()
            .filter(|r| r.is_active_credential(&domain))
            .filter_map(CeremonyEntry::descriptor)
            .collect();

        let authenticator_selection = request.authenticator_selection.clone().unwrap_or_default();
        let user_verification = authenticator_selection
            .user_verification
            .as_deref()
            .map(str::parse::<UserVerification>)
            .transpose()?
            .unwrap_or(self.config.user_verification);

        let challenge = generate_challenge()?;
        let response = AttestationOptionsResponse {
            attestation,
            authenticator_selection,
            challenge: challenge.clone(),
            pub_key_cred_params: self
                .config
                .enabled_algorithms
                .iter()
                .map(|alg| PubKeyCredParam {
                    credential_type: PUBLIC_KEY_TYPE.to_string(),
                    alg: *alg,
                })
                .collect(),
            rp: RelyingParty {
                id: domain.clone(),
                name: self.config.rp_name.clone(),
            },
            user: UserEntity {
                id: user_id.clone(),
                name: username.to_string(),
                display_name: display_name.to_string(),
            },
            exclude_credentials,
            extensions: request.extensions.clone(),
        };

        let mut entry = CeremonyEntry::pending(
            CeremonyKind::Registration,
            username,
            user_id,
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
            "Registration ceremony started"
        );
        Ok(response)
    }

    /// Verify an attestation response and register the credential.
    pub async fn verify(
        &self,
        request: &AttestationResultRequest,
    ) -> Result<AttestationResultResponse> {
        intercept(
            self.interceptor.as_ref(),
            CeremonyPhase::AttestationVerify,
            request,
        )?;
        let payload = verifiers::verify_attestation_payload(request)?;
        let client_data = ClientData::decode(&payload.client_data_json)?;
        client_data.ensure_type(ClientDataType::Create)?;

        let mut entry = self
            .store
            .claim_by_challenge(CeremonyKind::Registration, &client_data.challenge)
            .await?
            .ok_or_else(|| {
                tracing::warn!(challenge = %client_data.challenge, "No pending registration");
                Fido2Error::ceremony_not_found(&client_data.challenge)
            })?;
        entry.raw_response = serde_json::to_string(request).ok();

        match self.register(&mut entry, &payload, &client_data).await {
            Ok(created_credentials) => {
                entry.status = CeremonyStatus::Registered;
                self.store.update(&entry).await?;
                tracing::info!(
                    ceremony_id = %entry.id,
                    username = %entry.username,
                    attestation_type = ?entry.attestation_type,
                    "Credential registered"
                );
                Ok(AttestationResultResponse {
                    status: "ok".to_string(),
                    error_message: String::new(),
                    created_credentials,
                })
            }
            Err(e) => {
                entry.status = CeremonyStatus::Failed;
                if let Err(store_err) = self.store.update(&entry).await {
                    tracing::error!(error = %store_err, "Failed to persist failed registration");
                }
                tracing::warn!(ceremony_id = %entry.id, error = %e, "Registration failed");
                Err(e.with_ceremony(&entry.id))
            }
        }
    }

    async fn register(
        &self,
        entry: &mut CeremonyEntry,
        payload: &AttestationPayload,
        client_data: &ClientData,
    ) -> Result<CredentialDescriptor> {
        verify_origin(client_data, &entry.domain, &self.config)?;

        let object = AttestationObject::from_cbor(&payload.attestation_object)?;
        let auth_data = &object.auth_data;
        verifiers::verify_rp_id_hash(auth_data, &entry.domain)?;
        verifiers::verify_user_present(auth_data.flags)?;
        verifiers::verify_user_verification_option(entry.user_verification, auth_data.flags)?;

        let credential = auth_data.require_credential()?;
        credential.public_key()?;
        let aaguid = credential.aaguid_hex();

        let handler = self.formats.resolve(&object.fmt)?;
        let anchors = if handler.needs_trust_anchors(&object.statement) {
            self.trust.anchors_for(&aaguid).await?
        } else {
            self.trust.check_status(&aaguid)?;
            TrustAnchors::none()
        };

        let ctx = FormatContext {
            statement: &object.statement,
            auth_data,
            client_data_hash: client_data.hash(),
            anchors: &anchors,
            validator: self.trust.validator(),
            require_trust_anchors: self.config.require_trust_anchors,
        };
        let result = handler.process(&ctx)?;
        tracing::debug!(
            fmt = %result.format,
            attestation_type = result.attestation_type.as_str(),
            aaguid = %aaguid,
            anchors = ?anchors.source(),
            "Attestation statement verified"
        );

        entry.credential_id = Some(encode_base64url(&credential.credential_id));
        entry.credential_public_key = Some(encode_base64url(&credential.cose_public_key));
        entry.signature_counter = auth_data.counter;
        entry.attestation_type = Some(result.attestation_type.as_str().to_string());
        entry.transports = payload.transports.clone();

        entry
            .descriptor()
            .ok_or_else(|| Fido2Error::trust("registered credential has no id"))
    }
}

impl std::fmt::Debug for AttestationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationService")
            .field("rp_id", &self.config.rp_id)
            .field("formats", &self.formats)
            .field("trust", &self.trust)
            .finish()
    }
}
