//! Full registration and authentication ceremonies

mod common;

use std::sync::Arc;

use attesta_core::{
    AssertionOptionsRequest, AssertionService, AttestationOptionsRequest, AttestationService,
    CeremonyKind, CeremonyStatus, CeremonyStore, ErrorKind, MetadataStatement, TrustStore,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use common::*;

fn registration_request(username: &str) -> AttestationOptionsRequest {
    AttestationOptionsRequest {
        username: Some(username.to_string()),
        display_name: Some(username.to_uppercase()),
        attestation: Some("direct".to_string()),
        ..Default::default()
    }
}

fn authentication_request(username: &str) -> AssertionOptionsRequest {
    AssertionOptionsRequest {
        username: Some(username.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_none_attestation_registers_credential() {
    let store = memory_store();
    let service = AttestationService::new(config(), store.clone(), empty_trust());
    let authenticator = SoftAuthenticator::new([0; 16]);

    let options = service.options(&registration_request("alice")).await.unwrap();
    assert_eq!(options.rp.id, RP_ID);
    assert_eq!(options.user.name, "alice");
    assert!(options.exclude_credentials.is_empty());
    assert_eq!(options.pub_key_cred_params[0].alg, -7);

    let result = service
        .verify(&authenticator.attest(&options.challenge, Statement::None))
        .await
        .unwrap();
    assert_eq!(result.status, "ok");
    assert_eq!(result.created_credentials.credential_type, "public-key");
    assert_eq!(
        result.created_credentials.credential_id,
        authenticator.credential_id_b64()
    );
    assert_eq!(result.created_credentials.transports, vec!["usb".to_string()]);

    let registrations = store
        .find_all_by_username(CeremonyKind::Registration, "alice")
        .await
        .unwrap();
    assert_eq!(registrations.len(), 1);
    assert_eq!(registrations[0].status, CeremonyStatus::Registered);
    assert_eq!(registrations[0].attestation_type.as_deref(), Some("none"));

    // Second registration excludes the first credential
    let options = service.options(&registration_request("alice")).await.unwrap();
    assert_eq!(options.exclude_credentials.len(), 1);
    assert_eq!(options.user.id, registrations[0].user_id);
}

#[tokio::test]
async fn test_packed_self_attestation() {
    let service = AttestationService::new(config(), memory_store(), empty_trust());
    let authenticator = SoftAuthenticator::new([0x11; 16]);

    let options = service.options(&registration_request("bob")).await.unwrap();
    service
        .verify(&authenticator.attest(&options.challenge, Statement::PackedSelf))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_replayed_challenge_is_not_found() {
    let service = AttestationService::new(config(), memory_store(), empty_trust());
    let authenticator = SoftAuthenticator::new([0; 16]);

    let options = service.options(&registration_request("alice")).await.unwrap();
    let response = authenticator.attest(&options.challenge, Statement::None);
    service.verify(&response).await.unwrap();

    let err = service.verify(&response).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CeremonyNotFound);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_verifies_on_one_challenge() {
    let service = AttestationService::new(config(), memory_store(), empty_trust());
    let authenticator = SoftAuthenticator::new([0; 16]);

    let options = service.options(&registration_request("alice")).await.unwrap();
    let response = authenticator.attest(&options.challenge, Statement::None);
    let (a, b) = tokio::join!(service.verify(&response), service.verify(&response));

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(err.kind(), ErrorKind::CeremonyNotFound);
}

#[tokio::test]
async fn test_forged_challenge_is_not_found() {
    let store = memory_store();
    let service = AttestationService::new(config(), store.clone(), empty_trust());
    let authenticator = SoftAuthenticator::new([0; 16]);

    let options = service.options(&registration_request("alice")).await.unwrap();
    let forged = attesta_core::generate_challenge().unwrap();
    assert_ne!(options.challenge, forged);

    let err = service
        .verify(&authenticator.attest(&forged, Statement::None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CeremonyNotFound);

    // The genuine challenge is still pending
    service
        .verify(&authenticator.attest(&options.challenge, Statement::None))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_origin_mismatch_fails_ceremony() {
    let store = memory_store();
    let service = AttestationService::new(config(), store.clone(), empty_trust());
    let mut authenticator = SoftAuthenticator::new([0x11; 16]);
    authenticator.origin = "https://evil.example.net".to_string();

    let options = service.options(&registration_request("alice")).await.unwrap();
    let err = service
        .verify(&authenticator.attest(&options.challenge, Statement::PackedSelf))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DomainMismatch);
    assert!(err.ceremony_id().is_some());

    let entries = store
        .find_all_by_username(CeremonyKind::Registration, "alice")
        .await
        .unwrap();
    assert_eq!(entries[0].status, CeremonyStatus::Failed);
    assert!(entries[0].credential_id.is_none());
}

#[tokio::test]
async fn test_insecure_scheme_on_rp_origin_rejected() {
    let service = AttestationService::new(config(), memory_store(), empty_trust());
    for origin in ["http://example.com", "https://example.com:8443"] {
        let mut authenticator = SoftAuthenticator::new([0; 16]);
        authenticator.origin = origin.to_string();

        let options = service.options(&registration_request("alice")).await.unwrap();
        let err = service
            .verify(&authenticator.attest(&options.challenge, Statement::None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DomainMismatch, "{origin}");
    }
}

#[tokio::test]
async fn test_document_domain_matched_by_host() {
    let service = AttestationService::new(config(), memory_store(), empty_trust());
    let mut authenticator = SoftAuthenticator::new([0; 16]);
    authenticator.rp_id = "login.example.com".to_string();
    authenticator.origin = "https://login.example.com:8443".to_string();

    let request = AttestationOptionsRequest {
        document_domain: Some("https://login.example.com".to_string()),
        ..registration_request("alice")
    };
    let options = service.options(&request).await.unwrap();
    assert_eq!(options.rp.id, "login.example.com");

    let result = service
        .verify(&authenticator.attest(&options.challenge, Statement::None))
        .await
        .unwrap();
    assert_eq!(result.status, "ok");
}

#[tokio::test]
async fn test_rp_id_hash_mismatch_rejected() {
    let service = AttestationService::new(config(), memory_store(), empty_trust());
    let mut authenticator = SoftAuthenticator::new([0; 16]);
    authenticator.rp_id = "other.example".to_string();

    let options = service.options(&registration_request("alice")).await.unwrap();
    let err = service
        .verify(&authenticator.attest(&options.challenge, Statement::None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DomainMismatch);
}

#[tokio::test]
async fn test_compromised_model_rejected_despite_valid_signature() {
    let aaguid = [0xC0; 16];
    let trust = TrustStore::new();
    trust.insert_metadata(MetadataStatement {
        aaguid: Some(hex::encode(aaguid)),
        ..Default::default()
    });
    let dir = tempfile::tempdir().unwrap();
    let signer = TocFixture::new();
    std::fs::write(
        dir.path().join("toc.jwt"),
        signer.sign(serde_json::json!([{
            "aaguid": hex::encode(aaguid),
            "statusReports": [{"status": "USER_KEY_PHYSICAL_COMPROMISE"}],
            "timeOfLastStatusChange": "2022-03-01"
        }])),
    )
    .unwrap();
    let trust = trust.with_toc_roots(vec![signer.root.clone()]);
    assert_eq!(trust.load_toc_folder(dir.path()), 1);

    let service = AttestationService::new(config(), memory_store(), Arc::new(trust));
    let authenticator = SoftAuthenticator::new(aaguid);
    let options = service.options(&registration_request("carol")).await.unwrap();
    let err = service
        .verify(&authenticator.attest(&options.challenge, Statement::PackedSelf))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Trust);
    assert!(err.message().contains("USER_KEY_PHYSICAL_COMPROMISE"));
}

#[tokio::test]
async fn test_packed_full_attestation_against_metadata_roots() {
    let aaguid = [0xA1; 16];
    let root_key = p256_key();
    let root = issue("Vendor Root", &root_key, None, true);
    let cert_key = p256_key();
    let leaf = issue("Vendor Batch", &cert_key, Some((&root, &root_key)), false);

    let trust = TrustStore::new();
    trust.insert_metadata(MetadataStatement {
        aaguid: Some(hex::encode(aaguid)),
        attestation_root_certificates: vec![STANDARD.encode(root.to_der().unwrap())],
        ..Default::default()
    });
    let store = memory_store();
    let service = AttestationService::new(config(), store.clone(), Arc::new(trust));
    let authenticator = SoftAuthenticator::new(aaguid);

    let options = service.options(&registration_request("dave")).await.unwrap();
    let chain = [leaf];
    service
        .verify(&authenticator.attest(
            &options.challenge,
            Statement::PackedFull {
                cert_key: &cert_key,
                chain: &chain,
            },
        ))
        .await
        .unwrap();
    let registrations = store
        .find_all_by_username(CeremonyKind::Registration, "dave")
        .await
        .unwrap();
    assert_eq!(registrations[0].attestation_type.as_deref(), Some("basic"));

    // A chain from an unknown root is not trusted
    let rogue_key = p256_key();
    let rogue = issue("Rogue", &rogue_key, None, false);
    let options = service.options(&registration_request("dave")).await.unwrap();
    let chain = [rogue];
    let err = service
        .verify(&authenticator.attest(
            &options.challenge,
            Statement::PackedFull {
                cert_key: &rogue_key,
                chain: &chain,
            },
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Trust);
}

async fn register(
    store: Arc<attesta_core::MemoryCeremonyStore>,
    authenticator: &SoftAuthenticator,
    username: &str,
) {
    let service = AttestationService::new(config(), store, empty_trust());
    let options = service.options(&registration_request(username)).await.unwrap();
    service
        .verify(&authenticator.attest(&options.challenge, Statement::None))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_assertion_updates_counter() {
    let store = memory_store();
    let authenticator = SoftAuthenticator::new([0; 16]);
    register(store.clone(), &authenticator, "alice").await;
    let service = AssertionService::new(config(), store.clone());

    let options = service.options(&authentication_request("alice")).await.unwrap();
    assert_eq!(options.rp_id, RP_ID);
    assert_eq!(options.allow_credentials.len(), 1);
    assert_eq!(
        options.allow_credentials[0].credential_id,
        authenticator.credential_id_b64()
    );

    let result = service
        .verify(&authenticator.assert(&options.challenge, 5))
        .await
        .unwrap();
    assert_eq!(result.status, "ok");
    assert_eq!(result.authenticated_credentials.credential_type, "public-key");

    let registrations = store
        .find_all_by_username(CeremonyKind::Registration, "alice")
        .await
        .unwrap();
    assert_eq!(registrations[0].signature_counter, 5);
    assert_eq!(registrations[0].status, CeremonyStatus::Registered);
}

#[tokio::test]
async fn test_zero_counters_are_accepted() {
    let store = memory_store();
    let authenticator = SoftAuthenticator::new([0; 16]);
    register(store.clone(), &authenticator, "alice").await;
    let service = AssertionService::new(config(), store);

    for _ in 0..2 {
        let options = service.options(&authentication_request("alice")).await.unwrap();
        service
            .verify(&authenticator.assert(&options.challenge, 0))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_counter_regression_marks_credential_compromised() {
    let store = memory_store();
    let authenticator = SoftAuthenticator::new([0; 16]);
    register(store.clone(), &authenticator, "alice").await;
    let service = AssertionService::new(config(), store.clone());

    let options = service.options(&authentication_request("alice")).await.unwrap();
    service
        .verify(&authenticator.assert(&options.challenge, 10))
        .await
        .unwrap();

    let options = service.options(&authentication_request("alice")).await.unwrap();
    let err = service
        .verify(&authenticator.assert(&options.challenge, 10))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Replay);

    let registrations = store
        .find_all_by_username(CeremonyKind::Registration, "alice")
        .await
        .unwrap();
    assert_eq!(registrations[0].status, CeremonyStatus::Compromised);

    // The compromised credential is no longer offered
    let err = service
        .options(&authentication_request("alice"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cloned_authenticator_concurrent_assertions() {
    let store = memory_store();
    let authenticator = SoftAuthenticator::new([0; 16]);
    register(store.clone(), &authenticator, "alice").await;
    let service = AssertionService::new(config(), store.clone());

    let first = service.options(&authentication_request("alice")).await.unwrap();
    let second = service.options(&authentication_request("alice")).await.unwrap();
    let first_assertion = authenticator.assert(&first.challenge, 1);
    let second_assertion = authenticator.assert(&second.challenge, 1);
    let (a, b) = tokio::join!(
        service.verify(&first_assertion),
        service.verify(&second_assertion),
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(err.kind(), ErrorKind::Replay);
}

#[tokio::test]
async fn test_assertion_with_wrong_key_rejected() {
    let store = memory_store();
    let authenticator = SoftAuthenticator::new([0; 16]);
    register(store.clone(), &authenticator, "alice").await;
    let service = AssertionService::new(config(), store);

    let mut impostor = SoftAuthenticator::new([0; 16]);
    impostor.credential_id = authenticator.credential_id.clone();
    let options = service.options(&authentication_request("alice")).await.unwrap();
    let err = service
        .verify(&impostor.assert(&options.challenge, 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Trust);
}

#[tokio::test]
async fn test_assertion_challenge_single_use() {
    let store = memory_store();
    let authenticator = SoftAuthenticator::new([0; 16]);
    register(store.clone(), &authenticator, "alice").await;
    let service = AssertionService::new(config(), store);

    let options = service.options(&authentication_request("alice")).await.unwrap();
    service
        .verify(&authenticator.assert(&options.challenge, 1))
        .await
        .unwrap();
    let err = service
        .verify(&authenticator.assert(&options.challenge, 2))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CeremonyNotFound);
}

#[tokio::test]
async fn test_options_validation() {
    let service = AttestationService::new(config(), memory_store(), empty_trust());
    let mut request = registration_request("alice");
    request.attestation = None;
    assert_eq!(
        service.options(&request).await.unwrap_err().kind(),
        ErrorKind::InvalidRequest
    );

    let assertions = AssertionService::new(config(), memory_store());
    assert_eq!(
        assertions
            .options(&AssertionOptionsRequest::default())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidRequest
    );
    assert_eq!(
        assertions
            .options(&authentication_request("nobody"))
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidRequest
    );
}

/// Signs TOC tokens with a root-issued ES256 signer
struct TocFixture {
    root: openssl::x509::X509,
    signer: openssl::x509::X509,
    key: openssl::pkey::PKey<openssl::pkey::Private>,
}

impl TocFixture {
    fn new() -> Self {
        let root_key = p256_key();
        let root = issue("MDS Root", &root_key, None, true);
        let key = p256_key();
        let signer = issue("MDS Signer", &key, Some((&root, &root_key)), false);
        Self { root, signer, key }
    }

    fn sign(&self, entries: serde_json::Value) -> String {
        let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::ES256);
        header.x5c = Some(vec![STANDARD.encode(self.signer.to_der().unwrap())]);
        let key = jsonwebtoken::EncodingKey::from_ec_pem(
            &self.key.private_key_to_pem_pkcs8().unwrap(),
        )
        .unwrap();
        jsonwebtoken::encode(
            &header,
            &serde_json::json!({"no": 1, "nextUpdate": "2031-01-01", "entries": entries}),
            &key,
        )
        .unwrap()
    }
}
