//! Software authenticator for ceremony tests

#![allow(dead_code)]

use std::sync::Arc;

use attesta_core::authenticator_data::FLAG_USER_PRESENT;
use attesta_core::{
    AssertionResponseData, AssertionResultRequest, AttestationObject, AttestationResponseData,
    AttestationResultRequest, AttestationStatement, AttestedCredentialData, AuthenticatorData,
    CoseKey, Fido2Config, MemoryCeremonyStore, TrustStore,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ciborium::value::Value;
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, BigNumContext, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509NameBuilder, X509};
use sha2::{Digest, Sha256};

pub const RP_ID: &str = "example.com";
pub const ORIGIN: &str = "https://example.com";

/// Route engine logs to the test harness, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> Arc<Fido2Config> {
    init_tracing();
    Arc::new(Fido2Config {
        rp_id: RP_ID.to_string(),
        rp_origin: ORIGIN.to_string(),
        ..Default::default()
    })
}

pub fn memory_store() -> Arc<MemoryCeremonyStore> {
    Arc::new(MemoryCeremonyStore::default())
}

pub fn empty_trust() -> Arc<TrustStore> {
    Arc::new(TrustStore::new())
}

pub fn p256_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

/// Certificate for `key`, self-signed when `issuer` is None.
pub fn issue(
    cn: &str,
    key: &PKey<Private>,
    issuer: Option<(&X509, &PKey<Private>)>,
    ca: bool,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    if ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
    }
    match issuer {
        Some((issuer_cert, issuer_key)) => {
            builder.set_issuer_name(issuer_cert.subject_name()).unwrap();
            builder.sign(issuer_key, MessageDigest::sha256()).unwrap();
        }
        None => {
            builder.set_issuer_name(&name).unwrap();
            builder.sign(key, MessageDigest::sha256()).unwrap();
        }
    }
    builder.build()
}

pub fn sign(key: &PKey<Private>, data: &[u8]) -> Vec<u8> {
    let mut signer = Signer::new(MessageDigest::sha256(), key).unwrap();
    signer.update(data).unwrap();
    signer.sign_to_vec().unwrap()
}

pub fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn client_data_json(ceremony_type: &str, challenge: &str, origin: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "type": ceremony_type,
        "challenge": challenge,
        "origin": origin,
    }))
    .unwrap()
}

/// Attestation statement variants the authenticator can produce
pub enum Statement<'a> {
    None,
    PackedSelf,
    PackedFull {
        cert_key: &'a PKey<Private>,
        chain: &'a [X509],
    },
}

/// ES256 authenticator with one credential
pub struct SoftAuthenticator {
    pub key: PKey<Private>,
    pub credential_id: Vec<u8>,
    pub aaguid: [u8; 16],
    pub counter: u32,
    pub rp_id: String,
    pub origin: String,
}

impl SoftAuthenticator {
    pub fn new(aaguid: [u8; 16]) -> Self {
        Self {
            key: p256_key(),
            credential_id: (0u8..32).collect(),
            aaguid,
            counter: 0,
            rp_id: RP_ID.to_string(),
            origin: ORIGIN.to_string(),
        }
    }

    pub fn cose_key(&self) -> CoseKey {
        let ec = self.key.ec_key().unwrap();
        let mut ctx = BigNumContext::new().unwrap();
        let mut x = BigNum::new().unwrap();
        let mut y = BigNum::new().unwrap();
        ec.public_key()
            .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)
            .unwrap();
        CoseKey {
            alg: Some(-7),
            crv: 1,
            x: x.to_vec_padded(32).unwrap(),
            y: y.to_vec_padded(32).unwrap(),
        }
    }

    pub fn credential_id_b64(&self) -> String {
        b64(&self.credential_id)
    }

    fn rp_id_hash(&self) -> [u8; 32] {
        Sha256::digest(self.rp_id.as_bytes()).into()
    }

    /// Answer creation options carrying `challenge`.
    pub fn attest(&self, challenge: &str, statement: Statement<'_>) -> AttestationResultRequest {
        let client_data = client_data_json("webauthn.create", challenge, &self.origin);
        let client_data_hash = Sha256::digest(&client_data);

        let auth_data = AuthenticatorData::new(
            self.rp_id_hash(),
            FLAG_USER_PRESENT,
            self.counter,
            Some(AttestedCredentialData {
                aaguid: self.aaguid,
                credential_id: self.credential_id.clone(),
                cose_public_key: self.cose_key().to_cbor(),
            }),
            None,
        );
        let mut signed = auth_data.as_bytes().to_vec();
        signed.extend_from_slice(&client_data_hash);

        let (fmt, entries) = match statement {
            Statement::None => ("none", vec![]),
            Statement::PackedSelf => (
                "packed",
                vec![
                    ("alg", Value::Integer((-7).into())),
                    ("sig", Value::Bytes(sign(&self.key, &signed))),
                ],
            ),
            Statement::PackedFull { cert_key, chain } => (
                "packed",
                vec![
                    ("alg", Value::Integer((-7).into())),
                    ("sig", Value::Bytes(sign(cert_key, &signed))),
                    (
                        "x5c",
                        Value::Array(
                            chain
                                .iter()
                                .map(|c| Value::Bytes(c.to_der().unwrap()))
                                .collect(),
                        ),
                    ),
                ],
            ),
        };
        let statement = AttestationStatement::new(Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (Value::Text(k.to_string()), v))
                .collect(),
        ))
        .unwrap();
        let object = AttestationObject {
            fmt: fmt.to_string(),
            auth_data,
            statement,
        };

        AttestationResultRequest {
            id: Some(self.credential_id_b64()),
            raw_id: Some(self.credential_id_b64()),
            credential_type: Some("public-key".to_string()),
            response: Some(AttestationResponseData {
                attestation_object: Some(b64(&object.to_cbor())),
                client_data_json: Some(b64(&client_data)),
                transports: vec!["usb".to_string()],
            }),
        }
    }

    /// Answer request options carrying `challenge` with the given counter.
    pub fn assert(&self, challenge: &str, counter: u32) -> AssertionResultRequest {
        let client_data = client_data_json("webauthn.get", challenge, &self.origin);
        let auth_data = AuthenticatorData::new(self.rp_id_hash(), FLAG_USER_PRESENT, counter, None, None);
        let mut signed = auth_data.as_bytes().to_vec();
        signed.extend_from_slice(&Sha256::digest(&client_data));

        AssertionResultRequest {
            id: Some(self.credential_id_b64()),
            raw_id: Some(self.credential_id_b64()),
            credential_type: Some("public-key".to_string()),
            response: Some(AssertionResponseData {
                authenticator_data: Some(b64(auth_data.as_bytes())),
                client_data_json: Some(b64(&client_data)),
                signature: Some(b64(&sign(&self.key, &signed))),
                user_handle: None,
            }),
        }
    }
}
