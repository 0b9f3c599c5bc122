//! `android-safetynet` attestation
//!
//! The statement `response` is a compact JWS whose header carries the
//! signing chain in `x5c`.

use std::collections::HashSet;

use base64::{engine::general_purpose::STANDARD, Engine};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{
    AttestationFormat, AttestationFormatProcessor, AttestationType, CredentialTrustResult,
    FormatContext,
};
use crate::certificate;
use crate::error::{Fido2Error, Result};

/// Hostname the attestation certificate must be issued to
pub const SAFETYNET_HOSTNAME: &str = "attest.android.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SafetyNetPayload {
    nonce: String,
    #[serde(default)]
    cts_profile_match: bool,
    #[serde(default)]
    timestamp_ms: Option<i64>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AndroidSafetyNetProcessor;

impl AttestationFormatProcessor for AndroidSafetyNetProcessor {
    fn format(&self) -> AttestationFormat {
        AttestationFormat::AndroidSafetyNet
    }

    fn process(&self, ctx: &FormatContext<'_>) -> Result<CredentialTrustResult> {
        ctx.statement.text("ver")?;
        let response = std::str::from_utf8(ctx.statement.bytes("response")?)
            .map_err(|_| Fido2Error::trust("safetynet response is not a compact JWS"))?;

        let header = decode_header(response)
            .map_err(|e| Fido2Error::trust(format!("invalid safetynet JWS header: {e}")))?;
        let ders = header
            .x5c
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|b64| {
                STANDARD
                    .decode(b64)
                    .map_err(|_| Fido2Error::trust("safetynet x5c entry is not base64"))
            })
            .collect::<Result<Vec<_>>>()?;
        if ders.is_empty() {
            return Err(Fido2Error::trust("safetynet JWS carries no certificates"));
        }
        let chain = certificate::parse_der_chain(&ders)?;
        let leaf = &chain[0];

        if certificate::common_name(leaf).as_deref() != Some(SAFETYNET_HOSTNAME) {
            return Err(Fido2Error::trust(format!(
                "safetynet certificate is not issued to {SAFETYNET_HOSTNAME}"
            )));
        }

        let pem = leaf.public_key()?.public_key_to_pem()?;
        let key = match header.alg {
            Algorithm::RS256 => DecodingKey::from_rsa_pem(&pem),
            Algorithm::ES256 => DecodingKey::from_ec_pem(&pem),
            other => {
                return Err(Fido2Error::trust(format!(
                    "unsupported safetynet JWS algorithm {other:?}"
                )))
            }
        }
        .map_err(|e| Fido2Error::trust(format!("unusable safetynet signing key: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = false;
        validation.validate_aud = false;

        let payload = decode::<SafetyNetPayload>(response, &key, &validation)
            .map_err(|e| Fido2Error::trust(format!("safetynet JWS rejected: {e}")))?
            .claims;

        let expected_nonce = STANDARD.encode(Sha256::digest(ctx.signature_base()));
        if payload.nonce != expected_nonce {
            return Err(Fido2Error::trust("safetynet nonce mismatch"));
        }
        if !payload.cts_profile_match {
            return Err(Fido2Error::trust("safetynet ctsProfileMatch is false"));
        }
        tracing::debug!(timestamp_ms = ?payload.timestamp_ms, "SafetyNet attestation accepted");

        ctx.validate_chain(&chain)?;

        CredentialTrustResult::new(AttestationFormat::AndroidSafetyNet, AttestationType::Basic)
            .with_trust_path(&chain)
    }
}
