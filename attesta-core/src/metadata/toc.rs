//! Signed TOC verification
//!
//! A TOC is a compact JWS. Its header names the algorithm and carries the
//! signing chain in `x5c`; the chain must end in one of the configured TOC
//! roots. Only ES256 is accepted.

use std::collections::HashSet;

use base64::{engine::general_purpose::STANDARD, Engine};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use openssl::x509::X509;

use super::types::TocPayload;
use crate::certificate::{self, CertificateValidator};
use crate::error::{Fido2Error, Result};

/// Verify a TOC token and return its payload.
pub fn verify_toc(
    token: &str,
    roots: &[X509],
    validator: &dyn CertificateValidator,
) -> Result<TocPayload> {
    let token = token.trim();
    let header = decode_header(token)
        .map_err(|e| Fido2Error::metadata_fetch(format!("invalid TOC header: {e}")))?;

    if header.alg != Algorithm::ES256 {
        return Err(Fido2Error::trust(format!(
            "unsupported TOC signature algorithm {:?}",
            header.alg
        )));
    }

    let ders = header
        .x5c
        .unwrap_or_default()
        .iter()
        .map(|b64| {
            STANDARD
                .decode(b64)
                .map_err(|_| Fido2Error::metadata_fetch("TOC x5c entry is not base64"))
        })
        .collect::<Result<Vec<_>>>()?;
    if ders.is_empty() {
        return Err(Fido2Error::trust("TOC header carries no certificate chain"));
    }
    let chain = certificate::parse_der_chain(&ders)?;
    let signer = validator.verify(&chain, roots)?;

    let pem = signer.public_key()?.public_key_to_pem()?;
    let key = DecodingKey::from_ec_pem(&pem)
        .map_err(|e| Fido2Error::trust(format!("unusable TOC signing key: {e}")))?;

    let mut validation = Validation::new(Algorithm::ES256);
    validation.required_spec_claims = HashSet::new();
    validation.validate_exp = false;
    validation.validate_aud = false;

    let payload = decode::<TocPayload>(token, &key, &validation)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                Fido2Error::trust("TOC signature is invalid")
            }
            _ => Fido2Error::metadata_fetch(format!("unparsable TOC: {e}")),
        })?
        .claims;

    tracing::debug!(
        entries = payload.entries.len(),
        next_update = ?payload.next_update,
        "TOC verified"
    );
    Ok(payload)
}


#[cfg(test)]
mod tests {
    use super::test_support::sign_toc;
    use super::*;
    use crate::certificate::test_support::{issue, p256_key};
    use crate::certificate::OpensslCertificateValidator;
    use crate::error::ErrorKind;
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use serde_json::json;

    fn payload() -> serde_json::Value {
        json!({
            "no": 7,
            "nextUpdate": "2030-01-01",
            "entries": [
                {"aaguid": "0132d110-bf4e-4208-a403-ab4f5f12efe5", "statusReports": []}
            ]
        })
    }

    #[test]
    fn test_verify_es256_toc() {
        let root_key = p256_key();
        let root = issue("MDS Root", &root_key, None, true, vec![]);
        let signer_key = p256_key();
        let signer = issue("MDS Signer", &signer_key, Some((&root, &root_key)), false, vec![]);

        let token = sign_toc(&payload(), &signer_key, &[&signer], Algorithm::ES256);
        let toc = verify_toc(&token, &[root], &OpensslCertificateValidator).unwrap();
        assert_eq!(toc.no, Some(7));
        assert_eq!(toc.next_update.as_deref(), Some("2030-01-01"));
        assert_eq!(toc.entries.len(), 1);
    }

    #[test]
    fn test_toc_signed_by_untrusted_chain() {
        let root = issue("MDS Root", &p256_key(), None, true, vec![]);
        let rogue_key = p256_key();
        let rogue = issue("Rogue", &rogue_key, None, false, vec![]);
        let token = sign_toc(&payload(), &rogue_key, &[&rogue], Algorithm::ES256);
        let err = verify_toc(&token, &[root], &OpensslCertificateValidator).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Trust);
    }

    #[test]
    fn test_non_es256_toc_rejected() {
        let root_key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let root = issue("RSA Root", &root_key, None, true, vec![]);
        let token = sign_toc(&payload(), &root_key, &[&root], Algorithm::RS256);
        let err = verify_toc(&token, &[root], &OpensslCertificateValidator).unwrap_err();
        assert!(err.message().contains("unsupported TOC signature algorithm"));
    }
}
