//! `packed` attestation (full and self) and the certificate-less
//! `surrogate` variant

use super::{
    AttestationFormat, AttestationFormatProcessor, AttestationStatement, AttestationType,
    CredentialTrustResult, FormatContext,
};
use crate::error::{Fido2Error, Result};
use crate::signature::{self, VerificationKey};
use crate::verifiers;

#[derive(Debug, Default, Clone, Copy)]
pub struct PackedProcessor;

impl AttestationFormatProcessor for PackedProcessor {
    fn format(&self) -> AttestationFormat {
        AttestationFormat::Packed
    }

    fn needs_trust_anchors(&self, statement: &AttestationStatement) -> bool {
        statement.get("x5c").is_some()
    }

    fn process(&self, ctx: &FormatContext<'_>) -> Result<CredentialTrustResult> {
        let alg = ctx.statement.alg()?;
        let sig = ctx.statement.sig()?;

        match ctx.statement.x5c()? {
            Some(chain) => {
                let leaf = &chain[0];
                signature::ensure_valid(
                    sig,
                    &ctx.signature_base(),
                    VerificationKey::Certificate(leaf),
                    alg,
                )?;
                ctx.verify_aaguid_extension(leaf)?;
                ctx.validate_chain(&chain)?;

                CredentialTrustResult::new(AttestationFormat::Packed, AttestationType::Basic)
                    .with_trust_path(&chain)
            }
            None if ctx.statement.get("ecdaaKeyId").is_some() => {
                Err(Fido2Error::trust("ECDAA attestation is not supported"))
            }
            None => {
                verify_with_credential_key(ctx, alg, sig)?;
                Ok(CredentialTrustResult::new(
                    AttestationFormat::Packed,
                    AttestationType::SelfAttestation,
                ))
            }
        }
    }
}

/// Basic packed attestation without a certificate chain, verified with the
/// credential key itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct SurrogateProcessor;

impl AttestationFormatProcessor for SurrogateProcessor {
    fn format(&self) -> AttestationFormat {
        AttestationFormat::Surrogate
    }

    fn needs_trust_anchors(&self, _statement: &AttestationStatement) -> bool {
        false
    }

    fn process(&self, ctx: &FormatContext<'_>) -> Result<CredentialTrustResult> {
        let alg = ctx.statement.alg()?;
        let sig = ctx.statement.sig()?;
        verify_with_credential_key(ctx, alg, sig)?;
        Ok(CredentialTrustResult::new(
            AttestationFormat::Surrogate,
            AttestationType::Basic,
        ))
    }
}

fn verify_with_credential_key(ctx: &FormatContext<'_>, alg: i64, sig: &[u8]) -> Result<()> {
    let credential_key = ctx.credential_key()?;
    verifiers::verify_algorithm_consistency(alg, &credential_key)?;
    let public_key = credential_key.to_public_key()?;
    signature::ensure_valid(
        sig,
        &ctx.signature_base(),
        VerificationKey::PublicKey(&public_key),
        alg,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::test_support::*;
    use crate::certificate::test_support::{issue, p256_key};
    use crate::certificate::OpensslCertificateValidator;
    use crate::error::ErrorKind;
    use crate::metadata::{AnchorSource, TrustAnchors};
    use ciborium::value::Value;

    fn run(
        processor: &dyn AttestationFormatProcessor,
        statement: &AttestationStatement,
        auth_data: &crate::authenticator_data::AuthenticatorData,
        anchors: &TrustAnchors,
        require: bool,
    ) -> Result<CredentialTrustResult> {
        let cdh = [7u8; 32];
        processor.process(&FormatContext {
            statement,
            auth_data,
            client_data_hash: &cdh,
            anchors,
            validator: &OpensslCertificateValidator,
            require_trust_anchors: require,
        })
    }

    fn base(auth_data: &crate::authenticator_data::AuthenticatorData) -> Vec<u8> {
        let mut base = auth_data.as_bytes().to_vec();
        base.extend_from_slice(&[7u8; 32]);
        base
    }

    #[test]
    fn test_self_attestation() {
        let key = p256_key();
        let auth_data = auth_data_for(&cose_from_ec(&key), [1; 16]);
        let sig = sign_es256(&key, &base(&auth_data));
        let stmt = statement(vec![
            ("alg", Value::Integer((-7).into())),
            ("sig", Value::Bytes(sig)),
        ]);

        assert!(!PackedProcessor.needs_trust_anchors(&stmt));
        let result = run(&PackedProcessor, &stmt, &auth_data, &TrustAnchors::none(), true).unwrap();
        assert_eq!(result.attestation_type, AttestationType::SelfAttestation);
    }

    #[test]
    fn test_self_attestation_alg_mismatch() {
        let key = p256_key();
        let auth_data = auth_data_for(&cose_from_ec(&key), [1; 16]);
        let sig = sign_es256(&key, &base(&auth_data));
        let stmt = statement(vec![
            ("alg", Value::Integer((-257).into())),
            ("sig", Value::Bytes(sig)),
        ]);
        let err = run(&PackedProcessor, &stmt, &auth_data, &TrustAnchors::none(), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Trust);
    }

    #[test]
    fn test_self_attestation_wrong_key() {
        let key = p256_key();
        let auth_data = auth_data_for(&cose_from_ec(&key), [1; 16]);
        let sig = sign_es256(&p256_key(), &base(&auth_data));
        let stmt = statement(vec![
            ("alg", Value::Integer((-7).into())),
            ("sig", Value::Bytes(sig)),
        ]);
        assert!(run(&PackedProcessor, &stmt, &auth_data, &TrustAnchors::none(), false).is_err());
        assert!(run(&SurrogateProcessor, &stmt, &auth_data, &TrustAnchors::none(), false).is_err());
    }

    #[test]
    fn test_full_attestation_against_anchor() {
        let root_key = p256_key();
        let root = issue("Vendor Root", &root_key, None, true, vec![]);
        let attestation_key = p256_key();
        let leaf = issue("Vendor Batch", &attestation_key, Some((&root, &root_key)), false, vec![]);

        let credential_key = p256_key();
        let auth_data = auth_data_for(&cose_from_ec(&credential_key), [2; 16]);
        let sig = sign_es256(&attestation_key, &base(&auth_data));
        let stmt = statement(vec![
            ("alg", Value::Integer((-7).into())),
            ("sig", Value::Bytes(sig)),
            (
                "x5c",
                Value::Array(vec![Value::Bytes(leaf.to_der().unwrap())]),
            ),
        ]);
        assert!(PackedProcessor.needs_trust_anchors(&stmt));

        let anchors = TrustAnchors::new(vec![root], AnchorSource::Metadata);
        let result = run(&PackedProcessor, &stmt, &auth_data, &anchors, true).unwrap();
        assert_eq!(result.attestation_type, AttestationType::Basic);
        assert_eq!(result.trust_path.len(), 1);

        let unrelated = TrustAnchors::new(
            vec![issue("Other", &p256_key(), None, true, vec![])],
            AnchorSource::Metadata,
        );
        assert!(run(&PackedProcessor, &stmt, &auth_data, &unrelated, true).is_err());

        // Without anchors the chain is only enforced when required
        assert!(run(&PackedProcessor, &stmt, &auth_data, &TrustAnchors::none(), false).is_ok());
        assert!(run(&PackedProcessor, &stmt, &auth_data, &TrustAnchors::none(), true).is_err());
    }

    #[test]
    fn test_surrogate_uses_credential_key() {
        let key = p256_key();
        let auth_data = auth_data_for(&cose_from_ec(&key), [0; 16]);
        let sig = sign_es256(&key, &base(&auth_data));
        let stmt = statement(vec![
            ("alg", Value::Integer((-7).into())),
            ("sig", Value::Bytes(sig)),
        ]);
        let result = run(&SurrogateProcessor, &stmt, &auth_data, &TrustAnchors::none(), true).unwrap();
        assert_eq!(result.format, AttestationFormat::Surrogate);
    }
}
