//! `android-key` attestation

use x509_parser::der_parser::ber::BerObjectContent;
use x509_parser::der_parser::der::parse_der;

use super::{
    AttestationFormat, AttestationFormatProcessor, AttestationType, CredentialTrustResult,
    FormatContext,
};
use crate::certificate;
use crate::error::{Fido2Error, Result};
use crate::signature::{self, VerificationKey};
use crate::verifiers;

/// Android key attestation extension (KeyDescription)
pub const OID_ANDROID_KEY_DESCRIPTION: &str = "1.3.6.1.4.1.11129.2.1.17";

/// Index of `attestationChallenge` inside the KeyDescription sequence
const ATTESTATION_CHALLENGE_INDEX: usize = 4;

#[derive(Debug, Default, Clone, Copy)]
pub struct AndroidKeyProcessor;

impl AttestationFormatProcessor for AndroidKeyProcessor {
    fn format(&self) -> AttestationFormat {
        AttestationFormat::AndroidKey
    }

    fn process(&self, ctx: &FormatContext<'_>) -> Result<CredentialTrustResult> {
        let alg = ctx.statement.alg()?;
        let chain = ctx.statement.require_x5c()?;
        let leaf = &chain[0];

        signature::ensure_valid(
            ctx.statement.sig()?,
            &ctx.signature_base(),
            VerificationKey::Certificate(leaf),
            alg,
        )?;

        let cert_key = leaf.public_key()?;
        verifiers::verify_key_matches_credential(&cert_key, &ctx.credential_key()?)?;

        let description = certificate::extension_value(leaf, OID_ANDROID_KEY_DESCRIPTION)?
            .ok_or_else(|| Fido2Error::trust("android key attestation extension missing"))?;
        let challenge = attestation_challenge(&description)?;
        if challenge != ctx.client_data_hash {
            return Err(Fido2Error::trust(
                "android key attestation challenge does not match client data hash",
            ));
        }

        ctx.validate_chain(&chain)?;

        CredentialTrustResult::new(AttestationFormat::AndroidKey, AttestationType::Basic)
            .with_trust_path(&chain)
    }
}

fn attestation_challenge(description: &[u8]) -> Result<Vec<u8>> {
    let invalid = || Fido2Error::trust("invalid android key attestation extension");

    let (_, parsed) = parse_der(description).map_err(|_| invalid())?;
    let BerObjectContent::Sequence(items) = &parsed.content else {
        return Err(invalid());
    };
    items
        .get(ATTESTATION_CHALLENGE_INDEX)
        .and_then(|item| item.as_slice().ok())
        .map(<[u8]>::to_vec)
        .ok_or_else(invalid)
}
