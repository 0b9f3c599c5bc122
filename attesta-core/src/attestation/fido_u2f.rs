//! `fido-u2f` attestation

use openssl::nid::Nid;

use super::{
    AttestationFormat, AttestationFormatProcessor, AttestationType, CredentialTrustResult,
    FormatContext,
};
use crate::error::{Fido2Error, Result};
use crate::signature::{self, CoseAlgorithm, VerificationKey};
use crate::verifiers;

#[derive(Debug, Default, Clone, Copy)]
pub struct FidoU2fProcessor;

impl AttestationFormatProcessor for FidoU2fProcessor {
    fn format(&self) -> AttestationFormat {
        AttestationFormat::FidoU2f
    }

    fn process(&self, ctx: &FormatContext<'_>) -> Result<CredentialTrustResult> {
        let chain = ctx.statement.require_x5c()?;
        if chain.len() != 1 {
            return Err(Fido2Error::trust(format!(
                "fido-u2f expects exactly one attestation certificate, got {}",
                chain.len()
            )));
        }
        let leaf = &chain[0];

        let curve = leaf
            .public_key()?
            .ec_key()
            .ok()
            .and_then(|ec| ec.group().curve_name());
        if curve != Some(Nid::X9_62_PRIME256V1) {
            return Err(Fido2Error::trust(
                "fido-u2f attestation certificate key is not P-256",
            ));
        }

        let credential = ctx.credential()?;
        verifiers::verify_aaguid_zeroed(credential)?;
        let credential_key = credential.public_key()?;
        if credential_key.crv != 1 {
            return Err(Fido2Error::trust("fido-u2f credential key is not P-256"));
        }

        // 0x00 || rpIdHash || clientDataHash || credentialId || publicKeyU2F
        let mut base = vec![0x00];
        base.extend_from_slice(&ctx.auth_data.rp_id_hash);
        base.extend_from_slice(ctx.client_data_hash);
        base.extend_from_slice(&credential.credential_id);
        base.extend_from_slice(&credential_key.uncompressed_point());

        signature::ensure_valid(
            ctx.statement.sig()?,
            &base,
            VerificationKey::Certificate(leaf),
            CoseAlgorithm::Es256.id(),
        )?;
        ctx.validate_chain(&chain)?;

        CredentialTrustResult::new(AttestationFormat::FidoU2f, AttestationType::Basic)
            .with_trust_path(&chain)
    }
}
