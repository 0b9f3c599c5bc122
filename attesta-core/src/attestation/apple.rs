//! `apple` anonymous attestation

use sha2::{Digest, Sha256};
use x509_parser::der_parser::ber::BerObjectContent;
use x509_parser::der_parser::der::parse_der;

use super::{
    AttestationFormat, AttestationFormatProcessor, AttestationType, CredentialTrustResult,
    FormatContext,
};
use crate::certificate;
use crate::error::{Fido2Error, Result};
use crate::verifiers;

/// Apple nonce extension: `SEQUENCE { [1] EXPLICIT OCTET STRING }`
pub const OID_APPLE_NONCE: &str = "1.2.840.113635.100.8.2";

#[derive(Debug, Default, Clone, Copy)]
pub struct AppleProcessor;

impl AttestationFormatProcessor for AppleProcessor {
    fn format(&self) -> AttestationFormat {
        AttestationFormat::Apple
    }

    fn process(&self, ctx: &FormatContext<'_>) -> Result<CredentialTrustResult> {
        let chain = ctx.statement.require_x5c()?;
        let leaf = &chain[0];

        let nonce: [u8; 32] = Sha256::digest(ctx.signature_base()).into();
        let extension = certificate::extension_value(leaf, OID_APPLE_NONCE)?
            .ok_or_else(|| Fido2Error::trust("apple nonce extension missing"))?;
        if nonce_from_extension(&extension)? != nonce {
            return Err(Fido2Error::trust("apple nonce mismatch"));
        }

        let cert_key = leaf.public_key()?;
        verifiers::verify_key_matches_credential(&cert_key, &ctx.credential_key()?)?;
        ctx.validate_chain(&chain)?;

        CredentialTrustResult::new(AttestationFormat::Apple, AttestationType::AnonCa)
            .with_trust_path(&chain)
    }
}

fn nonce_from_extension(value: &[u8]) -> Result<Vec<u8>> {
    let invalid = || Fido2Error::trust("invalid apple nonce extension");

    let (_, outer) = parse_der(value).map_err(|_| invalid())?;
    let BerObjectContent::Sequence(items) = &outer.content else {
        return Err(invalid());
    };
    for item in items {
        if let BerObjectContent::Unknown(tagged) = &item.content {
            let (_, inner) = parse_der(tagged.data).map_err(|_| invalid())?;
            return inner.as_slice().map(<[u8]>::to_vec).map_err(|_| invalid());
        }
    }
    Err(invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::test_support::*;
    use crate::certificate::test_support::{issue, p256_key};
    use crate::certificate::OpensslCertificateValidator;
    use crate::metadata::{AnchorSource, TrustAnchors};
    use ciborium::value::Value;
    use openssl::asn1::{Asn1Object, Asn1OctetString};
    use openssl::x509::X509Extension;

    fn nonce_extension(nonce: &[u8]) -> X509Extension {
        // 30 24 A1 22 04 20 <nonce>
        let mut der = vec![0x30, 0x24, 0xa1, 0x22, 0x04, 0x20];
        der.extend_from_slice(nonce);
        let oid = Asn1Object::from_str(OID_APPLE_NONCE).unwrap();
        let value = Asn1OctetString::new_from_bytes(&der).unwrap();
        X509Extension::new_from_der(&oid, false, &value).unwrap()
    }

    #[test]
    fn test_apple_attestation() {
        let credential_key = p256_key();
        let auth_data = auth_data_for(&cose_from_ec(&credential_key), [0xA7; 16]);
        let cdh = [0x10u8; 32];
        let mut base = auth_data.as_bytes().to_vec();
        base.extend_from_slice(&cdh);
        let nonce = Sha256::digest(&base);

        let root_key = p256_key();
        let root = issue("Apple WebAuthn Root CA", &root_key, None, true, vec![]);
        let leaf = issue(
            "credential",
            &credential_key,
            Some((&root, &root_key)),
            false,
            vec![nonce_extension(&nonce)],
        );

        let stmt = statement(vec![(
            "x5c",
            Value::Array(vec![Value::Bytes(leaf.to_der().unwrap())]),
        )]);
        let anchors = TrustAnchors::new(vec![root], AnchorSource::Metadata);
        let ctx = FormatContext {
            statement: &stmt,
            auth_data: &auth_data,
            client_data_hash: &cdh,
            anchors: &anchors,
            validator: &OpensslCertificateValidator,
            require_trust_anchors: true,
        };
        let result = AppleProcessor.process(&ctx).unwrap();
        assert_eq!(result.attestation_type, AttestationType::AnonCa);

        let other_cdh = [0x11u8; 32];
        let ctx = FormatContext {
            client_data_hash: &other_cdh,
            ..ctx
        };
        assert!(AppleProcessor
            .process(&ctx)
            .unwrap_err()
            .message()
            .contains("nonce"));
    }

    #[test]
    fn test_nonce_extension_parsing() {
        let mut der = vec![0x30, 0x24, 0xa1, 0x22, 0x04, 0x20];
        der.extend_from_slice(&[0xEE; 32]);
        assert_eq!(nonce_from_extension(&der).unwrap(), vec![0xEE; 32]);
        assert!(nonce_from_extension(&[0x30, 0x00]).is_err());
    }
}
