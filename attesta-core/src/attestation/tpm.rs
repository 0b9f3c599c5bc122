//! `tpm` attestation (TPM 2.0, ECC credential keys)

use openssl::hash::{hash, MessageDigest};

use super::{
    AttestationFormat, AttestationFormatProcessor, AttestationType, CredentialTrustResult,
    FormatContext,
};
use crate::cose::CoseKey;
use crate::error::{Fido2Error, Result};
use crate::signature::{self, CoseAlgorithm, VerificationKey};

/// TPM_GENERATED_VALUE
pub const TPM_GENERATED_VALUE: u32 = 0xff54_4347;
/// TPM_ST_ATTEST_CERTIFY
pub const TPM_ST_ATTEST_CERTIFY: u16 = 0x8017;

const TPM_ALG_RSA: u16 = 0x0001;
const TPM_ALG_SHA1: u16 = 0x0004;
const TPM_ALG_SHA256: u16 = 0x000b;
const TPM_ALG_SHA384: u16 = 0x000c;
const TPM_ALG_SHA512: u16 = 0x000d;
const TPM_ALG_NULL: u16 = 0x0010;
const TPM_ALG_ECC: u16 = 0x0023;

const TPM_ECC_NIST_P256: u16 = 0x0003;
const TPM_ECC_NIST_P384: u16 = 0x0004;
const TPM_ECC_NIST_P521: u16 = 0x0005;

struct TpmReader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> TpmReader<'a> {
    fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.buf.len() < len {
            return Err(Fido2Error::trust(format!("{} is truncated", self.what)));
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// TPM2B: u16 size followed by that many bytes
    fn sized(&mut self) -> Result<&'a [u8]> {
        let len = self.u16()? as usize;
        self.take(len)
    }

    fn finish(&self) -> Result<()> {
        if !self.buf.is_empty() {
            return Err(Fido2Error::trust(format!(
                "{} has {} trailing bytes",
                self.what,
                self.buf.len()
            )));
        }
        Ok(())
    }
}

/// Relevant parts of TPMS_ATTEST
struct CertInfo<'a> {
    extra_data: &'a [u8],
    attested_name: &'a [u8],
}

fn parse_cert_info(bytes: &[u8]) -> Result<CertInfo<'_>> {
    let mut r = TpmReader::new(bytes, "certInfo");
    if r.u32()? != TPM_GENERATED_VALUE {
        return Err(Fido2Error::trust("certInfo magic is not TPM_GENERATED_VALUE"));
    }
    if r.u16()? != TPM_ST_ATTEST_CERTIFY {
        return Err(Fido2Error::trust("certInfo type is not TPM_ST_ATTEST_CERTIFY"));
    }
    let _qualified_signer = r.sized()?;
    let extra_data = r.sized()?;
    // clockInfo (17) and firmwareVersion (8)
    r.take(17 + 8)?;
    let attested_name = r.sized()?;
    let _qualified_name = r.sized()?;
    r.finish()?;

    Ok(CertInfo {
        extra_data,
        attested_name,
    })
}

/// ECC TPMT_PUBLIC
struct PubArea<'a> {
    name_alg: u16,
    curve_id: u16,
    x: &'a [u8],
    y: &'a [u8],
}

fn parse_pub_area(bytes: &[u8]) -> Result<PubArea<'_>> {
    let mut r = TpmReader::new(bytes, "pubArea");
    let key_type = r.u16()?;
    let name_alg = r.u16()?;
    let _object_attributes = r.u32()?;
    let _auth_policy = r.sized()?;

    match key_type {
        TPM_ALG_ECC => {}
        TPM_ALG_RSA => {
            return Err(Fido2Error::trust(
                "RSA TPM credential keys are not supported",
            ))
        }
        other => {
            return Err(Fido2Error::trust(format!(
                "unknown pubArea key type {other:#06x}"
            )))
        }
    }

    // TPMS_ECC_PARMS
    if r.u16()? != TPM_ALG_NULL {
        r.take(4)?; // symmetric keyBits + mode
    }
    if r.u16()? != TPM_ALG_NULL {
        r.take(2)?; // scheme hashAlg
    }
    let curve_id = r.u16()?;
    if r.u16()? != TPM_ALG_NULL {
        r.take(2)?; // kdf hashAlg
    }

    let x = r.sized()?;
    let y = r.sized()?;
    r.finish()?;

    Ok(PubArea {
        name_alg,
        curve_id,
        x,
        y,
    })
}

fn name_digest(name_alg: u16) -> Result<MessageDigest> {
    match name_alg {
        TPM_ALG_SHA1 => Ok(MessageDigest::sha1()),
        TPM_ALG_SHA256 => Ok(MessageDigest::sha256()),
        TPM_ALG_SHA384 => Ok(MessageDigest::sha384()),
        TPM_ALG_SHA512 => Ok(MessageDigest::sha512()),
        other => Err(Fido2Error::trust(format!(
            "unsupported pubArea nameAlg {other:#06x}"
        ))),
    }
}

fn verify_pub_area_matches(pub_area: &PubArea<'_>, credential_key: &CoseKey) -> Result<()> {
    let expected_curve = match credential_key.crv {
        1 => TPM_ECC_NIST_P256,
        2 => TPM_ECC_NIST_P384,
        3 => TPM_ECC_NIST_P521,
        other => return Err(Fido2Error::trust(format!("unsupported curve {other}"))),
    };
    if pub_area.curve_id != expected_curve
        || pub_area.x != credential_key.x.as_slice()
        || pub_area.y != credential_key.y.as_slice()
    {
        return Err(Fido2Error::trust(
            "pubArea key does not match credential public key",
        ));
    }
    Ok(())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TpmProcessor;

impl AttestationFormatProcessor for TpmProcessor {
    fn format(&self) -> AttestationFormat {
        AttestationFormat::Tpm
    }

    fn process(&self, ctx: &FormatContext<'_>) -> Result<CredentialTrustResult> {
        let statement = ctx.statement;
        if statement.text("ver")? != "2.0" {
            return Err(Fido2Error::trust("unsupported TPM version"));
        }
        let alg = statement.alg()?;
        let chain = statement
            .x5c()?
            .ok_or_else(|| Fido2Error::trust("TPM attestation without x5c is not supported"))?;
        let cert_info_bytes = statement.bytes("certInfo")?;
        let pub_area_bytes = statement.bytes("pubArea")?;

        let pub_area = parse_pub_area(pub_area_bytes)?;
        verify_pub_area_matches(&pub_area, &ctx.credential_key()?)?;

        let cert_info = parse_cert_info(cert_info_bytes)?;

        let att_to_be_signed_hash = hash(
            CoseAlgorithm::from_id(alg)?.digest(),
            &ctx.signature_base(),
        )?;
        if cert_info.extra_data != &*att_to_be_signed_hash {
            return Err(Fido2Error::trust("certInfo extraData mismatch"));
        }

        let mut expected_name = pub_area.name_alg.to_be_bytes().to_vec();
        expected_name.extend_from_slice(&hash(name_digest(pub_area.name_alg)?, pub_area_bytes)?);
        if cert_info.attested_name != expected_name.as_slice() {
            return Err(Fido2Error::trust("certInfo attested name mismatch"));
        }

        signature::ensure_valid(
            statement.sig()?,
            cert_info_bytes,
            VerificationKey::Certificate(&chain[0]),
            alg,
        )?;
        ctx.verify_aaguid_extension(&chain[0])?;
        ctx.validate_chain(&chain)?;

        CredentialTrustResult::new(AttestationFormat::Tpm, AttestationType::AttCa)
            .with_trust_path(&chain)
    }
}
