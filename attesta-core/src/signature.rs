//! Signature verification over COSE algorithm identifiers
//!
//! See <https://www.iana.org/assignments/cose/cose.xhtml#algorithms>.

use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, PKeyRef, Public};
use openssl::rsa::Padding;
use openssl::sign::{RsaPssSaltlen, Verifier};
use openssl::x509::X509;

use crate::error::{Fido2Error, Result};

/// Supported COSE signature algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoseAlgorithm {
    /// ECDSA P-256 / SHA-256
    Es256,
    /// ECDSA P-384 / SHA-384
    Es384,
    /// ECDSA P-521 / SHA-512
    Es512,
    /// RSASSA-PKCS1-v1_5 / SHA-256
    Rs256,
    /// RSASSA-PKCS1-v1_5 / SHA-384
    Rs384,
    /// RSASSA-PKCS1-v1_5 / SHA-512
    Rs512,
    /// RSASSA-PSS / SHA-256
    Ps256,
    /// RSASSA-PSS / SHA-384
    Ps384,
    /// RSASSA-PSS / SHA-512
    Ps512,
    /// RSASSA-PKCS1-v1_5 / SHA-1 (legacy TPM attestation)
    Rs1,
}

impl CoseAlgorithm {
    /// Map a numeric identifier. Unknown identifiers are a hard error.
    pub fn from_id(id: i64) -> Result<Self> {
        match id {
            -7 => Ok(Self::Es256),
            -35 => Ok(Self::Es384),
            -36 => Ok(Self::Es512),
            -257 => Ok(Self::Rs256),
            -258 => Ok(Self::Rs384),
            -259 => Ok(Self::Rs512),
            -37 => Ok(Self::Ps256),
            -38 => Ok(Self::Ps384),
            -39 => Ok(Self::Ps512),
            -65535 => Ok(Self::Rs1),
            other => Err(Fido2Error::trust(format!(
                "unknown signature algorithm identifier {other}"
            ))),
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Es256 => -7,
            Self::Es384 => -35,
            Self::Es512 => -36,
            Self::Rs256 => -257,
            Self::Rs384 => -258,
            Self::Rs512 => -259,
            Self::Ps256 => -37,
            Self::Ps384 => -38,
            Self::Ps512 => -39,
            Self::Rs1 => -65535,
        }
    }

    pub fn digest(&self) -> MessageDigest {
        match self {
            Self::Es256 | Self::Rs256 | Self::Ps256 => MessageDigest::sha256(),
            Self::Es384 | Self::Rs384 | Self::Ps384 => MessageDigest::sha384(),
            Self::Es512 | Self::Rs512 | Self::Ps512 => MessageDigest::sha512(),
            Self::Rs1 => MessageDigest::sha1(),
        }
    }

    /// Curve an ECDSA identifier is bound to, `None` for RSA identifiers
    pub fn curve(&self) -> Option<Nid> {
        match self {
            Self::Es256 => Some(Nid::X9_62_PRIME256V1),
            Self::Es384 => Some(Nid::SECP384R1),
            Self::Es512 => Some(Nid::SECP521R1),
            _ => None,
        }
    }

    fn is_pss(&self) -> bool {
        matches!(self, Self::Ps256 | Self::Ps384 | Self::Ps512)
    }

    /// The key must be of the family and curve the identifier names.
    fn ensure_key_matches(&self, key: &PKeyRef<Public>) -> Result<()> {
        match self.curve() {
            Some(curve) => {
                let key_curve = key
                    .ec_key()
                    .ok()
                    .and_then(|ec| ec.group().curve_name());
                if key_curve != Some(curve) {
                    return Err(Fido2Error::trust(format!(
                        "algorithm {} requires a {:?} key",
                        self.id(),
                        curve
                    )));
                }
            }
            None if key.id() != Id::RSA => {
                return Err(Fido2Error::trust(format!(
                    "algorithm {} requires an RSA key",
                    self.id()
                )));
            }
            None => {}
        }
        Ok(())
    }
}

/// Key material a signature is checked against
pub enum VerificationKey<'a> {
    PublicKey(&'a PKeyRef<Public>),
    Certificate(&'a X509),
}

impl VerificationKey<'_> {
    fn public_key(&self) -> Result<PKey<Public>> {
        match self {
            Self::PublicKey(key) => {
                let der = key.public_key_to_der()?;
                Ok(PKey::public_key_from_der(&der)?)
            }
            Self::Certificate(cert) => Ok(cert.public_key()?),
        }
    }
}

/// Check `signature` over `signed` with the given key and COSE algorithm id.
///
/// Returns `Ok(false)` for a well-formed but non-matching signature and an
/// error when the algorithm is unknown or the key does not fit it.
pub fn verify(signature: &[u8], signed: &[u8], key: VerificationKey<'_>, alg: i64) -> Result<bool> {
    let alg = CoseAlgorithm::from_id(alg)?;
    let public_key = key.public_key()?;
    alg.ensure_key_matches(&public_key)?;

    let mut verifier = Verifier::new(alg.digest(), &public_key)?;
    if alg.is_pss() {
        verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
        verifier.set_rsa_mgf1_md(alg.digest())?;
        verifier.set_rsa_pss_saltlen(RsaPssSaltlen::DIGEST_LENGTH)?;
    }
    verifier.update(signed)?;

    // openssl reports malformed DER signatures as errors rather than false
    Ok(verifier.verify(signature).unwrap_or(false))
}

/// Like [`verify`], but a mismatch is a trust error.
pub fn ensure_valid(
    signature: &[u8],
    signed: &[u8],
    key: VerificationKey<'_>,
    alg: i64,
) -> Result<()> {
    if verify(signature, signed, key, alg)? {
        Ok(())
    } else {
        tracing::debug!(
            signature = %hex::encode(signature),
            signature_base = %hex::encode(signed),
            "Signature mismatch"
        );
        Err(Fido2Error::trust("unable to verify signature"))
    }
}
