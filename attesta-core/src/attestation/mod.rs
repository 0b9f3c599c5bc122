//! Attestation statement formats
//!
//! Each format is a [`AttestationFormatProcessor`]. The [`FormatRegistry`]
//! maps the `fmt` string of an attestation object to its handler; a name
//! without a handler is always an [`ErrorKind::UnsupportedFormat`] error.
//!
//! [`ErrorKind::UnsupportedFormat`]: crate::error::ErrorKind::UnsupportedFormat

mod android_key;
mod android_safetynet;
mod apple;
mod fido_u2f;
mod none;
mod packed;
mod tpm;

pub use android_key::AndroidKeyProcessor;
pub use android_safetynet::AndroidSafetyNetProcessor;
pub use apple::AppleProcessor;
pub use fido_u2f::FidoU2fProcessor;
pub use none::NoneProcessor;
pub use packed::{PackedProcessor, SurrogateProcessor};
pub use tpm::TpmProcessor;

use std::collections::HashMap;
use std::sync::Arc;

use ciborium::value::Value;
use openssl::x509::X509;

use crate::authenticator_data::{AttestedCredentialData, AuthenticatorData};
use crate::certificate::{self, CertificateValidator};
use crate::cose::CoseKey;
use crate::error::{Fido2Error, ParseError, Result};
use crate::metadata::TrustAnchors;

/// Id-fido-gen-ce-aaguid certificate extension
pub const OID_FIDO_GEN_CE_AAGUID: &str = "1.3.6.1.4.1.45724.1.1.4";

/// Known attestation statement formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttestationFormat {
    None,
    Packed,
    FidoU2f,
    AndroidSafetyNet,
    AndroidKey,
    Tpm,
    Apple,
    Surrogate,
}

impl AttestationFormat {
    pub const ALL: [AttestationFormat; 8] = [
        Self::None,
        Self::Packed,
        Self::FidoU2f,
        Self::AndroidSafetyNet,
        Self::AndroidKey,
        Self::Tpm,
        Self::Apple,
        Self::Surrogate,
    ];

    /// The `fmt` string
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Packed => "packed",
            Self::FidoU2f => "fido-u2f",
            Self::AndroidSafetyNet => "android-safetynet",
            Self::AndroidKey => "android-key",
            Self::Tpm => "tpm",
            Self::Apple => "apple",
            Self::Surrogate => "surrogate",
        }
    }
}

impl std::str::FromStr for AttestationFormat {
    type Err = Fido2Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|fmt| fmt.name() == s)
            .ok_or_else(|| Fido2Error::unsupported_format(s))
    }
}

impl std::fmt::Display for AttestationFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Attestation type established by a format handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationType {
    None,
    SelfAttestation,
    Basic,
    AttCa,
    AnonCa,
}

impl AttestationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SelfAttestation => "self",
            Self::Basic => "basic",
            Self::AttCa => "attca",
            Self::AnonCa => "anonca",
        }
    }
}

/// Outcome of a successful format verification
#[derive(Debug, Clone)]
pub struct CredentialTrustResult {
    pub format: AttestationFormat,
    pub attestation_type: AttestationType,
    /// DER certificates of the attestation trust path, leaf first
    pub trust_path: Vec<Vec<u8>>,
}

impl CredentialTrustResult {
    pub fn new(format: AttestationFormat, attestation_type: AttestationType) -> Self {
        Self {
            format,
            attestation_type,
            trust_path: Vec::new(),
        }
    }

    pub fn with_trust_path(mut self, chain: &[X509]) -> Result<Self> {
        self.trust_path = chain
            .iter()
            .map(|cert| cert.to_der())
            .collect::<std::result::Result<_, _>>()?;
        Ok(self)
    }
}

/// Decoded attestation object
#[derive(Debug, Clone)]
pub struct AttestationObject {
    pub fmt: String,
    pub auth_data: AuthenticatorData,
    pub statement: AttestationStatement,
}

impl AttestationObject {
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        let value: Value =
            ciborium::from_reader(bytes).map_err(|e| ParseError::Cbor(e.to_string()))?;
        let map = value
            .as_map()
            .ok_or_else(|| ParseError::Cbor("attestation object is not a map".into()))?;

        let field = |name: &str| {
            map.iter()
                .find(|(k, _)| k.as_text() == Some(name))
                .map(|(_, v)| v)
        };

        let fmt = field("fmt")
            .and_then(Value::as_text)
            .ok_or(ParseError::MissingField("fmt"))?
            .to_string();
        let auth_data = field("authData")
            .and_then(Value::as_bytes)
            .ok_or(ParseError::MissingField("authData"))?;
        let statement = field("attStmt").ok_or(ParseError::MissingField("attStmt"))?;

        Ok(Self {
            fmt,
            auth_data: AuthenticatorData::parse(auth_data)?,
            statement: AttestationStatement::new(statement.clone())?,
        })
    }

    /// Encode back to CBOR
    pub fn to_cbor(&self) -> Vec<u8> {
        let map = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text(self.fmt.clone())),
            (
                Value::Text("attStmt".into()),
                self.statement.as_value().clone(),
            ),
            (
                Value::Text("authData".into()),
                Value::Bytes(self.auth_data.as_bytes().to_vec()),
            ),
        ]);
        let mut out = Vec::new();
        // Writing into a Vec cannot fail
        let _ = ciborium::into_writer(&map, &mut out);
        out
    }
}

/// The `attStmt` map with typed accessors
#[derive(Debug, Clone)]
pub struct AttestationStatement(Value);

impl AttestationStatement {
    pub fn new(value: Value) -> Result<Self> {
        if value.as_map().is_none() {
            return Err(ParseError::Cbor("attStmt is not a map".into()).into());
        }
        Ok(Self(value))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.as_map().and_then(|map| {
            map.iter()
                .find(|(k, _)| k.as_text() == Some(name))
                .map(|(_, v)| v)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.as_map().map_or(true, |m| m.is_empty())
    }

    pub fn alg(&self) -> Result<i64> {
        self.get("alg")
            .and_then(Value::as_integer)
            .and_then(|i| i64::try_from(i).ok())
            .ok_or_else(|| Fido2Error::trust("attestation statement alg missing or invalid"))
    }

    pub fn bytes(&self, name: &str) -> Result<&[u8]> {
        self.get(name)
            .and_then(Value::as_bytes)
            .map(Vec::as_slice)
            .ok_or_else(|| Fido2Error::trust(format!("attestation statement {name} missing")))
    }

    pub fn text(&self, name: &str) -> Result<&str> {
        self.get(name)
            .and_then(Value::as_text)
            .ok_or_else(|| Fido2Error::trust(format!("attestation statement {name} missing")))
    }

    pub fn sig(&self) -> Result<&[u8]> {
        self.bytes("sig")
    }

    /// `x5c` chain, `None` when the statement has no chain.
    pub fn x5c(&self) -> Result<Option<Vec<X509>>> {
        let Some(value) = self.get("x5c") else {
            return Ok(None);
        };
        let ders = value
            .as_array()
            .ok_or_else(|| Fido2Error::trust("x5c is not an array"))?
            .iter()
            .map(|v| {
                v.as_bytes()
                    .cloned()
                    .ok_or_else(|| Fido2Error::trust("x5c element is not a byte string"))
            })
            .collect::<Result<Vec<_>>>()?;
        if ders.is_empty() {
            return Err(Fido2Error::trust("x5c is empty"));
        }
        Ok(Some(certificate::parse_der_chain(&ders)?))
    }

    /// `x5c` chain that the format requires.
    pub fn require_x5c(&self) -> Result<Vec<X509>> {
        self.x5c()?
            .ok_or_else(|| Fido2Error::trust("attestation statement x5c missing"))
    }
}

/// Everything a format handler needs for one registration
pub struct FormatContext<'a> {
    pub statement: &'a AttestationStatement,
    pub auth_data: &'a AuthenticatorData,
    pub client_data_hash: &'a [u8; 32],
    pub anchors: &'a TrustAnchors,
    pub validator: &'a dyn CertificateValidator,
    /// Fail instead of warning when no anchors are available
    pub require_trust_anchors: bool,
}

impl FormatContext<'_> {
    pub fn credential(&self) -> Result<&AttestedCredentialData> {
        Ok(self.auth_data.require_credential()?)
    }

    pub fn credential_key(&self) -> Result<CoseKey> {
        Ok(self.credential()?.public_key()?)
    }

    /// `authenticatorData || clientDataHash`
    pub fn signature_base(&self) -> Vec<u8> {
        let mut base = self.auth_data.as_bytes().to_vec();
        base.extend_from_slice(self.client_data_hash);
        base
    }

    /// Validate `chain` against the resolved anchors.
    pub fn validate_chain(&self, chain: &[X509]) -> Result<()> {
        if self.anchors.is_empty() {
            if self.require_trust_anchors {
                return Err(Fido2Error::trust(
                    "no trust anchors available for attestation certificate",
                ));
            }
            tracing::warn!(
                aaguid = %self.credential().map(|c| c.aaguid_hex()).unwrap_or_default(),
                "No trust anchors available, attestation chain not validated"
            );
            return Ok(());
        }
        self.validator.verify(chain, self.anchors.certificates())?;
        Ok(())
    }

    /// If the certificate carries an AAGUID extension it must match
    /// authenticator data.
    pub fn verify_aaguid_extension(&self, cert: &X509) -> Result<()> {
        let Some(value) = certificate::extension_value(cert, OID_FIDO_GEN_CE_AAGUID)? else {
            return Ok(());
        };
        let (_, octets) = x509_parser::der_parser::der::parse_der_octetstring(&value)
            .map_err(|_| Fido2Error::trust("invalid aaguid certificate extension"))?;
        let aaguid = octets
            .as_slice()
            .map_err(|_| Fido2Error::trust("invalid aaguid certificate extension"))?;
        if aaguid != self.credential()?.aaguid {
            return Err(Fido2Error::trust(
                "certificate aaguid extension does not match authenticator data",
            ));
        }
        Ok(())
    }
}

/// Format-specific trust evaluation
pub trait AttestationFormatProcessor: Send + Sync {
    fn format(&self) -> AttestationFormat;

    /// Whether the statement needs certificate trust anchors resolved
    /// before [`process`](Self::process) runs.
    fn needs_trust_anchors(&self, statement: &AttestationStatement) -> bool {
        let _ = statement;
        true
    }

    fn process(&self, ctx: &FormatContext<'_>) -> Result<CredentialTrustResult>;
}

/// Name to handler lookup
#[derive(Clone)]
pub struct FormatRegistry {
    handlers: HashMap<&'static str, Arc<dyn AttestationFormatProcessor>>,
}

impl FormatRegistry {
    /// Empty registry
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with every built-in format
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(NoneProcessor));
        registry.register(Arc::new(PackedProcessor));
        registry.register(Arc::new(SurrogateProcessor));
        registry.register(Arc::new(FidoU2fProcessor));
        registry.register(Arc::new(AndroidKeyProcessor));
        registry.register(Arc::new(AndroidSafetyNetProcessor));
        registry.register(Arc::new(TpmProcessor));
        registry.register(Arc::new(AppleProcessor));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn AttestationFormatProcessor>) {
        self.handlers.insert(handler.format().name(), handler);
    }

    pub fn resolve(&self, fmt: &str) -> Result<Arc<dyn AttestationFormatProcessor>> {
        self.handlers
            .get(fmt)
            .cloned()
            .ok_or_else(|| Fido2Error::unsupported_format(fmt))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("FormatRegistry")
            .field("formats", &names)
            .finish()
    }
}
