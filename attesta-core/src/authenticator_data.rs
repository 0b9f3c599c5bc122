//! Authenticator data decoding
//!
//! Layout, consumed strictly left to right:
//!
//! | field               | size                      |
//! |---------------------|---------------------------|
//! | rpIdHash            | 32                        |
//! | flags               | 1                         |
//! | signCount (BE)      | 4                         |
//! | aaguid              | 16 (AT flag only)         |
//! | credentialId length | 2, BE (AT flag only)      |
//! | credentialId        | L (AT flag only)          |
//! | credentialPublicKey | one CBOR item (AT only)   |
//! | extensions          | one CBOR item (ED only)   |
//!
//! Anything left after the structures implied by the flags is rejected.

use ciborium::value::Value;

use crate::cose::CoseKey;
use crate::error::ParseError;

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;
pub const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
pub const FLAG_EXTENSION_DATA: u8 = 0x80;

pub const RP_ID_HASH_LEN: usize = 32;
pub const AAGUID_LEN: usize = 16;

/// Authenticator data flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatorFlags(pub u8);

impl AuthenticatorFlags {
    pub fn user_present(&self) -> bool {
        self.0 & FLAG_USER_PRESENT != 0
    }

    pub fn user_verified(&self) -> bool {
        self.0 & FLAG_USER_VERIFIED != 0
    }

    pub fn attested_credential_data(&self) -> bool {
        self.0 & FLAG_ATTESTED_CREDENTIAL_DATA != 0
    }

    pub fn extension_data(&self) -> bool {
        self.0 & FLAG_EXTENSION_DATA != 0
    }
}

/// Credential material present when the AT flag is set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; AAGUID_LEN],
    pub credential_id: Vec<u8>,
    /// CBOR-encoded COSE_Key, exactly as it appeared in the buffer
    pub cose_public_key: Vec<u8>,
}

impl AttestedCredentialData {
    /// Decode the credential public key.
    pub fn public_key(&self) -> Result<CoseKey, ParseError> {
        CoseKey::from_cbor(&self.cose_public_key)
    }

    /// AAGUID rendered without dashes, the metadata lookup key.
    pub fn aaguid_hex(&self) -> String {
        hex::encode(self.aaguid)
    }
}

/// Decoded authenticator data, keeping the raw buffer for signature bases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub flags: AuthenticatorFlags,
    pub counter: u32,
    pub attested_credential_data: Option<AttestedCredentialData>,
    /// CBOR-encoded extension map
    pub extensions: Option<Vec<u8>>,
    raw: Vec<u8>,
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], ParseError> {
        if self.buf.len() < len {
            return Err(ParseError::Truncated {
                field,
                needed: len,
                available: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// Consume exactly one CBOR item and return its encoded bytes.
    fn take_cbor_item(&mut self, field: &'static str) -> Result<&'a [u8], ParseError> {
        if self.buf.is_empty() {
            return Err(ParseError::Truncated {
                field,
                needed: 1,
                available: 0,
            });
        }
        let mut cursor: &[u8] = self.buf;
        let _: Value = ciborium::from_reader(&mut cursor).map_err(|e| match e {
            ciborium::de::Error::Io(_) => ParseError::Truncated {
                field,
                needed: self.buf.len() + 1,
                available: self.buf.len(),
            },
            other => ParseError::Cbor(format!("{field}: {other}")),
        })?;
        let consumed = self.buf.len() - cursor.len();
        self.take(consumed, field)
    }
}

impl AuthenticatorData {
    /// Parse an authenticator data buffer.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut reader = Reader { buf: bytes };

        let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
        rp_id_hash.copy_from_slice(reader.take(RP_ID_HASH_LEN, "rpIdHash")?);

        let flags = AuthenticatorFlags(reader.take(1, "flags")?[0]);

        let mut counter_bytes = [0u8; 4];
        counter_bytes.copy_from_slice(reader.take(4, "signCount")?);
        let counter = u32::from_be_bytes(counter_bytes);

        let attested_credential_data = if flags.attested_credential_data() {
            let mut aaguid = [0u8; AAGUID_LEN];
            aaguid.copy_from_slice(reader.take(AAGUID_LEN, "aaguid")?);

            let len_bytes = reader.take(2, "credentialIdLength")?;
            let len = u16::from_be_bytes([len_bytes[0], len_bytes[1]]) as usize;
            let credential_id = reader.take(len, "credentialId")?.to_vec();
            let cose_public_key = reader.take_cbor_item("credentialPublicKey")?.to_vec();

            Some(AttestedCredentialData {
                aaguid,
                credential_id,
                cose_public_key,
            })
        } else {
            None
        };

        let extensions = if flags.extension_data() {
            Some(reader.take_cbor_item("extensions")?.to_vec())
        } else {
            None
        };

        if !reader.buf.is_empty() {
            return Err(ParseError::Leftover(reader.buf.len()));
        }

        Ok(Self {
            rp_id_hash,
            flags,
            counter,
            attested_credential_data,
            extensions,
            raw: bytes.to_vec(),
        })
    }

    /// Assemble authenticator data from its fields. The AT and ED flag bits
    /// are derived from the presence of the optional parts.
    pub fn new(
        rp_id_hash: [u8; RP_ID_HASH_LEN],
        flags: u8,
        counter: u32,
        attested_credential_data: Option<AttestedCredentialData>,
        extensions: Option<Vec<u8>>,
    ) -> Self {
        let mut flags = flags & !(FLAG_ATTESTED_CREDENTIAL_DATA | FLAG_EXTENSION_DATA);
        if attested_credential_data.is_some() {
            flags |= FLAG_ATTESTED_CREDENTIAL_DATA;
        }
        if extensions.is_some() {
            flags |= FLAG_EXTENSION_DATA;
        }

        let mut raw = Vec::with_capacity(37);
        raw.extend_from_slice(&rp_id_hash);
        raw.push(flags);
        raw.extend_from_slice(&counter.to_be_bytes());
        if let Some(acd) = &attested_credential_data {
            raw.extend_from_slice(&acd.aaguid);
            raw.extend_from_slice(&(acd.credential_id.len() as u16).to_be_bytes());
            raw.extend_from_slice(&acd.credential_id);
            raw.extend_from_slice(&acd.cose_public_key);
        }
        if let Some(ext) = &extensions {
            raw.extend_from_slice(ext);
        }

        Self {
            rp_id_hash,
            flags: AuthenticatorFlags(flags),
            counter,
            attested_credential_data,
            extensions,
            raw,
        }
    }

    /// The exact bytes this value was parsed from (or encoded to).
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Attested credential data, required during registration.
    pub fn require_credential(&self) -> Result<&AttestedCredentialData, ParseError> {
        self.attested_credential_data
            .as_ref()
            .ok_or(ParseError::MissingField("attestedCredentialData"))
    }
}
