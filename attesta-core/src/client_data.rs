//! clientDataJSON decoding and validation

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Fido2Error, Result};

/// Ceremony type carried in `clientDataJSON.type`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientDataType {
    Create,
    Get,
}

impl ClientDataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "webauthn.create",
            Self::Get => "webauthn.get",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClientData {
    challenge: Option<String>,
    origin: Option<String>,
    #[serde(rename = "type")]
    ceremony_type: Option<String>,
    token_binding: Option<RawTokenBinding>,
}

#[derive(Debug, Deserialize)]
struct RawTokenBinding {
    status: Option<String>,
    id: Option<String>,
}

/// Token binding state reported by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBinding {
    pub status: String,
    pub id: Option<String>,
}

/// Validated client data with its hash
#[derive(Debug, Clone)]
pub struct ClientData {
    pub challenge: String,
    pub origin: String,
    pub ceremony_type: String,
    pub token_binding: Option<TokenBinding>,
    hash: [u8; 32],
}

impl ClientData {
    /// Decode the base64url `clientDataJSON` field and check the required
    /// members are present.
    pub fn decode(encoded: &str) -> Result<Self> {
        let raw = decode_base64url(encoded)
            .map_err(|_| Fido2Error::client_data("clientDataJSON is not valid base64url"))?;
        Self::from_json(&raw)
    }

    /// Parse already-decoded `clientDataJSON` bytes.
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        let parsed: RawClientData = serde_json::from_slice(raw)
            .map_err(|e| Fido2Error::client_data(format!("invalid client data document: {e}")))?;

        let challenge = non_empty(parsed.challenge, "challenge")?;
        let origin = non_empty(parsed.origin, "origin")?;
        let ceremony_type = non_empty(parsed.ceremony_type, "type")?;

        if decode_base64url(&challenge).is_err() {
            return Err(Fido2Error::client_data("challenge is not valid base64url"));
        }

        let token_binding = match parsed.token_binding {
            Some(binding) => {
                let status = binding
                    .status
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| Fido2Error::client_data("tokenBinding.status is missing"))?;
                Some(TokenBinding {
                    status,
                    id: binding.id,
                })
            }
            None => None,
        };

        let hash: [u8; 32] = Sha256::digest(raw).into();

        Ok(Self {
            challenge,
            origin,
            ceremony_type,
            token_binding,
            hash,
        })
    }

    /// SHA-256 over the raw `clientDataJSON` bytes
    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn ensure_type(&self, expected: ClientDataType) -> Result<()> {
        if self.ceremony_type != expected.as_str() {
            return Err(Fido2Error::client_data(format!(
                "expected client data type {}, got {}",
                expected.as_str(),
                self.ceremony_type
            )));
        }
        Ok(())
    }

    /// Check the origin belongs to `domain`.
    ///
    /// The origin is matched by host, so `https://example.com:8443` satisfies
    /// domain `example.com`. Origins that are not URLs must equal the domain.
    pub fn ensure_origin(&self, domain: &str) -> Result<()> {
        let host = Url::parse(&self.origin)
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
            .unwrap_or_else(|| self.origin.clone());

        if host != domain {
            tracing::warn!(origin = %self.origin, domain, "Client data origin mismatch");
            return Err(Fido2Error::domain_mismatch(domain, &self.origin));
        }
        Ok(())
    }

    /// Check the origin against the configured RP origin: scheme, host and
    /// port must all match.
    pub fn ensure_exact_origin(&self, expected_origin: &str) -> Result<()> {
        let presented = Url::parse(&self.origin).map(|url| url.origin());
        let expected = Url::parse(expected_origin).map(|url| url.origin());

        match (presented, expected) {
            (Ok(presented), Ok(expected)) if presented.is_tuple() && presented == expected => Ok(()),
            _ => {
                tracing::warn!(
                    origin = %self.origin,
                    expected = expected_origin,
                    "Client data origin differs from RP origin"
                );
                Err(Fido2Error::domain_mismatch(expected_origin, &self.origin))
            }
        }
    }
}

fn non_empty(value: Option<String>, field: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Fido2Error::client_data(format!("client data field {field} is missing")))
}

/// Decode base64url, tolerating padding.
pub fn decode_base64url(encoded: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('='))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn encode(value: serde_json::Value) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn test_decode_valid_client_data() {
        let encoded = encode(json!({
            "type": "webauthn.create",
            "challenge": "Y2hhbGxlbmdl",
            "origin": "https://login.example.com"
        }));
        let data = ClientData::decode(&encoded).unwrap();
        assert_eq!(data.challenge, "Y2hhbGxlbmdl");
        assert!(data.ensure_type(ClientDataType::Create).is_ok());
        assert!(data.ensure_type(ClientDataType::Get).is_err());
        assert!(data.ensure_origin("login.example.com").is_ok());

        let raw = URL_SAFE_NO_PAD.decode(&encoded).unwrap();
        let expected: [u8; 32] = Sha256::digest(&raw).into();
        assert_eq!(data.hash(), &expected);
    }

    #[test]
    fn test_missing_fields_rejected() {
        for doc in [
            json!({"type": "webauthn.get", "origin": "https://a.test"}),
            json!({"challenge": "abc", "origin": "https://a.test"}),
            json!({"type": "webauthn.get", "challenge": "abc"}),
            json!({"type": "webauthn.get", "challenge": "abc", "origin": ""}),
        ] {
            let err = ClientData::decode(&encode(doc)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ClientData);
        }
    }

    #[test]
    fn test_token_binding_requires_status() {
        let ok = encode(json!({
            "type": "webauthn.get", "challenge": "abc", "origin": "https://a.test",
            "tokenBinding": {"status": "supported"}
        }));
        assert_eq!(
            ClientData::decode(&ok).unwrap().token_binding.unwrap().status,
            "supported"
        );

        let bad = encode(json!({
            "type": "webauthn.get", "challenge": "abc", "origin": "https://a.test",
            "tokenBinding": {"id": "xyz"}
        }));
        assert_eq!(
            ClientData::decode(&bad).unwrap_err().kind(),
            ErrorKind::ClientData
        );
    }

    #[test]
    fn test_origin_mismatch() {
        let encoded = encode(json!({
            "type": "webauthn.get", "challenge": "abc", "origin": "https://evil.test"
        }));
        let err = ClientData::decode(&encoded)
            .unwrap()
            .ensure_origin("a.test")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DomainMismatch);
    }

    #[test]
    fn test_exact_origin_checks_scheme_and_port() {
        let data = |origin: &str| {
            ClientData::decode(&encode(json!({
                "type": "webauthn.create", "challenge": "abc", "origin": origin
            })))
            .unwrap()
        };

        assert!(data("https://example.com").ensure_exact_origin("https://example.com").is_ok());
        assert!(data("https://example.com:443").ensure_exact_origin("https://example.com").is_ok());
        for origin in ["http://example.com", "https://example.com:8443", "example.com"] {
            let err = data(origin).ensure_exact_origin("https://example.com").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::DomainMismatch, "{origin}");
        }
    }

    #[test]
    fn test_garbage_is_client_data_error() {
        assert_eq!(
            ClientData::decode("!!!").unwrap_err().kind(),
            ErrorKind::ClientData
        );
        let not_json = URL_SAFE_NO_PAD.encode(b"not json");
        assert_eq!(
            ClientData::decode(&not_json).unwrap_err().kind(),
            ErrorKind::ClientData
        );
    }
}
