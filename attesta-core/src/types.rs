//! Wire documents exchanged with the client
//!
//! Field names follow the WebAuthn JSON conventions (camelCase).

use serde::{Deserialize, Serialize};

use crate::error::{Fido2Error, Result};

/// Credential type accepted in every ceremony
pub const PUBLIC_KEY_TYPE: &str = "public-key";

/// Requested user verification level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    Required,
    Preferred,
    Discouraged,
}

impl UserVerification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Preferred => "preferred",
            Self::Discouraged => "discouraged",
        }
    }
}

impl std::str::FromStr for UserVerification {
    type Err = Fido2Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "required" => Ok(Self::Required),
            "preferred" => Ok(Self::Preferred),
            "discouraged" => Ok(Self::Discouraged),
            other => Err(Fido2Error::invalid_request(format!(
                "unknown userVerification value {other}"
            ))),
        }
    }
}

/// Attestation conveyance preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationConveyance {
    None,
    Indirect,
    Direct,
    Enterprise,
}

impl std::str::FromStr for AttestationConveyance {
    type Err = Fido2Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "indirect" => Ok(Self::Indirect),
            "direct" => Ok(Self::Direct),
            "enterprise" => Ok(Self::Enterprise),
            other => Err(Fido2Error::invalid_request(format!(
                "unknown attestation preference {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_resident_key: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_verification: Option<String>,
}

/// Credential reference echoed back to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub credential_type: String,
    #[serde(default)]
    pub transports: Vec<String>,
    /// base64url credential id
    #[serde(rename = "id")]
    pub credential_id: String,
}

impl CredentialDescriptor {
    pub fn public_key(credential_id: impl Into<String>, transports: Vec<String>) -> Self {
        Self {
            credential_type: PUBLIC_KEY_TYPE.to_string(),
            transports,
            credential_id: credential_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubKeyCredParam {
    #[serde(rename = "type")]
    pub credential_type: String,
    pub alg: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingParty {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// base64url user handle
    pub id: String,
    pub name: String,
    pub display_name: String,
}

// ==================== Registration ====================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationOptionsRequest {
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub attestation: Option<String>,
    pub authenticator_selection: Option<AuthenticatorSelection>,
    /// Overrides the configured RP id when present
    pub document_domain: Option<String>,
    pub extensions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationOptionsResponse {
    pub attestation: AttestationConveyance,
    pub authenticator_selection: AuthenticatorSelection,
    pub challenge: String,
    pub pub_key_cred_params: Vec<PubKeyCredParam>,
    pub rp: RelyingParty,
    pub user: UserEntity,
    pub exclude_credentials: Vec<CredentialDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttestationResponseData {
    #[serde(rename = "attestationObject")]
    pub attestation_object: Option<String>,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Option<String>,
    #[serde(default)]
    pub transports: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResultRequest {
    pub id: Option<String>,
    pub raw_id: Option<String>,
    #[serde(rename = "type")]
    pub credential_type: Option<String>,
    pub response: Option<AttestationResponseData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResultResponse {
    pub status: String,
    pub error_message: String,
    pub created_credentials: CredentialDescriptor,
}

// ==================== Authentication ====================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionOptionsRequest {
    pub username: Option<String>,
    pub user_verification: Option<String>,
    pub document_domain: Option<String>,
    pub extensions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionOptionsResponse {
    pub user_verification: UserVerification,
    pub challenge: String,
    pub rp_id: String,
    pub allow_credentials: Vec<CredentialDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssertionResponseData {
    #[serde(rename = "authenticatorData")]
    pub authenticator_data: Option<String>,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Option<String>,
    pub signature: Option<String>,
    #[serde(rename = "userHandle")]
    pub user_handle: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResultRequest {
    pub id: Option<String>,
    pub raw_id: Option<String>,
    #[serde(rename = "type")]
    pub credential_type: Option<String>,
    pub response: Option<AssertionResponseData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResultResponse {
    pub status: String,
    pub error_message: String,
    pub authenticated_credentials: CredentialDescriptor,
}
