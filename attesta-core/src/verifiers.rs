//! Stateless field, flag and counter checks shared by both ceremonies

use openssl::pkey::{PKeyRef, Public};
use sha2::{Digest, Sha256};

use crate::authenticator_data::{AttestedCredentialData, AuthenticatorData, AuthenticatorFlags};
use crate::client_data::decode_base64url;
use crate::cose::CoseKey;
use crate::error::{Fido2Error, Result};
use crate::types::{
    AssertionOptionsRequest, AssertionResultRequest, AttestationConveyance,
    AttestationOptionsRequest, AttestationResultRequest, UserVerification, PUBLIC_KEY_TYPE,
};

/// Counter must strictly increase, except for authenticators that never
/// count (both values zero).
pub fn verify_counter(old_counter: u32, new_counter: u32) -> Result<()> {
    tracing::debug!(old_counter, new_counter, "Verifying signature counter");
    if old_counter == 0 && new_counter == 0 {
        return Ok(());
    }
    if new_counter <= old_counter {
        return Err(Fido2Error::replay(old_counter, new_counter));
    }
    Ok(())
}

/// Enforce the requested user verification level.
///
/// Only `required` is enforced. `preferred` and `discouraged` are accepted
/// whatever the UV flag says.
pub fn verify_user_verification_option(
    option: UserVerification,
    flags: AuthenticatorFlags,
) -> Result<()> {
    match option {
        UserVerification::Required if !flags.user_verified() => Err(Fido2Error::trust(
            "user verification required but UV flag is not set",
        )),
        _ => Ok(()),
    }
}

/// Either UP or UV must be asserted.
pub fn verify_user_present(flags: AuthenticatorFlags) -> Result<()> {
    if flags.user_present() || flags.user_verified() {
        Ok(())
    } else {
        Err(Fido2Error::trust("neither user presence nor user verification flag is set"))
    }
}

/// rpIdHash must equal SHA-256 of the effective domain.
pub fn verify_rp_id_hash(auth_data: &AuthenticatorData, domain: &str) -> Result<()> {
    let expected: [u8; 32] = Sha256::digest(domain.as_bytes()).into();
    if auth_data.rp_id_hash != expected {
        tracing::warn!(
            domain,
            expected = %hex::encode(expected),
            actual = %hex::encode(auth_data.rp_id_hash),
            "rpIdHash does not match domain"
        );
        return Err(Fido2Error::domain_mismatch(
            domain,
            &format!("rpIdHash {}", hex::encode(auth_data.rp_id_hash)),
        ));
    }
    Ok(())
}

/// Formats that carry no model identifier must report an all-zero AAGUID.
pub fn verify_aaguid_zeroed(credential: &AttestedCredentialData) -> Result<()> {
    if credential.aaguid.iter().any(|b| *b != 0) {
        return Err(Fido2Error::trust(format!(
            "aaguid {} must be zero for this format",
            credential.aaguid_hex()
        )));
    }
    Ok(())
}

/// Statement `alg` must match the credential key's declared algorithm.
pub fn verify_algorithm_consistency(statement_alg: i64, credential_key: &CoseKey) -> Result<()> {
    match credential_key.alg {
        Some(key_alg) if key_alg != statement_alg => Err(Fido2Error::trust(format!(
            "statement alg {statement_alg} differs from credential alg {key_alg}"
        ))),
        _ => Ok(()),
    }
}

/// Certificate public key must be the credential public key.
pub fn verify_key_matches_credential(
    certificate_key: &PKeyRef<Public>,
    credential_key: &CoseKey,
) -> Result<()> {
    let credential = credential_key.to_public_key()?;
    if !certificate_key.public_eq(&credential) {
        return Err(Fido2Error::trust(
            "certificate public key does not match credential public key",
        ));
    }
    Ok(())
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Fido2Error::invalid_request(format!("{field} is required"))),
    }
}

fn required_base64url(value: Option<&str>, field: &str) -> Result<Vec<u8>> {
    let value = required(value, field)?;
    decode_base64url(value)
        .map_err(|_| Fido2Error::invalid_request(format!("{field} is not valid base64url")))
}

/// Registration options need username, displayName and a known attestation
/// preference.
pub fn verify_attestation_options(
    request: &AttestationOptionsRequest,
) -> Result<AttestationConveyance> {
    required(request.username.as_deref(), "username")?;
    required(request.display_name.as_deref(), "displayName")?;
    let attestation = required(request.attestation.as_deref(), "attestation")?.parse()?;

    if let Some(uv) = request
        .authenticator_selection
        .as_ref()
        .and_then(|s| s.user_verification.as_deref())
    {
        uv.parse::<UserVerification>()?;
    }
    Ok(attestation)
}

/// Assertion options need a username; userVerification defaults to preferred.
pub fn verify_assertion_options(request: &AssertionOptionsRequest) -> Result<UserVerification> {
    required(request.username.as_deref(), "username")?;
    match request.user_verification.as_deref() {
        Some(uv) => uv.parse(),
        None => Ok(UserVerification::Preferred),
    }
}

fn verify_credential_type(credential_type: Option<&str>) -> Result<()> {
    let credential_type = required(credential_type, "type")?;
    if credential_type != PUBLIC_KEY_TYPE {
        return Err(Fido2Error::invalid_request(format!(
            "unsupported credential type {credential_type}"
        )));
    }
    Ok(())
}

/// Decoded buffers of a registration result payload
#[derive(Debug)]
pub struct AttestationPayload {
    pub attestation_object: Vec<u8>,
    pub client_data_json: String,
    pub transports: Vec<String>,
}

pub fn verify_attestation_payload(request: &AttestationResultRequest) -> Result<AttestationPayload> {
    required(request.id.as_deref(), "id")?;
    verify_credential_type(request.credential_type.as_deref())?;
    let response = request
        .response
        .as_ref()
        .ok_or_else(|| Fido2Error::invalid_request("response is required"))?;

    let attestation_object =
        required_base64url(response.attestation_object.as_deref(), "attestationObject")?;
    let client_data_json = required(response.client_data_json.as_deref(), "clientDataJSON")?;

    Ok(AttestationPayload {
        attestation_object,
        client_data_json: client_data_json.to_string(),
        transports: response.transports.clone(),
    })
}

/// Decoded buffers of an authentication result payload
#[derive(Debug)]
pub struct AssertionPayload {
    pub credential_id: String,
    pub authenticator_data: Vec<u8>,
    pub client_data_json: String,
    pub signature: Vec<u8>,
}

pub fn verify_assertion_payload(request: &AssertionResultRequest) -> Result<AssertionPayload> {
    let credential_id = required(request.id.as_deref(), "id")?;
    verify_credential_type(request.credential_type.as_deref())?;
    let response = request
        .response
        .as_ref()
        .ok_or_else(|| Fido2Error::invalid_request("response is required"))?;

    let authenticator_data =
        required_base64url(response.authenticator_data.as_deref(), "authenticatorData")?;
    let client_data_json = required(response.client_data_json.as_deref(), "clientDataJSON")?;
    let signature = required_base64url(response.signature.as_deref(), "signature")?;

    Ok(AssertionPayload {
        credential_id: credential_id.to_string(),
        authenticator_data,
        client_data_json: client_data_json.to_string(),
        signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator_data::{FLAG_USER_PRESENT, FLAG_USER_VERIFIED};
    use crate::error::ErrorKind;
    use crate::types::{AssertionResponseData, AuthenticatorSelection};

    #[test]
    fn test_verify_counter() {
        assert!(verify_counter(0, 0).is_ok());
        assert!(verify_counter(0, 1).is_ok());
        assert!(verify_counter(41, 42).is_ok());

        for (old, new) in [(5, 5), (5, 4), (1, 0)] {
            let err = verify_counter(old, new).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Replay);
        }
    }

    #[test]
    fn test_user_verification_only_required_is_enforced() {
        let present = AuthenticatorFlags(FLAG_USER_PRESENT);
        let verified = AuthenticatorFlags(FLAG_USER_PRESENT | FLAG_USER_VERIFIED);

        assert!(verify_user_verification_option(UserVerification::Required, present).is_err());
        assert!(verify_user_verification_option(UserVerification::Required, verified).is_ok());
        assert!(verify_user_verification_option(UserVerification::Preferred, present).is_ok());
        assert!(verify_user_verification_option(UserVerification::Discouraged, verified).is_ok());
    }

    #[test]
    fn test_user_present() {
        assert!(verify_user_present(AuthenticatorFlags(FLAG_USER_PRESENT)).is_ok());
        assert!(verify_user_present(AuthenticatorFlags(FLAG_USER_VERIFIED)).is_ok());
        assert!(verify_user_present(AuthenticatorFlags(0)).is_err());
    }

    #[test]
    fn test_rp_id_hash() {
        let hash: [u8; 32] = Sha256::digest(b"example.com").into();
        let data = AuthenticatorData::new(hash, FLAG_USER_PRESENT, 1, None, None);
        assert!(verify_rp_id_hash(&data, "example.com").is_ok());
        assert_eq!(
            verify_rp_id_hash(&data, "example.org").unwrap_err().kind(),
            ErrorKind::DomainMismatch
        );
    }

    #[test]
    fn test_aaguid_zeroed() {
        let mut credential = AttestedCredentialData {
            aaguid: [0; 16],
            credential_id: vec![1],
            cose_public_key: vec![],
        };
        assert!(verify_aaguid_zeroed(&credential).is_ok());
        credential.aaguid[15] = 1;
        assert!(verify_aaguid_zeroed(&credential).is_err());
    }

    #[test]
    fn test_attestation_options_validation() {
        let mut request = AttestationOptionsRequest {
            username: Some("alice".into()),
            display_name: Some("Alice".into()),
            attestation: Some("direct".into()),
            ..Default::default()
        };
        assert_eq!(
            verify_attestation_options(&request).unwrap(),
            AttestationConveyance::Direct
        );

        request.authenticator_selection = Some(AuthenticatorSelection {
            user_verification: Some("always".into()),
            ..Default::default()
        });
        assert!(verify_attestation_options(&request).is_err());

        request.authenticator_selection = None;
        request.display_name = None;
        assert_eq!(
            verify_attestation_options(&request).unwrap_err().kind(),
            ErrorKind::InvalidRequest
        );
    }

    #[test]
    fn test_assertion_options_validation() {
        let request = AssertionOptionsRequest {
            username: Some("alice".into()),
            ..Default::default()
        };
        assert_eq!(
            verify_assertion_options(&request).unwrap(),
            UserVerification::Preferred
        );
        assert!(verify_assertion_options(&AssertionOptionsRequest::default()).is_err());
    }

    #[test]
    fn test_assertion_payload_validation() {
        let mut request = AssertionResultRequest {
            id: Some("Y3JlZA".into()),
            raw_id: Some("Y3JlZA".into()),
            credential_type: Some("public-key".into()),
            response: Some(AssertionResponseData {
                authenticator_data: Some("AAAA".into()),
                client_data_json: Some("e30".into()),
                signature: Some("c2ln".into()),
                user_handle: None,
            }),
        };
        let payload = verify_assertion_payload(&request).unwrap();
        assert_eq!(payload.signature, b"sig");

        request.credential_type = Some("password".into());
        assert!(verify_assertion_payload(&request).is_err());

        request.credential_type = Some("public-key".into());
        request.response = None;
        assert!(verify_assertion_payload(&request).is_err());
    }
}
