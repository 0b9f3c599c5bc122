//! Ceremony challenge generation

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

use crate::error::{Fido2Error, Result};

/// Number of random bytes drawn per challenge (256 bits)
pub const CHALLENGE_BYTES: usize = 32;

/// Generate a fresh challenge, base64url-encoded without padding.
pub fn generate_challenge() -> Result<String> {
    let mut bytes = [0u8; CHALLENGE_BYTES];
    getrandom::fill(&mut bytes).map_err(|e| Fido2Error::randomness(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
