//! `none` attestation: accepted without a signature check

use super::{
    AttestationFormat, AttestationFormatProcessor, AttestationStatement, AttestationType,
    CredentialTrustResult, FormatContext,
};
use crate::error::Result;

#[derive(Debug, Default, Clone, Copy)]
pub struct NoneProcessor;

impl AttestationFormatProcessor for NoneProcessor {
    fn format(&self) -> AttestationFormat {
        AttestationFormat::None
    }

    fn needs_trust_anchors(&self, _statement: &AttestationStatement) -> bool {
        false
    }

    fn process(&self, ctx: &FormatContext<'_>) -> Result<CredentialTrustResult> {
        ctx.credential()?;
        Ok(CredentialTrustResult::new(
            AttestationFormat::None,
            AttestationType::None,
        ))
    }
}
