//! Metadata documents: TOC payloads, TOC entries and metadata statements

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{NaiveDate, Utc};
use openssl::x509::X509;
use serde::{Deserialize, Serialize};

/// Authenticator status values that fail attestation closed
pub const DISALLOWED_STATUSES: &[&str] = &[
    "USER_VERIFICATION_BYPASS",
    "ATTESTATION_KEY_COMPROMISE",
    "USER_KEY_REMOTE_COMPROMISE",
    "USER_KEY_PHYSICAL_COMPROMISE",
];

/// Normalized lookup key: lowercase hex without dashes
pub fn normalize_aaguid(aaguid: &str) -> String {
    aaguid.replace('-', "").to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

impl StatusReport {
    pub fn is_disallowed(&self) -> bool {
        DISALLOWED_STATUSES.contains(&self.status.as_str())
    }
}

/// One authenticator model in a TOC
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocEntry {
    #[serde(default)]
    pub aaguid: Option<String>,
    /// Location of the metadata statement for remote fetch
    #[serde(default)]
    pub url: Option<String>,
    /// base64url SHA-256 of the document served at `url`
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub status_reports: Vec<StatusReport>,
    #[serde(default)]
    pub time_of_last_status_change: Option<String>,
    /// Inline statement, when the TOC embeds it
    #[serde(default)]
    pub metadata_statement: Option<MetadataStatement>,
}

impl TocEntry {
    /// `timeOfLastStatusChange`, today when absent or unparsable
    pub fn last_status_change(&self) -> NaiveDate {
        self.time_of_last_status_change
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    pub fn disallowed_status(&self) -> Option<&StatusReport> {
        self.status_reports.iter().find(|r| r.is_disallowed())
    }
}

/// Signed TOC payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocPayload {
    #[serde(default)]
    pub no: Option<i64>,
    #[serde(default)]
    pub next_update: Option<String>,
    #[serde(default)]
    pub legal_header: Option<String>,
    #[serde(default)]
    pub entries: Vec<TocEntry>,
}

/// Metadata statement for one authenticator model
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataStatement {
    #[serde(default)]
    pub aaguid: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// base64 DER certificates
    #[serde(default)]
    pub attestation_root_certificates: Vec<String>,
    #[serde(default)]
    pub attestation_certificate_key_identifiers: Vec<String>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

impl MetadataStatement {
    /// Decoded root certificates; undecodable entries are skipped.
    pub fn root_certificates(&self) -> Vec<X509> {
        self.attestation_root_certificates
            .iter()
            .filter_map(|b64| {
                let der = STANDARD.decode(b64.trim()).ok()?;
                match X509::from_der(&der) {
                    Ok(cert) => Some(cert),
                    Err(e) => {
                        tracing::warn!(
                            aaguid = ?self.aaguid,
                            error = %e,
                            "Skipping invalid attestation root certificate"
                        );
                        None
                    }
                }
            })
            .collect()
    }
}
