//! Relying party and trust store configuration
//!
//! Loaded from environment variables with defaults suitable for local
//! development.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::UserVerification;

/// COSE algorithms offered in `pubKeyCredParams` by default. Credential
/// keys are EC2, so only the ECDSA identifiers can be registered.
pub const DEFAULT_ALGORITHMS: &[i64] = &[-7, -35, -36];

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Fido2Config {
    /// Relying party id, the effective domain (default: localhost)
    pub rp_id: String,
    /// Relying party display name (default: Attesta)
    pub rp_name: String,
    /// Relying party origin (default: http://localhost:3000)
    pub rp_origin: String,
    /// Lifetime of a pending ceremony (default: 300s)
    pub challenge_ttl: Duration,
    /// userVerification used when a request does not specify one
    pub user_verification: UserVerification,
    /// One metadata statement per file, keyed by `aaguid`
    pub metadata_folder: Option<PathBuf>,
    /// One signed TOC per file
    pub toc_folder: Option<PathBuf>,
    /// PEM roots the TOC signers must chain to
    pub toc_root_certs_folder: Option<PathBuf>,
    /// PEM last-resort attestation trust anchors
    pub authenticator_certs_folder: Option<PathBuf>,
    /// Remote metadata service, enables fetch on cache miss together with
    /// `mds_access_token`
    pub mds_endpoint: Option<String>,
    pub mds_access_token: Option<String>,
    /// Remote metadata fetch timeout (default: 10s)
    pub mds_timeout: Duration,
    /// Fall back to the authenticator-certs folder when metadata cannot be
    /// fetched (default: true)
    pub metadata_fallback: bool,
    /// Reject attestations whose chain cannot be checked for lack of anchors
    /// (default: false)
    pub require_trust_anchors: bool,
    pub enabled_algorithms: Vec<i64>,
}

impl Default for Fido2Config {
    fn default() -> Self {
        Self {
            rp_id: "localhost".to_string(),
            rp_name: "Attesta".to_string(),
            rp_origin: "http://localhost:3000".to_string(),
            challenge_ttl: Duration::from_secs(300),
            user_verification: UserVerification::Preferred,
            metadata_folder: None,
            toc_folder: None,
            toc_root_certs_folder: None,
            authenticator_certs_folder: None,
            mds_endpoint: None,
            mds_access_token: None,
            mds_timeout: Duration::from_secs(10),
            metadata_fallback: true,
            require_trust_anchors: false,
            enabled_algorithms: DEFAULT_ALGORITHMS.to_vec(),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_path(name: &str) -> Option<PathBuf> {
    env_string(name).map(PathBuf::from)
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| match v.to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        })
        .unwrap_or(default)
}

impl Fido2Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let challenge_ttl = std::env::var("FIDO2_CHALLENGE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.challenge_ttl);

        let user_verification = match env_string("FIDO2_USER_VERIFICATION") {
            Some(value) => value.parse().unwrap_or_else(|_| {
                tracing::warn!(value, "Unknown FIDO2_USER_VERIFICATION, using preferred");
                UserVerification::Preferred
            }),
            None => defaults.user_verification,
        };

        let mds_timeout = std::env::var("FIDO2_MDS_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.mds_timeout);

        let enabled_algorithms = env_string("FIDO2_ENABLED_ALGORITHMS")
            .map(|list| {
                list.split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .filter(|alg: &i64| {
                        let supported = DEFAULT_ALGORITHMS.contains(alg);
                        if !supported {
                            tracing::warn!(
                                alg = *alg,
                                "FIDO2_ENABLED_ALGORITHMS entry has no EC2 credential support, dropped"
                            );
                        }
                        supported
                    })
                    .collect::<Vec<i64>>()
            })
            .filter(|algs| !algs.is_empty())
            .unwrap_or(defaults.enabled_algorithms);

        Self {
            rp_id: env_string("FIDO2_RP_ID").unwrap_or(defaults.rp_id),
            rp_name: env_string("FIDO2_RP_NAME").unwrap_or(defaults.rp_name),
            rp_origin: env_string("FIDO2_RP_ORIGIN").unwrap_or(defaults.rp_origin),
            challenge_ttl,
            user_verification,
            metadata_folder: env_path("FIDO2_METADATA_FOLDER"),
            toc_folder: env_path("FIDO2_TOC_FOLDER"),
            toc_root_certs_folder: env_path("FIDO2_TOC_ROOT_CERTS_FOLDER"),
            authenticator_certs_folder: env_path("FIDO2_AUTHENTICATOR_CERTS_FOLDER"),
            mds_endpoint: env_string("FIDO2_MDS_ENDPOINT"),
            mds_access_token: env_string("FIDO2_MDS_ACCESS_TOKEN"),
            mds_timeout,
            metadata_fallback: env_bool("FIDO2_METADATA_FALLBACK", defaults.metadata_fallback),
            require_trust_anchors: env_bool(
                "FIDO2_REQUIRE_TRUST_ANCHORS",
                defaults.require_trust_anchors,
            ),
            enabled_algorithms,
        }
    }

    /// Whether remote metadata fetch is configured
    pub fn remote_metadata_enabled(&self) -> bool {
        self.mds_endpoint.is_some() && self.mds_access_token.is_some()
    }
}
