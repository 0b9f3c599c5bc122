//! Metadata trust store
//!
//! Holds what is known about authenticator models, keyed by AAGUID:
//!
//! - metadata statements loaded from a local folder or fetched on demand,
//! - TOC entries ingested from signed TOC files,
//! - a last-resort set of PEM trust anchors.
//!
//! Caches are append-mostly and shared across requests. Inserts go through
//! `entry(..).or_insert(..)` so readers never see a partially written value.

mod fetch;
mod toc;
mod types;

pub use fetch::{fetch_statement, MetadataFetcher};
#[cfg(feature = "network")]
pub use fetch::HttpMetadataFetcher;
pub use toc::verify_toc;
pub use types::{
    normalize_aaguid, MetadataStatement, StatusReport, TocEntry, TocPayload, DISALLOWED_STATUSES,
};

#[cfg(test)]
pub(crate) use fetch::test_support as fetch_test_support;
#[cfg(test)]
pub(crate) use toc::test_support as toc_test_support;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use openssl::x509::X509;

use crate::certificate::{self, CertificateValidator, OpensslCertificateValidator};
use crate::config::Fido2Config;
use crate::error::{Fido2Error, Result};

/// Where a set of trust anchors came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorSource {
    /// Root certificates of the model's metadata statement
    Metadata,
    /// Static authenticator-certs folder
    Fallback,
    /// Nothing available
    None,
}

/// Certificates an attestation chain must terminate in
#[derive(Clone)]
pub struct TrustAnchors {
    certificates: Vec<X509>,
    source: AnchorSource,
}

impl TrustAnchors {
    pub fn new(certificates: Vec<X509>, source: AnchorSource) -> Self {
        if certificates.is_empty() {
            return Self::none();
        }
        Self {
            certificates,
            source,
        }
    }

    pub fn none() -> Self {
        Self {
            certificates: Vec::new(),
            source: AnchorSource::None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    pub fn certificates(&self) -> &[X509] {
        &self.certificates
    }

    pub fn source(&self) -> AnchorSource {
        self.source
    }
}

impl std::fmt::Debug for TrustAnchors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustAnchors")
            .field("certificates", &self.certificates.len())
            .field("source", &self.source)
            .finish()
    }
}

/// Counts for operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrustStoreStats {
    pub metadata_statements: usize,
    pub toc_entries: usize,
    pub toc_sources: usize,
    pub fallback_anchors: usize,
}

/// Process-wide authenticator trust information
pub struct TrustStore {
    metadata: DashMap<String, Arc<MetadataStatement>>,
    toc_entries: DashMap<String, Arc<TocEntry>>,
    /// `nextUpdate` per accepted TOC source
    next_updates: DashMap<String, String>,
    toc_roots: Vec<X509>,
    fallback_anchors: Vec<X509>,
    validator: Arc<dyn CertificateValidator>,
    fetcher: Option<Arc<dyn MetadataFetcher>>,
    fetch_timeout: Duration,
    fallback_enabled: bool,
}

impl TrustStore {
    /// Empty store validating with openssl
    pub fn new() -> Self {
        Self::with_validator(Arc::new(OpensslCertificateValidator))
    }

    pub fn with_validator(validator: Arc<dyn CertificateValidator>) -> Self {
        Self {
            metadata: DashMap::new(),
            toc_entries: DashMap::new(),
            next_updates: DashMap::new(),
            toc_roots: Vec::new(),
            fallback_anchors: Vec::new(),
            validator,
            fetcher: None,
            fetch_timeout: Duration::from_secs(10),
            fallback_enabled: true,
        }
    }

    /// Build the store from the configured folders and metadata service.
    pub fn from_config(config: &Fido2Config) -> Result<Self> {
        let mut store = Self::new()
            .with_fallback(config.metadata_fallback)
            .with_fetch_timeout(config.mds_timeout);

        if let Some(folder) = &config.toc_root_certs_folder {
            store.toc_roots = certificate::load_pem_folder(folder);
        }
        if let Some(folder) = &config.authenticator_certs_folder {
            store.fallback_anchors = certificate::load_pem_folder(folder);
        }
        if let Some(folder) = &config.metadata_folder {
            store.load_metadata_folder(folder);
        }
        if let Some(folder) = &config.toc_folder {
            store.load_toc_folder(folder);
        }

        #[cfg(feature = "network")]
        if let (Some(endpoint), Some(token)) = (&config.mds_endpoint, &config.mds_access_token) {
            let fetcher = HttpMetadataFetcher::new(endpoint, token.clone(), config.mds_timeout)?;
            store = store.with_fetcher(Arc::new(fetcher));
        }
        #[cfg(not(feature = "network"))]
        if config.remote_metadata_enabled() {
            tracing::warn!("Remote metadata configured but the network feature is disabled");
        }

        tracing::info!(
            metadata = store.metadata.len(),
            toc_entries = store.toc_entries.len(),
            toc_roots = store.toc_roots.len(),
            fallback_anchors = store.fallback_anchors.len(),
            remote = store.fetcher.is_some(),
            "Trust store loaded"
        );
        Ok(store)
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Whether a failed remote fetch may fall back to the static anchors
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn with_toc_roots(mut self, roots: Vec<X509>) -> Self {
        self.toc_roots = roots;
        self
    }

    pub fn with_fallback_anchors(mut self, anchors: Vec<X509>) -> Self {
        self.fallback_anchors = anchors;
        self
    }

    /// Load one metadata statement per file. Returns the number inserted.
    pub fn load_metadata_folder(&self, folder: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(folder) else {
            tracing::warn!(folder = %folder.display(), "Metadata folder not readable");
            return 0;
        };

        let mut loaded = 0;
        for path in entries.flatten().map(|e| e.path()).filter(|p| p.is_file()) {
            let statement = std::fs::read(&path)
                .map_err(|e| e.to_string())
                .and_then(|raw| {
                    serde_json::from_slice::<MetadataStatement>(&raw).map_err(|e| e.to_string())
                });
            match statement {
                Ok(statement) => {
                    if self.insert_metadata(statement) {
                        loaded += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable metadata file")
                }
            }
        }
        tracing::debug!(folder = %folder.display(), loaded, "Loaded local metadata");
        loaded
    }

    /// Ingest every TOC file in `folder`. A source that fails verification is
    /// skipped with a warning. Returns the number of accepted sources.
    pub fn load_toc_folder(&self, folder: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(folder) else {
            tracing::warn!(folder = %folder.display(), "TOC folder not readable");
            return 0;
        };

        let mut paths: Vec<_> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut accepted = 0;
        for path in paths {
            let source = path.display().to_string();
            let result = std::fs::read_to_string(&path)
                .map_err(|e| Fido2Error::metadata_fetch(format!("unreadable TOC file: {e}")))
                .and_then(|token| self.ingest_toc(&source, &token));
            match result {
                Ok(_) => accepted += 1,
                Err(e) => tracing::warn!(source, error = %e, "Rejected TOC source"),
            }
        }
        accepted
    }

    /// Verify a TOC token and merge its entries. Returns the number of
    /// entries indexed from this source.
    pub fn ingest_toc(&self, source: &str, token: &str) -> Result<usize> {
        let payload = verify_toc(token, &self.toc_roots, self.validator.as_ref())?;
        if let Some(next_update) = &payload.next_update {
            self.next_updates
                .insert(source.to_string(), next_update.clone());
        }

        let mut indexed = 0;
        for entry in payload.entries {
            let Some(aaguid) = entry.aaguid.as_deref().map(normalize_aaguid) else {
                tracing::debug!(source, "Skipping TOC entry without aaguid");
                continue;
            };
            if let Some(statement) = &entry.metadata_statement {
                self.metadata
                    .entry(aaguid.clone())
                    .or_insert_with(|| Arc::new(statement.clone()));
            }
            self.merge_toc_entry(aaguid, entry);
            indexed += 1;
        }
        tracing::info!(source, entries = indexed, "TOC source ingested");
        Ok(indexed)
    }

    /// The entry with the later `timeOfLastStatusChange` wins.
    fn merge_toc_entry(&self, aaguid: String, entry: TocEntry) {
        match self.toc_entries.entry(aaguid) {
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(entry));
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get().last_status_change();
                let candidate = entry.last_status_change();
                if candidate > existing {
                    tracing::warn!(
                        aaguid = %slot.key(),
                        kept = %candidate,
                        discarded = %existing,
                        "Duplicate TOC entry replaced by newer status"
                    );
                    slot.insert(Arc::new(entry));
                } else {
                    tracing::warn!(
                        aaguid = %slot.key(),
                        kept = %existing,
                        discarded = %candidate,
                        "Duplicate TOC entry discarded"
                    );
                }
            }
        }
    }

    /// Insert a statement unless one is already cached for its aaguid.
    pub fn insert_metadata(&self, statement: MetadataStatement) -> bool {
        let Some(aaguid) = statement.aaguid.as_deref().map(normalize_aaguid) else {
            tracing::debug!("Ignoring metadata statement without aaguid");
            return false;
        };
        match self.metadata.entry(aaguid) {
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(statement));
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Cached statement, by dashed or undashed aaguid
    pub fn metadata_for(&self, aaguid: &str) -> Option<Arc<MetadataStatement>> {
        self.metadata
            .get(&normalize_aaguid(aaguid))
            .map(|m| Arc::clone(m.value()))
    }

    pub fn toc_entry_for(&self, aaguid: &str) -> Option<Arc<TocEntry>> {
        self.toc_entries
            .get(&normalize_aaguid(aaguid))
            .map(|e| Arc::clone(e.value()))
    }

    /// Reject models with a disallowed status report.
    pub fn check_status(&self, aaguid: &str) -> Result<()> {
        let Some(entry) = self.toc_entry_for(aaguid) else {
            return Ok(());
        };
        if let Some(report) = entry.disallowed_status() {
            tracing::warn!(aaguid, status = %report.status, "Authenticator status disallowed");
            return Err(Fido2Error::trust(format!(
                "authenticator {aaguid} has status {}",
                report.status
            )));
        }
        Ok(())
    }

    /// Resolve the anchors for an authenticator model.
    ///
    /// Order: cached metadata, remote fetch on a cache miss when a fetcher is
    /// configured, then the static fallback folder. The status gate runs
    /// first and fails closed.
    pub async fn anchors_for(&self, aaguid: &str) -> Result<TrustAnchors> {
        self.check_status(aaguid)?;

        if let Some(statement) = self.metadata_for(aaguid) {
            let roots = statement.root_certificates();
            if !roots.is_empty() {
                return Ok(TrustAnchors::new(roots, AnchorSource::Metadata));
            }
        } else {
            match self.fetch_remote(aaguid).await {
                Ok(Some(statement)) => {
                    let roots = statement.root_certificates();
                    if !roots.is_empty() {
                        return Ok(TrustAnchors::new(roots, AnchorSource::Metadata));
                    }
                }
                Ok(None) => {}
                Err(e) if self.fallback_enabled => {
                    tracing::warn!(
                        aaguid,
                        error = %e,
                        "Metadata fetch failed, using fallback trust anchors"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(self.fallback(aaguid))
    }

    async fn fetch_remote(&self, aaguid: &str) -> Result<Option<Arc<MetadataStatement>>> {
        let (Some(fetcher), Some(entry)) = (&self.fetcher, self.toc_entry_for(aaguid)) else {
            return Ok(None);
        };
        let statement = fetch_statement(fetcher.as_ref(), &entry, self.fetch_timeout).await?;

        let key = normalize_aaguid(aaguid);
        let cached = Arc::clone(
            self.metadata
                .entry(key)
                .or_insert_with(|| Arc::new(statement))
                .value(),
        );
        tracing::info!(aaguid, "Metadata statement fetched and cached");
        Ok(Some(cached))
    }

    fn fallback(&self, aaguid: &str) -> TrustAnchors {
        if self.fallback_anchors.is_empty() {
            return TrustAnchors::none();
        }
        tracing::warn!(aaguid, "Using fallback authenticator certificates as trust anchors");
        TrustAnchors::new(self.fallback_anchors.clone(), AnchorSource::Fallback)
    }

    pub fn validator(&self) -> &dyn CertificateValidator {
        self.validator.as_ref()
    }

    /// `nextUpdate` of every accepted TOC source
    pub fn next_updates(&self) -> Vec<(String, String)> {
        let mut updates: Vec<_> = self
            .next_updates
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        updates.sort();
        updates
    }

    pub fn stats(&self) -> TrustStoreStats {
        TrustStoreStats {
            metadata_statements: self.metadata.len(),
            toc_entries: self.toc_entries.len(),
            toc_sources: self.next_updates.len(),
            fallback_anchors: self.fallback_anchors.len(),
        }
    }
}

impl Default for TrustStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TrustStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustStore")
            .field("metadata", &self.metadata.len())
            .field("toc_entries", &self.toc_entries.len())
            .field("toc_roots", &self.toc_roots.len())
            .field("fallback_anchors", &self.fallback_anchors.len())
            .field("remote", &self.fetcher.is_some())
            .field("fallback_enabled", &self.fallback_enabled)
            .finish()
    }
}
