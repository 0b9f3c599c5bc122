//! In-memory ceremony store
//!
//! Pending ceremonies live in a challenge-keyed map with an expiry and are
//! consumed by `remove`, which makes the claim atomic. Completed entries
//! are kept by id for credential lookups.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{CeremonyEntry, CeremonyKind, CeremonyStatus, CeremonyStore};
use crate::error::{Fido2Error, Result};

struct PendingEntry {
    entry: CeremonyEntry,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CeremonyStoreStats {
    pub pending: usize,
    pub completed: usize,
}

pub struct MemoryCeremonyStore {
    pending: DashMap<(CeremonyKind, String), PendingEntry>,
    completed: DashMap<String, CeremonyEntry>,
    ttl: Duration,
}

impl MemoryCeremonyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            completed: DashMap::new(),
            ttl,
        }
    }

    pub fn stats(&self) -> CeremonyStoreStats {
        CeremonyStoreStats {
            pending: self.pending.len(),
            completed: self.completed.len(),
        }
    }

    /// Completed entry by id
    pub fn get(&self, id: &str) -> Option<CeremonyEntry> {
        self.completed.get(id).map(|e| e.value().clone())
    }
}

impl Default for MemoryCeremonyStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl CeremonyStore for MemoryCeremonyStore {
    async fn save(&self, entry: CeremonyEntry) -> Result<()> {
        if entry.status != CeremonyStatus::Pending {
            self.completed.insert(entry.id.clone(), entry);
            return Ok(());
        }

        match self.pending.entry((entry.kind, entry.challenge.clone())) {
            Entry::Occupied(_) => Err(Fido2Error::storage("challenge already pending")),
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry {
                    entry,
                    expires_at: Instant::now() + self.ttl,
                });
                Ok(())
            }
        }
    }

    async fn claim_by_challenge(
        &self,
        kind: CeremonyKind,
        challenge: &str,
    ) -> Result<Option<CeremonyEntry>> {
        let Some((_, pending)) = self.pending.remove(&(kind, challenge.to_string())) else {
            return Ok(None);
        };
        if pending.expires_at <= Instant::now() {
            tracing::debug!(challenge, "Pending ceremony expired");
            return Ok(None);
        }
        Ok(Some(pending.entry))
    }

    async fn update(&self, entry: &CeremonyEntry) -> Result<()> {
        self.completed.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn compare_and_update_counter(
        &self,
        id: &str,
        expected: u32,
        counter: u32,
    ) -> Result<bool> {
        let Some(mut registration) = self.completed.get_mut(id) else {
            return Err(Fido2Error::storage(format!("no registration {id}")));
        };
        if registration.status != CeremonyStatus::Registered
            || registration.signature_counter != expected
        {
            return Ok(false);
        }
        registration.signature_counter = counter;
        Ok(true)
    }

    async fn find_all_by_username(
        &self,
        kind: CeremonyKind,
        username: &str,
    ) -> Result<Vec<CeremonyEntry>> {
        let mut found: Vec<_> = self
            .completed
            .iter()
            .filter(|e| e.kind == kind && e.username == username)
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|e| e.created_at);
        Ok(found)
    }

    async fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.pending.len();
        self.pending.retain(|_, pending| pending.expires_at > now);
        before.saturating_sub(self.pending.len())
    }
}

impl std::fmt::Debug for MemoryCeremonyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCeremonyStore")
            .field("pending", &self.pending.len())
            .field("completed", &self.completed.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
