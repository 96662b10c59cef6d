use moka::future::Cache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::models::RecordSet;

/// Lookup parameters that identify a search. Serialization order is fixed by
/// the struct definition, so the fingerprint is deterministic and independent
/// of how the caller assembled the parameters.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SearchKey {
    pub cnae: String,
    pub uf: Option<String>,
    pub cidade: Option<String>,
    pub limit: usize,
}

impl SearchKey {
    /// Canonical fingerprint: SHA-256 over the deterministic serialization of
    /// the parameters.
    pub fn fingerprint(&self) -> String {
        // Serialization of a plain struct of strings and ints cannot fail
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Time-boxed memoization of search results keyed by request fingerprint.
///
/// Entries expire after the TTL fixed at construction and behave as absent
/// afterwards. No capacity bound and no LRU eviction; unbounded growth over
/// the process lifetime is an accepted limitation.
pub struct SearchCache {
    inner: Cache<String, RecordSet>,
}

impl SearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub async fn get(&self, key: &SearchKey) -> Option<RecordSet> {
        let hit = self.inner.get(&key.fingerprint()).await;
        if hit.is_some() {
            tracing::debug!("Cache hit for CNAE {}", key.cnae);
        }
        hit
    }

    pub async fn put(&self, key: &SearchKey, records: RecordSet) {
        self.inner.insert(key.fingerprint(), records).await;
    }
}
