//! Content-addressed artifact cache
//!
//! LRU over `(provider, repo, sha, path)` with a configurable byte budget.
//! Values are immutable once inserted; writes are idempotent because keys
//! are content-addressed by commit SHA. The index lock is held only for map
//! updates, never across payload I/O.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::debug;

/// Compute the stable cache key for a `(provider, repo, sha, path)` tuple.
///
/// First 16 hex chars of the SHA-256 of the normalized key; stable across
/// sessions and processes for identical inputs.
pub fn cache_key(provider: &str, repo: &str, sha: &str, path: &str) -> String {
    let normalized = format!("{provider}:{repo}@{sha}:{path}");
    let digest = Sha256::digest(normalized.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

struct Entry {
    value: Arc<str>,
    size: u64,
    seq: u64,
}

struct CacheState {
    map: HashMap<String, Entry>,
    /// seq -> key index for O(log n) LRU eviction
    order: BTreeMap<u64, String>,
    total_bytes: u64,
    next_seq: u64,
}

/// Process-local LRU cache for file blobs and serialized search results.
pub struct ArtifactCache {
    state: Mutex<CacheState>,
    budget_bytes: u64,
}

impl ArtifactCache {
    /// Create a cache with the given byte budget.
    pub fn new(budget_bytes: u64) -> Self {
        Self {
            state: Mutex::new(CacheState {
                map: HashMap::new(),
                order: BTreeMap::new(),
                total_bytes: 0,
                next_seq: 0,
            }),
            budget_bytes,
        }
    }

    /// Fetch an entry, refreshing its recency.
    pub fn get(&self, key: &str) -> Option<Arc<str>> {
        let mut state = self.state.lock().expect("cache lock poisoned");
        let seq = state.next_seq;
        state.next_seq += 1;
        let entry = state.map.get_mut(key)?;
        let old_seq = entry.seq;
        entry.seq = seq;
        let value = Arc::clone(&entry.value);
        state.order.remove(&old_seq);
        state.order.insert(seq, key.to_string());
        Some(value)
    }

    /// Insert an entry, evicting least-recently-used entries past the budget.
    ///
    /// Re-inserting an existing key is a no-op apart from a recency bump:
    /// values are content-addressed, so last-writer-wins is safe.
    pub fn insert(&self, key: &str, value: Arc<str>) {
        let size = value.len() as u64;
        let mut state = self.state.lock().expect("cache lock poisoned");
        let seq = state.next_seq;
        state.next_seq += 1;

        if let Some(existing) = state.map.get_mut(key) {
            let old_seq = existing.seq;
            existing.seq = seq;
            state.order.remove(&old_seq);
            state.order.insert(seq, key.to_string());
            return;
        }

        state.map.insert(
            key.to_string(),
            Entry {
                value,
                size,
                seq,
            },
        );
        state.order.insert(seq, key.to_string());
        state.total_bytes += size;

        while state.total_bytes > self.budget_bytes {
            let Some((&oldest_seq, _)) = state.order.iter().next() else {
                break;
            };
            let Some(evicted_key) = state.order.remove(&oldest_seq) else {
                break;
            };
            if let Some(evicted) = state.map.remove(&evicted_key) {
                state.total_bytes -= evicted.size;
                debug!(key = %evicted_key, size = evicted.size, "evicted cache entry");
            }
        }
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.state.lock().expect("cache lock poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current total payload size in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.state.lock().expect("cache lock poisoned").total_bytes
    }
}
