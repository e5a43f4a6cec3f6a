//! In-memory registry of loaded reviews
//!
//! Maps the opaque review id handed to clients back to the PR snapshot and
//! provider reference used by follow-up file, review, and ask calls.
//! Entries expire after a TTL; there is no persistent state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use cr_providers::{PRInfo, PrRef};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{Error, Result};

/// A pull request loaded for review.
#[derive(Debug, Clone)]
pub struct LoadedReview {
    pub pr_ref: PrRef,
    pub pr_info: PRInfo,
    pub created_at: DateTime<Utc>,
}

/// Registry of active reviews, keyed by review id.
pub struct ReviewRegistry {
    inner: RwLock<HashMap<String, Arc<LoadedReview>>>,
    ttl: Duration,
}

impl ReviewRegistry {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    /// Register a freshly loaded PR and return its handle.
    pub async fn insert(&self, pr_ref: PrRef, pr_info: PRInfo) -> Arc<LoadedReview> {
        let review_id = pr_info.review_id.clone();
        let loaded = Arc::new(LoadedReview {
            pr_ref,
            pr_info,
            created_at: Utc::now(),
        });
        let mut inner = self.inner.write().await;
        sweep(&mut inner, self.ttl);
        inner.insert(review_id, Arc::clone(&loaded));
        loaded
    }

    /// Look up a review, failing for unknown or expired ids.
    pub async fn get(&self, review_id: &str) -> Result<Arc<LoadedReview>> {
        let inner = self.inner.read().await;
        match inner.get(review_id) {
            Some(loaded) if Utc::now() - loaded.created_at < self.ttl => {
                Ok(Arc::clone(loaded))
            }
            _ => Err(Error::ReviewNotFound(review_id.to_string())),
        }
    }

    /// Remove a review once its response is fully consumed.
    pub async fn remove(&self, review_id: &str) {
        self.inner.write().await.remove(review_id);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ReviewRegistry {
    fn default() -> Self {
        // One hour matches how long a review tab typically stays open.
        Self::new(3600)
    }
}

fn sweep(map: &mut HashMap<String, Arc<LoadedReview>>, ttl: Duration) {
    let now = Utc::now();
    let expired: Vec<String> = map
        .iter()
        .filter(|(_, loaded)| now - loaded.created_at >= ttl)
        .map(|(id, _)| id.clone())
        .collect();
    for id in expired {
        debug!(review_id = %id, "expiring review");
        map.remove(&id);
    }
}
