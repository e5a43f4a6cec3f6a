//! Provider gateway
//!
//! Routes pull-request URLs to the matching provider, serves file blobs and
//! search results through the artifact cache, and wraps every provider call
//! in the rate-limit backoff policy. Concurrent identical fetches are
//! deduplicated so a given `(sha, path)` produces at most one provider GET.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::backoff::{with_backoff, BackoffPolicy};
use crate::cache::{cache_key, ArtifactCache};
use crate::provider::Provider;
use crate::types::{FileContents, PRInfo, SearchHit};
use crate::{parse_url, Error, GitHubProvider, GitLabProvider, ProviderKind, PrRef, Result};

/// Gateway construction options.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub github_api_base: Option<String>,
    pub github_token: Option<String>,
    pub gitlab_api_base: Option<String>,
    pub gitlab_token: Option<String>,
    /// Artifact cache byte budget; defaults to 256 MiB when zero.
    pub cache_bytes: u64,
    /// Per-file size cap; defaults to 1 MiB when zero.
    pub max_file_bytes: usize,
}

const DEFAULT_CACHE_BYTES: u64 = 256 * 1024 * 1024;
const DEFAULT_MAX_FILE_BYTES: usize = 1024 * 1024;

/// Uniform front door over all hosting providers.
pub struct Gateway {
    github: GitHubProvider,
    gitlab: GitLabProvider,
    cache: ArtifactCache,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    backoff: BackoffPolicy,
    max_file_bytes: usize,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let cache_bytes = if config.cache_bytes == 0 {
            DEFAULT_CACHE_BYTES
        } else {
            config.cache_bytes
        };
        let max_file_bytes = if config.max_file_bytes == 0 {
            DEFAULT_MAX_FILE_BYTES
        } else {
            config.max_file_bytes
        };
        Ok(Self {
            github: GitHubProvider::new(config.github_api_base, config.github_token)?,
            gitlab: GitLabProvider::new(config.gitlab_api_base, config.gitlab_token)?,
            cache: ArtifactCache::new(cache_bytes),
            in_flight: Mutex::new(HashMap::new()),
            backoff: BackoffPolicy::default(),
            max_file_bytes,
        })
    }

    fn provider_for(&self, kind: ProviderKind) -> &dyn Provider {
        match kind {
            ProviderKind::GitHub => &self.github,
            ProviderKind::GitLab => &self.gitlab,
        }
    }

    /// Parse a pull/merge request URL.
    pub fn parse_url(&self, url: &str) -> Result<PrRef> {
        parse_url(url)
    }

    /// Resolve a URL and load the full canonical PR snapshot.
    pub async fn load_pr(&self, url: &str) -> Result<(PrRef, PRInfo)> {
        let pr = parse_url(url)?;
        let provider = self.provider_for(pr.provider);
        let info = with_backoff(&self.backoff, || provider.load_pr(&pr)).await?;
        Ok((pr, info))
    }

    /// Fetch a text file at a commit, via the artifact cache.
    ///
    /// Files above the size cap are rejected; bytes are decoded as UTF-8
    /// with replacement.
    pub async fn fetch_file(&self, pr: &PrRef, path: &str, sha: &str) -> Result<FileContents> {
        let key = cache_key(pr.provider.as_str(), &pr.project_path(), sha, path);

        if let Some(contents) = self.cache.get(&key) {
            debug!(%key, path, "cache hit");
            return Ok(FileContents {
                name: path.to_string(),
                contents: contents.to_string(),
                cache_key: key,
            });
        }

        // Serialize concurrent fetches of the same key so only one
        // provider GET happens; the rest read the freshly cached value.
        let guard = {
            let mut in_flight = self.in_flight.lock().await;
            Arc::clone(in_flight.entry(key.clone()).or_default())
        };
        let _locked = guard.lock().await;

        if let Some(contents) = self.cache.get(&key) {
            debug!(%key, path, "cache hit after wait");
            return Ok(FileContents {
                name: path.to_string(),
                contents: contents.to_string(),
                cache_key: key,
            });
        }

        let provider = self.provider_for(pr.provider);
        let fetched = with_backoff(&self.backoff, || provider.fetch_file(pr, path, sha)).await;

        // The in-flight entry must outlive the cache insert: dropping it
        // earlier opens a window where a new caller misses both the guard
        // and the cache and issues a second provider GET.
        let result = match fetched {
            Ok(bytes) if bytes.len() > self.max_file_bytes => Err(Error::Transport(format!(
                "file {path} exceeds the {} byte cap",
                self.max_file_bytes
            ))),
            Ok(bytes) => {
                let contents: Arc<str> = Arc::from(String::from_utf8_lossy(&bytes).into_owned());
                self.cache.insert(&key, Arc::clone(&contents));
                Ok(FileContents {
                    name: path.to_string(),
                    contents: contents.to_string(),
                    cache_key: key.clone(),
                })
            }
            Err(err) => Err(err),
        };

        {
            let mut in_flight = self.in_flight.lock().await;
            in_flight.remove(&key);
        }
        result
    }

    /// Ranked text search at a commit, via the artifact cache.
    ///
    /// Hits whose provider does not report a line number are anchored by
    /// locating the snippet in the fetched blob.
    pub async fn search(&self, pr: &PrRef, query: &str, sha: &str) -> Result<Vec<SearchHit>> {
        let key = cache_key(
            pr.provider.as_str(),
            &pr.project_path(),
            sha,
            &format!("search:{query}"),
        );
        if let Some(serialized) = self.cache.get(&key) {
            if let Ok(hits) = serde_json::from_str::<Vec<SearchHit>>(&serialized) {
                return Ok(hits);
            }
        }

        let provider = self.provider_for(pr.provider);
        let mut hits = with_backoff(&self.backoff, || provider.search(pr, query, sha)).await?;

        for hit in hits.iter_mut().filter(|h| h.line == 0) {
            hit.line = match self.fetch_file(pr, &hit.path, sha).await {
                Ok(file) => locate_snippet(&file.contents, &hit.snippet),
                Err(_) => 1,
            };
        }

        if let Ok(serialized) = serde_json::to_string(&hits) {
            self.cache.insert(&key, Arc::from(serialized));
        }
        Ok(hits)
    }

    /// The shared artifact cache (exposed for metrics and tests).
    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }
}

/// Find the 1-based line where the first line of `snippet` occurs.
fn locate_snippet(contents: &str, snippet: &str) -> u32 {
    let Some(needle) = snippet.lines().find(|l| !l.trim().is_empty()) else {
        return 1;
    };
    for (idx, line) in contents.lines().enumerate() {
        if line.contains(needle.trim()) {
            return idx as u32 + 1;
        }
    }
    1
}
