//! Provider trait implemented by each hosting backend

use async_trait::async_trait;

use crate::{PRInfo, PrRef, Result, SearchHit};

/// A hosting provider (GitHub, GitLab) able to serve pull-request data.
///
/// Implementations lower their native API payloads into the canonical
/// types; nothing above the gateway sees provider-specific field names.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier ("github", "gitlab").
    fn name(&self) -> &'static str;

    /// Load the full PR snapshot: metadata, file list, commits, comments.
    async fn load_pr(&self, pr: &PrRef) -> Result<PRInfo>;

    /// Fetch raw file bytes at the given commit.
    async fn fetch_file(&self, pr: &PrRef, path: &str, sha: &str) -> Result<Vec<u8>>;

    /// Ranked text search over the repository at the given commit.
    async fn search(&self, pr: &PrRef, query: &str, sha: &str) -> Result<Vec<SearchHit>>;
}
