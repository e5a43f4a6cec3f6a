//! cr-providers - Hosting-provider gateway for the cr review engine
//!
//! This crate normalizes pull/merge requests across GitHub, GitHub
//! Enterprise, and GitLab into one canonical `PRInfo` schema, and serves
//! file blobs and code search through a content-addressed artifact cache.

mod backoff;
mod cache;
mod error;
mod gateway;
mod github;
mod gitlab;
mod provider;
mod refs;
mod types;

pub use backoff::BackoffPolicy;
pub use cache::{cache_key, ArtifactCache};
pub use error::{Error, Result};
pub use gateway::{Gateway, GatewayConfig};
pub use github::GitHubProvider;
pub use gitlab::GitLabProvider;
pub use provider::Provider;
pub use refs::{parse_url, ProviderKind, PrRef, RefKind};
pub use types::{
    Comment, Commit, FileContents, FileStatus, PRFile, PRInfo, RepoRef, SearchHit, User,
};
