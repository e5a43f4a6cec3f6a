//! Capability interceptor
//!
//! The only path out of the sandbox. Forwards `fetch_file` and `search` to
//! the provider gateway pinned to the session's base/head SHAs, and serves
//! `llm_query` as a single-shot sub-model call with no capability access,
//! so the controller depth stays at one.

use std::sync::Arc;

use async_trait::async_trait;
use cr_providers::{Gateway, PrRef, SearchHit};
use tracing::debug;

use crate::llm::{CallQuota, LlmClient, LlmRequest};
use crate::{Error, Result};

/// Handler for mediated capability calls from guest code.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    async fn fetch_file(&self, path: &str, sha: Option<&str>) -> Result<String>;
    async fn search(&self, query: &str, sha: Option<&str>) -> Result<Vec<SearchHit>>;
    async fn llm_query(&self, prompt: &str, system: Option<&str>) -> Result<String>;
}

/// Production interceptor bound to one review session.
pub struct SessionInterceptor {
    gateway: Arc<Gateway>,
    pr: PrRef,
    base_sha: String,
    head_sha: String,
    llm: Arc<dyn LlmClient>,
    sub_model: String,
    quota: Arc<CallQuota>,
}

impl SessionInterceptor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<Gateway>,
        pr: PrRef,
        base_sha: String,
        head_sha: String,
        llm: Arc<dyn LlmClient>,
        sub_model: String,
        quota: Arc<CallQuota>,
    ) -> Self {
        Self {
            gateway,
            pr,
            base_sha,
            head_sha,
            llm,
            sub_model,
            quota,
        }
    }

    /// Resolve a guest-supplied sha to one of the session commits.
    fn resolve_sha(&self, sha: Option<&str>) -> Result<String> {
        match sha {
            None => Ok(self.head_sha.clone()),
            Some(s) if s == "head" || s == self.head_sha => Ok(self.head_sha.clone()),
            Some(s) if s == "base" || s == self.base_sha => Ok(self.base_sha.clone()),
            Some(other) => Err(Error::CapabilityDenied(format!(
                "sha {other} is not part of this review; use base or head"
            ))),
        }
    }
}

#[async_trait]
impl CapabilityHandler for SessionInterceptor {
    async fn fetch_file(&self, path: &str, sha: Option<&str>) -> Result<String> {
        let sha = self.resolve_sha(sha)?;
        debug!(path, %sha, "capability fetch_file");
        let file = self.gateway.fetch_file(&self.pr, path, &sha).await?;
        Ok(file.contents)
    }

    async fn search(&self, query: &str, sha: Option<&str>) -> Result<Vec<SearchHit>> {
        let sha = self.resolve_sha(sha)?;
        debug!(query, %sha, "capability search");
        Ok(self.gateway.search(&self.pr, query, &sha).await?)
    }

    async fn llm_query(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        self.quota.acquire()?;
        debug!(chars = prompt.len(), "capability llm_query");
        let mut request =
            LlmRequest::new(self.sub_model.clone(), prompt).with_max_output_tokens(2048);
        if let Some(system) = system {
            request = request.with_system(system);
        }
        let completion = self.llm.complete(&request).await?;
        self.quota.record(&completion.usage);
        Ok(completion.text)
    }
}

/// Guest exception name for a host-side error.
pub(crate) fn guest_error_kind(err: &Error) -> &'static str {
    match err {
        Error::Provider(p) => match p {
            cr_providers::Error::NotFound(_) => "NotFound",
            cr_providers::Error::Unauthorized(_) => "Unauthorized",
            cr_providers::Error::RateLimited { .. } => "RateLimited",
            cr_providers::Error::UrlInvalid(_) | cr_providers::Error::Transport(_) => "Transport",
        },
        Error::CapabilityDenied(_) | Error::BudgetExceeded(_) => "CapabilityDenied",
        _ => "RuntimeError",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_error_kind_mapping() {
        assert_eq!(
            guest_error_kind(&Error::from(cr_providers::Error::NotFound("x".into()))),
            "NotFound"
        );
        assert_eq!(
            guest_error_kind(&Error::from(cr_providers::Error::RateLimited {
                retry_after_secs: None
            })),
            "RateLimited"
        );
        assert_eq!(
            guest_error_kind(&Error::CapabilityDenied("no".into())),
            "CapabilityDenied"
        );
        assert_eq!(
            guest_error_kind(&Error::BudgetExceeded("llm".into())),
            "CapabilityDenied"
        );
        assert_eq!(guest_error_kind(&Error::Llm("boom".into())), "RuntimeError");
    }
}
