//! Pull/merge request URL parsing
//!
//! Supports:
//! - https://github.com/owner/repo/pull/123 (and /issues/123)
//! - https://github.example.com/owner/repo/pull/123 (Enterprise)
//! - https://gitlab.com/group/subgroup/project/-/merge_requests/123
//! - https://gitlab.example.com/project/-/merge_requests/123

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Hosting provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    GitHub,
    GitLab,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "github",
            ProviderKind::GitLab => "gitlab",
        }
    }
}

/// Whether the URL points at a pull request or an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Pr,
    Issue,
}

/// Parsed reference to a pull request or issue on a hosting provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrRef {
    pub provider: ProviderKind,
    /// Hostname the URL was addressed to (kept for enterprise installs)
    pub host: String,
    /// Owner login; full group path on GitLab (may contain slashes)
    pub owner: String,
    pub repo: String,
    pub kind: RefKind,
    pub number: u64,
}

impl PrRef {
    /// Reconstruct the canonical web URL for this reference.
    pub fn build_url(&self) -> String {
        match (self.provider, self.kind) {
            (ProviderKind::GitHub, RefKind::Pr) => {
                format!("https://{}/{}/{}/pull/{}", self.host, self.owner, self.repo, self.number)
            }
            (ProviderKind::GitHub, RefKind::Issue) => {
                format!("https://{}/{}/{}/issues/{}", self.host, self.owner, self.repo, self.number)
            }
            (ProviderKind::GitLab, RefKind::Pr) => format!(
                "https://{}/{}/{}/-/merge_requests/{}",
                self.host, self.owner, self.repo, self.number
            ),
            (ProviderKind::GitLab, RefKind::Issue) => format!(
                "https://{}/{}/{}/-/issues/{}",
                self.host, self.owner, self.repo, self.number
            ),
        }
    }

    /// The GitLab project path (`group/subgroup/project`).
    pub fn project_path(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl std::fmt::Display for PrRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}/{}#{}",
            self.provider.as_str(),
            self.owner,
            self.repo,
            self.number
        )
    }
}

/// Parse a pull/merge request URL into a `PrRef`.
///
/// GitLab is checked first because its `/-/merge_requests/` marker is the
/// more specific pattern; anything with a `/pull/` or `/issues/` segment is
/// treated as GitHub (including Enterprise hosts).
pub fn parse_url(input: &str) -> Result<PrRef> {
    let parsed = url::Url::parse(input).map_err(|_| Error::UrlInvalid(input.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::UrlInvalid(input.to_string()))?
        .to_string();
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();

    if let Some(marker) = segments.iter().position(|s| *s == "-") {
        return parse_gitlab_segments(input, host, &segments, marker);
    }
    parse_github_segments(input, host, &segments)
}

fn parse_gitlab_segments(
    input: &str,
    host: String,
    segments: &[&str],
    marker: usize,
) -> Result<PrRef> {
    // {group...}/{project}/-/{merge_requests|issues}/{iid}
    if marker < 2 || segments.len() < marker + 3 {
        return Err(Error::UrlInvalid(input.to_string()));
    }
    let kind = match segments[marker + 1] {
        "merge_requests" => RefKind::Pr,
        "issues" => RefKind::Issue,
        _ => return Err(Error::UrlInvalid(input.to_string())),
    };
    let number: u64 = segments[marker + 2]
        .parse()
        .map_err(|_| Error::UrlInvalid(input.to_string()))?;
    let owner = segments[..marker - 1].join("/");
    let repo = segments[marker - 1].to_string();

    Ok(PrRef {
        provider: ProviderKind::GitLab,
        host,
        owner,
        repo,
        kind,
        number,
    })
}

fn parse_github_segments(input: &str, host: String, segments: &[&str]) -> Result<PrRef> {
    // {owner}/{repo}/{pull|issues}/{number}[/...]
    if segments.len() < 4 {
        return Err(Error::UrlInvalid(input.to_string()));
    }
    let kind = match segments[2] {
        "pull" => RefKind::Pr,
        "issues" => RefKind::Issue,
        _ => return Err(Error::UrlInvalid(input.to_string())),
    };
    let number: u64 = segments[3]
        .parse()
        .map_err(|_| Error::UrlInvalid(input.to_string()))?;

    Ok(PrRef {
        provider: ProviderKind::GitHub,
        host,
        owner: segments[0].to_string(),
        repo: segments[1].to_string(),
        kind,
        number,
    })
}
