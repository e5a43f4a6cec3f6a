//! GitLab provider
//!
//! Supports gitlab.com and self-hosted installs; project paths may contain
//! nested groups. The `diff_refs` object supplies base/head SHAs, change
//! counts are derived from the diff text, and system notes are excluded
//! from the comment list.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::github::new_review_id;
use crate::provider::Provider;
use crate::types::{Comment, Commit, FileStatus, PRFile, PRInfo, RepoRef, SearchHit, User};
use crate::{Error, PrRef, Result};

const USER_AGENT: &str = "cr-review-tool";

/// GitLab REST adapter.
pub struct GitLabProvider {
    http: reqwest::Client,
    api_base: Option<String>,
    token: Option<String>,
}

impl GitLabProvider {
    /// Create a provider. `api_base` overrides the host-derived
    /// `https://{host}/api/v4`; `token` is sent as `PRIVATE-TOKEN`.
    pub fn new(api_base: Option<String>, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            api_base,
            token,
        })
    }

    fn api_base_for(&self, host: &str) -> String {
        if let Some(base) = &self.api_base {
            return base.trim_end_matches('/').to_string();
        }
        format!("https://{host}/api/v4")
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.get(url).header("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            req = req.header("PRIVATE-TOKEN", token.clone());
        }
        req
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        debug!(url, "gitlab GET");
        let resp = self.request(url).send().await?;
        let resp = check_status(resp, what)?;
        resp.json::<T>()
            .await
            .map_err(|e| Error::Transport(format!("invalid response for {what}: {e}")))
    }
}

fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status.as_u16() {
        401 => Err(Error::Unauthorized(format!("gitlab rejected credentials for {what}"))),
        403 | 429 => {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            Err(Error::RateLimited { retry_after_secs })
        }
        404 => Err(Error::NotFound(what.to_string())),
        _ => Err(Error::Transport(format!("gitlab returned {status} for {what}"))),
    }
}

/// Percent-encode a path segment the way the GitLab API requires
/// (slashes become %2F).
fn encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Count added/removed lines from unified diff text, ignoring the
/// `+++`/`---` file headers.
fn count_changes(diff: &str) -> (u32, u32) {
    let mut additions = 0u32;
    let mut deletions = 0u32;
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if line.starts_with('+') {
            additions += 1;
        } else if line.starts_with('-') {
            deletions += 1;
        }
    }
    (additions, deletions)
}

#[derive(Deserialize)]
struct MrData {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    work_in_progress: bool,
    #[serde(default)]
    source_branch: String,
    #[serde(default)]
    target_branch: String,
    diff_refs: DiffRefs,
    #[serde(default)]
    author: Option<AuthorData>,
}

#[derive(Deserialize)]
struct DiffRefs {
    base_sha: String,
    head_sha: String,
}

#[derive(Deserialize)]
struct AuthorData {
    username: String,
    #[serde(default)]
    avatar_url: Option<String>,
}

#[derive(Deserialize)]
struct ChangesData {
    #[serde(default)]
    changes: Vec<ChangeData>,
}

#[derive(Deserialize)]
struct ChangeData {
    #[serde(default)]
    new_path: Option<String>,
    #[serde(default)]
    old_path: Option<String>,
    #[serde(default)]
    new_file: bool,
    #[serde(default)]
    deleted_file: bool,
    #[serde(default)]
    renamed_file: bool,
    #[serde(default)]
    diff: String,
}

#[derive(Deserialize)]
struct MrCommitData {
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    author_name: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct NoteData {
    id: u64,
    author: AuthorData,
    #[serde(default)]
    body: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    system: bool,
}

#[derive(Deserialize)]
struct BlobSearchData {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    startline: u32,
    #[serde(default)]
    data: String,
}

#[async_trait]
impl Provider for GitLabProvider {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    async fn load_pr(&self, pr: &PrRef) -> Result<PRInfo> {
        let base = self.api_base_for(&pr.host);
        let project = encode_path(&pr.project_path());

        let mr: MrData = self
            .get_json(
                &format!("{base}/projects/{project}/merge_requests/{}", pr.number),
                &format!("merge request {pr}"),
            )
            .await?;

        let changes: ChangesData = self
            .get_json(
                &format!("{base}/projects/{project}/merge_requests/{}/changes", pr.number),
                "merge request changes",
            )
            .await?;

        let commits: Vec<MrCommitData> = self
            .get_json(
                &format!(
                    "{base}/projects/{project}/merge_requests/{}/commits?per_page=100",
                    pr.number
                ),
                "merge request commits",
            )
            .await
            .unwrap_or_default();

        let notes: Vec<NoteData> = self
            .get_json(
                &format!(
                    "{base}/projects/{project}/merge_requests/{}/notes?per_page=100",
                    pr.number
                ),
                "merge request notes",
            )
            .await
            .unwrap_or_default();

        let files: Vec<PRFile> = changes
            .changes
            .into_iter()
            .filter_map(|change| {
                let path = change.new_path.or(change.old_path)?;
                let status = if change.new_file {
                    FileStatus::Added
                } else if change.deleted_file {
                    FileStatus::Removed
                } else if change.renamed_file {
                    FileStatus::Renamed
                } else {
                    FileStatus::Modified
                };
                let (additions, deletions) = count_changes(&change.diff);
                Some(PRFile {
                    path,
                    status,
                    additions,
                    deletions,
                    patch: if change.diff.is_empty() {
                        None
                    } else {
                        Some(change.diff)
                    },
                })
            })
            .collect();

        let additions: u32 = files.iter().map(|f| f.additions).sum();
        let deletions: u32 = files.iter().map(|f| f.deletions).sum();

        let info = PRInfo {
            review_id: new_review_id(),
            provider: self.name().to_string(),
            repo: RepoRef {
                owner: pr.owner.clone(),
                name: pr.repo.clone(),
            },
            number: pr.number,
            title: mr.title.unwrap_or_default(),
            body: mr.description.unwrap_or_default(),
            base_sha: mr.diff_refs.base_sha,
            head_sha: mr.diff_refs.head_sha,
            base_ref: mr.target_branch,
            head_ref: mr.source_branch,
            state: mr.state.unwrap_or_else(|| "opened".to_string()),
            draft: mr.draft || mr.work_in_progress,
            changed_files: files.len() as u32,
            additions,
            deletions,
            files,
            commits: commits
                .into_iter()
                .map(|c| Commit {
                    sha: c.id,
                    message: c.message,
                    author: Some(User {
                        login: c.author_name,
                        avatar_url: None,
                    }),
                    authored_at: c.created_at,
                })
                .collect(),
            comments: notes
                .into_iter()
                .filter(|n| !n.system)
                .map(|n| Comment {
                    id: n.id,
                    user: User {
                        login: n.author.username,
                        avatar_url: n.author.avatar_url,
                    },
                    body: n.body,
                    created_at: n.created_at,
                })
                .collect(),
            user: mr.author.map(|a| User {
                login: a.username,
                avatar_url: a.avatar_url,
            }),
        };

        info!(
            review_id = %info.review_id,
            number = info.number,
            files = info.files.len(),
            "loaded gitlab merge request"
        );
        Ok(info)
    }

    async fn fetch_file(&self, pr: &PrRef, path: &str, sha: &str) -> Result<Vec<u8>> {
        let base = self.api_base_for(&pr.host);
        let project = encode_path(&pr.project_path());
        let file = encode_path(path);
        let url = format!("{base}/projects/{project}/repository/files/{file}/raw?ref={sha}");
        debug!(url, "gitlab raw file");
        let resp = self.request(&url).send().await?;
        let resp = check_status(resp, &format!("file {path}@{sha}"))?;
        let bytes = resp.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn search(&self, pr: &PrRef, query: &str, sha: &str) -> Result<Vec<SearchHit>> {
        let base = self.api_base_for(&pr.host);
        let project = encode_path(&pr.project_path());
        let url = format!("{base}/projects/{project}/search");
        debug!(query, "gitlab blob search");
        let resp = self
            .request(&url)
            .query(&[("scope", "blobs"), ("search", query), ("ref", sha)])
            .send()
            .await?;
        let resp = check_status(resp, "blob search")?;
        let hits: Vec<BlobSearchData> = resp
            .json()
            .await
            .map_err(|e| Error::Transport(format!("invalid search response: {e}")))?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let path = hit.path.or(hit.filename)?;
                Some(SearchHit {
                    path,
                    line: hit.startline.max(1),
                    snippet: hit.data,
                })
            })
            .collect())
    }
}
