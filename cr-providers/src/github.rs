//! GitHub and GitHub Enterprise provider
//!
//! Talks to the REST v3 API and lowers responses into the canonical
//! `PRInfo` schema. Enterprise hosts are addressed at `https://{host}/api/v3`
//! unless an explicit API base is configured.

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::provider::Provider;
use crate::types::{Comment, Commit, FileStatus, PRFile, PRInfo, RepoRef, SearchHit, User};
use crate::{Error, PrRef, Result};

const ACCEPT_JSON: &str = "application/vnd.github.v3+json";
const ACCEPT_TEXT_MATCH: &str = "application/vnd.github.v3.text-match+json";
const USER_AGENT: &str = "cr-review-tool";

/// GitHub REST adapter.
pub struct GitHubProvider {
    http: reqwest::Client,
    api_base: Option<String>,
    token: Option<String>,
}

impl GitHubProvider {
    /// Create a provider. `api_base` overrides host-derived API roots
    /// (set it for GitHub Enterprise); `token` enables authenticated calls.
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
        if host == "github.com" {
            "https://api.github.com".to_string()
        } else {
            format!("https://{host}/api/v3")
        }
    }

    fn request(&self, url: &str, accept: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .get(url)
            .header("Accept", accept)
            .header("User-Agent", USER_AGENT);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("token {token}"));
        }
        req
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        accept: &str,
        what: &str,
    ) -> Result<T> {
        debug!(url, "github GET");
        let resp = self.request(url, accept).send().await?;
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
        401 => Err(Error::Unauthorized(format!("github rejected credentials for {what}"))),
        403 | 429 => {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            Err(Error::RateLimited { retry_after_secs })
        }
        404 => Err(Error::NotFound(what.to_string())),
        _ => Err(Error::Transport(format!("github returned {status} for {what}"))),
    }
}

#[derive(Deserialize)]
struct PullData {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    draft: bool,
    head: RefData,
    base: RefData,
    #[serde(default)]
    user: Option<UserData>,
    #[serde(default)]
    additions: u32,
    #[serde(default)]
    deletions: u32,
    #[serde(default)]
    changed_files: u32,
}

#[derive(Deserialize)]
struct RefData {
    sha: String,
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Deserialize)]
struct UserData {
    login: String,
    #[serde(default)]
    avatar_url: Option<String>,
}

impl From<UserData> for User {
    fn from(u: UserData) -> Self {
        User {
            login: u.login,
            avatar_url: u.avatar_url,
        }
    }
}

#[derive(Deserialize)]
struct FileData {
    filename: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    additions: u32,
    #[serde(default)]
    deletions: u32,
    #[serde(default)]
    patch: Option<String>,
}

#[derive(Deserialize)]
struct CommitData {
    sha: String,
    commit: CommitDetail,
    #[serde(default)]
    author: Option<UserData>,
}

#[derive(Deserialize)]
struct CommitDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    author: Option<CommitAuthor>,
}

#[derive(Deserialize)]
struct CommitAuthor {
    #[serde(default)]
    date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct CommentData {
    id: u64,
    user: UserData,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ContentData {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Deserialize)]
struct CodeSearchData {
    #[serde(default)]
    items: Vec<CodeSearchItem>,
}

#[derive(Deserialize)]
struct CodeSearchItem {
    path: String,
    #[serde(default)]
    text_matches: Vec<TextMatch>,
}

#[derive(Deserialize)]
struct TextMatch {
    #[serde(default)]
    fragment: String,
}

#[async_trait]
impl Provider for GitHubProvider {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn load_pr(&self, pr: &PrRef) -> Result<PRInfo> {
        let base = self.api_base_for(&pr.host);
        let repo_path = format!("{}/{}", pr.owner, pr.repo);

        let pull: PullData = self
            .get_json(
                &format!("{base}/repos/{repo_path}/pulls/{}", pr.number),
                ACCEPT_JSON,
                &format!("pull request {pr}"),
            )
            .await?;

        let files: Vec<FileData> = self
            .get_json(
                &format!("{base}/repos/{repo_path}/pulls/{}/files?per_page=100", pr.number),
                ACCEPT_JSON,
                "pull request files",
            )
            .await?;

        let commits: Vec<CommitData> = self
            .get_json(
                &format!("{base}/repos/{repo_path}/pulls/{}/commits?per_page=100", pr.number),
                ACCEPT_JSON,
                "pull request commits",
            )
            .await
            .unwrap_or_default();

        // The PR conversation lives on the issues endpoint.
        let comments: Vec<CommentData> = self
            .get_json(
                &format!("{base}/repos/{repo_path}/issues/{}/comments?per_page=100", pr.number),
                ACCEPT_JSON,
                "pull request comments",
            )
            .await
            .unwrap_or_default();

        let files: Vec<PRFile> = files
            .into_iter()
            .map(|f| PRFile {
                path: f.filename,
                status: FileStatus::parse(f.status.as_deref().unwrap_or("modified")),
                additions: f.additions,
                deletions: f.deletions,
                patch: f.patch,
            })
            .collect();

        let info = PRInfo {
            review_id: new_review_id(),
            provider: self.name().to_string(),
            repo: RepoRef {
                owner: pr.owner.clone(),
                name: pr.repo.clone(),
            },
            number: pr.number,
            title: pull.title.unwrap_or_default(),
            body: pull.body.unwrap_or_default(),
            base_sha: pull.base.sha,
            head_sha: pull.head.sha,
            base_ref: pull.base.ref_name,
            head_ref: pull.head.ref_name,
            state: pull.state.unwrap_or_else(|| "open".to_string()),
            draft: pull.draft,
            changed_files: if pull.changed_files > 0 {
                pull.changed_files
            } else {
                files.len() as u32
            },
            additions: pull.additions,
            deletions: pull.deletions,
            files,
            commits: commits
                .into_iter()
                .map(|c| Commit {
                    sha: c.sha,
                    message: c.commit.message,
                    authored_at: c.commit.author.and_then(|a| a.date),
                    author: c.author.map(User::from),
                })
                .collect(),
            comments: comments
                .into_iter()
                .map(|c| Comment {
                    id: c.id,
                    user: c.user.into(),
                    body: c.body.unwrap_or_default(),
                    created_at: c.created_at,
                })
                .collect(),
            user: pull.user.map(User::from),
        };

        info!(
            review_id = %info.review_id,
            number = info.number,
            files = info.files.len(),
            "loaded github pull request"
        );
        Ok(info)
    }

    async fn fetch_file(&self, pr: &PrRef, path: &str, sha: &str) -> Result<Vec<u8>> {
        let base = self.api_base_for(&pr.host);
        let url = format!(
            "{base}/repos/{}/{}/contents/{path}?ref={sha}",
            pr.owner, pr.repo
        );
        let content: ContentData = self
            .get_json(&url, ACCEPT_JSON, &format!("file {path}@{sha}"))
            .await?;

        if content.kind != "file" {
            return Err(Error::NotFound(format!("{path} is not a file")));
        }
        match (content.encoding.as_deref(), content.content) {
            (Some("base64"), Some(encoded)) => {
                let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
                base64::engine::general_purpose::STANDARD
                    .decode(compact.as_bytes())
                    .map_err(|e| Error::Transport(format!("invalid base64 for {path}: {e}")))
            }
            _ => Err(Error::Transport(format!(
                "contents api returned no inline payload for {path}"
            ))),
        }
    }

    async fn search(&self, pr: &PrRef, query: &str, _sha: &str) -> Result<Vec<SearchHit>> {
        let base = self.api_base_for(&pr.host);
        // Code search is head-only on GitHub; the gateway pins results to
        // the session head by resolving snippets against fetched blobs.
        let q = format!("{query} repo:{}/{}", pr.owner, pr.repo);
        let url = format!("{base}/search/code");
        debug!(query = %q, "github code search");
        let resp = self
            .request(&url, ACCEPT_TEXT_MATCH)
            .query(&[("q", q.as_str()), ("per_page", "20")])
            .send()
            .await?;
        let resp = check_status(resp, "code search")?;
        let data: CodeSearchData = resp
            .json()
            .await
            .map_err(|e| Error::Transport(format!("invalid search response: {e}")))?;

        Ok(data
            .items
            .into_iter()
            .map(|item| SearchHit {
                snippet: item
                    .text_matches
                    .into_iter()
                    .next()
                    .map(|m| m.fragment)
                    .unwrap_or_default(),
                path: item.path,
                line: 0,
            })
            .collect())
    }
}

pub(crate) fn new_review_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
