//! Canonical pull-request types shared by all providers
//!
//! Provider adapters lower their native API payloads into these structs so
//! that everything above the gateway is provider-agnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Repository coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    /// Owner login, or the full group path on GitLab
    pub owner: String,
    /// Repository name
    pub name: String,
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Change status of a file within a pull request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
}

impl FileStatus {
    /// Lenient parse; providers disagree on spelling for unusual states.
    pub fn parse(s: &str) -> Self {
        match s {
            "added" => FileStatus::Added,
            "removed" | "deleted" => FileStatus::Removed,
            "renamed" => FileStatus::Renamed,
            _ => FileStatus::Modified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Added => "added",
            FileStatus::Modified => "modified",
            FileStatus::Removed => "removed",
            FileStatus::Renamed => "renamed",
        }
    }
}

/// One changed file in a pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PRFile {
    pub path: String,
    pub status: FileStatus,
    pub additions: u32,
    pub deletions: u32,
    /// Unified diff hunk text, when the provider supplies one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

/// Author identity attached to commits and comments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub login: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// One commit in the pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub sha: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authored_at: Option<DateTime<Utc>>,
}

/// One conversation comment on the pull request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: u64,
    pub user: User,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Canonical, provider-neutral snapshot of a pull/merge request.
///
/// Created once when a review is opened and never mutated afterwards;
/// file contents are always addressed by `base_sha` / `head_sha`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PRInfo {
    /// Opaque id handed back to clients for follow-up calls
    pub review_id: String,
    /// Provider name ("github" or "gitlab")
    pub provider: String,
    pub repo: RepoRef,
    pub number: u64,
    pub title: String,
    pub body: String,
    pub base_sha: String,
    pub head_sha: String,
    pub base_ref: String,
    pub head_ref: String,
    pub state: String,
    pub draft: bool,
    pub files: Vec<PRFile>,
    pub commits: Vec<Commit>,
    pub comments: Vec<Comment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    pub additions: u32,
    pub deletions: u32,
    pub changed_files: u32,
}

impl PRInfo {
    /// Look up a changed file by path.
    pub fn file(&self, path: &str) -> Option<&PRFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// Whether `path` is part of this change set.
    pub fn touches(&self, path: &str) -> bool {
        self.file(path).is_some()
    }
}

/// File contents at a specific commit, tagged with a stable cache key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContents {
    pub name: String,
    pub contents: String,
    pub cache_key: String,
}

/// One ranked code-search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    pub line: u32,
    pub snippet: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_status_parse() {
        assert_eq!(FileStatus::parse("added"), FileStatus::Added);
        assert_eq!(FileStatus::parse("removed"), FileStatus::Removed);
        assert_eq!(FileStatus::parse("deleted"), FileStatus::Removed);
        assert_eq!(FileStatus::parse("renamed"), FileStatus::Renamed);
        assert_eq!(FileStatus::parse("modified"), FileStatus::Modified);
        assert_eq!(FileStatus::parse("anything-else"), FileStatus::Modified);
    }

    #[test]
    fn test_pr_file_serializes_lowercase_status() {
        let file = PRFile {
            path: "src/main.rs".into(),
            status: FileStatus::Added,
            additions: 10,
            deletions: 0,
            patch: None,
        };
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["status"], "added");
    }

    #[test]
    fn test_repo_ref_display() {
        let repo = RepoRef {
            owner: "octocat".into(),
            name: "hello".into(),
        };
        assert_eq!(repo.to_string(), "octocat/hello");
    }
}
