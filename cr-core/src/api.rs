//! Wire DTOs for the HTTP surface
//!
//! The host server exposes these shapes to the review UI; routing itself
//! lives outside the engine. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

use cr_providers::{FileContents, Gateway, PRInfo};

use crate::registry::LoadedReview;
use crate::types::{AnswerBlock, ChatMessage, DiffCitation, DiffSelection, ReviewIssue};
use crate::Result;

/// `POST /api/github/load_pr` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadPrRequest {
    pub pr_url: String,
}

/// `POST /api/github/load_pr` response: the canonical snapshot itself.
pub type LoadPrResponse = PRInfo;

/// `GET /api/github/file?reviewId&path` response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContentsResponse {
    pub old_file: Option<FileContents>,
    pub new_file: Option<FileContents>,
}

/// `POST /api/diff/ask/stream` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    pub review_id: String,
    pub question: String,
    #[serde(default)]
    pub conversation: Vec<ChatMessage>,
    #[serde(default)]
    pub selection: Option<DiffSelection>,
}

/// Non-streaming ask response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub answer_blocks: Vec<AnswerBlock>,
    pub citations: Vec<DiffCitation>,
}

/// `POST /api/diff/review` response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub issues: Vec<ReviewIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub dropped: u32,
}

/// `POST /api/suggestions` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    pub review_id: String,
    #[serde(default)]
    pub conversation: Vec<ChatMessage>,
    #[serde(default)]
    pub last_answer: String,
}

/// `POST /api/suggestions` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionResponse {
    pub suggestions: Vec<String>,
}

/// Serve `GET /api/github/file`: both sides of one file in the change set.
///
/// A side that does not exist at its commit (added or removed files) comes
/// back as `None`; other provider failures propagate.
pub async fn file_contents(
    gateway: &Gateway,
    loaded: &LoadedReview,
    path: &str,
) -> Result<FileContentsResponse> {
    let old_file = side_contents(gateway, loaded, path, &loaded.pr_info.base_sha).await?;
    let new_file = side_contents(gateway, loaded, path, &loaded.pr_info.head_sha).await?;
    Ok(FileContentsResponse { old_file, new_file })
}

async fn side_contents(
    gateway: &Gateway,
    loaded: &LoadedReview,
    path: &str,
    sha: &str,
) -> Result<Option<FileContents>> {
    match gateway.fetch_file(&loaded.pr_ref, path, sha).await {
        Ok(file) => Ok(Some(file)),
        Err(cr_providers::Error::NotFound(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_request_wire_names() {
        let raw = r#"{
            "reviewId": "abcd1234",
            "question": "Any security concerns?",
            "conversation": [{"role": "user", "content": "hi"}],
            "selection": {"path": "src/a.rs", "side": "additions",
                          "startLine": 1, "endLine": 3, "mode": "range"}
        }"#;
        let request: AskRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.review_id, "abcd1234");
        assert_eq!(request.conversation.len(), 1);
        let selection = request.selection.unwrap();
        assert_eq!(selection.start_line, 1);
    }

    #[test]
    fn test_ask_request_defaults() {
        let request: AskRequest =
            serde_json::from_str(r#"{"reviewId": "x", "question": "q"}"#).unwrap();
        assert!(request.conversation.is_empty());
        assert!(request.selection.is_none());
    }

    #[test]
    fn test_load_pr_request() {
        let request: LoadPrRequest =
            serde_json::from_str(r#"{"prUrl": "https://github.com/o/r/pull/1"}"#).unwrap();
        assert!(request.pr_url.ends_with("/pull/1"));
    }

    #[test]
    fn test_file_contents_response_nullable_sides() {
        let response = FileContentsResponse {
            old_file: None,
            new_file: Some(FileContents {
                name: "a.rs".into(),
                contents: "fn x() {}".into(),
                cache_key: "0011223344556677".into(),
            }),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json["oldFile"].is_null());
        assert_eq!(json["newFile"]["cacheKey"], "0011223344556677");
    }

    #[test]
    fn test_suggestion_request_wire_names() {
        let raw = r#"{"reviewId": "x", "conversation": [], "lastAnswer": "done"}"#;
        let request: SuggestionRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.last_answer, "done");
    }
}
