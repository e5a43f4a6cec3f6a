//! Shared fixtures for the end-to-end tests: a scripted LLM driver and a
//! fake GitHub API.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cr_core::llm::{Completion, LlmClient, LlmRequest, TokenUsage};
use cr_core::registry::LoadedReview;
use cr_core::{Config, Error};
use cr_providers::{Gateway, GatewayConfig};

pub const PR_URL: &str = "https://github.com/octocat/Hello-World/pull/1";
pub const HEAD_SHA: &str = "headsha";
pub const BASE_SHA: &str = "basesha";

/// LLM driver that replays a fixed script of responses.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<String>>,
    calls: AtomicU32,
}

impl ScriptedLlm {
    pub fn new<I: IntoIterator<Item = String>>(responses: I) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _request: &LlmRequest) -> cr_core::Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(text) => Ok(Completion {
                text,
                usage: TokenUsage {
                    prompt_tokens: 100,
                    completion_tokens: 20,
                },
            }),
            None => Err(Error::Llm("scripted responses exhausted".to_string())),
        }
    }
}

/// Encode one `{reasoning, code}` action the way the model would.
pub fn action(reasoning: &str, code: &str) -> String {
    serde_json::json!({"reasoning": reasoning, "code": code}).to_string()
}

fn content_body(text: &str) -> serde_json::Value {
    use base64::Engine;
    serde_json::json!({
        "type": "file",
        "encoding": "base64",
        "content": base64::engine::general_purpose::STANDARD.encode(text),
    })
}

/// Stand up a fake GitHub API serving one PR with a README change.
///
/// Head README has two lines, base README has one; the contents endpoint
/// for head is limited to `max_head_fetches` GETs so cache behavior is
/// observable.
pub async fn mock_github(max_head_fetches: u64) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/pulls/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "title": "Update README",
            "body": "Adds a second line",
            "state": "open",
            "draft": false,
            "head": {"sha": HEAD_SHA, "ref": "feature"},
            "base": {"sha": BASE_SHA, "ref": "main"},
            "user": {"login": "octocat", "avatar_url": null},
            "additions": 1,
            "deletions": 0,
            "changed_files": 1
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/pulls/1/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"filename": "README", "status": "modified", "additions": 1, "deletions": 0,
             "patch": "@@ -1 +1,2 @@\n Hello World!\n+Second line."}
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/pulls/1/commits"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/issues/1/comments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/contents/README"))
        .and(query_param("ref", HEAD_SHA))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(content_body("Hello World!\nSecond line.")),
        )
        .expect(0..=max_head_fetches)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octocat/Hello-World/contents/README"))
        .and(query_param("ref", BASE_SHA))
        .respond_with(ResponseTemplate::new(200).set_body_json(content_body("Hello World!")))
        .mount(&server)
        .await;

    // Anything else under contents/ is missing.
    Mock::given(method("GET"))
        .and(wiremock::matchers::path_regex(
            r"^/repos/octocat/Hello-World/contents/.*$",
        ))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    server
}

pub fn test_config(max_iterations: u32) -> Config {
    let mut config = Config::default();
    config.rlm.max_iterations = max_iterations;
    config.clamp();
    config
}

pub fn gateway_for(server: &MockServer) -> Arc<Gateway> {
    Arc::new(
        Gateway::new(GatewayConfig {
            github_api_base: Some(server.uri()),
            ..Default::default()
        })
        .unwrap(),
    )
}

pub async fn load_review(gateway: &Gateway) -> Arc<LoadedReview> {
    let (pr_ref, pr_info) = gateway.load_pr(PR_URL).await.unwrap();
    Arc::new(LoadedReview {
        pr_ref,
        pr_info,
        created_at: chrono::Utc::now(),
    })
}
