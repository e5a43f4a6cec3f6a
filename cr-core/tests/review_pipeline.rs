//! End-to-end review pipeline: structured issues out of the canonical
//! review session, with citation validation against fetched blobs.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use common::{action, gateway_for, load_review, mock_github, test_config, ScriptedLlm};
use cr_core::review::ReviewPipeline;
use cr_core::rlm::Controller;
use cr_core::types::{Category, Severity, Side};

fn review_answer_code(issues_json: &str) -> String {
    format!(
        r#"
payload = '''{issues_json}'''
answer([
    {{"type": "markdown", "content": "Reviewed the change set."}},
    {{"type": "code", "content": payload, "language": "json"}},
])
"#
    )
}

#[tokio::test]
async fn review_validates_and_repairs_citations() {
    let server = mock_github(10).await;
    let gateway = gateway_for(&server);
    let loaded = load_review(&gateway).await;

    let issues = r#"{"issues": [
        {"title": "Second line lacks punctuation",
         "severity": "low",
         "category": "informational",
         "explanationMarkdown": "The new line ends without a period, unlike the first.",
         "citations": [{"path": "README", "side": "unified", "startLine": 2, "endLine": 2}]},
        {"title": "Imaginary problem",
         "severity": "high",
         "category": "bug",
         "explanationMarkdown": "Cites a file that is not part of the change.",
         "citations": [{"path": "ghost.rs", "side": "additions", "startLine": 1, "endLine": 1}]}
    ]}"#;

    let llm = ScriptedLlm::new([action("emit the report", &review_answer_code(issues))]);
    let controller = Controller::new(llm, Arc::clone(&gateway), test_config(3));
    let pipeline = ReviewPipeline::new(controller, gateway);

    let report = pipeline
        .review(loaded, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.dropped, 1);
    let issue = &report.issues[0];
    assert_eq!(issue.severity, Severity::Low);
    assert_eq!(issue.category, Category::Informational);
    // Head README has two lines, so the unified citation lands on additions.
    assert_eq!(issue.citations[0].side, Side::Additions);
    assert_eq!(issue.citations[0].start_line, 2);
    assert_eq!(report.summary.as_deref(), Some("Reviewed the change set."));
}

#[tokio::test]
async fn review_coerces_unknown_enum_strings() {
    let server = mock_github(10).await;
    let gateway = gateway_for(&server);
    let loaded = load_review(&gateway).await;

    let issues = r#"{"issues": [
        {"title": "Style nit",
         "severity": "cosmic",
         "category": "style",
         "explanationMarkdown": "Unknown enum strings must coerce, not fail.",
         "citations": ["README:1-1"]}
    ]}"#;

    let llm = ScriptedLlm::new([action("emit", &review_answer_code(issues))]);
    let controller = Controller::new(llm, Arc::clone(&gateway), test_config(3));
    let pipeline = ReviewPipeline::new(controller, gateway);

    let report = pipeline
        .review(loaded, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].severity, Severity::Medium);
    assert_eq!(report.issues[0].category, Category::Informational);
    // String citations default to unified and get a side inferred.
    assert_eq!(report.issues[0].citations[0].side, Side::Additions);
}

#[tokio::test]
async fn review_without_json_block_reports_zero_issues() {
    let server = mock_github(10).await;
    let gateway = gateway_for(&server);
    let loaded = load_review(&gateway).await;

    let llm = ScriptedLlm::new([action(
        "nothing to report",
        r#"answer([{"type": "markdown", "content": "No issues."}])"#,
    )]);
    let controller = Controller::new(llm, Arc::clone(&gateway), test_config(3));
    let pipeline = ReviewPipeline::new(controller, gateway);

    let report = pipeline
        .review(loaded, CancellationToken::new())
        .await
        .unwrap();
    assert!(report.issues.is_empty());
    assert_eq!(report.dropped, 0);
    assert_eq!(report.summary.as_deref(), Some("No issues."));
}

#[tokio::test]
async fn review_drops_citation_beyond_both_sides() {
    let server = mock_github(10).await;
    let gateway = gateway_for(&server);
    let loaded = load_review(&gateway).await;

    // Head has 2 lines and base has 1, so line 40 exists on neither side.
    let issues = r#"{"issues": [
        {"title": "Out of range",
         "severity": "medium",
         "category": "investigation",
         "explanationMarkdown": "Cites far past the end of the file.",
         "citations": [{"path": "README", "side": "unified", "startLine": 40, "endLine": 41}]}
    ]}"#;

    let llm = ScriptedLlm::new([action("emit", &review_answer_code(issues))]);
    let controller = Controller::new(llm, Arc::clone(&gateway), test_config(3));
    let pipeline = ReviewPipeline::new(controller, gateway);

    let report = pipeline
        .review(loaded, CancellationToken::new())
        .await
        .unwrap();
    assert!(report.issues.is_empty());
    assert_eq!(report.dropped, 1);
}
