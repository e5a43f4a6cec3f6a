//! Automated review pipeline
//!
//! One-shot orchestration: run the controller with the canonical review
//! prompt, parse the structured answer, and validate every citation with a
//! single repair pass. Issues left without a valid citation are dropped and
//! counted; partial success is not an error.

use std::collections::HashMap;
use std::sync::Arc;

use cr_providers::{FileStatus, Gateway};
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::LoadedReview;
use crate::rlm::answer::first_fenced_block;
use crate::rlm::prompt::REVIEW_PROMPT;
use crate::rlm::{AskParams, Controller};
use crate::types::{
    BlockKind, Category, DiffCitation, ReviewIssue, ReviewReport, Severity,
};
use crate::Result;

use super::citations::{parse_raw_citations, repair_citation, LineCounts};

/// Cap on `explanation_markdown` length.
const MAX_EXPLANATION_BYTES: usize = 2048;

/// Loosely-shaped issue as the model emits it; coerced into the closed
/// sets on ingest.
#[derive(Debug, Deserialize)]
struct RawIssue {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, alias = "explanationMarkdown", alias = "explanation")]
    explanation_markdown: Option<String>,
    #[serde(default)]
    citations: Vec<Value>,
    #[serde(default, alias = "fixSuggestions")]
    fix_suggestions: Vec<Value>,
    #[serde(default, alias = "testsToAdd")]
    tests_to_add: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct IssuesEnvelope {
    #[serde(default)]
    issues: Vec<RawIssue>,
}

/// Runs automated reviews through the controller.
pub struct ReviewPipeline {
    controller: Controller,
    gateway: Arc<Gateway>,
}

impl ReviewPipeline {
    pub fn new(controller: Controller, gateway: Arc<Gateway>) -> Self {
        Self {
            controller,
            gateway,
        }
    }

    /// Produce a validated review report for a loaded pull request.
    pub async fn review(
        &self,
        loaded: Arc<LoadedReview>,
        cancel: CancellationToken,
    ) -> Result<ReviewReport> {
        let outcome = self
            .controller
            .answer(
                Arc::clone(&loaded),
                AskParams::question(REVIEW_PROMPT),
                cancel,
            )
            .await;

        let Some(payload) = first_fenced_block(&outcome.blocks, "json") else {
            debug!("terminal answer carried no json block; reporting zero issues");
            return Ok(ReviewReport {
                issues: Vec::new(),
                summary: summary_from_blocks(&outcome.blocks),
                dropped: 0,
            });
        };

        let envelope: IssuesEnvelope = match serde_json::from_str(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(%err, "review json block failed to parse");
                return Ok(ReviewReport {
                    issues: Vec::new(),
                    summary: summary_from_blocks(&outcome.blocks),
                    dropped: 0,
                });
            }
        };

        let parsed: Vec<(ReviewIssue, Vec<DiffCitation>)> =
            envelope.issues.into_iter().map(ingest_issue).collect();

        let counts = self.line_counts_for(&loaded, &parsed).await;

        let mut issues = Vec::new();
        let mut dropped = 0u32;
        for (mut issue, raw_citations) in parsed {
            issue.citations = raw_citations
                .into_iter()
                .filter_map(|c| repair_citation(c, &loaded.pr_info, &counts))
                .collect();
            if issue.citations.is_empty() {
                dropped += 1;
                continue;
            }
            issues.push(issue);
        }

        info!(
            review_id = %loaded.pr_info.review_id,
            issues = issues.len(),
            dropped,
            "review complete"
        );
        Ok(ReviewReport {
            issues,
            summary: summary_from_blocks(&outcome.blocks),
            dropped,
        })
    }

    /// Fetch old/new line counts for every cited path in the change set.
    async fn line_counts_for(
        &self,
        loaded: &LoadedReview,
        parsed: &[(ReviewIssue, Vec<DiffCitation>)],
    ) -> HashMap<String, LineCounts> {
        let mut counts = HashMap::new();
        for (_, citations) in parsed {
            for citation in citations {
                let Some(file) = loaded.pr_info.file(&citation.path) else {
                    continue;
                };
                if counts.contains_key(&citation.path) {
                    continue;
                }

                let old = if file.status == FileStatus::Added {
                    Some(0)
                } else {
                    self.line_count(loaded, &citation.path, &loaded.pr_info.base_sha)
                        .await
                };
                let new = if file.status == FileStatus::Removed {
                    Some(0)
                } else {
                    self.line_count(loaded, &citation.path, &loaded.pr_info.head_sha)
                        .await
                };
                if let (Some(old), Some(new)) = (old, new) {
                    counts.insert(citation.path.clone(), LineCounts { old, new });
                }
            }
        }
        counts
    }

    async fn line_count(&self, loaded: &LoadedReview, path: &str, sha: &str) -> Option<u32> {
        match self.gateway.fetch_file(&loaded.pr_ref, path, sha).await {
            Ok(file) => Some(file.contents.lines().count() as u32),
            Err(err) => {
                debug!(path, %err, "could not fetch file for citation validation");
                None
            }
        }
    }
}

/// Coerce one raw issue into the closed sets, keeping its citations raw.
fn ingest_issue(raw: RawIssue) -> (ReviewIssue, Vec<DiffCitation>) {
    let citations = parse_raw_citations(&raw.citations);
    let mut explanation = raw.explanation_markdown.unwrap_or_default();
    if explanation.len() > MAX_EXPLANATION_BYTES {
        explanation = truncate_on_char_boundary(&explanation, MAX_EXPLANATION_BYTES);
    }
    let issue = ReviewIssue {
        title: raw.title.unwrap_or_else(|| "Review note".to_string()),
        severity: Severity::parse(raw.severity.as_deref().unwrap_or("")),
        category: Category::parse(raw.category.as_deref().unwrap_or("")),
        explanation_markdown: explanation,
        citations: Vec::new(),
        fix_suggestions: string_list(raw.fix_suggestions),
        tests_to_add: string_list(raw.tests_to_add),
    };
    (issue, citations)
}

fn string_list(values: Vec<Value>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s),
            other => serde_json::to_string(&other).ok(),
        })
        .collect()
}

fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> String {
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Use the first markdown block of the answer as the report summary.
fn summary_from_blocks(blocks: &[crate::types::AnswerBlock]) -> Option<String> {
    blocks
        .iter()
        .find(|b| b.kind == BlockKind::Markdown && !b.content.trim().is_empty())
        .map(|b| b.content.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnswerBlock;

    #[test]
    fn test_ingest_issue_coerces_enums() {
        let raw: RawIssue = serde_json::from_value(serde_json::json!({
            "title": "Possible overflow",
            "severity": "sky-high",
            "category": "style",
            "explanationMarkdown": "May overflow on 32-bit.",
            "citations": ["src/lib.rs:10-12"],
            "fixSuggestions": ["use checked_add"]
        }))
        .unwrap();
        let (issue, citations) = ingest_issue(raw);
        assert_eq!(issue.severity, Severity::Medium);
        assert_eq!(issue.category, Category::Informational);
        assert_eq!(issue.fix_suggestions, vec!["use checked_add".to_string()]);
        assert_eq!(citations.len(), 1);
    }

    #[test]
    fn test_ingest_issue_clamps_explanation() {
        let raw: RawIssue = serde_json::from_value(serde_json::json!({
            "title": "Long",
            "severity": "low",
            "category": "bug",
            "explanation": "x".repeat(5000),
        }))
        .unwrap();
        let (issue, _) = ingest_issue(raw);
        assert_eq!(issue.explanation_markdown.len(), MAX_EXPLANATION_BYTES);
        assert_eq!(issue.category, Category::Bug);
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let s = "aé".repeat(100);
        let truncated = truncate_on_char_boundary(&s, 7);
        assert!(truncated.len() <= 7);
        assert!(s.starts_with(&truncated));
    }

    #[test]
    fn test_summary_from_blocks() {
        let blocks = vec![
            AnswerBlock::code("{}", Some("json".into())),
            AnswerBlock::markdown("Two issues found."),
        ];
        assert_eq!(
            summary_from_blocks(&blocks).as_deref(),
            Some("Two issues found.")
        );
        assert_eq!(summary_from_blocks(&[]), None);
    }

    #[test]
    fn test_issues_envelope_tolerates_missing_fields() {
        let envelope: IssuesEnvelope =
            serde_json::from_str(r#"{"issues": [{"title": "bare"}]}"#).unwrap();
        assert_eq!(envelope.issues.len(), 1);
        let (issue, citations) = ingest_issue(envelope.issues.into_iter().next().unwrap());
        assert_eq!(issue.title, "bare");
        assert!(citations.is_empty());
    }
}
