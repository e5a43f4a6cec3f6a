//! Answer schema types: blocks, citations, issues, iterations

use serde::{Deserialize, Serialize};

/// Which side of the diff a citation or selection points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Additions,
    Deletions,
    Unified,
}

impl Side {
    pub fn parse(s: &str) -> Self {
        match s {
            "additions" => Side::Additions,
            "deletions" => Side::Deletions,
            _ => Side::Unified,
        }
    }
}

/// Issue severity, closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Lenient parse for model output; unknown strings become `Medium`.
    pub fn parse(s: &str) -> Self {
        match s {
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }
}

/// Issue category, closed set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Bug,
    Investigation,
    Informational,
}

impl Category {
    /// Lenient parse for model output; unknown strings become
    /// `Informational`.
    pub fn parse(s: &str) -> Self {
        match s {
            "bug" => Category::Bug,
            "investigation" => Category::Investigation,
            _ => Category::Informational,
        }
    }
}

/// A validated pointer into the diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffCitation {
    pub path: String,
    pub side: Side,
    pub start_line: u32,
    pub end_line: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

/// How much of the diff the user had selected when asking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMode {
    Range,
    SingleLine,
    Hunk,
    File,
    Changeset,
}

/// User selection in the diff viewer, anchoring a question
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSelection {
    pub path: String,
    pub side: Side,
    pub start_line: u32,
    pub end_line: u32,
    pub mode: SelectionMode,
}

/// A block in the final answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerBlock {
    #[serde(rename = "type")]
    pub kind: BlockKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Markdown,
    Code,
}

impl AnswerBlock {
    pub fn markdown(content: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Markdown,
            content: content.into(),
            language: None,
        }
    }

    pub fn code(content: impl Into<String>, language: Option<String>) -> Self {
        Self {
            kind: BlockKind::Code,
            content: content.into(),
            language,
        }
    }
}

/// One issue found by the automated review
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewIssue {
    pub title: String,
    pub severity: Severity,
    pub category: Category,
    pub explanation_markdown: String,
    pub citations: Vec<DiffCitation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fix_suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests_to_add: Vec<String>,
}

/// The structured result of an automated review
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReport {
    pub issues: Vec<ReviewIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Issues discarded because no citation survived validation
    #[serde(default)]
    pub dropped: u32,
}

/// One reasoning/code/observation triple in a session transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    /// 1-based position in the transcript
    pub index: u32,
    /// Iteration budget at the time of this step
    pub max: u32,
    pub reasoning: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// One prior turn of the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}
