//! Follow-up suggestion generation
//!
//! Single-shot sub-model call producing a handful of short next questions
//! for the UI. Any failure falls back to a static list; suggestions are
//! never load-bearing.

use cr_providers::PRInfo;
use serde_json::Value;
use tracing::debug;

use crate::llm::{LlmClient, LlmRequest};
use crate::types::ChatMessage;

const SUGGESTION_SYSTEM: &str = "Generate 4-5 short follow-up questions or actions for a code \
review conversation. Each suggestion is at most 5 words. Reply with a JSON array of strings and \
nothing else.";

/// Fallback suggestions when the model call fails.
pub const FALLBACK_SUGGESTIONS: [&str; 4] = [
    "Explain changes",
    "Identify bugs",
    "Suggest tests",
    "Performance check",
];

/// Generate follow-up suggestions, falling back to the static list.
pub async fn generate(
    llm: &dyn LlmClient,
    sub_model: &str,
    pr: &PRInfo,
    conversation: &[ChatMessage],
    last_answer: &str,
) -> Vec<String> {
    let recent: Vec<String> = conversation
        .iter()
        .rev()
        .take(3)
        .rev()
        .map(|m| format!("{}: {}", m.role, clamp(&m.content, 200)))
        .collect();

    let prompt = format!(
        "PR: {}\n{}\n\nRecent conversation:\n{}\n\nLast answer:\n{}",
        pr.title,
        clamp(&pr.body, 500),
        if recent.is_empty() {
            "(none)".to_string()
        } else {
            recent.join("\n")
        },
        clamp(last_answer, 500),
    );

    let request = LlmRequest::new(sub_model, prompt)
        .with_system(SUGGESTION_SYSTEM)
        .with_json_response()
        .with_max_output_tokens(256);

    match llm.complete(&request).await {
        Ok(completion) => parse_suggestions(&completion.text)
            .unwrap_or_else(|| FALLBACK_SUGGESTIONS.map(String::from).to_vec()),
        Err(err) => {
            debug!(%err, "suggestion call failed, using fallback");
            FALLBACK_SUGGESTIONS.map(String::from).to_vec()
        }
    }
}

fn parse_suggestions(text: &str) -> Option<Vec<String>> {
    let stripped = crate::rlm::answer::strip_code_fences(text);
    let value: Value = serde_json::from_str(stripped.trim()).ok()?;
    let items = value.as_array()?;
    let suggestions: Vec<String> = items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
        .collect();
    if suggestions.is_empty() {
        None
    } else {
        Some(suggestions)
    }
}

fn clamp(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}
