//! Prompt assembly for the controller loop

use cr_providers::PRInfo;

use crate::types::{ChatMessage, DiffSelection, Iteration};

/// Per-file cap on patch text included in the prompt.
const MAX_PATCH_CHARS: usize = 10_000;
/// Cap on prior observation text replayed into the prompt.
const MAX_OBSERVATION_CHARS: usize = 5_000;

/// Fixed system prompt describing capabilities and the output schema.
pub const SYSTEM_PROMPT: &str = r#"You are a code-review engine working on one pull request.

You operate in iterations. Each iteration you return strict JSON:
{"reasoning": "...", "code": "..."}
where `code` is Python executed in a sandboxed interpreter. State persists
across iterations.

Available functions inside the sandbox:
- fetch_file(path, sha=None) -> str: file contents at a commit. `sha` may be
  "base", "head", or one of the two commit SHAs; default is head.
- search(query, sha=None) -> list[{"path", "line", "snippet"}]: ranked text
  search over the repository.
- llm_query(prompt, *, system=None) -> str: delegate a focused sub-question
  to a language model. No tool access; budget is limited.
- answer(blocks, citations=None): finish with your final answer. `blocks` is
  a list of {"type": "markdown"|"code", "content": str, "language": str?}.
  `citations` is a list of {"path", "side", "startLine", "endLine"} pointing
  into the diff. Calling answer ends the session.

Ground every claim in file contents or the diff. Verify hypotheses by
fetching and inspecting code before answering. When you have enough
evidence, call answer(...). Return strict JSON only."#;

/// Stricter retry instruction appended after a parse failure.
pub const STRICT_RETRY_PROMPT: &str = "Your previous reply was not valid JSON. Reply with ONLY a \
JSON object of the exact shape {\"reasoning\": string, \"code\": string}. No markdown fences, no \
prose outside the JSON.";

/// Prompt for the forced synthesis call when the budget is exhausted.
pub const FORCED_ANSWER_PROMPT: &str = "The iteration budget is exhausted. You must answer now. \
Using only the transcript above, write the best final answer you can. Reply in plain markdown \
(fenced code blocks allowed), not JSON.";

/// Canonical instructions for the automated review pipeline.
pub const REVIEW_PROMPT: &str = r#"Review this change set for problems.

Identify distinct issues: bugs (high-confidence logic or security errors),
investigations (potential issues needing confirmation), and informational
notes. When done, call answer(...) with exactly one code block of language
"json" whose payload is:
{"issues": [{
  "title": str,
  "severity": "low" | "medium" | "high" | "critical",
  "category": "bug" | "investigation" | "informational",
  "explanationMarkdown": str,
  "citations": [{"path": str, "side": "additions"|"deletions"|"unified",
                 "startLine": int, "endLine": int}],
  "fixSuggestions": [str],
  "testsToAdd": [str]
}]}

Every issue needs at least one citation pointing at lines that are visible
in the diff. Keep each explanationMarkdown under 2048 characters. Only cite
files that are part of the change set."#;

/// Render PR metadata and the unified diff, truncated per file.
pub fn build_diff_context(pr: &PRInfo) -> String {
    let mut parts = Vec::new();
    parts.push(format!(
        "## PR #{}: {}\n{}\n",
        pr.number,
        pr.title,
        if pr.body.is_empty() {
            "No description"
        } else {
            &pr.body
        }
    ));
    parts.push(format!(
        "Branches: {} <- {} | base {} | head {}",
        pr.base_ref, pr.head_ref, pr.base_sha, pr.head_sha
    ));
    parts.push(format!("## Changed files ({}):", pr.files.len()));
    for file in &pr.files {
        parts.push(format!(
            "- {} ({}) +{} -{}",
            file.path,
            file.status.as_str(),
            file.additions,
            file.deletions
        ));
    }
    parts.push("---".to_string());

    for file in &pr.files {
        parts.push(format!("## File: {} ({})", file.path, file.status.as_str()));
        match &file.patch {
            Some(patch) => {
                parts.push(truncate_chars(patch, MAX_PATCH_CHARS));
            }
            None => {
                parts.push(
                    "(no patch available - fetch_file to inspect contents)".to_string(),
                );
            }
        }
        parts.push("---".to_string());
    }

    parts.join("\n")
}

/// Format prior conversation turns.
pub fn format_conversation(conversation: &[ChatMessage]) -> String {
    if conversation.is_empty() {
        return "No previous conversation.".to_string();
    }
    let mut lines = vec!["Previous conversation:".to_string()];
    for msg in conversation {
        lines.push(format!("{}: {}", msg.role.to_uppercase(), msg.content));
    }
    lines.join("\n")
}

/// Format the user's diff selection anchor.
pub fn format_selection(selection: Option<&DiffSelection>) -> String {
    match selection {
        None => "No specific selection (reviewing the entire changeset).".to_string(),
        Some(sel) => format!(
            "Selected: {} ({}) lines {}-{}",
            sel.path,
            match sel.side {
                crate::types::Side::Additions => "additions",
                crate::types::Side::Deletions => "deletions",
                crate::types::Side::Unified => "unified",
            },
            sel.start_line,
            sel.end_line
        ),
    }
}

/// Replay the transcript so iteration k+1 sees iteration k's observation.
pub fn format_transcript(transcript: &[Iteration]) -> String {
    if transcript.is_empty() {
        return String::new();
    }
    let mut parts = Vec::new();
    for step in transcript {
        parts.push(format!("=== Iteration {}/{} ===", step.index, step.max));
        if !step.reasoning.is_empty() {
            parts.push(format!("Reasoning: {}", step.reasoning));
        }
        parts.push(format!("Code:\n```python\n{}\n```", step.code));
        if let Some(error) = &step.error {
            parts.push(format!("Error: {error}"));
        }
        if let Some(output) = &step.output {
            parts.push(format!(
                "Observation:\n{}",
                truncate_chars(output, MAX_OBSERVATION_CHARS)
            ));
        }
    }
    parts.join("\n")
}

/// Assemble the full action prompt for one iteration.
pub fn build_action_prompt(
    diff_context: &str,
    conversation: &[ChatMessage],
    selection: Option<&DiffSelection>,
    transcript: &[Iteration],
    question: &str,
    iteration: u32,
    budget: u32,
    retry_hint: bool,
) -> String {
    let mut parts = vec![diff_context.to_string()];
    parts.push(format_conversation(conversation));
    parts.push(format_selection(selection));
    let history = format_transcript(transcript);
    if !history.is_empty() {
        parts.push(history);
    }
    parts.push(format!("Iteration {iteration}/{budget}."));
    parts.push(format!("Question: {question}"));
    if retry_hint {
        parts.push(STRICT_RETRY_PROMPT.to_string());
    }
    parts.join("\n\n")
}

/// Assemble the forced synthesis prompt after the budget is hit.
pub fn build_forced_answer_prompt(
    diff_context: &str,
    transcript: &[Iteration],
    question: &str,
) -> String {
    format!(
        "{}\n\n{}\n\nQuestion: {}\n\n{}",
        diff_context,
        format_transcript(transcript),
        question,
        FORCED_ANSWER_PROMPT
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max).collect();
    format!("{truncated}\n... (truncated)")
}
