//! Model output parsing: action steps and answer blocks

use serde::Deserialize;

use crate::types::AnswerBlock;
use crate::{Error, Result};

/// One `{reasoning, code}` step from the controller model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionStep {
    pub reasoning: String,
    pub code: String,
}

/// Parse the model's action JSON, tolerating markdown fences and
/// surrounding prose.
pub fn parse_action(text: &str) -> Result<ActionStep> {
    let stripped = strip_code_fences(text);
    if let Ok(step) = serde_json::from_str::<ActionStep>(stripped.trim()) {
        return Ok(normalize(step));
    }
    if let Some(object) = extract_json_object(&stripped) {
        if let Ok(step) = serde_json::from_str::<ActionStep>(&object) {
            return Ok(normalize(step));
        }
    }
    Err(Error::Parse(format!(
        "model output is not a {{reasoning, code}} object: {}",
        text.chars().take(200).collect::<String>()
    )))
}

fn normalize(mut step: ActionStep) -> ActionStep {
    step.code = strip_code_fences(&step.code);
    step
}

/// Remove a single surrounding markdown fence, if present.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the info string ("json", "python", ...) on the opening fence.
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
        .to_string()
}

/// Extract the first balanced `{...}` object from free-form text.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Split free-form answer text into ordered markdown and code blocks.
pub fn parse_answer_blocks(answer: &str) -> Vec<AnswerBlock> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut in_code = false;
    let mut language: Option<String> = None;

    for line in answer.lines() {
        if let Some(info) = line.strip_prefix("```") {
            if in_code {
                blocks.push(AnswerBlock::code(current.join("\n"), language.take()));
                current.clear();
                in_code = false;
            } else {
                if !current.is_empty() {
                    let content = current.join("\n");
                    if !content.trim().is_empty() {
                        blocks.push(AnswerBlock::markdown(content));
                    }
                    current.clear();
                }
                in_code = true;
                let info = info.trim();
                language = if info.is_empty() {
                    None
                } else {
                    Some(info.to_string())
                };
            }
        } else {
            current.push(line);
        }
    }

    if !current.is_empty() {
        let content = current.join("\n");
        if in_code {
            blocks.push(AnswerBlock::code(content, language));
        } else if !content.trim().is_empty() {
            blocks.push(AnswerBlock::markdown(content));
        }
    }

    blocks
}

/// Find the payload of the first fenced block with the given language.
pub fn first_fenced_block<'a>(blocks: &'a [AnswerBlock], language: &str) -> Option<&'a str> {
    blocks
        .iter()
        .find(|b| {
            matches!(b.kind, crate::types::BlockKind::Code)
                && b.language.as_deref() == Some(language)
        })
        .map(|b| b.content.as_str())
}
