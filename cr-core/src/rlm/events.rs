//! Streamed session events and their SSE encoding

use serde::Serialize;

use crate::types::{AnswerBlock, DiffCitation, Iteration};

/// One frame in a session's event stream.
///
/// Ordering guarantee per session: `start` first, `iteration` frames in
/// strictly increasing index order, all of them before the first `block`,
/// and `end` always last.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    Start {
        question: String,
    },
    Iteration(Iteration),
    Block {
        index: usize,
        block: AnswerBlock,
    },
    Error {
        error: String,
        message: String,
    },
    End {
        #[serde(skip_serializing_if = "Vec::is_empty")]
        citations: Vec<DiffCitation>,
    },
}

impl SessionEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        SessionEvent::Error {
            error: code.to_string(),
            message: message.into(),
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, SessionEvent::End { .. })
    }
}

/// Encode an event as a server-sent-events frame: `data: <json>\n\n`.
pub fn sse_frame(event: &SessionEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|_| {
        r#"{"type":"error","data":{"error":"encode","message":"event encoding failed"}}"#
            .to_string()
    });
    format!("data: {json}\n\n")
}
