//! Wire protocol between the executor and the guest harness
//!
//! JSON lines over the child's stdin/stdout. The guest's print output never
//! appears on this channel; the harness buffers it separately.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Host-to-guest messages
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum HostMessage<'a> {
    Init {
        max_stdout_bytes: usize,
    },
    Exec {
        code: &'a str,
        variables: &'a Map<String, Value>,
    },
    CapabilityResult {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_kind: Option<String>,
    },
}

/// Guest-to-host messages
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum GuestEvent {
    CapabilityCall {
        name: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        kwargs: Map<String, Value>,
    },
    ExecResult {
        kind: String,
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        truncated: bool,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        blocks: Option<Value>,
        #[serde(default)]
        citations: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_message_wire_shape() {
        let msg = HostMessage::Init {
            max_stdout_bytes: 1024,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "init");
        assert_eq!(json["max_stdout_bytes"], 1024);

        let msg = HostMessage::CapabilityResult {
            ok: false,
            value: None,
            error: Some("missing".into()),
            error_kind: Some("NotFound".into()),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "capability_result");
        assert_eq!(json["error_kind"], "NotFound");
        assert!(json.get("value").is_none());
    }

    #[test]
    fn test_guest_event_capability_call() {
        let raw = r#"{"type":"capability_call","name":"fetch_file","args":["README"],"kwargs":{"sha":null}}"#;
        let event: GuestEvent = serde_json::from_str(raw).unwrap();
        match event {
            GuestEvent::CapabilityCall { name, args, kwargs } => {
                assert_eq!(name, "fetch_file");
                assert_eq!(args[0], "README");
                assert!(kwargs["sha"].is_null());
            }
            _ => panic!("expected capability call"),
        }
    }

    #[test]
    fn test_guest_event_exec_result() {
        let raw = r#"{"type":"exec_result","kind":"answer","stdout":"","truncated":false,"blocks":[{"type":"markdown","content":"ok"}],"citations":[]}"#;
        let event: GuestEvent = serde_json::from_str(raw).unwrap();
        match event {
            GuestEvent::ExecResult { kind, blocks, .. } => {
                assert_eq!(kind, "answer");
                assert!(blocks.unwrap().is_array());
            }
            _ => panic!("expected exec result"),
        }
    }
}
