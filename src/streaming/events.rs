//! Outbound events and their wire envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event delivered to session subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HubEvent {
    StreamingStarted,
    StreamingChunk {
        text: String,
    },
    FinalResponse {
        text: String,
    },
    /// Plain text payloads travel as JSON strings
    ToolCall {
        tool: String,
        input: serde_json::Value,
        output: serde_json::Value,
    },
    StreamingCompleted,
    Error {
        message: String,
    },
}

impl HubEvent {
    pub fn chunk<S: Into<String>>(text: S) -> Self {
        Self::StreamingChunk { text: text.into() }
    }

    pub fn final_response<S: Into<String>>(text: S) -> Self {
        Self::FinalResponse { text: text.into() }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            HubEvent::StreamingStarted => "streamingStarted",
            HubEvent::StreamingChunk { .. } => "streamingChunk",
            HubEvent::FinalResponse { .. } => "finalResponse",
            HubEvent::ToolCall { .. } => "toolCall",
            HubEvent::StreamingCompleted => "streamingCompleted",
            HubEvent::Error { .. } => "error",
        }
    }
}

/// Envelope sent to a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubMessage {
    /// Absent for caller-only events that are not tied to a session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: HubEvent,
}

impl HubMessage {
    pub fn for_session(session_id: &str, event: HubEvent) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            timestamp: Utc::now(),
            event,
        }
    }

    pub fn direct(event: HubEvent) -> Self {
        Self {
            session_id: None,
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_tool_call_serializes_as_strings() {
        let event = HubEvent::ToolCall {
            tool: "WebSearch".to_string(),
            input: json!("entropy"),
            output: json!("Shannon 1948"),
        };

        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"event":"toolCall","tool":"WebSearch","input":"entropy","output":"Shannon 1948"}"#
        );
    }

    #[test]
    fn test_event_wire_names() {
        let value = serde_json::to_value(HubEvent::chunk("Hel")).unwrap();
        assert_eq!(value, json!({"event": "streamingChunk", "text": "Hel"}));

        let value = serde_json::to_value(HubEvent::StreamingCompleted).unwrap();
        assert_eq!(value, json!({"event": "streamingCompleted"}));

        assert_eq!(HubEvent::final_response("x").name(), "finalResponse");
    }

    #[test]
    fn test_message_envelope_flattens_event() {
        let message = HubMessage::for_session("s1", HubEvent::error("boom"));
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["session_id"], "s1");
        assert_eq!(value["event"], "error");
        assert_eq!(value["message"], "boom");
        assert!(value["timestamp"].is_string());

        let parsed: HubMessage = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.event, HubEvent::error("boom"));
    }

    #[test]
    fn test_direct_message_omits_session() {
        let message = HubMessage::direct(HubEvent::ToolCall {
            tool: "WebSearch".to_string(),
            input: json!("entropy"),
            output: json!("result"),
        });
        let value = serde_json::to_value(&message).unwrap();
        assert!(value.get("session_id").is_none());
        assert_eq!(value["event"], "toolCall");
        assert_eq!(value["tool"], "WebSearch");
    }
}
