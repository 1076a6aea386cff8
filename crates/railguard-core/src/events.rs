//! Typed wire events exchanged over the duplex channel
//!
//! Events are JSON objects internally tagged by `"type"`. Every server
//! event carries the originating message identifier and session
//! identifier so clients can correlate and deduplicate.

use crate::types::{DetectorOverrides, RailState, TurnOutcome, Verdict};
use serde::{Deserialize, Serialize};

/// Client → server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Submit a chat message through the rail
    ChatMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,

        /// Idempotence key, generated server-side when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,

        text: String,

        /// Overrides for this message only
        #[serde(default, skip_serializing_if = "DetectorOverrides::is_empty")]
        config: DetectorOverrides,
    },

    /// Run detectors without the rail
    DetectionRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,

        text: String,

        /// Restrict to these detectors (all registered when absent)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detectors: Option<Vec<String>>,
    },
}

impl ClientEvent {
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::ChatMessage { message_id, .. } | Self::DetectionRequest { message_id, .. } => {
                message_id.as_deref()
            }
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::ChatMessage { session_id, .. } | Self::DetectionRequest { session_id, .. } => {
                session_id.as_deref()
            }
        }
    }
}

/// Server → client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Terminal outcome of a chat message
    ChatResponse(TurnOutcome),

    /// Standalone verdict for a detection-only request
    DetectionResult {
        session_id: String,
        message_id: String,
        verdict: Verdict,
    },

    /// Non-terminal rail progress
    StatusUpdate {
        session_id: String,
        message_id: String,
        state: RailState,
    },

    Error {
        session_id: String,
        message_id: String,
        code: String,
        message: String,
    },
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ChatResponse(_) => "chat_response",
            Self::DetectionResult { .. } => "detection_result",
            Self::StatusUpdate { .. } => "status_update",
            Self::Error { .. } => "error",
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            Self::ChatResponse(outcome) => &outcome.message_id,
            Self::DetectionResult { message_id, .. }
            | Self::StatusUpdate { message_id, .. }
            | Self::Error { message_id, .. } => message_id,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::ChatResponse(outcome) => &outcome.session_id,
            Self::DetectionResult { session_id, .. }
            | Self::StatusUpdate { session_id, .. }
            | Self::Error { session_id, .. } => session_id,
        }
    }

    /// Whether this event answers its message for good
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::StatusUpdate { .. })
    }

    /// Key used to drop redelivered events. Progress updates are never deduplicated.
    pub fn dedupe_key(&self) -> Option<(String, &'static str)> {
        match self {
            Self::StatusUpdate { .. } => None,
            other => Some((other.message_id().to_string(), other.event_type())),
        }
    }

    /// Build an error event carrying only client-safe text
    pub fn error(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        err: &crate::Error,
    ) -> Self {
        Self::Error {
            session_id: session_id.into(),
            message_id: message_id.into(),
            code: err.code().to_string(),
            message: err.public_message(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_tagging() {
        let json = r#"{"type":"chat_message","session_id":"s1","text":"hi","config":{"pii":{"threshold":0.9}}}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match &event {
            ClientEvent::ChatMessage { text, config, .. } => {
                assert_eq!(text, "hi");
                assert_eq!(config["pii"].threshold, Some(0.9));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(event.session_id(), Some("s1"));
        assert_eq!(event.message_id(), None);
    }

    #[test]
    fn test_status_update_has_no_dedupe_key() {
        let status = ServerEvent::StatusUpdate {
            session_id: "s".into(),
            message_id: "m".into(),
            state: RailState::Generating,
        };
        assert!(status.dedupe_key().is_none());
        assert!(!status.is_terminal());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["type"], "status_update");
        assert_eq!(json["state"], "generating");
    }

    #[test]
    fn test_error_event_hides_detail() {
        let err = crate::Error::generation("socket reset by peer");
        let event = ServerEvent::error("s", "m", &err);
        assert_eq!(event.dedupe_key(), Some(("m".to_string(), "error")));
        match event {
            ServerEvent::Error { code, message, .. } => {
                assert_eq!(code, "generation_failure");
                assert_eq!(message, "processing error");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
