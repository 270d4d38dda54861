//! Envelopes exchanged with an out-of-process script runtime.
//!
//! Used by [`WsEnvironment`](crate::transport::WsEnvironment) when the
//! script environment lives in another process and talks over a local
//! WebSocket.
//!
//! # Format
//!
//! Local → runtime:
//! ```json
//! { "id": "uuid", "type": "load", "scripts": ["..."], "bootstrap": "...", "origin": "http://host" }
//! { "id": "uuid", "type": "submit", "script": "start()", "wantsResult": false }
//! ```
//!
//! Runtime → local:
//! ```json
//! { "type": "result", "id": "uuid", "result": { ... } }
//! { "type": "event", "event": { "message": "connected", "connectionId": "..." } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::MessageId;

use super::InboundEvent;

// ============================================================================
// Outbound
// ============================================================================

/// An envelope sent to the script runtime.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    /// Load the protocol library and the bootstrap script.
    Load {
        /// Envelope ID.
        id: MessageId,
        /// Script asset names, in load order.
        scripts: Vec<String>,
        /// Bootstrap source run after the assets.
        bootstrap: String,
        /// Origin the runtime should present.
        #[serde(skip_serializing_if = "Option::is_none")]
        origin: Option<String>,
    },

    /// Execute a command script.
    Submit {
        /// Envelope ID, echoed by the `result` envelope.
        id: MessageId,
        /// Script statement.
        script: String,
        /// Whether the caller waits for a `result` envelope.
        #[serde(rename = "wantsResult")]
        wants_result: bool,
    },
}

impl Outbound {
    /// Returns the envelope ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> MessageId {
        match self {
            Self::Load { id, .. } | Self::Submit { id, .. } => *id,
        }
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// An envelope received from the script runtime.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Inbound {
    /// Completion of a `submit`.
    Result {
        /// ID of the `submit` envelope.
        id: MessageId,
        /// Script result, if any.
        #[serde(default)]
        result: Option<Value>,
    },

    /// Event posted by the bootstrap script.
    Event {
        /// The posted event.
        event: InboundEvent,
    },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_submit_serialization() {
        let id = MessageId::generate();
        let envelope = Outbound::Submit {
            id,
            script: "start()".to_string(),
            wants_result: false,
        };

        let json = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(json["type"], "submit");
        assert_eq!(json["script"], "start()");
        assert_eq!(json["wantsResult"], false);
        assert_eq!(json["id"], id.to_string());
    }

    #[test]
    fn test_load_omits_missing_origin() {
        let envelope = Outbound::Load {
            id: MessageId::generate(),
            scripts: vec!["a.js".to_string()],
            bootstrap: String::new(),
            origin: None,
        };

        let json = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(json["type"], "load");
        assert!(json.get("origin").is_none());
    }

    #[test]
    fn test_result_parsing() {
        let id = MessageId::generate();
        let text = json!({ "type": "result", "id": id.to_string(), "result": 5 }).to_string();
        let inbound: Inbound = serde_json::from_str(&text).expect("parse");
        assert_eq!(
            inbound,
            Inbound::Result {
                id,
                result: Some(json!(5))
            }
        );
    }

    #[test]
    fn test_event_parsing() {
        let text = r#"{"type":"event","event":{"message":"connected","connectionId":"c1"}}"#;
        let inbound: Inbound = serde_json::from_str(text).expect("parse");
        assert_eq!(
            inbound,
            Inbound::Event {
                event: InboundEvent::connected("c1")
            }
        );
    }
}
