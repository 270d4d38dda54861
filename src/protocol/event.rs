//! Inbound events posted by the script environment.
//!
//! The environment posts loosely-shaped JSON objects. [`InboundEvent`] is
//! that raw shape; [`InboundEvent::parse`] classifies it into a
//! [`ParsedEvent`] the connection can route without string lookups.
//!
//! # Event Shapes
//!
//! | Shape | Classified as |
//! |-------|---------------|
//! | `{ message: "ready" }` | [`ParsedEvent::Ready`] |
//! | `{ message: "connected", connectionId }` | [`ParsedEvent::Connected`] |
//! | `{ message: "invokeHandler", hub, id, result?, error? }` | [`ParsedEvent::InvokeResult`] |
//! | `{ message: "error", error? }` | [`ParsedEvent::Error`] |
//! | `{ data }` | [`ParsedEvent::Received`] |
//! | `{ hub, method, id, arguments }` | [`ParsedEvent::HubMethod`] |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ============================================================================
// Constants
// ============================================================================

/// `message` kind of an invocation completion event.
pub const INVOKE_HANDLER: &str = "invokeHandler";

// ============================================================================
// InboundEvent
// ============================================================================

/// An event as posted by the environment.
///
/// Every field is optional; `data` distinguishes an absent key from an
/// explicit `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Event kind for lifecycle, error and completion events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Hub name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<String>,

    /// Client method name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Callback ID (method calls) or invocation ID (completions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Method call arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<Value>>,

    /// Persistent-connection payload.
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,

    /// Invocation result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,

    /// Server-assigned connection ID.
    #[serde(
        default,
        rename = "connectionId",
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_id: Option<String>,
}

/// Maps a present key to `Some`, even when its value is `null`.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

// ============================================================================
// InboundEvent - Constructors
// ============================================================================

impl InboundEvent {
    /// Creates a lifecycle event with the given `message` kind.
    #[inline]
    #[must_use]
    pub fn message(kind: impl Into<String>) -> Self {
        Self {
            message: Some(kind.into()),
            ..Default::default()
        }
    }

    /// Creates the `ready` event.
    #[inline]
    #[must_use]
    pub fn ready() -> Self {
        Self::message("ready")
    }

    /// Creates a `connected` event carrying the server connection ID.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: Some(connection_id.into()),
            ..Self::message("connected")
        }
    }

    /// Creates an `error` event.
    #[must_use]
    pub fn error(error: Option<Value>) -> Self {
        Self {
            error,
            ..Self::message("error")
        }
    }

    /// Creates a persistent-connection data event.
    #[must_use]
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    /// Creates an invocation completion event.
    #[must_use]
    pub fn invoke_result(
        hub: impl Into<String>,
        id: impl Into<String>,
        result: Option<Value>,
        error: Option<Value>,
    ) -> Self {
        Self {
            hub: Some(hub.into()),
            id: Some(id.into()),
            result,
            error,
            ..Self::message(INVOKE_HANDLER)
        }
    }

    /// Creates a hub-to-client method call event.
    #[must_use]
    pub fn hub_method(
        hub: impl Into<String>,
        method: impl Into<String>,
        callback_id: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            hub: Some(hub.into()),
            method: Some(method.into()),
            id: Some(callback_id.into()),
            arguments: Some(arguments),
            ..Default::default()
        }
    }
}

// ============================================================================
// ParsedEvent
// ============================================================================

/// Classified inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// Environment finished loading the protocol library.
    Ready,
    /// Connection is starting.
    Starting,
    /// Connection established.
    Connected {
        /// Server-assigned connection ID.
        connection_id: Option<String>,
    },
    /// Connection closed.
    Disconnected,
    /// Keep-alive is late.
    ConnectionSlow,
    /// `start` failed.
    ConnectionFailed {
        /// Error payload, if any.
        error: Option<Value>,
    },
    /// Transport lost, reconnecting.
    Reconnecting,
    /// Transport restored.
    Reconnected,
    /// Completion of an `invoke`.
    InvokeResult {
        /// Hub name as posted.
        hub: String,
        /// Invocation ID as posted.
        id: String,
        /// Result value, if any.
        result: Option<Value>,
        /// Error payload, if any.
        error: Option<Value>,
    },
    /// Transport or protocol error.
    Error {
        /// Error payload, if any.
        error: Option<Value>,
    },
    /// Persistent-connection data.
    Received {
        /// Raw payload.
        data: Value,
    },
    /// Server calling a client-side hub method.
    HubMethod {
        /// Hub name as posted.
        hub: String,
        /// Client method name.
        method: String,
        /// Callback ID the call is addressed to.
        callback_id: String,
        /// Call arguments.
        arguments: Vec<Value>,
    },
    /// Unrecognized or incomplete event.
    Unknown {
        /// The `message` kind, when one was present.
        message: Option<String>,
    },
}

// ============================================================================
// Event Parsing Implementation
// ============================================================================

impl InboundEvent {
    /// Classifies the event.
    #[must_use]
    pub fn parse(mut self) -> ParsedEvent {
        let kind = self.message.take();
        match kind.as_deref() {
            Some("ready") => ParsedEvent::Ready,
            Some("starting") => ParsedEvent::Starting,
            Some("connected") => ParsedEvent::Connected {
                connection_id: self.connection_id,
            },
            Some("disconnected") => ParsedEvent::Disconnected,
            Some("connectionSlow") => ParsedEvent::ConnectionSlow,
            Some("connectionFailed") => ParsedEvent::ConnectionFailed {
                error: non_null(self.error),
            },
            Some("reconnecting") => ParsedEvent::Reconnecting,
            Some("reconnected") => ParsedEvent::Reconnected,
            Some("error") => ParsedEvent::Error {
                error: non_null(self.error),
            },
            Some(INVOKE_HANDLER) => match (self.hub, self.id) {
                (Some(hub), Some(id)) => ParsedEvent::InvokeResult {
                    hub,
                    id,
                    result: self.result,
                    error: non_null(self.error),
                },
                _ => ParsedEvent::Unknown {
                    message: Some(INVOKE_HANDLER.to_string()),
                },
            },
            Some(_) => ParsedEvent::Unknown { message: kind },
            None => Self::parse_untagged(self),
        }
    }

    /// Classifies events without a `message` kind.
    fn parse_untagged(self) -> ParsedEvent {
        if let Some(data) = self.data {
            return ParsedEvent::Received { data };
        }

        match (self.hub, self.method, self.id) {
            (Some(hub), Some(method), Some(callback_id)) => ParsedEvent::HubMethod {
                hub,
                method,
                callback_id,
                arguments: self.arguments.unwrap_or_default(),
            },
            _ => ParsedEvent::Unknown { message: None },
        }
    }
}

/// Treats an explicit `null` payload as absent.
#[inline]
fn non_null(value: Option<Value>) -> Option<Value> {
    value.filter(|v| !v.is_null())
}

// ============================================================================
// Tests
// ============================================================================
