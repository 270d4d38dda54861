//! Error types for the SignalR bridge.
//!
//! Synchronous precondition failures (a hub with no connection, an invalid
//! builder configuration) are returned as [`Error`]. Everything that happens
//! after a command reaches the script environment is reported through the
//! connection's callback slots instead.
//!
//! # Usage
//!
//! ```ignore
//! use signalr_bridge::{Error, Result};
//!
//! fn example(hub: &Hub) -> Result<()> {
//!     hub.invoke("send", vec![json!("hi")], None)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Hub | [`Error::NotConnected`], [`Error::Hub`] |
//! | Environment | [`Error::Environment`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned by [`ConnectionBuilder::build`](crate::ConnectionBuilder::build)
    /// when the base URL or environment is missing or invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Hub Errors
    // ========================================================================
    /// Hub is not attached to a connection.
    ///
    /// Returned by `invoke` before any command is issued.
    #[error("Hub '{hub}' is not attached to a connection")]
    NotConnected {
        /// Name of the detached hub.
        hub: String,
    },

    /// Server-side hub method failed.
    ///
    /// Only produced by the awaitable [`Hub::call`](crate::Hub::call) form;
    /// callback-style invocations receive the raw error value.
    #[error("Hub invocation failed: {message}")]
    Hub {
        /// Error message reported by the server.
        message: String,
        /// Full error payload as posted by the environment.
        data: Value,
    },

    // ========================================================================
    // Environment Errors
    // ========================================================================
    /// Script environment failed to initialize or execute.
    #[error("Environment error: {message}")]
    Environment {
        /// Description of the environment failure.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Bridge connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Timed out waiting for the script runtime to connect.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Bridge connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Completion channel dropped before a result arrived.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a not-connected error for the named hub.
    #[inline]
    pub fn not_connected(hub: impl Into<String>) -> Self {
        Self::NotConnected { hub: hub.into() }
    }

    /// Creates a hub invocation error from the posted error payload.
    ///
    /// The message is taken from a `message` field when the payload is an
    /// object, or from the payload itself when it is a string.
    pub fn hub(data: Value) -> Self {
        let message = match &data {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            other => other.to_string(),
        };
        Self::Hub { message, data }
    }

    /// Creates an environment error.
    #[inline]
    pub fn environment(message: impl Into<String>) -> Self {
        Self::Environment {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a not-connected error.
    #[inline]
    #[must_use]
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected { .. })
    }

    /// Returns `true` if the server reported a hub failure.
    #[inline]
    #[must_use]
    pub fn is_hub_error(&self) -> bool {
        matches!(self, Self::Hub { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
        )
    }

    /// Returns `true` if retrying the operation may succeed.
    ///
    /// A detached hub can be attached later; timeouts may clear.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected { .. } | Self::ConnectionTimeout { .. }
        )
    }

    /// Converts the error into the structured payload handed to the
    /// connection's `error` callback.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Hub { data, .. } => data.clone(),
            other => serde_json::json!({ "message": other.to_string() }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
