//! Connection lifecycle state, kind and transport selection.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a connection.
///
/// Only inbound events move a connection between states; `reconnecting`
/// maps onto [`Connecting`](Self::Connecting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Starting or reconnecting.
    Connecting,
    /// Handshake completed.
    Connected,
    /// Not started, stopped, or lost.
    #[default]
    Disconnected,
}

impl ConnectionState {
    /// Returns the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ConnectionKind
// ============================================================================

/// Whether the connection multiplexes hubs or carries raw data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionKind {
    /// Hub connection with RPC.
    #[default]
    Hub,
    /// Persistent connection with `send` / `received`.
    Persistent,
}

impl ConnectionKind {
    /// Returns `true` for [`ConnectionKind::Hub`].
    #[inline]
    #[must_use]
    pub const fn is_hub(&self) -> bool {
        matches!(self, Self::Hub)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Transport the protocol library is asked to negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transport {
    /// Let the library pick the best available transport.
    #[default]
    Auto,
    /// WebSockets.
    WebSockets,
    /// Server-Sent Events.
    ServerSentEvents,
    /// Forever frame (hidden iframe).
    ForeverFrame,
    /// Long polling.
    LongPolling,
}

impl Transport {
    /// Returns the name the protocol library uses.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::WebSockets => "webSockets",
            Self::ServerSentEvents => "serverSentEvents",
            Self::ForeverFrame => "foreverFrame",
            Self::LongPolling => "longPolling",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Self::Auto),
            "webSockets" => Ok(Self::WebSockets),
            "serverSentEvents" => Ok(Self::ServerSentEvents),
            "foreverFrame" => Ok(Self::ForeverFrame),
            "longPolling" => Ok(Self::LongPolling),
            other => Err(Error::config(format!("Unknown transport: {other}"))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
