//! Script execution environment seam.
//!
//! The protocol library runs inside an external environment (a webview, a
//! browser extension, a headless JS host). The core talks to it only
//! through [`Environment`]: load the assets once, submit opaque command
//! scripts, and receive events through an [`EventSink`].
//!
//! # Lifecycle
//!
//! 1. [`Environment::initialize`] - load assets, keep the sink
//! 2. Environment posts `{ message: "ready" }` once the bootstrap has run
//! 3. [`Environment::submit`] - execute commands, optionally report results
//! 4. [`Environment::shutdown`] - release resources when the connection goes away

// ============================================================================
// Submodules
// ============================================================================

/// Protocol library assets and bootstrap script.
pub mod assets;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::InboundEvent;

pub use assets::{BOOTSTRAP_SCRIPT, ProtocolVersion};

// ============================================================================
// Types
// ============================================================================

/// Receives the result of a submitted script, exactly once.
pub type ScriptCallback = Box<dyn FnOnce(Option<Value>) + Send>;

// ============================================================================
// EnvironmentConfig
// ============================================================================

/// What the environment needs to load before it can accept commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentConfig {
    /// Script asset names, in load order.
    pub scripts: Vec<String>,
    /// Bootstrap source run after the assets.
    pub bootstrap: &'static str,
    /// Origin the environment should present to the server.
    pub origin: Option<String>,
}

impl EnvironmentConfig {
    /// Creates the configuration for a protocol version.
    #[must_use]
    pub fn new(version: ProtocolVersion, origin: Option<String>) -> Self {
        Self {
            scripts: version.scripts(),
            bootstrap: BOOTSTRAP_SCRIPT,
            origin,
        }
    }
}

// ============================================================================
// EventSink
// ============================================================================

/// Channel the environment posts inbound events into.
///
/// Cloneable; events are processed by the owning connection in the order
/// they are posted.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<InboundEvent>,
}

impl EventSink {
    /// Creates a sink and the receiver the connection drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<InboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Posts an event. Returns `false` if the connection is gone.
    #[inline]
    pub fn post(&self, event: InboundEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Parses and posts an event from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the text is not an event
    /// object.
    pub fn post_json(&self, text: &str) -> Result<bool> {
        let event: InboundEvent = serde_json::from_str(text)?;
        Ok(self.post(event))
    }

    /// Returns `true` if the receiving connection has gone away.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ============================================================================
// Environment
// ============================================================================

/// A script execution environment hosting the SignalR protocol library.
///
/// Implementations must not block: `submit` hands the script off and
/// returns, and results arrive later through the callback.
pub trait Environment: Send + Sync {
    /// Loads the protocol library and keeps `events` for posting.
    ///
    /// Called at most once per connection. Readiness is reported by posting
    /// the `ready` event, not by returning.
    ///
    /// # Errors
    ///
    /// Returns an error if loading cannot even begin.
    fn initialize(&self, config: EnvironmentConfig, events: EventSink) -> Result<()>;

    /// Executes a command script.
    ///
    /// When `on_result` is given it is called once with the script's value.
    /// It must not be called before `submit` returns; the connection holds
    /// its command queue lock across this call.
    fn submit(&self, script: String, on_result: Option<ScriptCallback>);

    /// Releases the environment's resources.
    fn shutdown(&self) {}
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_for_version() {
        let config = EnvironmentConfig::new(ProtocolVersion::V2_2_1, Some("http://x".into()));
        assert_eq!(config.scripts.len(), 2);
        assert!(config.scripts[1].contains("2.2.1"));
        assert_eq!(config.bootstrap, BOOTSTRAP_SCRIPT);
    }

    #[tokio::test]
    async fn test_sink_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        assert!(sink.post(InboundEvent::ready()));
        assert!(sink.post_json(r#"{"message":"starting"}"#).expect("valid json"));

        assert_eq!(rx.recv().await, Some(InboundEvent::ready()));
        assert_eq!(rx.recv().await, Some(InboundEvent::message("starting")));
    }

    #[test]
    fn test_sink_reports_closed_receiver() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.post(InboundEvent::ready()));
    }

    #[test]
    fn test_post_json_rejects_garbage() {
        let (sink, _rx) = EventSink::channel();
        assert!(sink.post_json("42").is_err());
    }
}
