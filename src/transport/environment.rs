//! WebSocket-bridged script environment.
//!
//! [`WsEnvironment`] implements [`Environment`] for a script runtime that
//! lives in another process (a webview, a browser extension, a headless JS
//! host) and connects back over a local WebSocket.
//!
//! # Event Loop
//!
//! The environment spawns a tokio task that handles:
//!
//! - Outgoing `load` and `submit` envelopes
//! - `result` envelopes, correlated to submit callbacks by envelope ID
//! - `event` envelopes, forwarded to the connection's [`EventSink`]

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{from_str, to_string};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::environment::{Environment, EnvironmentConfig, EventSink, ScriptCallback};
use crate::error::{Error, Result};
use crate::identifiers::MessageId;
use crate::protocol::bridge::{Inbound, Outbound};

// ============================================================================
// Types
// ============================================================================

/// Map of submit envelope IDs to result callbacks.
type CorrelationMap = FxHashMap<MessageId, ScriptCallback>;

/// Shared slot for the connection's event sink.
type SinkSlot = Arc<Mutex<Option<EventSink>>>;

/// Write half of the runtime socket.
type WsWriter = SplitSink<WebSocketStream<TcpStream>, Message>;

// ============================================================================
// BridgeCommand
// ============================================================================

/// Internal commands for the event loop.
enum BridgeCommand {
    /// Send an envelope, optionally waiting for its result.
    Send {
        envelope: Outbound,
        on_result: Option<ScriptCallback>,
    },
    /// Close the socket and stop.
    Shutdown,
}

// ============================================================================
// WsEnvironment
// ============================================================================

/// Script environment reached over a WebSocket.
///
/// Created by [`PendingServer::accept`](super::PendingServer::accept).
/// Result callbacks still pending when the socket closes are dropped
/// without being called.
pub struct WsEnvironment {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<BridgeCommand>,
    /// Correlation map (shared with event loop).
    correlation: Arc<Mutex<CorrelationMap>>,
    /// Event sink (shared with event loop).
    sink: SinkSlot,
}

impl fmt::Debug for WsEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsEnvironment")
            .field("pending", &self.pending_count())
            .field("initialized", &self.sink.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl WsEnvironment {
    /// Wraps an accepted WebSocket stream and spawns the event loop.
    pub(crate) fn new(ws_stream: WebSocketStream<TcpStream>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let correlation = Arc::new(Mutex::new(CorrelationMap::default()));
        let sink: SinkSlot = Arc::new(Mutex::new(None));

        tokio::spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            Arc::clone(&correlation),
            Arc::clone(&sink),
        ));

        Self {
            command_tx,
            correlation,
            sink,
        }
    }

    /// Returns the number of submits awaiting a result.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlation.lock().len()
    }

    /// Returns `true` once the event loop has stopped.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Queues an envelope for the event loop.
    fn send(&self, envelope: Outbound, on_result: Option<ScriptCallback>) -> Result<()> {
        self.command_tx
            .send(BridgeCommand::Send {
                envelope,
                on_result,
            })
            .map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// Environment Implementation
// ============================================================================

impl Environment for WsEnvironment {
    fn initialize(&self, config: EnvironmentConfig, events: EventSink) -> Result<()> {
        *self.sink.lock() = Some(events);

        let envelope = Outbound::Load {
            id: MessageId::generate(),
            scripts: config.scripts,
            bootstrap: config.bootstrap.to_string(),
            origin: config.origin,
        };

        self.send(envelope, None)
    }

    fn submit(&self, script: String, on_result: Option<ScriptCallback>) {
        let envelope = Outbound::Submit {
            id: MessageId::generate(),
            script,
            wants_result: on_result.is_some(),
        };

        if let Err(e) = self.send(envelope, on_result) {
            warn!(error = %e, "Dropping command for closed runtime");
        }
    }

    fn shutdown(&self) {
        self.sink.lock().take();
        let _ = self.command_tx.send(BridgeCommand::Shutdown);
    }
}

// ============================================================================
// Event Loop
// ============================================================================

impl WsEnvironment {
    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop(
        ws_stream: WebSocketStream<TcpStream>,
        mut command_rx: mpsc::UnboundedReceiver<BridgeCommand>,
        correlation: Arc<Mutex<CorrelationMap>>,
        sink: SinkSlot,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &correlation, &sink);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("Runtime closed the socket");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break;
                        }

                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(BridgeCommand::Send { envelope, on_result }) => {
                            Self::handle_send_command(
                                envelope,
                                on_result,
                                &mut ws_write,
                                &correlation,
                            )
                            .await;
                        }

                        Some(BridgeCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        let dropped = std::mem::take(&mut *correlation.lock()).len();
        if dropped > 0 {
            debug!(dropped, "Dropped pending results on shutdown");
        }

        debug!("Runtime event loop terminated");
    }

    /// Handles an incoming text frame from the runtime.
    fn handle_incoming_message(text: &str, correlation: &Mutex<CorrelationMap>, sink: &SinkSlot) {
        match from_str::<Inbound>(text) {
            Ok(Inbound::Result { id, result }) => {
                let callback = correlation.lock().remove(&id);
                match callback {
                    Some(callback) => callback(result),
                    None => warn!(%id, "Result for unknown submit"),
                }
            }

            Ok(Inbound::Event { event }) => {
                let target = sink.lock().clone();
                match target {
                    Some(target) => {
                        if !target.post(event) {
                            trace!("Event for dropped connection discarded");
                        }
                    }
                    None => warn!("Event before initialize discarded"),
                }
            }

            Err(e) => {
                warn!(error = %e, text, "Failed to parse runtime message");
            }
        }
    }

    /// Serializes and writes one envelope.
    async fn handle_send_command(
        envelope: Outbound,
        on_result: Option<ScriptCallback>,
        ws_write: &mut WsWriter,
        correlation: &Mutex<CorrelationMap>,
    ) {
        let id = envelope.id();

        let json = match to_string(&envelope) {
            Ok(json) => json,
            Err(e) => {
                warn!(%id, error = %e, "Failed to serialize envelope");
                return;
            }
        };

        // Registered before sending so a fast result cannot miss it.
        if let Some(callback) = on_result {
            correlation.lock().insert(id, callback);
        }

        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
            correlation.lock().remove(&id);
            warn!(%id, error = %e, "Failed to send envelope");
            return;
        }

        trace!(%id, "Envelope sent");
    }
}

// ============================================================================
// Tests
// ============================================================================
