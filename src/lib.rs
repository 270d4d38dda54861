//! SignalR Bridge - SignalR 2.x client core over a script execution environment.
//!
//! The SignalR 2.x protocol library is JavaScript. This crate drives it
//! from Rust: the library runs inside an external script environment (a
//! webview, a browser extension, a headless JS host) and the crate owns
//! everything around it.
//!
//! # Architecture
//!
//! - **Local End (Rust)**: connection state machine, hub registry, RPC
//!   correlation, command queue
//! - **Environment**: loads jQuery SignalR plus a bootstrap script, executes
//!   command scripts, posts events back
//!
//! Key design principles:
//!
//! - Each [`Connection`] owns one [`Environment`] and an event pump task
//! - Commands issued before the environment is ready are queued and replayed
//!   in order ahead of `start`
//! - Hubs are looked up case-insensitively; many handlers per method
//! - Invocation results are correlated by [`InvocationId`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use signalr_bridge::{Connection, Result, transport::PendingServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Wait for the script runtime to connect back
//!     let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
//!     let environment = server.accept().await?;
//!
//!     let connection = Connection::builder("http://localhost:8080/signalr")
//!         .environment(Arc::new(environment))
//!         .build()?;
//!
//!     let chat = connection.create_hub_proxy("chat");
//!     chat.on("newMessage", |args| println!("{args:?}"));
//!
//!     connection.on_connected(|| println!("connected"));
//!     connection.start();
//!
//!     let reply = chat.call("send", vec![json!("hello")]).await?;
//!     println!("server replied: {reply}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | [`Connection`], builder, options, command queue |
//! | [`environment`] | [`Environment`] trait, event sink, assets |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`hub`] | [`Hub`] proxies and the hub registry |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Commands, events, wire encoding |
//! | `transport` | WebSocket bridge to an out-of-process runtime (`bridge` feature, on by default) |

// ============================================================================
// Modules
// ============================================================================

/// Connection state machine.
///
/// Use [`Connection::builder()`] to create a configured connection.
pub mod connection;

/// Script execution environment seam.
pub mod environment;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Hub proxies and registry.
pub mod hub;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Command scripts, inbound events and wire encoding.
pub mod protocol;

/// WebSocket bridge to an out-of-process script runtime.
#[cfg(feature = "bridge")]
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{
    Connection, ConnectionBuilder, ConnectionKind, ConnectionOptions, ConnectionRegistry,
    ConnectionState, Transport, WeakConnection,
};

// Environment types
pub use environment::{
    Environment, EnvironmentConfig, EventSink, ProtocolVersion, ScriptCallback,
};

// Error types
pub use error::{Error, Result};

// Hub types
pub use hub::{Hub, HubHandler, InvocationCallback, InvocationResult};

// Identifier types
pub use identifiers::{CallbackId, ConnectionId, InvocationId, MessageId};

// Protocol types
pub use protocol::{Command, InboundEvent, ParsedEvent, to_wire_value};
