//! WebSocket bridge to an out-of-process script runtime.
//!
//! Used when the environment hosting the protocol library cannot be
//! embedded, for example a webview or browser extension in another process.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                              ┌──────────────────┐
//! │  Connection      │                              │  Script runtime  │
//! │                  │         WebSocket            │                  │
//! │  PendingServer   │◄────────────────────────────►│  jQuery SignalR  │
//! │  → WsEnvironment │      127.0.0.1:PORT          │  + bootstrap     │
//! └──────────────────┘                              └──────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! 1. `PendingServer::bind` - Bind to localhost with random port
//! 2. Launch the runtime with the WebSocket URL
//! 3. `PendingServer::accept` - Wait for the runtime to connect
//! 4. `WsEnvironment` - Load assets, submit commands, forward events
//! 5. `Environment::shutdown` - Close the socket when the connection drops

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket-backed environment and its event loop.
pub mod environment;

/// Local WebSocket server.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use environment::WsEnvironment;
pub use server::PendingServer;
