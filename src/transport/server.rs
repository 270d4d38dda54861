//! Local WebSocket server a script runtime connects back to.
//!
//! # Connection Flow
//!
//! 1. Bind to `127.0.0.1:0` (random port)
//! 2. Hand [`PendingServer::ws_url`] to the runtime host
//! 3. The runtime connects; the socket becomes a [`WsEnvironment`]
//! 4. The environment is given to a connection builder

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::environment::WsEnvironment;

// ============================================================================
// Constants
// ============================================================================

/// Timeout for waiting for the runtime to connect.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// PendingServer
// ============================================================================

/// A WebSocket server that is bound but not yet connected.
///
/// Represents the state between binding to a port and accepting
/// the script runtime's connection.
///
/// # Example
///
/// ```ignore
/// use std::net::{IpAddr, Ipv4Addr};
/// use signalr_bridge::{Connection, transport::PendingServer};
///
/// let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
/// let ws_url = server.ws_url();
///
/// // Launch the runtime host with ws_url...
///
/// let environment = server.accept().await?;
/// let connection = Connection::builder("http://localhost:8080/signalr")
///     .environment(Arc::new(environment))
///     .build()?;
/// ```
pub struct PendingServer {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Port the server is bound to.
    port: u16,
}

impl PendingServer {
    /// Binds a WebSocket server to the specified address and port.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Arguments
    ///
    /// * `ip` - IP address to bind to (typically localhost)
    /// * `port` - Port to bind to (0 for random)
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        debug!(port = actual_port, "WebSocket server bound");

        Ok(Self {
            listener,
            port: actual_port,
        })
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://127.0.0.1:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Returns the local socket address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), self.port)
    }

    /// Accepts the runtime's connection.
    ///
    /// Waits for the TCP connection, then upgrades it to a WebSocket.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if the runtime doesn't connect within 30s
    /// - [`Error::Connection`] if the WebSocket upgrade fails
    pub async fn accept(self) -> Result<WsEnvironment> {
        self.accept_with_timeout(CONNECTION_TIMEOUT).await
    }

    /// Accepts the runtime's connection with a custom timeout.
    ///
    /// # Errors
    ///
    /// Same as [`accept`](Self::accept).
    pub async fn accept_with_timeout(self, wait: Duration) -> Result<WsEnvironment> {
        let (stream, addr) = timeout(wait, self.listener.accept())
            .await
            .map_err(|_| Error::connection_timeout(wait.as_millis() as u64))??;

        debug!(?addr, "TCP connection accepted");

        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        info!(port = self.port, "Script runtime connected");

        Ok(WsEnvironment::new(ws_stream))
    }
}

// ============================================================================
// Tests
// ============================================================================
