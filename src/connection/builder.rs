//! Builder pattern for connection configuration.
//!
//! # Example
//!
//! ```ignore
//! use signalr_bridge::{Connection, Transport};
//!
//! let connection = Connection::builder("http://localhost:5000/signalr")
//!     .hub()
//!     .transport(Transport::WebSockets)
//!     .query_param("token", "abc")
//!     .header("X-Client", "bridge")
//!     .environment(environment)
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use url::Url;

use crate::environment::{Environment, ProtocolVersion};
use crate::error::{Error, Result};

use super::core::Connection;
use super::options::ConnectionOptions;
use super::state::{ConnectionKind, Transport};

// ============================================================================
// ConnectionBuilder
// ============================================================================

/// Builder for configuring a [`Connection`].
///
/// Use [`Connection::builder()`] to create one.
#[derive(Clone)]
pub struct ConnectionBuilder {
    /// Options collected so far.
    options: ConnectionOptions,
    /// Environment hosting the protocol library.
    environment: Option<Arc<dyn Environment>>,
}

// ============================================================================
// ConnectionBuilder Implementation
// ============================================================================

impl ConnectionBuilder {
    /// Creates a builder for the given base URL.
    #[inline]
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            options: ConnectionOptions::new(base_url),
            environment: None,
        }
    }

    /// Sets the connection kind.
    #[inline]
    #[must_use]
    pub fn kind(mut self, kind: ConnectionKind) -> Self {
        self.options.kind = kind;
        self
    }

    /// Configures a hub connection (the default).
    #[inline]
    #[must_use]
    pub fn hub(self) -> Self {
        self.kind(ConnectionKind::Hub)
    }

    /// Configures a persistent connection.
    #[inline]
    #[must_use]
    pub fn persistent(self) -> Self {
        self.kind(ConnectionKind::Persistent)
    }

    /// Sets the requested transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: Transport) -> Self {
        self.options.transport = transport;
        self
    }

    /// Sets the SignalR client version the environment loads.
    #[inline]
    #[must_use]
    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.options.version = version;
        self
    }

    /// Overrides the origin presented by the environment.
    #[inline]
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.options.origin = Some(origin.into());
        self
    }

    /// Adds one query parameter.
    #[inline]
    #[must_use]
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.query.insert(key.into(), value.into());
        self
    }

    /// Adds several query parameters.
    #[must_use]
    pub fn query_string<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.options
            .query
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Adds one request header.
    #[inline]
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.insert(name.into(), value.into());
        self
    }

    /// Adds several request headers.
    #[must_use]
    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.options
            .headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Overrides the user agent.
    #[inline]
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.options.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the environment hosting the protocol library.
    #[inline]
    #[must_use]
    pub fn environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Builds the connection with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the base URL is not an absolute http(s) URL
    /// - [`Error::Config`] if no environment was set
    pub fn build(self) -> Result<Connection> {
        let origin = self.validate_base_url()?;
        let environment = self.environment.ok_or_else(|| {
            Error::config(
                "An environment is required. Use .environment() to set it.\n\
                 Example: Connection::builder(url).environment(env)",
            )
        })?;

        let mut options = self.options;
        if options.origin.is_none() {
            options.origin = Some(origin);
        }

        Ok(Connection::new(options, environment))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ConnectionBuilder {
    /// Validates the base URL and returns its origin.
    fn validate_base_url(&self) -> Result<String> {
        let url = Url::parse(&self.options.base_url).map_err(|e| {
            Error::config(format!(
                "Invalid base URL '{}': {e}",
                self.options.base_url
            ))
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url.origin().ascii_serialization()),
            other => Err(Error::config(format!(
                "Unsupported URL scheme '{other}'. Use http or https."
            ))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
