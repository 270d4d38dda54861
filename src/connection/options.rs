//! Validated connection configuration.
//!
//! [`ConnectionOptions`] is produced by
//! [`ConnectionBuilder`](super::ConnectionBuilder) and stays immutable
//! except for the setters the connection exposes at runtime.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::environment::{EnvironmentConfig, ProtocolVersion};
use crate::protocol::Command;

use super::state::{ConnectionKind, Transport};

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Everything a connection is configured with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Server base URL.
    pub base_url: String,

    /// Hub or persistent connection.
    pub kind: ConnectionKind,

    /// Requested transport.
    pub transport: Transport,

    /// SignalR client version the environment loads.
    pub version: ProtocolVersion,

    /// Origin override; defaults to the base URL's origin.
    pub origin: Option<String>,

    /// Query parameters appended to every transport request.
    pub query: BTreeMap<String, String>,

    /// Custom request headers.
    pub headers: BTreeMap<String, String>,

    /// User-agent override.
    pub user_agent: Option<String>,
}

impl ConnectionOptions {
    /// Creates options with defaults for everything but the URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            kind: ConnectionKind::default(),
            transport: Transport::default(),
            version: ProtocolVersion::default(),
            origin: None,
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            user_agent: None,
        }
    }

    /// Returns the environment configuration for these options.
    #[must_use]
    pub fn environment_config(&self) -> EnvironmentConfig {
        EnvironmentConfig::new(self.version, self.origin.clone())
    }

    /// Setter commands issued at construction, before `start`.
    ///
    /// Empty query and header maps and an absent user agent produce no
    /// command.
    #[must_use]
    pub fn setup_commands(&self) -> Vec<Command> {
        let mut commands = Vec::new();

        if !self.query.is_empty() {
            commands.push(Command::SetQueryString {
                query: render_query(&self.query),
            });
        }

        if !self.headers.is_empty() {
            commands.push(Command::SetHeaders {
                headers: self.headers.clone(),
            });
        }

        if let Some(user_agent) = &self.user_agent {
            commands.push(Command::SetUserAgent {
                user_agent: user_agent.clone(),
            });
        }

        commands
    }
}

// ============================================================================
// Query String
// ============================================================================

/// Renders query parameters as a percent-encoded `key=value&...` string.
///
/// Parameters appear in key order.
#[must_use]
pub fn render_query(query: &BTreeMap<String, String>) -> String {
    query
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::new("http://x/");
        assert_eq!(options.kind, ConnectionKind::Hub);
        assert_eq!(options.transport, Transport::Auto);
        assert_eq!(options.version, ProtocolVersion::V2_2_2);
        assert!(options.setup_commands().is_empty());
    }

    #[test]
    fn test_render_query_encodes_and_orders() {
        let mut query = BTreeMap::new();
        query.insert("token".to_string(), "a b&c".to_string());
        query.insert("app".to_string(), "demo".to_string());
        assert_eq!(render_query(&query), "app=demo&token=a%20b%26c");
    }

    #[test]
    fn test_setup_commands_order() {
        let mut options = ConnectionOptions::new("http://x/");
        options.query.insert("a".into(), "1".into());
        options.headers.insert("X-Test".into(), "yes".into());
        options.user_agent = Some("agent/1.0".into());

        let names: Vec<_> = options.setup_commands().iter().map(Command::name).collect();
        assert_eq!(names, vec!["setQueryString", "setHeaders", "setUserAgent"]);
    }

    #[test]
    fn test_environment_config_carries_origin() {
        let mut options = ConnectionOptions::new("http://x/");
        options.origin = Some("http://x".into());
        options.version = ProtocolVersion::V2_0_0;

        let config = options.environment_config();
        assert_eq!(config.origin.as_deref(), Some("http://x"));
        assert!(config.scripts[1].contains("2.0.0"));
    }
}
