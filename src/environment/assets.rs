//! Protocol library assets and the bootstrap script.
//!
//! The environment loads jQuery, the SignalR client for the selected
//! [`ProtocolVersion`], and then [`BOOTSTRAP_SCRIPT`]. The bootstrap defines
//! the helpers every [`Command`](crate::protocol::Command) calls and posts
//! `ready` as its last statement.
//!
//! # Host Contract
//!
//! The hosting runtime exposes a global `signalrBridge` object with:
//!
//! - `post(event)` - deliver an event object to the connection
//! - `setUserAgent(agent)` - optional, apply a user-agent override

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// Constants
// ============================================================================

/// jQuery build the SignalR 2.x client depends on.
pub const JQUERY_SCRIPT: &str = "jquery-2.1.3.min.js";

// ============================================================================
// ProtocolVersion
// ============================================================================

/// SignalR JavaScript client version loaded into the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolVersion {
    /// 2.2.2
    #[default]
    V2_2_2,
    /// 2.2.1
    V2_2_1,
    /// 2.2.0
    V2_2_0,
    /// 2.1.2
    V2_1_2,
    /// 2.1.1
    V2_1_1,
    /// 2.1.0
    V2_1_0,
    /// 2.0.3
    V2_0_3,
    /// 2.0.2
    V2_0_2,
    /// 2.0.1
    V2_0_1,
    /// 2.0.0
    V2_0_0,
}

impl ProtocolVersion {
    /// Returns the dotted version tag.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::V2_2_2 => "2.2.2",
            Self::V2_2_1 => "2.2.1",
            Self::V2_2_0 => "2.2.0",
            Self::V2_1_2 => "2.1.2",
            Self::V2_1_1 => "2.1.1",
            Self::V2_1_0 => "2.1.0",
            Self::V2_0_3 => "2.0.3",
            Self::V2_0_2 => "2.0.2",
            Self::V2_0_1 => "2.0.1",
            Self::V2_0_0 => "2.0.0",
        }
    }

    /// Returns the SignalR client script name.
    #[must_use]
    pub fn script_name(&self) -> String {
        format!("jquery.signalR-{}.min.js", self.as_str())
    }

    /// Returns every script the environment loads before the bootstrap.
    #[must_use]
    pub fn scripts(&self) -> Vec<String> {
        vec![JQUERY_SCRIPT.to_string(), self.script_name()]
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Bootstrap
// ============================================================================

/// Helpers called by command scripts, run after the protocol library loads.
pub const BOOTSTRAP_SCRIPT: &str = r#"(function (global) {
    var connection = null;
    var transport = "auto";

    global.postEvent = function (event) {
        global.signalrBridge.post(event);
    };

    global.processError = function (error) {
        if (!error) { return null; }
        var out = { message: error.message || String(error) };
        if (error.source) { out.source = error.source; }
        if (error.data !== undefined) { out.data = error.data; }
        return out;
    };

    global.setTransport = function (name) { transport = name; };

    global.initialize = function (baseUrl, isHub) {
        connection = isHub
            ? $.hubConnection(baseUrl, { useDefaultPath: false })
            : $.connection(baseUrl);

        connection.starting(function () { postEvent({ message: "starting" }); });
        connection.connectionSlow(function () { postEvent({ message: "connectionSlow" }); });
        connection.reconnecting(function () { postEvent({ message: "reconnecting" }); });
        connection.reconnected(function () { postEvent({ message: "reconnected" }); });
        connection.disconnected(function () { postEvent({ message: "disconnected" }); });
        connection.error(function (error) {
            postEvent({ message: "error", error: processError(error) });
        });

        if (!isHub) {
            connection.received(function (data) { postEvent({ data: data }); });
        }
    };

    global.start = function () {
        connection.start({ transport: transport })
            .done(function () {
                postEvent({ message: "connected", connectionId: connection.id });
            })
            .fail(function (error) {
                postEvent({ message: "connectionFailed", error: processError(error) });
            });
    };

    global.stop = function () { connection.stop(); };
    global.send = function (data) { connection.send(data); };
    global.setQueryString = function (qs) { connection.qs = qs; };
    global.setHeaders = function (headers) { connection.headers = headers; };

    global.setUserAgent = function (agent) {
        if (global.signalrBridge.setUserAgent) { global.signalrBridge.setUserAgent(agent); }
    };

    global.ensureHubProxy = function (name) {
        return connection.createHubProxy(name);
    };

    global.addHandler = function (id, hubName, method) {
        ensureHubProxy(hubName).on(method, function () {
            postEvent({
                hub: hubName,
                method: method,
                id: id,
                arguments: Array.prototype.slice.call(arguments)
            });
        });
    };

    postEvent({ message: "ready" });
})(this);
"#;

// ============================================================================
// Tests
// ============================================================================
