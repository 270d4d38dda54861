//! Outbound commands for the script environment.
//!
//! Each [`Command`] renders to one opaque script statement that calls a
//! helper defined by the bootstrap script (see
//! [`environment::assets`](crate::environment::assets)). Every value spliced
//! into a statement is encoded with [`to_wire_value`], never concatenated
//! raw.
//!
//! | Command | Script |
//! |---------|--------|
//! | `SetTransport` | `setTransport("webSockets")` |
//! | `Initialize` | `initialize("http://host/", true)` |
//! | `Start` / `Stop` | `start()` / `stop()` |
//! | `Send` | `send(<payload>)` |
//! | `SetQueryString` | `setQueryString("a=1&b=2")` |
//! | `SetHeaders` | `setHeaders({"k":"v"})` |
//! | `SetUserAgent` | `setUserAgent("agent")` |
//! | `AddHandler` | `addHandler("<callback id>", "hub", "method")` |
//! | `Invoke` | `ensureHubProxy("hub").invoke("method", ...).done(...).fail(...)` |

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use crate::connection::Transport;
use crate::identifiers::{CallbackId, InvocationId};

use super::event::INVOKE_HANDLER;
use super::serializer::{to_wire_value, to_wire_value_or_null};

// ============================================================================
// Command
// ============================================================================

/// A command understood by the bootstrap script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Select the transport the protocol library negotiates.
    SetTransport {
        /// Requested transport.
        transport: Transport,
    },

    /// Create the protocol-library connection object.
    Initialize {
        /// Server base URL.
        base_url: String,
        /// `true` for a hub connection, `false` for a persistent one.
        is_hub: bool,
    },

    /// Start the protocol-library connection.
    Start,

    /// Stop the protocol-library connection.
    Stop,

    /// Send raw data over a persistent connection.
    Send {
        /// Payload already encoded as a wire value.
        payload: String,
    },

    /// Set the query string appended to every transport request.
    SetQueryString {
        /// Encoded `key=value&...` string.
        query: String,
    },

    /// Set custom request headers.
    SetHeaders {
        /// Header name to value.
        headers: BTreeMap<String, String>,
    },

    /// Override the user agent of the hosting runtime.
    SetUserAgent {
        /// User-agent string.
        user_agent: String,
    },

    /// Declare a client method the environment must forward.
    AddHandler {
        /// Callback the forwarded calls are addressed to.
        callback_id: CallbackId,
        /// Hub name.
        hub: String,
        /// Client method name.
        method: String,
    },

    /// Invoke a server-side hub method.
    Invoke {
        /// Hub name.
        hub: String,
        /// Server method name.
        method: String,
        /// Correlation ID echoed in the completion event.
        invocation_id: InvocationId,
        /// Arguments already encoded as wire values.
        arguments: Vec<String>,
    },
}

// ============================================================================
// Command - Rendering
// ============================================================================

impl Command {
    /// Returns the helper name this command calls.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetTransport { .. } => "setTransport",
            Self::Initialize { .. } => "initialize",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Send { .. } => "send",
            Self::SetQueryString { .. } => "setQueryString",
            Self::SetHeaders { .. } => "setHeaders",
            Self::SetUserAgent { .. } => "setUserAgent",
            Self::AddHandler { .. } => "addHandler",
            Self::Invoke { .. } => "invoke",
        }
    }

    /// Renders the command to a script statement.
    #[must_use]
    pub fn to_script(&self) -> String {
        match self {
            Self::SetTransport { transport } => {
                format!("setTransport({})", quote(transport.as_str()))
            }
            Self::Initialize { base_url, is_hub } => {
                format!("initialize({}, {is_hub})", quote(base_url))
            }
            Self::Start => "start()".to_string(),
            Self::Stop => "stop()".to_string(),
            Self::Send { payload } => format!("send({payload})"),
            Self::SetQueryString { query } => format!("setQueryString({})", quote(query)),
            Self::SetHeaders { headers } => {
                format!("setHeaders({})", to_wire_value_or_null(headers))
            }
            Self::SetUserAgent { user_agent } => format!("setUserAgent({})", quote(user_agent)),
            Self::AddHandler {
                callback_id,
                hub,
                method,
            } => format!(
                "addHandler({}, {}, {})",
                quote(&callback_id.to_string()),
                quote(hub),
                quote(method)
            ),
            Self::Invoke {
                hub,
                method,
                invocation_id,
                arguments,
            } => render_invoke(hub, method, invocation_id, arguments),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_script())
    }
}

// ============================================================================
// Internal Functions
// ============================================================================

/// Encodes a string as a script string literal.
#[inline]
fn quote(s: &str) -> String {
    to_wire_value_or_null(s)
}

/// Renders the composite invoke statement.
///
/// The completion event reuses the invocation ID as `id`, on success with
/// `result` and on failure with the processed `error`.
fn render_invoke(
    hub: &str,
    method: &str,
    invocation_id: &InvocationId,
    arguments: &[String],
) -> String {
    let hub = quote(hub);
    let id = quote(&invocation_id.to_string());
    let kind = quote(INVOKE_HANDLER);

    let mut call = quote(method);
    for argument in arguments {
        call.push_str(", ");
        call.push_str(argument);
    }

    format!(
        "ensureHubProxy({hub}).invoke({call})\
         .done(function (result) {{ postEvent({{ message: {kind}, hub: {hub}, id: {id}, result: result }}); }})\
         .fail(function (error) {{ postEvent({{ message: {kind}, hub: {hub}, id: {id}, error: processError(error) }}); }})"
    )
}

/// Encodes a list of arguments independently.
///
/// Arguments that cannot be encoded become `null` without affecting the
/// others.
pub fn encode_arguments<T: serde::Serialize>(arguments: &[T]) -> Vec<String> {
    arguments.iter().map(to_wire_value_or_null).collect()
}

/// Encodes a `send` payload, using `null` when absent or unencodable.
pub fn encode_payload<T: serde::Serialize + ?Sized>(payload: Option<&T>) -> String {
    payload
        .and_then(|p| to_wire_value(p))
        .unwrap_or_else(|| super::serializer::NULL_LITERAL.to_string())
}

// ============================================================================
// Tests
// ============================================================================
