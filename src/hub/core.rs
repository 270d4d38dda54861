//! Hub proxy: client method handlers and server method invocations.
//!
//! A [`Hub`] may be created detached and attached to a
//! [`Connection`](crate::Connection) later. Handlers can be registered at any
//! time; they are declared to the environment whenever the environment
//! becomes ready or the hub is attached to a ready connection.
//!
//! # Example
//!
//! ```ignore
//! let chat = connection.create_hub_proxy("chat");
//!
//! chat.on("newMessage", |args| println!("message: {args:?}"));
//!
//! chat.invoke("send", vec![json!("hi")], Some(Box::new(|outcome| {
//!     match outcome {
//!         Ok(result) => println!("sent: {result}"),
//!         Err(error) => println!("failed: {error}"),
//!     }
//! })))?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::connection::core::ConnectionInner;
use crate::error::{Error, Result};
use crate::identifiers::{CallbackId, InvocationId};
use crate::protocol::Command;
use crate::protocol::command::encode_arguments;

// ============================================================================
// Types
// ============================================================================

/// Handler for a client method the server calls.
///
/// Receives the call's argument list.
pub type HubHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Outcome of an invocation: the result, or the error payload.
pub type InvocationResult = std::result::Result<Value, Value>;

/// Completion callback of an invocation, called at most once.
pub type InvocationCallback = Box<dyn FnOnce(InvocationResult) + Send>;

/// Handlers of one method, in registration order.
type MethodHandlers = Vec<(CallbackId, HubHandler)>;

// ============================================================================
// HubInner
// ============================================================================

/// Internal shared state for a hub.
pub(crate) struct HubInner {
    /// Hub name as given by the caller.
    name: String,
    /// Owning connection, if attached.
    connection: RwLock<Weak<ConnectionInner>>,
    /// Client method handlers by method name.
    handlers: Mutex<BTreeMap<String, MethodHandlers>>,
    /// In-flight invocations awaiting completion.
    pending: Mutex<FxHashMap<InvocationId, InvocationCallback>>,
}

// ============================================================================
// Hub
// ============================================================================

/// A named hub multiplexed over a connection.
///
/// Cloning is cheap; clones share handlers and pending invocations.
#[derive(Clone)]
pub struct Hub {
    /// Shared inner state.
    pub(crate) inner: Arc<HubInner>,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("name", &self.inner.name)
            .field("attached", &self.is_attached())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Hub - Constructor
// ============================================================================

impl Hub {
    /// Creates a detached hub.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                name: name.into(),
                connection: RwLock::new(Weak::new()),
                handlers: Mutex::new(BTreeMap::new()),
                pending: Mutex::new(FxHashMap::default()),
            }),
        }
    }
}

// ============================================================================
// Hub - Public API
// ============================================================================

impl Hub {
    /// Returns the hub name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` if the hub is attached to a live connection.
    #[inline]
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.connection().is_some()
    }

    /// Registers a handler for a client method.
    ///
    /// Registering the same method again adds another handler; each is
    /// identified by its own [`CallbackId`].
    ///
    /// The connection owns its hubs, so a handler that needs the connection
    /// should capture a [`WeakConnection`](crate::connection::WeakConnection).
    /// A captured [`Connection`](crate::Connection) clone keeps it alive until
    /// [`Connection::close`](crate::Connection::close).
    pub fn on<F>(&self, method: impl Into<String>, handler: F) -> CallbackId
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        let method = method.into();
        let callback_id = CallbackId::generate();

        self.inner
            .handlers
            .lock()
            .entry(method.clone())
            .or_default()
            .push((callback_id, Arc::new(handler)));

        debug!(hub = %self.inner.name, %method, %callback_id, "Handler registered");

        // Before readiness the ready path declares every handler.
        if let Some(connection) = self.connection()
            && connection.is_ready()
        {
            connection.issue(Command::AddHandler {
                callback_id,
                hub: self.inner.name.clone(),
                method,
            });
        }

        callback_id
    }

    /// Removes one handler. Returns `true` if it existed.
    pub fn off(&self, method: &str, callback_id: CallbackId) -> bool {
        let mut handlers = self.inner.handlers.lock();
        let Some(entries) = handlers.get_mut(method) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(id, _)| *id != callback_id);
        let removed = entries.len() != before;

        if entries.is_empty() {
            handlers.remove(method);
        }
        removed
    }

    /// Removes every handler of a method. Returns how many were removed.
    pub fn off_all(&self, method: &str) -> usize {
        self.inner
            .handlers
            .lock()
            .remove(method)
            .map_or(0, |entries| entries.len())
    }

    /// Returns the number of handlers registered for a method.
    #[must_use]
    pub fn handler_count(&self, method: &str) -> usize {
        self.inner
            .handlers
            .lock()
            .get(method)
            .map_or(0, Vec::len)
    }

    /// Returns the number of invocations awaiting completion.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Declares every registered handler to the environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the hub is detached.
    pub fn initialize(&self) -> Result<()> {
        let connection = self
            .connection()
            .ok_or_else(|| Error::not_connected(&self.inner.name))?;
        self.declare_handlers(&connection);
        Ok(())
    }

    /// Invokes a server method with already-built JSON arguments.
    ///
    /// See [`invoke_with`](Self::invoke_with).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the hub is detached.
    pub fn invoke(
        &self,
        method: &str,
        arguments: Vec<Value>,
        callback: Option<InvocationCallback>,
    ) -> Result<InvocationId> {
        self.invoke_with(method, &arguments, callback)
    }

    /// Invokes a server method.
    ///
    /// Each argument is encoded on its own; one that cannot be encoded is
    /// sent as `null` and the call proceeds. The callback, if any, runs once
    /// when the environment posts the completion. There is no timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the hub is detached. No command is
    /// issued in that case.
    pub fn invoke_with<A: Serialize>(
        &self,
        method: &str,
        arguments: &[A],
        callback: Option<InvocationCallback>,
    ) -> Result<InvocationId> {
        let connection = self
            .connection()
            .ok_or_else(|| Error::not_connected(&self.inner.name))?;

        let invocation_id = InvocationId::generate();
        if let Some(callback) = callback {
            self.inner.pending.lock().insert(invocation_id, callback);
        }

        trace!(
            hub = %self.inner.name,
            %method,
            %invocation_id,
            argument_count = arguments.len(),
            "Invoking hub method"
        );

        connection.issue(Command::Invoke {
            hub: self.inner.name.clone(),
            method: method.to_string(),
            invocation_id,
            arguments: encode_arguments(arguments),
        });

        Ok(invocation_id)
    }

    /// Invokes a server method and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the hub is detached
    /// - [`Error::Hub`] if the server reported an error
    /// - [`Error::ChannelClosed`] if the invocation was discarded because the
    ///   connection went away
    pub async fn call(&self, method: &str, arguments: Vec<Value>) -> Result<Value> {
        let (tx, rx) = oneshot::channel();

        self.invoke(
            method,
            arguments,
            Some(Box::new(move |outcome| {
                let _ = tx.send(outcome);
            })),
        )?;

        rx.await?.map_err(Error::hub)
    }
}

// ============================================================================
// Hub - Internal API
// ============================================================================

impl Hub {
    /// Returns the owning connection if it is still alive.
    #[inline]
    fn connection(&self) -> Option<Arc<ConnectionInner>> {
        self.inner.connection.read().upgrade()
    }

    /// Binds the hub to a connection.
    pub(crate) fn attach(&self, connection: Weak<ConnectionInner>) {
        *self.inner.connection.write() = connection;
    }

    /// Unbinds the hub and discards pending invocations.
    ///
    /// Discarded callbacks are dropped without being called.
    pub(crate) fn detach(&self) -> usize {
        *self.inner.connection.write() = Weak::new();
        let discarded = std::mem::take(&mut *self.inner.pending.lock()).len();
        if discarded > 0 {
            debug!(hub = %self.inner.name, discarded, "Discarded pending invocations");
        }
        discarded
    }

    /// Issues `addHandler` for every registered handler.
    pub(crate) fn declare_handlers(&self, connection: &ConnectionInner) {
        let declarations: Vec<(String, CallbackId)> = {
            let handlers = self.inner.handlers.lock();
            handlers
                .iter()
                .flat_map(|(method, entries)| {
                    entries.iter().map(move |(id, _)| (method.clone(), *id))
                })
                .collect()
        };

        for (method, callback_id) in declarations {
            connection.issue(Command::AddHandler {
                callback_id,
                hub: self.inner.name.clone(),
                method,
            });
        }
    }

    /// Completes a pending invocation.
    ///
    /// An error payload takes precedence over a result. Returns `false` if
    /// the ID matches no pending invocation; an unmatched error is logged,
    /// an unmatched result is not.
    pub(crate) fn complete(&self, id: &str, result: Option<Value>, error: Option<Value>) -> bool {
        let callback = id
            .parse::<InvocationId>()
            .ok()
            .and_then(|invocation_id| self.inner.pending.lock().remove(&invocation_id));

        let Some(callback) = callback else {
            if let Some(error) = error {
                warn!(hub = %self.inner.name, id, %error, "Error for unknown invocation");
            } else {
                trace!(hub = %self.inner.name, id, "Result for unknown invocation dropped");
            }
            return false;
        };

        let outcome = match error {
            Some(error) => Err(error),
            None => Ok(result.unwrap_or(Value::Null)),
        };
        callback(outcome);
        true
    }

    /// Runs the handler registered under `method` and `callback_id`.
    ///
    /// Returns `false` if no such handler exists.
    pub(crate) fn dispatch(&self, method: &str, callback_id: &str, arguments: Vec<Value>) -> bool {
        let handler = callback_id.parse::<CallbackId>().ok().and_then(|id| {
            self.inner
                .handlers
                .lock()
                .get(method)
                .and_then(|entries| entries.iter().find(|(cb, _)| *cb == id))
                .map(|(_, handler)| Arc::clone(handler))
        });

        match handler {
            Some(handler) => {
                handler(arguments);
                true
            }
            None => {
                trace!(hub = %self.inner.name, method, callback_id, "No handler for hub call");
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
