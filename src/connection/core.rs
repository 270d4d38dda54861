//! Connection state machine and inbound event dispatch.
//!
//! A [`Connection`] owns one environment, the command queue that gates it,
//! the hubs multiplexed over it and the lifecycle callback slots.
//!
//! # Lifecycle
//!
//! 1. [`Connection::start`] loads the protocol library into the environment
//!    and spawns the event pump
//! 2. The environment posts `ready`; the connection issues `setTransport`
//!    and `initialize`, flushes queued commands, declares hub handlers and
//!    issues `start`
//! 3. Lifecycle events move the state between connecting, connected and
//!    disconnected
//! 4. [`Connection::close`] or dropping the last handle stops the pump,
//!    discards pending invocations and shuts the environment down
//!
//! Callbacks that need the connection should capture a [`WeakConnection`].
//! A strong clone captured by a handler keeps the connection alive until
//! [`Connection::close`] is called.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use crate::environment::{Environment, EventSink};
use crate::error::{Error, Result};
use crate::hub::{Hub, HubRegistry};
use crate::identifiers::ConnectionId;
use crate::protocol::command::encode_payload;
use crate::protocol::{Command, InboundEvent, ParsedEvent};

use super::builder::ConnectionBuilder;
use super::callbacks::{LifecycleCallbacks, fire, fire_error};
use super::options::{ConnectionOptions, render_query};
use super::queue::CommandQueue;
use super::registry::ConnectionRegistry;
use super::state::{ConnectionState, Transport};

// ============================================================================
// Types
// ============================================================================

/// Work run exactly once when the environment reports readiness.
type ReadyContinuation = Box<dyn FnOnce(&ConnectionInner) + Send>;

/// State and server-assigned ID, updated together.
#[derive(Debug, Default)]
struct Status {
    state: ConnectionState,
    connection_id: Option<String>,
}

// ============================================================================
// ConnectionInner
// ============================================================================

/// Internal shared state for a connection.
pub(crate) struct ConnectionInner {
    /// Process-local identifier.
    id: ConnectionId,
    /// Configuration, updated by the runtime setters.
    options: RwLock<ConnectionOptions>,
    /// Environment hosting the protocol library.
    environment: Arc<dyn Environment>,
    /// Connection state and server-assigned ID.
    status: RwLock<Status>,
    /// Readiness flag and pre-readiness commands.
    queue: Mutex<CommandQueue>,
    /// Set once the environment has been asked to load.
    initialized: AtomicBool,
    /// Pending until the first `ready` event.
    ready_continuation: Mutex<Option<ReadyContinuation>>,
    /// Hubs by lowercased name.
    hubs: RwLock<HubRegistry>,
    /// Lifecycle callback slots.
    callbacks: RwLock<LifecycleCallbacks>,
    /// Stops the event pump.
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    /// Set once torn down; later commands are dropped.
    closed: AtomicBool,
}

impl ConnectionInner {
    /// Returns `true` once the environment has reported readiness.
    #[inline]
    pub(crate) fn is_ready(&self) -> bool {
        self.queue.lock().is_ready()
    }

    /// Submits a command now, or queues it until readiness.
    pub(crate) fn issue(&self, command: Command) {
        if self.is_closed() {
            debug!(
                connection_id = %self.id,
                command = command.name(),
                "Connection closed, command dropped"
            );
            return;
        }

        trace!(connection_id = %self.id, command = command.name(), "Issuing command");
        self.queue
            .lock()
            .enqueue_or_run(self.environment.as_ref(), command.to_script(), None);
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Releases everything the connection holds. Runs once.
    ///
    /// Hubs and callback slots are dropped here so closures holding a
    /// [`Connection`] clone no longer keep this instance alive.
    fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        self.ready_continuation.lock().take();

        let hubs = self.hubs.write().drain();
        for hub in &hubs {
            hub.detach();
        }
        let callbacks = std::mem::take(&mut *self.callbacks.write());

        self.environment.shutdown();
        ConnectionRegistry::global().unregister(self.id);

        debug!(connection_id = %self.id, hubs = hubs.len(), "Connection torn down");

        // Outside every lock.
        drop(callbacks);
        drop(hubs);
    }

    /// Flushes the queue and declares every hub's handlers.
    fn on_ready(&self) {
        let flushed = self.queue.lock().flush(self.environment.as_ref());

        let hubs: Vec<Hub> = self.hubs.read().iter().cloned().collect();
        for hub in &hubs {
            hub.declare_handlers(self);
        }

        debug!(
            connection_id = %self.id,
            flushed,
            hubs = hubs.len(),
            "Environment ready"
        );
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.teardown();
        trace!(connection_id = %self.id, "Connection dropped");
    }
}

// ============================================================================
// Connection
// ============================================================================

/// A SignalR connection driven through a script execution environment.
///
/// Cloning is cheap; clones share all state. The environment is shut down
/// by [`Connection::close`] or when the last clone is dropped.
///
/// Hub handlers, invocation callbacks and lifecycle callbacks are owned by
/// the connection. Capture a [`WeakConnection`] from [`Connection::downgrade`]
/// in them; a captured `Connection` keeps the instance registered until it is
/// closed.
#[derive(Clone)]
pub struct Connection {
    /// Shared inner state.
    pub(crate) inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.inner.status.read();
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("base_url", &self.inner.options.read().base_url)
            .field("state", &status.state)
            .field("connection_id", &status.connection_id)
            .field("ready", &self.inner.is_ready())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Constructor
// ============================================================================

impl Connection {
    /// Creates a configuration builder for a server base URL.
    #[inline]
    #[must_use]
    pub fn builder(base_url: impl Into<String>) -> ConnectionBuilder {
        ConnectionBuilder::new(base_url)
    }

    /// Creates a connection from validated options.
    ///
    /// Build-time setters are queued here, ahead of anything the caller
    /// issues later.
    pub(crate) fn new(options: ConnectionOptions, environment: Arc<dyn Environment>) -> Self {
        let id = ConnectionId::next();
        let setup = options.setup_commands();

        debug!(
            connection_id = %id,
            base_url = %options.base_url,
            kind = ?options.kind,
            "Connection created"
        );

        let inner = Arc::new(ConnectionInner {
            id,
            options: RwLock::new(options),
            environment,
            status: RwLock::new(Status::default()),
            queue: Mutex::new(CommandQueue::new()),
            initialized: AtomicBool::new(false),
            ready_continuation: Mutex::new(None),
            hubs: RwLock::new(HubRegistry::new()),
            callbacks: RwLock::new(LifecycleCallbacks::default()),
            shutdown_tx: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        ConnectionRegistry::global().register(id, Arc::downgrade(&inner));

        for command in setup {
            inner.issue(command);
        }

        Self { inner }
    }

    /// Creates a non-owning handle.
    #[inline]
    #[must_use]
    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

// ============================================================================
// WeakConnection
// ============================================================================

/// Non-owning handle to a [`Connection`], for use inside callbacks.
#[derive(Clone)]
pub struct WeakConnection {
    inner: Weak<ConnectionInner>,
}

impl fmt::Debug for WeakConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConnection")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl WeakConnection {
    /// Returns the connection if it has not been dropped or closed.
    #[must_use]
    pub fn upgrade(&self) -> Option<Connection> {
        self.inner
            .upgrade()
            .filter(|inner| !inner.is_closed())
            .map(|inner| Connection { inner })
    }
}

// ============================================================================
// Connection - Accessors
// ============================================================================

impl Connection {
    /// Returns the process-local connection identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.status.read().state
    }

    /// Returns the server-assigned connection ID while connected.
    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.inner.status.read().connection_id.clone()
    }

    /// Returns `true` once the environment has reported readiness.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    /// Returns `true` after [`Connection::close`].
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Returns a snapshot of the current options.
    #[must_use]
    pub fn options(&self) -> ConnectionOptions {
        self.inner.options.read().clone()
    }

    /// Looks up an attached hub by name, ignoring case.
    #[must_use]
    pub fn hub(&self, name: &str) -> Option<Hub> {
        self.inner.hubs.read().get(name).cloned()
    }

    /// Returns the number of attached hubs.
    #[inline]
    #[must_use]
    pub fn hub_count(&self) -> usize {
        self.inner.hubs.read().len()
    }
}

// ============================================================================
// Connection - Lifecycle
// ============================================================================

impl Connection {
    /// Starts the connection.
    ///
    /// The first call loads the environment; `start` is issued once it
    /// reports readiness. Calls while loading are ignored. After readiness
    /// every call issues `start` directly.
    ///
    /// Failures are not returned; they reach the `connection_failed`
    /// callback.
    pub fn start(&self) {
        if self.inner.is_closed() {
            debug!(connection_id = %self.inner.id, "start() on a closed connection ignored");
            return;
        }

        if self.inner.is_ready() {
            self.inner.issue(Command::Start);
            return;
        }

        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            trace!(connection_id = %self.inner.id, "Environment already loading");
            return;
        }

        if let Err(e) = self.initialize_environment() {
            self.inner.initialized.store(false, Ordering::SeqCst);
            self.inner.ready_continuation.lock().take();

            error!(connection_id = %self.inner.id, error = %e, "Environment initialization failed");

            let callback = self.inner.callbacks.read().connection_failed.clone();
            fire_error(callback, Some(e.to_payload()));
        }
    }

    /// Stops the connection. Queued until readiness.
    pub fn stop(&self) {
        self.inner.issue(Command::Stop);
    }

    /// Tears the connection down now instead of when the last handle drops.
    ///
    /// Stops the event pump, detaches every hub and discards its pending
    /// invocations, clears the lifecycle callbacks, shuts the environment
    /// down and unregisters the connection. Commands issued afterwards are
    /// dropped. Calling it again does nothing.
    pub fn close(&self) {
        self.inner.teardown();
    }

    /// Sends raw data over a persistent connection.
    ///
    /// `None` or an unencodable payload is sent as `null`.
    pub fn send<T: Serialize + ?Sized>(&self, payload: Option<&T>) {
        if self.inner.options.read().kind.is_hub() {
            debug!(connection_id = %self.inner.id, "send() on a hub connection");
        }

        self.inner.issue(Command::Send {
            payload: encode_payload(payload),
        });
    }

    /// Loads the environment and spawns the event pump.
    fn initialize_environment(&self) -> Result<()> {
        let handle = Handle::try_current()
            .map_err(|e| Error::environment(format!("start() requires a Tokio runtime: {e}")))?;

        let (sink, events) = EventSink::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        *self.inner.ready_continuation.lock() = Some(Box::new(ConnectionInner::on_ready));

        let config = self.inner.options.read().environment_config();
        debug!(
            connection_id = %self.inner.id,
            scripts = ?config.scripts,
            "Initializing environment"
        );
        self.inner.environment.initialize(config, sink)?;

        *self.inner.shutdown_tx.lock() = Some(shutdown_tx);
        handle.spawn(run_event_pump(
            Arc::downgrade(&self.inner),
            events,
            shutdown_rx,
        ));

        Ok(())
    }
}

// ============================================================================
// Connection - Hubs
// ============================================================================

impl Connection {
    /// Creates a hub bound to this connection.
    ///
    /// A hub already registered under the same name (ignoring case) is
    /// replaced.
    pub fn create_hub_proxy(&self, name: impl Into<String>) -> Hub {
        let hub = Hub::new(name);
        self.add_hub(&hub);
        hub
    }

    /// Attaches an externally built hub, replacing any hub of the same name.
    ///
    /// The replaced hub is detached and its pending invocations discarded.
    /// When the environment is already ready the hub's handlers are declared
    /// immediately.
    pub fn add_hub(&self, hub: &Hub) {
        hub.attach(Arc::downgrade(&self.inner));

        let replaced = self.inner.hubs.write().insert(hub.clone());
        if let Some(replaced) = replaced
            && !Arc::ptr_eq(&replaced.inner, &hub.inner)
        {
            debug!(connection_id = %self.inner.id, hub = %replaced.name(), "Hub replaced");
            replaced.detach();
        }

        if self.inner.is_ready() {
            hub.declare_handlers(&self.inner);
        }
    }
}

// ============================================================================
// Connection - Runtime Configuration
// ============================================================================

impl Connection {
    /// Changes the transport preference.
    ///
    /// Before readiness the preference is applied by the ready sequence.
    pub fn set_transport(&self, transport: Transport) {
        self.inner.options.write().transport = transport;
        if self.inner.is_ready() {
            self.inner.issue(Command::SetTransport { transport });
        }
    }

    /// Replaces the query parameters.
    pub fn set_query_string<K, V>(&self, params: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let query = {
            let mut options = self.inner.options.write();
            options.query = params
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect();
            render_query(&options.query)
        };
        self.inner.issue(Command::SetQueryString { query });
    }

    /// Replaces the custom request headers.
    pub fn set_headers<K, V>(&self, headers: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let headers = {
            let mut options = self.inner.options.write();
            options.headers = headers
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect();
            options.headers.clone()
        };
        self.inner.issue(Command::SetHeaders { headers });
    }

    /// Overrides the user agent.
    pub fn set_user_agent(&self, user_agent: impl Into<String>) {
        let user_agent = user_agent.into();
        self.inner.options.write().user_agent = Some(user_agent.clone());
        self.inner.issue(Command::SetUserAgent { user_agent });
    }
}

// ============================================================================
// Connection - Callbacks
// ============================================================================

impl Connection {
    /// Sets the callback run when the connection starts.
    ///
    /// Slots are cleared by [`Connection::close`]. A callback that captures a
    /// `Connection` clone keeps the connection alive until then.
    pub fn on_starting<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        self.inner.callbacks.write().starting = Some(Arc::new(callback));
    }

    /// Sets the callback run when the connection is established.
    pub fn on_connected<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        self.inner.callbacks.write().connected = Some(Arc::new(callback));
    }

    /// Sets the callback run when the connection closes.
    ///
    /// To restart from here capture [`Connection::downgrade`], not a clone.
    pub fn on_disconnected<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        self.inner.callbacks.write().disconnected = Some(Arc::new(callback));
    }

    /// Sets the callback run when keep-alives are late.
    pub fn on_connection_slow<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        self.inner.callbacks.write().connection_slow = Some(Arc::new(callback));
    }

    /// Sets the callback run when starting fails.
    pub fn on_connection_failed<F>(&self, callback: F)
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().connection_failed = Some(Arc::new(callback));
    }

    /// Sets the callback run when the transport is lost.
    pub fn on_reconnecting<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        self.inner.callbacks.write().reconnecting = Some(Arc::new(callback));
    }

    /// Sets the callback run when the transport is restored.
    pub fn on_reconnected<F: Fn() + Send + Sync + 'static>(&self, callback: F) {
        self.inner.callbacks.write().reconnected = Some(Arc::new(callback));
    }

    /// Sets the callback run on transport or protocol errors.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(Option<Value>) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().error = Some(Arc::new(callback));
    }

    /// Sets the callback receiving persistent-connection data.
    pub fn on_received<F>(&self, callback: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.inner.callbacks.write().received = Some(Arc::new(callback));
    }
}

// ============================================================================
// Connection - Event Processing
// ============================================================================

impl Connection {
    /// Applies one inbound event.
    ///
    /// The event pump calls this for every event the environment posts.
    /// State changes happen before the matching callback runs. Events that
    /// match nothing are dropped.
    pub fn process_event(&self, event: InboundEvent) {
        let parsed = event.parse();
        trace!(connection_id = %self.inner.id, event = ?parsed, "Processing event");

        // Cloned out so callbacks may replace slots.
        let callbacks = self.inner.callbacks.read().clone();

        match parsed {
            ParsedEvent::Ready => self.handle_ready(),

            ParsedEvent::Starting => {
                self.set_state(ConnectionState::Connecting);
                fire(callbacks.starting);
            }

            ParsedEvent::Connected { connection_id } => {
                {
                    let mut status = self.inner.status.write();
                    status.state = ConnectionState::Connected;
                    status.connection_id = connection_id;
                }
                debug!(connection_id = %self.inner.id, "Connected");
                fire(callbacks.connected);
            }

            ParsedEvent::Disconnected => {
                {
                    let mut status = self.inner.status.write();
                    status.state = ConnectionState::Disconnected;
                    status.connection_id = None;
                }
                debug!(connection_id = %self.inner.id, "Disconnected");
                fire(callbacks.disconnected);
            }

            ParsedEvent::ConnectionSlow => {
                fire(callbacks.connection_slow);
            }

            ParsedEvent::ConnectionFailed { error } => {
                warn!(connection_id = %self.inner.id, ?error, "Connection failed");
                fire_error(callbacks.connection_failed, error);
            }

            ParsedEvent::Reconnecting => {
                self.set_state(ConnectionState::Connecting);
                fire(callbacks.reconnecting);
            }

            ParsedEvent::Reconnected => {
                self.set_state(ConnectionState::Connected);
                fire(callbacks.reconnected);
            }

            ParsedEvent::InvokeResult {
                hub,
                id,
                result,
                error,
            } => match self.hub(&hub) {
                Some(target) => {
                    target.complete(&id, result, error);
                }
                None => match error {
                    Some(error) => {
                        warn!(%hub, %id, %error, "Invocation error for unknown hub");
                    }
                    None => trace!(%hub, %id, "Invocation result for unknown hub dropped"),
                },
            },

            ParsedEvent::Error { error } => {
                fire_error(callbacks.error, error);
            }

            ParsedEvent::Received { data } => {
                if let Some(callback) = callbacks.received {
                    callback(data);
                }
            }

            ParsedEvent::HubMethod {
                hub,
                method,
                callback_id,
                arguments,
            } => {
                if let Some(target) = self.hub(&hub) {
                    target.dispatch(&method, &callback_id, arguments);
                } else {
                    trace!(%hub, %method, "Hub call for unknown hub dropped");
                }
            }

            ParsedEvent::Unknown { message } => {
                trace!(?message, "Ignoring unrecognized event");
            }
        }
    }

    /// Runs the ready sequence once.
    fn handle_ready(&self) {
        let Some(continuation) = self.inner.ready_continuation.lock().take() else {
            warn!(connection_id = %self.inner.id, "Unexpected ready event ignored");
            return;
        };

        let (transport, base_url, is_hub) = {
            let options = self.inner.options.read();
            (options.transport, options.base_url.clone(), options.kind.is_hub())
        };

        // Ahead of the queue: queued setters need the connection object.
        let environment = self.inner.environment.as_ref();
        environment.submit(Command::SetTransport { transport }.to_script(), None);
        environment.submit(Command::Initialize { base_url, is_hub }.to_script(), None);

        continuation(&self.inner);
        self.inner.issue(Command::Start);
    }

    #[inline]
    fn set_state(&self, state: ConnectionState) {
        self.inner.status.write().state = state;
    }
}

// ============================================================================
// Event Pump
// ============================================================================

/// Drains environment events into the connection until shutdown.
///
/// Holds only a weak reference so the pump never keeps a connection alive.
async fn run_event_pump(
    connection: Weak<ConnectionInner>,
    mut events: mpsc::UnboundedReceiver<InboundEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    debug!("Event channel closed");
                    break;
                };

                let Some(inner) = connection.upgrade() else {
                    break;
                };

                Connection { inner }.process_event(event);
            }

            _ = &mut shutdown => {
                debug!("Event pump shutdown");
                break;
            }
        }
    }

    trace!("Event pump terminated");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde_json::json;

    use crate::environment::mock::RecordingEnvironment;
    use crate::hub::InvocationResult;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn connect(env: &Arc<RecordingEnvironment>) -> Connection {
        Connection::builder("http://x/")
            .environment(Arc::clone(env) as Arc<dyn Environment>)
            .build()
            .expect("build")
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let clone = Arc::clone(&count);
        (count, move || {
            clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn invocation_id_in(script: &str) -> String {
        let start = script.find("id: \"").expect("id field") + 5;
        script[start..start + 36].to_string()
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_connect_lifecycle() {
        init_tracing();
        let env = RecordingEnvironment::new();
        let connection = connect(&env);

        connection.start();
        assert_eq!(env.init_count(), 1);
        assert!(env.scripts().is_empty());
        assert!(!connection.is_ready());

        connection.process_event(InboundEvent::ready());
        assert!(connection.is_ready());
        assert_eq!(
            env.scripts(),
            vec![
                r#"setTransport("auto")"#,
                r#"initialize("http://x/", true)"#,
                "start()"
            ]
        );

        connection.process_event(InboundEvent::ready());
        assert_eq!(env.scripts().len(), 3);
    }

    #[tokio::test]
    async fn test_persistent_connection_initializes_without_hubs() {
        let env = RecordingEnvironment::new();
        let connection = Connection::builder("https://x/echo")
            .persistent()
            .transport(Transport::LongPolling)
            .environment(Arc::clone(&env) as Arc<dyn Environment>)
            .build()
            .expect("build");

        connection.start();
        connection.process_event(InboundEvent::ready());

        assert_eq!(
            env.scripts(),
            vec![
                r#"setTransport("longPolling")"#,
                r#"initialize("https://x/echo", false)"#,
                "start()"
            ]
        );
    }

    #[tokio::test]
    async fn test_queued_commands_replay_before_start() {
        let env = RecordingEnvironment::new();
        let connection = Connection::builder("http://x/")
            .query_param("token", "abc")
            .header("X-Test", "1")
            .environment(Arc::clone(&env) as Arc<dyn Environment>)
            .build()
            .expect("build");

        let hub = connection.create_hub_proxy("chat");
        hub.on("newMessage", |_| {});
        hub.invoke("send", vec![json!("hi")], None).expect("invoke");
        connection.stop();

        connection.start();
        assert!(env.scripts().is_empty());
        connection.process_event(InboundEvent::ready());

        let scripts = env.scripts();
        assert_eq!(scripts.len(), 8);
        assert_eq!(scripts[0], r#"setTransport("auto")"#);
        assert_eq!(scripts[1], r#"initialize("http://x/", true)"#);
        assert_eq!(scripts[2], r#"setQueryString("token=abc")"#);
        assert_eq!(scripts[3], r#"setHeaders({"X-Test":"1"})"#);
        assert!(scripts[4].starts_with(r#"ensureHubProxy("chat").invoke("send", "hi")"#));
        assert_eq!(scripts[5], "stop()");
        assert!(scripts[6].starts_with("addHandler("));
        assert_eq!(scripts[7], "start()");
    }

    #[tokio::test]
    async fn test_start_initializes_once() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);

        connection.start();
        connection.start();
        assert_eq!(env.init_count(), 1);

        connection.process_event(InboundEvent::ready());
        env.clear();

        connection.start();
        assert_eq!(env.scripts(), vec!["start()"]);
        assert_eq!(env.init_count(), 1);
    }

    #[tokio::test]
    async fn test_environment_config_from_options() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        connection.start();

        let config = env.last_config().expect("initialized");
        assert_eq!(config.origin.as_deref(), Some("http://x"));
        assert_eq!(config.scripts.len(), 2);
    }

    #[test]
    fn test_start_without_runtime_reports_failure() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let failure = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&failure);
        connection.on_connection_failed(move |error| *slot.lock() = error);

        connection.start();

        assert!(failure.lock().is_some());
        assert_eq!(env.init_count(), 0);
        assert!(!connection.inner.initialized.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_environment_failure_reports_failure_and_allows_retry() {
        let env = RecordingEnvironment::failing();
        let connection = Connection::builder("http://x/")
            .environment(Arc::clone(&env) as Arc<dyn Environment>)
            .build()
            .expect("build");
        let (failures, on_failed) = counter();
        connection.on_connection_failed(move |_| on_failed());

        connection.start();
        connection.start();

        assert_eq!(failures.load(Ordering::SeqCst), 2);
        connection.process_event(InboundEvent::ready());
        assert!(!connection.is_ready());
    }

    #[test]
    fn test_lifecycle_state_transitions() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let (connected, on_connected) = counter();
        let (starting, on_starting) = counter();
        connection.on_connected(on_connected);
        connection.on_starting(on_starting);

        assert_eq!(connection.state(), ConnectionState::Disconnected);

        connection.process_event(InboundEvent::message("starting"));
        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert_eq!(starting.load(Ordering::SeqCst), 1);

        connection.process_event(InboundEvent::connected("abc"));
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(connection.connection_id().as_deref(), Some("abc"));
        assert_eq!(connected.load(Ordering::SeqCst), 1);

        connection.process_event(InboundEvent::message("reconnecting"));
        assert_eq!(connection.state(), ConnectionState::Connecting);

        connection.process_event(InboundEvent::message("reconnected"));
        assert_eq!(connection.state(), ConnectionState::Connected);

        connection.process_event(InboundEvent::message("connectionSlow"));
        assert_eq!(connection.state(), ConnectionState::Connected);

        connection.process_event(InboundEvent::message("disconnected"));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(connection.connection_id().is_none());
    }

    #[test]
    fn test_state_is_set_before_callback_runs() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let observed = Arc::new(Mutex::new(None));

        let handle = connection.clone();
        let slot = Arc::clone(&observed);
        connection.on_connected(move || *slot.lock() = Some(handle.state()));

        connection.process_event(InboundEvent::connected("abc"));
        assert_eq!(*observed.lock(), Some(ConnectionState::Connected));
    }

    #[test]
    fn test_error_and_failure_payloads() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let errors = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&errors);
        connection.on_error(move |error| sink.lock().push(error));
        let sink = Arc::clone(&errors);
        connection.on_connection_failed(move |error| sink.lock().push(error));

        connection.process_event(InboundEvent::error(Some(json!({ "message": "boom" }))));
        connection.process_event(InboundEvent::error(None));
        connection.process_event(InboundEvent {
            error: Some(json!("refused")),
            ..InboundEvent::message("connectionFailed")
        });

        assert_eq!(
            *errors.lock(),
            vec![Some(json!({ "message": "boom" })), None, Some(json!("refused"))]
        );
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_received_data() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        connection.on_received(move |data| sink.lock().push(data));

        connection.process_event(InboundEvent::data(json!({ "n": 1 })));
        connection.process_event(InboundEvent::data(Value::Null));

        assert_eq!(*received.lock(), vec![json!({ "n": 1 }), Value::Null]);
    }

    #[test]
    fn test_unknown_message_ignored() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        connection.process_event(InboundEvent::message("somethingNew"));
        connection.process_event(InboundEvent::default());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(env.scripts().is_empty());
    }

    #[tokio::test]
    async fn test_rpc_round_trip() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let hub = connection.create_hub_proxy("chat");
        connection.start();
        connection.process_event(InboundEvent::ready());
        env.clear();

        let outcomes: Arc<Mutex<Vec<InvocationResult>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let id = hub
            .invoke(
                "send",
                vec![json!("hi")],
                Some(Box::new(move |outcome| sink.lock().push(outcome))),
            )
            .expect("invoke");

        let scripts = env.scripts();
        assert_eq!(scripts.len(), 1);
        assert_eq!(invocation_id_in(&scripts[0]), id.to_string());
        assert_eq!(hub.pending_count(), 1);

        let completion =
            InboundEvent::invoke_result("chat", id.to_string(), Some(json!("ok")), None);
        connection.process_event(completion.clone());
        connection.process_event(completion);

        assert_eq!(*outcomes.lock(), vec![Ok(json!("ok"))]);
        assert_eq!(hub.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_invoke_error_overrides_result() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let hub = connection.create_hub_proxy("chat");

        let outcome = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&outcome);
        let id = hub
            .invoke(
                "send",
                vec![],
                Some(Box::new(move |result| *slot.lock() = Some(result))),
            )
            .expect("invoke");

        connection.process_event(InboundEvent::invoke_result(
            "CHAT",
            id.to_string(),
            Some(json!("ignored")),
            Some(json!({ "message": "denied" })),
        ));

        assert_eq!(*outcome.lock(), Some(Err(json!({ "message": "denied" }))));
    }

    #[test]
    fn test_invoke_result_for_unknown_hub_dropped() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        connection.process_event(InboundEvent::invoke_result(
            "missing",
            "id",
            None,
            Some(json!("boom")),
        ));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_call_resolves_with_result() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let hub = connection.create_hub_proxy("chat");
        connection.start();
        connection.process_event(InboundEvent::ready());
        env.clear();

        let responder = {
            let connection = connection.clone();
            let hub = hub.clone();
            let env = Arc::clone(&env);
            async move {
                wait_until(|| hub.pending_count() == 1).await;
                let id = invocation_id_in(&env.scripts()[0]);
                connection.process_event(InboundEvent::invoke_result(
                    "chat",
                    id,
                    Some(json!(42)),
                    None,
                ));
            }
        };

        let (result, ()) = tokio::join!(hub.call("add", vec![json!(40), json!(2)]), responder);
        assert_eq!(result.expect("call"), json!(42));
    }

    #[tokio::test]
    async fn test_call_surfaces_hub_error() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let hub = connection.create_hub_proxy("chat");
        connection.start();
        connection.process_event(InboundEvent::ready());
        env.clear();

        let responder = {
            let connection = connection.clone();
            let hub = hub.clone();
            let env = Arc::clone(&env);
            async move {
                wait_until(|| hub.pending_count() == 1).await;
                let id = invocation_id_in(&env.scripts()[0]);
                connection.process_event(InboundEvent::invoke_result(
                    "chat",
                    id,
                    None,
                    Some(json!({ "message": "nope" })),
                ));
            }
        };

        let (result, ()) = tokio::join!(hub.call("add", vec![]), responder);
        let err = result.unwrap_err();
        assert!(err.is_hub_error());
        assert_eq!(err.to_string(), "Hub invocation failed: nope");
    }

    #[test]
    fn test_hub_proxy_routes_case_insensitively() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let hub = connection.create_hub_proxy("Chat");
        let (calls, on_call) = counter();
        let callback_id = hub.on("newMessage", move |_| on_call());

        connection.process_event(InboundEvent::hub_method(
            "chat",
            "newMessage",
            callback_id.to_string(),
            vec![json!("hello")],
        ));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            connection.hub("CHAT").map(|h| h.name().to_string()),
            Some("Chat".to_string())
        );
    }

    #[test]
    fn test_unknown_hub_call_is_ignored() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let hub = connection.create_hub_proxy("chat");
        let (calls, on_call) = counter();
        let callback_id = hub.on("newMessage", move |_| on_call());

        let id = callback_id.to_string();
        connection.process_event(InboundEvent::hub_method("other", "newMessage", &id, vec![]));
        connection.process_event(InboundEvent::hub_method("chat", "missing", &id, vec![]));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_handlers_declared_when_ready_or_attached() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        connection.start();
        connection.process_event(InboundEvent::ready());
        env.clear();

        let hub = connection.create_hub_proxy("chat");
        assert!(env.scripts().is_empty());

        let first = hub.on("a", |_| {});
        assert_eq!(
            env.scripts(),
            vec![format!(r#"addHandler("{first}", "chat", "a")"#)]
        );

        let detached = Hub::new("news");
        detached.on("b", |_| {});
        env.clear();
        connection.add_hub(&detached);
        assert_eq!(env.scripts().len(), 1);
        assert!(env.scripts()[0].contains(r#""news", "b""#));
    }

    #[test]
    fn test_add_hub_replaces_same_name() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let first = connection.create_hub_proxy("chat");
        first
            .invoke("send", vec![], Some(Box::new(|_| {})))
            .expect("invoke");

        let second = connection.create_hub_proxy("Chat");

        assert_eq!(connection.hub_count(), 1);
        assert!(!first.is_attached());
        assert_eq!(first.pending_count(), 0);
        assert!(second.is_attached());
    }

    #[tokio::test]
    async fn test_send_payloads() {
        let env = RecordingEnvironment::new();
        let connection = Connection::builder("http://x/")
            .persistent()
            .environment(Arc::clone(&env) as Arc<dyn Environment>)
            .build()
            .expect("build");

        connection.send(Some(&json!({ "a": 1 })));
        connection.send::<Value>(None);
        connection.start();
        connection.process_event(InboundEvent::ready());

        let scripts = env.scripts();
        assert_eq!(scripts[2], r#"send({"a":1})"#);
        assert_eq!(scripts[3], "send(null)");
    }

    #[tokio::test]
    async fn test_runtime_setters() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);

        connection.set_transport(Transport::ServerSentEvents);
        assert!(env.scripts().is_empty());

        connection.start();
        connection.process_event(InboundEvent::ready());
        assert_eq!(env.scripts()[0], r#"setTransport("serverSentEvents")"#);
        env.clear();

        connection.set_transport(Transport::WebSockets);
        connection.set_query_string([("b", "2"), ("a", "1")]);
        connection.set_headers([("X-A", "1")]);
        connection.set_user_agent("agent/2");

        assert_eq!(
            env.scripts(),
            vec![
                r#"setTransport("webSockets")"#,
                r#"setQueryString("a=1&b=2")"#,
                r#"setHeaders({"X-A":"1"})"#,
                r#"setUserAgent("agent/2")"#,
            ]
        );
        assert_eq!(connection.options().transport, Transport::WebSockets);
        assert_eq!(connection.options().user_agent.as_deref(), Some("agent/2"));
    }

    #[tokio::test]
    async fn test_event_pump_delivers_posted_events() {
        init_tracing();
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        connection.start();

        assert!(env.post(InboundEvent::ready()));
        wait_until(|| connection.is_ready()).await;

        assert!(env.post(InboundEvent::connected("server-id")));
        wait_until(|| connection.state() == ConnectionState::Connected).await;
        assert_eq!(connection.connection_id().as_deref(), Some("server-id"));
    }

    #[tokio::test]
    async fn test_drop_tears_down() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let id = connection.id();
        let hub = connection.create_hub_proxy("chat");
        connection.start();

        let (fired, on_done) = counter();
        hub.invoke("send", vec![], Some(Box::new(move |_| on_done())))
            .expect("invoke");
        assert!(ConnectionRegistry::global().contains(id));

        drop(connection);

        assert_eq!(env.shutdown_count(), 1);
        assert!(!hub.is_attached());
        assert_eq!(hub.pending_count(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!ConnectionRegistry::global().contains(id));
        assert!(!env.post(InboundEvent::ready()));
        assert!(hub.invoke("send", vec![], None).unwrap_err().is_not_connected());
    }

    #[tokio::test]
    async fn test_call_stays_pending_until_completed() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let hub = connection.create_hub_proxy("chat");
        connection.start();
        connection.process_event(InboundEvent::ready());
        env.clear();

        let mut call = tokio_test::task::spawn(hub.call("ping", vec![]));
        tokio_test::assert_pending!(call.poll());
        assert!(env.scripts()[0].contains(r#".invoke("ping")"#));

        let id = invocation_id_in(&env.scripts()[0]);
        connection.process_event(InboundEvent::invoke_result(
            "chat",
            id,
            Some(json!("pong")),
            None,
        ));

        assert!(call.is_woken());
        let result = tokio_test::assert_ready_ok!(call.poll());
        assert_eq!(result, json!("pong"));
    }

    #[tokio::test]
    async fn test_call_after_teardown_resolves_closed() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let hub = connection.create_hub_proxy("chat");

        let dropper = {
            let hub = hub.clone();
            async move {
                wait_until(|| hub.pending_count() == 1).await;
                drop(connection);
            }
        };

        let (result, ()) = tokio::join!(hub.call("send", vec![]), dropper);
        assert!(matches!(result, Err(Error::ChannelClosed(_))));
    }

    #[tokio::test]
    async fn test_close_releases_connection_captured_by_handlers() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let id = connection.id();
        let hub = connection.create_hub_proxy("chat");

        let handle = connection.clone();
        let callback_id = hub.on("kick", move |_| handle.stop());
        let handle = connection.clone();
        connection.on_disconnected(move || handle.start());

        connection.start();
        connection.process_event(InboundEvent::ready());
        env.clear();

        let id_text = callback_id.to_string();
        connection.process_event(InboundEvent::hub_method("chat", "kick", &id_text, vec![]));
        assert_eq!(env.scripts(), vec!["stop()"]);

        connection.close();
        assert!(connection.is_closed());
        assert_eq!(env.shutdown_count(), 1);
        assert!(!ConnectionRegistry::global().contains(id));
        assert!(!hub.is_attached());
        assert_eq!(connection.hub_count(), 0);
        assert!(connection.downgrade().upgrade().is_none());

        connection.stop();
        connection.start();
        assert_eq!(env.scripts(), vec!["stop()"]);
        assert_eq!(env.init_count(), 1);

        connection.close();
        drop(hub);
        drop(connection);
        assert_eq!(env.shutdown_count(), 1);
    }

    #[tokio::test]
    async fn test_weak_handle_in_handlers_lets_connection_drop() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let id = connection.id();
        let hub = connection.create_hub_proxy("chat");

        let weak = connection.downgrade();
        let callback_id = hub.on("kick", move |_| {
            if let Some(connection) = weak.upgrade() {
                connection.stop();
            }
        });
        let weak = connection.downgrade();
        connection.on_disconnected(move || {
            if let Some(connection) = weak.upgrade() {
                connection.start();
            }
        });

        connection.start();
        connection.process_event(InboundEvent::ready());
        env.clear();

        let id_text = callback_id.to_string();
        connection.process_event(InboundEvent::hub_method("chat", "kick", &id_text, vec![]));
        assert_eq!(env.scripts(), vec!["stop()"]);

        let observer = connection.downgrade();
        drop(connection);

        assert!(observer.upgrade().is_none());
        assert_eq!(env.shutdown_count(), 1);
        assert!(!ConnectionRegistry::global().contains(id));
        assert!(!hub.is_attached());
    }

    enum Arg {
        Int(i32),
        Broken,
    }

    impl Serialize for Arg {
        fn serialize<S: serde::Serializer>(
            &self,
            serializer: S,
        ) -> std::result::Result<S::Ok, S::Error> {
            match self {
                Self::Int(value) => serializer.serialize_i32(*value),
                Self::Broken => Err(serde::ser::Error::custom("cannot encode")),
            }
        }
    }

    #[tokio::test]
    async fn test_unencodable_argument_sent_as_null() {
        let env = RecordingEnvironment::new();
        let connection = connect(&env);
        let hub = connection.create_hub_proxy("chat");
        connection.start();
        connection.process_event(InboundEvent::ready());
        env.clear();

        hub.invoke_with("m", &[Arg::Int(1), Arg::Broken], None)
            .expect("invoke");

        let scripts = env.scripts();
        assert_eq!(scripts.len(), 1);
        assert!(scripts[0].starts_with(r#"ensureHubProxy("chat").invoke("m", 1, null)"#));
    }
}
