//! Process-wide registry of live connections.
//!
//! Every [`Connection`] registers itself on construction and unregisters
//! when closed or when its last handle is dropped. When the last live one goes
//! away the registry runs its cleanup hook, which hosts use to release
//! shared resources such as a webview runtime.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::identifiers::ConnectionId;

use super::core::{Connection, ConnectionInner};

// ============================================================================
// Types
// ============================================================================

/// Hook run when the last live connection unregisters.
pub type CleanupHook = Arc<dyn Fn() + Send + Sync>;

/// Registry contents.
#[derive(Default)]
struct RegistryState {
    live: FxHashMap<ConnectionId, Weak<ConnectionInner>>,
    cleanup: Option<CleanupHook>,
}

// ============================================================================
// Statics
// ============================================================================

static GLOBAL: LazyLock<ConnectionRegistry> = LazyLock::new(ConnectionRegistry::new);

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Tracks live connections by [`ConnectionId`].
#[derive(Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
    /// Held while the cleanup hook runs; `state` is not.
    cleanup: Mutex<()>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionRegistry")
            .field("live", &state.live.len())
            .field("has_cleanup_hook", &state.cleanup.is_some())
            .finish()
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry.
    #[inline]
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Installs the hook run when the registry becomes empty.
    pub fn set_cleanup_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.state.lock().cleanup = Some(Arc::new(hook));
    }

    /// Removes the cleanup hook.
    pub fn clear_cleanup_hook(&self) {
        self.state.lock().cleanup = None;
    }

    /// Adds a live connection.
    pub(crate) fn register(&self, id: ConnectionId, connection: Weak<ConnectionInner>) {
        let mut state = self.state.lock();
        state.live.insert(id, connection);
        debug!(connection_id = %id, live = state.live.len(), "Connection registered");
    }

    /// Removes a connection.
    ///
    /// Returns `true` if it was the last one; the cleanup hook has run by
    /// then.
    ///
    /// Hook runs are serialized with each other but not with the registry,
    /// so a hook may query it or register connections. A hook must not drop
    /// the last connection itself. The hook is skipped if a connection
    /// registered in the meantime.
    pub(crate) fn unregister(&self, id: ConnectionId) -> bool {
        let hook = {
            let mut state = self.state.lock();
            if state.live.remove(&id).is_none() {
                return false;
            }

            debug!(connection_id = %id, live = state.live.len(), "Connection unregistered");

            if !state.live.is_empty() {
                return false;
            }
            state.cleanup.clone()
        };

        if let Some(hook) = hook {
            let _running = self.cleanup.lock();
            if self.is_empty() {
                debug!("Last connection gone, running cleanup hook");
                hook();
            }
        }
        true
    }

    /// Returns the number of live connections.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Returns `true` if no connection is live.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().live.is_empty()
    }

    /// Returns `true` if a connection with this ID is registered.
    #[inline]
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.state.lock().live.contains_key(&id)
    }

    /// Returns a handle to a live connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Connection> {
        self.state
            .lock()
            .live
            .get(&id)
            .and_then(Weak::upgrade)
            .map(|inner: Arc<ConnectionInner>| Connection { inner })
    }
}

// ============================================================================
// Tests
// ============================================================================
