//! Lifecycle callback slots.
//!
//! Each slot holds at most one callback; setting a slot replaces the
//! previous one. Callbacks are cloned out of the slot before they run, so a
//! callback may freely call back into its connection.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;

// ============================================================================
// Types
// ============================================================================

/// Callback with no payload.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Callback receiving an optional error payload.
pub type ErrorCallback = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Callback receiving persistent-connection data.
pub type ReceivedCallback = Arc<dyn Fn(Value) + Send + Sync>;

// ============================================================================
// LifecycleCallbacks
// ============================================================================

/// The callback slots of one connection.
#[derive(Default, Clone)]
pub struct LifecycleCallbacks {
    pub(crate) starting: Option<Callback>,
    pub(crate) connected: Option<Callback>,
    pub(crate) disconnected: Option<Callback>,
    pub(crate) connection_slow: Option<Callback>,
    pub(crate) connection_failed: Option<ErrorCallback>,
    pub(crate) reconnecting: Option<Callback>,
    pub(crate) reconnected: Option<Callback>,
    pub(crate) error: Option<ErrorCallback>,
    pub(crate) received: Option<ReceivedCallback>,
}

// ============================================================================
// Invocation helpers
// ============================================================================

/// Runs a payload-less callback if the slot is filled.
#[inline]
pub(crate) fn fire(slot: Option<Callback>) {
    if let Some(callback) = slot {
        callback();
    }
}

/// Runs an error callback if the slot is filled.
#[inline]
pub(crate) fn fire_error(slot: Option<ErrorCallback>, error: Option<Value>) {
    if let Some(callback) = slot {
        callback(error);
    }
}
