//! Type-safe identifiers.
//!
//! Newtype wrappers keep connection, callback, invocation and bridge
//! message IDs from being mixed up at compile time.
//!
//! | Type | Backing | Scope |
//! |------|---------|-------|
//! | [`ConnectionId`] | `u32` counter | process |
//! | [`CallbackId`] | UUID v4 | hub handler registration |
//! | [`InvocationId`] | UUID v4 | one in-flight `invoke` |
//! | [`MessageId`] | UUID v4 | one bridge envelope |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ConnectionId
// ============================================================================

/// Counter backing [`ConnectionId::next`].
static NEXT_CONNECTION_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identifier of a [`Connection`](crate::Connection).
///
/// Used only for registry bookkeeping; the server-assigned SignalR
/// connection ID is a plain string on the connection itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u32);

impl ConnectionId {
    /// Allocates the next process-unique ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// UUID-backed identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a fresh random ID.
            #[inline]
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Returns the underlying UUID.
            #[inline]
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id! {
    /// Identifies one handler registered with [`Hub::on`](crate::Hub::on).
    CallbackId
}

uuid_id! {
    /// Correlates an `invoke` with its `invokeHandler` completion event.
    InvocationId
}

uuid_id! {
    /// Correlates a bridge `submit` envelope with its `result` envelope.
    MessageId
}

// ============================================================================
// Tests
// ============================================================================
