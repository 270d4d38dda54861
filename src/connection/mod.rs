//! Connection state machine, configuration and command queue.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent configuration builder |
//! | `callbacks` | Lifecycle callback slots |
//! | `core` | [`Connection`] and inbound event dispatch |
//! | `options` | Validated configuration |
//! | `queue` | Pre-readiness command queue |
//! | `registry` | Process-wide registry of live connections |
//! | `state` | State, kind and transport enums |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent configuration builder.
pub mod builder;

/// Lifecycle callback slots.
pub mod callbacks;

/// Connection type and event dispatch.
pub mod core;

/// Validated configuration.
pub mod options;

/// Pre-readiness command queue.
pub mod queue;

/// Process-wide connection registry.
pub mod registry;

/// State, kind and transport enums.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{Connection, WeakConnection};
pub use builder::ConnectionBuilder;
pub use callbacks::{Callback, ErrorCallback, ReceivedCallback};
pub use options::ConnectionOptions;
pub use queue::CommandQueue;
pub use registry::{CleanupHook, ConnectionRegistry};
pub use state::{ConnectionKind, ConnectionState, Transport};
