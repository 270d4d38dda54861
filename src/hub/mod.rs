//! Hub proxies multiplexed over a connection.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Hub`] | Named hub: client method handlers and server invocations |
//! | [`HubRegistry`] | Case-insensitive hub lookup for one connection |

// ============================================================================
// Submodules
// ============================================================================

/// Hub proxy type.
pub mod core;

/// Case-insensitive hub registry.
pub mod registry;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{Hub, HubHandler, InvocationCallback, InvocationResult};
pub use registry::HubRegistry;
