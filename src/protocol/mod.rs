//! Messages exchanged with the script environment.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | [`Command`] | Local → Environment | Script statement calling a bootstrap helper |
//! | [`InboundEvent`] | Environment → Local | Lifecycle, data, completion and hub calls |
//! | `bridge::Outbound` | Local → Runtime | WebSocket envelope (`load`, `submit`) |
//! | `bridge::Inbound` | Runtime → Local | WebSocket envelope (`result`, `event`) |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `bridge` | WebSocket envelopes for out-of-process runtimes (`bridge` feature) |
//! | `command` | Outbound command scripts |
//! | `event` | Inbound event shapes and classification |
//! | `serializer` | Wire-value encoding |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket envelopes.
#[cfg(feature = "bridge")]
pub mod bridge;

/// Outbound command scripts.
pub mod command;

/// Inbound events.
pub mod event;

/// Wire-value encoding.
pub mod serializer;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::Command;
pub use event::{INVOKE_HANDLER, InboundEvent, ParsedEvent};
pub use serializer::{NULL_LITERAL, to_wire_value, to_wire_value_or_null};
