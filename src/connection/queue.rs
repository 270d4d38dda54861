//! Ordering buffer for commands issued before the environment is ready.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;

use tracing::trace;

use crate::environment::{Environment, ScriptCallback};

// ============================================================================
// QueuedCommand
// ============================================================================

/// A command waiting for readiness.
struct QueuedCommand {
    /// Rendered script.
    script: String,
    /// Result callback, if the caller wants one.
    on_result: Option<ScriptCallback>,
}

// ============================================================================
// CommandQueue
// ============================================================================

/// FIFO of commands plus the readiness flag that gates it.
///
/// Readiness and the queue live together so that a command can never be
/// appended after the flush has drained the queue.
#[derive(Default)]
pub struct CommandQueue {
    /// Whether the environment has reported readiness.
    ready: bool,
    /// Commands submitted before readiness.
    entries: VecDeque<QueuedCommand>,
}

impl CommandQueue {
    /// Creates an empty, not-ready queue.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once [`flush`](Self::flush) has run.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Returns the number of queued commands.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Submits immediately when ready, otherwise appends to the tail.
    ///
    /// Returns `true` if the command was submitted.
    pub fn enqueue_or_run(
        &mut self,
        environment: &dyn Environment,
        script: String,
        on_result: Option<ScriptCallback>,
    ) -> bool {
        if self.ready {
            trace!(%script, "Submitting command");
            environment.submit(script, on_result);
            true
        } else {
            trace!(%script, queued = self.entries.len() + 1, "Queueing command");
            self.entries.push_back(QueuedCommand { script, on_result });
            false
        }
    }

    /// Marks the queue ready and submits every entry in original order.
    ///
    /// Returns the number of flushed commands. A second call finds the queue
    /// empty and flushes nothing.
    pub fn flush(&mut self, environment: &dyn Environment) -> usize {
        self.ready = true;
        let entries = std::mem::take(&mut self.entries);
        let count = entries.len();

        for QueuedCommand { script, on_result } in entries {
            environment.submit(script, on_result);
        }

        if count > 0 {
            trace!(count, "Flushed queued commands");
        }
        count
    }
}

// ============================================================================
// Tests
// ============================================================================
