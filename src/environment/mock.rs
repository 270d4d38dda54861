//! Recording environment for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::protocol::InboundEvent;

use super::{Environment, EnvironmentConfig, EventSink, ScriptCallback};

/// Records every call instead of running scripts.
#[derive(Default)]
pub(crate) struct RecordingEnvironment {
    scripts: Mutex<Vec<String>>,
    configs: Mutex<Vec<EnvironmentConfig>>,
    sink: Mutex<Option<EventSink>>,
    pending: Mutex<Vec<(String, ScriptCallback)>>,
    shutdowns: AtomicUsize,
    fail_initialize: bool,
}

impl RecordingEnvironment {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_initialize: true,
            ..Self::default()
        })
    }

    /// Scripts submitted so far, in order.
    pub(crate) fn scripts(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }

    pub(crate) fn clear(&self) {
        self.scripts.lock().clear();
    }

    pub(crate) fn init_count(&self) -> usize {
        self.configs.lock().len()
    }

    pub(crate) fn last_config(&self) -> Option<EnvironmentConfig> {
        self.configs.lock().last().cloned()
    }

    pub(crate) fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Posts through the sink handed to `initialize`.
    pub(crate) fn post(&self, event: InboundEvent) -> bool {
        self.sink
            .lock()
            .as_ref()
            .is_some_and(|sink| sink.post(event))
    }

    /// Completes the oldest script that asked for a result.
    pub(crate) fn complete_next(&self, result: Option<Value>) -> Option<String> {
        let entry = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                None
            } else {
                Some(pending.remove(0))
            }
        };
        entry.map(|(script, callback)| {
            callback(result);
            script
        })
    }
}

impl Environment for RecordingEnvironment {
    fn initialize(&self, config: EnvironmentConfig, events: EventSink) -> Result<()> {
        if self.fail_initialize {
            return Err(Error::environment("asset load refused"));
        }
        self.configs.lock().push(config);
        *self.sink.lock() = Some(events);
        Ok(())
    }

    fn submit(&self, script: String, on_result: Option<ScriptCallback>) {
        if let Some(callback) = on_result {
            self.pending.lock().push((script.clone(), callback));
        }
        self.scripts.lock().push(script);
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.sink.lock().take();
    }
}
