//! Local event bus for node lifecycle notifications.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Well-known local events.
pub mod events {
    /// A remote node is gone. Argument: its node ID.
    pub const NODE_DISCONNECTED: &str = "$node.disconnected";
    /// The local broker finished starting.
    pub const BROKER_STARTED: &str = "$broker.started";
    /// A latency sample. Argument: `{nodeID, elapsedTime, timeDiff}`.
    pub const NODE_PONG: &str = "$node.pong";
}

pub type EventHandler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// In-process emitter shared by the engine and its collaborators.
#[derive(Clone, Default)]
pub struct LocalBus {
    handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(event.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Run every handler for `event` inline.
    pub fn emit(&self, event: &str, args: Vec<Value>) {
        for handler in self.handlers_for(event) {
            handler(args.clone());
        }
    }

    /// Run every handler for `event` on its own task.
    pub fn emit_async(&self, event: &str, args: Vec<Value>) {
        let handlers = self.handlers_for(event);
        tracing::trace!(event, handlers = handlers.len(), "emit");
        for handler in handlers {
            let args = args.clone();
            tokio::spawn(async move { handler(args) });
        }
    }

    fn handlers_for(&self, event: &str) -> Vec<EventHandler> {
        self.handlers.read().get(event).cloned().unwrap_or_default()
    }
}
