//! In-process transport.
//!
//! A [`MemoryHub`] plays the broker; each node gets its own
//! [`MemoryTransport`]. Messages are still encoded to bytes on publish and
//! decoded per subscriber, so codec failures surface as they would on a
//! real wire.

use crate::error::TransportError;
use crate::transport::{Transport, TransportFactory, TransportHandler, channel_name};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::oneshot;
use transit_core::{Command, Payload, Serializer};

struct Subscription {
    owner: u64,
    handler: TransportHandler,
    serializer: Arc<dyn Serializer>,
}

struct HubInner {
    channels: Mutex<HashMap<String, Vec<Subscription>>>,
    available: AtomicBool,
    next_transport: AtomicU64,
}

/// Shared in-memory broker.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: Mutex::new(HashMap::new()),
                available: AtomicBool::new(true),
                next_transport: AtomicU64::new(1),
            }),
        }
    }

    /// When unavailable, `connect` reports `false`.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    pub fn transport(
        &self,
        prefix: impl Into<String>,
        serializer: Arc<dyn Serializer>,
    ) -> MemoryTransport {
        MemoryTransport {
            id: self.inner.next_transport.fetch_add(1, Ordering::Relaxed),
            hub: self.clone(),
            prefix: prefix.into(),
            serializer,
            connected: AtomicBool::new(false),
        }
    }

    pub fn factory(
        &self,
        prefix: impl Into<String>,
        serializer: Arc<dyn Serializer>,
    ) -> TransportFactory {
        let hub = self.clone();
        let prefix = prefix.into();
        Arc::new(move || {
            Arc::new(hub.transport(prefix.clone(), serializer.clone())) as Arc<dyn Transport>
        })
    }

    /// Number of live subscriptions on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .lock()
            .get(channel)
            .map_or(0, Vec::len)
    }

    fn add(&self, channel: String, subscription: Subscription) {
        self.inner
            .channels
            .lock()
            .entry(channel)
            .or_default()
            .push(subscription);
    }

    fn remove_owner(&self, owner: u64) -> usize {
        let mut channels = self.inner.channels.lock();
        let mut removed = 0;
        channels.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| s.owner != owner);
            removed += before - subs.len();
            !subs.is_empty()
        });
        removed
    }

    fn deliver(&self, channel: &str, bytes: Arc<Vec<u8>>) {
        let targets: Vec<(TransportHandler, Arc<dyn Serializer>)> =
            match self.inner.channels.lock().get(channel) {
                Some(subs) => subs
                    .iter()
                    .map(|s| (s.handler.clone(), s.serializer.clone()))
                    .collect(),
                None => Vec::new(),
            };
        tracing::trace!(channel, subscribers = targets.len(), "deliver");
        for (handler, serializer) in targets {
            let bytes = bytes.clone();
            let channel = channel.to_string();
            tokio::spawn(async move {
                match serializer.bytes_to_payload(&bytes) {
                    Ok(message) => handler(message).await,
                    Err(e) => tracing::warn!(%channel, "dropping undecodable message: {}", e),
                }
            });
        }
    }
}

/// One node's connection to a [`MemoryHub`].
pub struct MemoryTransport {
    id: u64,
    hub: MemoryHub,
    prefix: String,
    serializer: Arc<dyn Serializer>,
    connected: AtomicBool,
}

impl MemoryTransport {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Transport for MemoryTransport {
    fn subscribe(&self, command: Command, node_id: &str, handler: TransportHandler) {
        let channel = channel_name(&self.prefix, command, node_id);
        tracing::trace!(%channel, "subscribe");
        self.hub.add(
            channel,
            Subscription {
                owner: self.id,
                handler,
                serializer: self.serializer.clone(),
            },
        );
    }

    fn make_balanced_subscriptions(&self) {
        tracing::trace!("memory transport has no queue groups");
    }

    fn publish(&self, command: Command, node_id: &str, message: Payload) {
        let channel = channel_name(&self.prefix, command, node_id);
        if !self.is_connected() {
            tracing::warn!(%channel, "publish on a disconnected transport dropped");
            return;
        }
        match self.serializer.payload_to_bytes(&message) {
            Ok(bytes) => self.hub.deliver(&channel, Arc::new(bytes)),
            Err(e) => tracing::error!(%channel, "failed to encode message: {}", e),
        }
    }

    fn connect(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let available = self.hub.inner.available.load(Ordering::SeqCst);
        self.connected.store(available, Ordering::SeqCst);
        let _ = tx.send(available);
        rx
    }

    fn disconnect(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.connected.store(false, Ordering::SeqCst);
        let removed = self.hub.remove_owner(self.id);
        tracing::debug!(removed, "memory transport disconnected");
        let _ = tx.send(true);
        rx
    }

    fn request(&self, _message: Payload) -> oneshot::Receiver<Result<Payload, TransportError>> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(TransportError::Unsupported("request")));
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::handler;
    use serde_json::json;
    use tokio::sync::mpsc;
    use transit_core::JsonSerializer;

    fn codec() -> Arc<dyn Serializer> {
        Arc::new(JsonSerializer::new())
    }

    #[tokio::test]
    async fn directed_and_broadcast_delivery() {
        let hub = MemoryHub::new();
        let a = hub.transport("MOL", codec());
        let b = hub.transport("MOL", codec());
        assert!(a.connect().await.unwrap());
        assert!(b.connect().await.unwrap());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let direct = tx.clone();
        b.subscribe(Command::Req, "b", handler(move |m: Payload| {
            let tx = direct.clone();
            async move {
                let _ = tx.send(("direct", m.get("n").int()));
            }
        }));
        b.subscribe(Command::Heartbeat, "", handler(move |m: Payload| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(("broadcast", m.get("n").int()));
            }
        }));

        let message = |n| Payload::new(json!({ "n": n }));
        a.publish(Command::Req, "b", message(1));
        a.publish(Command::Req, "c", message(2));
        a.publish(Command::Heartbeat, "", message(3));

        let mut got = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        got.sort();
        assert_eq!(got, vec![("broadcast", 3), ("direct", 1)]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_drops_own_subscriptions() {
        let hub = MemoryHub::new();
        let a = hub.transport("MOL", codec());
        let b = hub.transport("MOL", codec());
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let noop = handler(|_| async {});
        a.subscribe(Command::Info, "", noop.clone());
        b.subscribe(Command::Info, "", noop);
        assert_eq!(hub.subscriber_count("MOL.INFO"), 2);

        assert!(a.disconnect().await.unwrap());
        assert_eq!(hub.subscriber_count("MOL.INFO"), 1);
        assert!(!a.is_connected());
    }

    #[tokio::test]
    async fn unavailable_hub_refuses_connect() {
        let hub = MemoryHub::new();
        hub.set_available(false);
        let t = hub.transport("MOL", codec());
        assert!(!t.connect().await.unwrap());
        hub.set_available(true);
        assert!(t.connect().await.unwrap());
    }

    #[tokio::test]
    async fn raw_request_is_unsupported() {
        let hub = MemoryHub::new();
        let t = hub.transport("MOL", codec());
        let reply = t.request(Payload::new(json!({}))).await.unwrap();
        assert_eq!(reply, Err(TransportError::Unsupported("request")));
    }
}
