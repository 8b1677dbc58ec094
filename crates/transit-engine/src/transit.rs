//! The Transit engine: request/response correlation, discovery, heartbeats
//! and latency probes over a [`Transport`].
//!
//! An outbound call registers a pending entry under its correlation ID and
//! publishes a REQ to the target node. The matching RES, a disconnect of the
//! target, a timeout, or local shutdown removes the entry and delivers
//! exactly one value on the caller's channel.

use crate::bus::{LocalBus, events};
use crate::config::TransitConfig;
use crate::error::TransitError;
use crate::incoming::Incoming;
use crate::latency::LatencySample;
use crate::pending::{CallResult, PendingRequest, PendingTable, ResultReceiver};
use crate::transport::{Transport, TransportFactory, handler};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use transit_core::{
    CallContext, Command, LocalNode, Payload, Serializer, fields, unix_now,
};

/// Receives HEARTBEAT, INFO and DISCONNECT packets.
pub trait RegistryHandler: Send + Sync {
    fn handle(&self, command: Command, message: &Payload);
}

impl<F> RegistryHandler for F
where
    F: Fn(Command, &Payload) + Send + Sync,
{
    fn handle(&self, command: Command, message: &Payload) {
        self(command, message)
    }
}

/// Failure of a local action, reported back to the caller in the RES.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct ActionError {
    pub name: String,
    pub message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("ActionError", message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Runs a local action for an inbound REQ.
pub trait ActionInvoker: Send + Sync {
    fn invoke(&self, context: CallContext) -> BoxFuture<'static, Result<Value, ActionError>>;
}

impl<F> ActionInvoker for F
where
    F: Fn(CallContext) -> BoxFuture<'static, Result<Value, ActionError>> + Send + Sync,
{
    fn invoke(&self, context: CallContext) -> BoxFuture<'static, Result<Value, ActionError>> {
        self(context)
    }
}

/// Everything the engine talks to.
pub struct Collaborators {
    pub node: Arc<dyn LocalNode>,
    pub serializer: Arc<dyn Serializer>,
    pub bus: LocalBus,
    pub registry: Arc<dyn RegistryHandler>,
    pub invoker: Arc<dyn ActionInvoker>,
    pub transport_factory: TransportFactory,
}

/// Where a subscription listens.
#[derive(Debug, Clone, Copy)]
enum Channel {
    Local,
    Broadcast,
}

const SUBSCRIPTIONS: [(Command, Channel); 11] = [
    (Command::Res, Channel::Local),
    (Command::Req, Channel::Local),
    (Command::Heartbeat, Channel::Broadcast),
    (Command::Discover, Channel::Broadcast),
    (Command::Discover, Channel::Local),
    (Command::Disconnect, Channel::Broadcast),
    (Command::Info, Channel::Broadcast),
    (Command::Info, Channel::Local),
    (Command::Event, Channel::Local),
    (Command::Ping, Channel::Local),
    (Command::Pong, Channel::Local),
];

/// Handle to one engine instance. Cheap to clone.
#[derive(Clone)]
pub struct Transit {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransitConfig,
    node: Arc<dyn LocalNode>,
    serializer: Arc<dyn Serializer>,
    bus: LocalBus,
    registry: Arc<dyn RegistryHandler>,
    invoker: Arc<dyn ActionInvoker>,
    transport_factory: TransportFactory,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    connected: AtomicBool,
    connect_lock: tokio::sync::Mutex<()>,
    pending: PendingTable,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl Transit {
    /// Build an engine and hook it to `$node.disconnected` and
    /// `$broker.started` on the collaborators' bus.
    pub fn new(config: TransitConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            node,
            serializer,
            bus,
            registry,
            invoker,
            transport_factory,
        } = collaborators;
        let inner = Arc::new(Inner {
            config,
            node,
            serializer,
            bus,
            registry,
            invoker,
            transport_factory,
            transport: Mutex::new(None),
            connected: AtomicBool::new(false),
            connect_lock: tokio::sync::Mutex::new(()),
            pending: PendingTable::new(),
            heartbeat: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        inner.bus.on(events::NODE_DISCONNECTED, move |args| {
            let Some(inner) = weak.upgrade() else { return };
            match args.first().and_then(Value::as_str) {
                Some(node_id) => inner.on_node_disconnected(node_id),
                None => tracing::warn!("{} without a node id", events::NODE_DISCONNECTED),
            }
        });
        let weak = Arc::downgrade(&inner);
        inner.bus.on(events::BROKER_STARTED, move |_| {
            if let Some(inner) = weak.upgrade() {
                if inner.is_connected() {
                    inner.broadcast_node_info("");
                }
            }
        });

        Self { inner }
    }

    pub fn node_id(&self) -> &str {
        self.inner.local_id()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn bus(&self) -> &LocalBus {
        &self.inner.bus
    }

    /// Connect the transport and subscribe to every protocol channel.
    ///
    /// Resolves once with the outcome. Already connected resolves `true`
    /// immediately; a failed attempt leaves the engine disconnected and may
    /// be retried. Must be called from within a tokio runtime.
    pub fn connect(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        if self.inner.is_connected() {
            let _ = tx.send(true);
            return rx;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let connected = inner.connect().await;
            let _ = tx.send(connected);
        });
        rx
    }

    /// Announce departure, cancel every outbound call and drop the
    /// transport with its subscriptions.
    pub fn disconnect(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let disconnected = inner.disconnect().await;
            let _ = tx.send(disconnected);
        });
        rx
    }

    /// Send `context` to its target node and return the channel on which
    /// the single result will arrive.
    pub fn request(&self, context: CallContext) -> Result<ResultReceiver, TransitError> {
        self.inner.request(context)
    }

    pub fn send_heartbeat(&self) {
        self.inner.send_heartbeat();
    }

    /// Heartbeat every `heartbeat_interval_secs` while connected. Replaces a
    /// previously started task.
    pub fn start_heartbeats(&self) {
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.config.heartbeat_interval();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                if inner.is_connected() {
                    inner.send_heartbeat();
                }
            }
        });
        if let Some(previous) = self.inner.heartbeat.lock().replace(task) {
            previous.abort();
        }
    }

    /// Probe one node, or every node when `node_id` is empty.
    pub fn discover_node(&self, node_id: &str) {
        self.inner.discover_node(node_id);
    }

    /// Broadcast a DISCOVER probe.
    pub fn discover_nodes(&self) -> oneshot::Receiver<bool> {
        let (tx, rx) = oneshot::channel();
        self.inner.discover_node("");
        let _ = tx.send(true);
        rx
    }

    /// Publish this node's descriptor to one node, or to all when
    /// `target` is empty.
    pub fn broadcast_node_info(&self, target: &str) {
        self.inner.broadcast_node_info(target);
    }

    /// Ask `node_id` for a PONG. The result surfaces as a `$node.pong`
    /// event on the local bus.
    pub fn send_ping(&self, node_id: &str) -> Result<(), TransitError> {
        let mut body = self.inner.body();
        body.insert(fields::TIME.into(), Value::from(unix_now()));
        self.inner.publish(Command::Ping, node_id, &body)
    }

    pub fn send_event(
        &self,
        node_id: &str,
        event: &str,
        data: Value,
        groups: &[String],
    ) -> Result<(), TransitError> {
        let mut body = self.inner.body();
        body.insert(fields::EVENT.into(), Value::from(event));
        body.insert(fields::DATA.into(), data);
        body.insert(fields::GROUPS.into(), json!(groups));
        self.inner.publish(Command::Event, node_id, &body)
    }
}

impl Inner {
    fn local_id(&self) -> &str {
        self.node.id().as_str()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.lock().clone()
    }

    /// Still connected through `transport`, not through a later one.
    fn is_attached(&self, transport: &Arc<dyn Transport>) -> bool {
        self.is_connected()
            && self
                .transport()
                .is_some_and(|current| Arc::ptr_eq(&current, transport))
    }

    /// A body holding only `sender`.
    fn body(&self) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert(fields::SENDER.into(), Value::from(self.local_id()));
        body
    }

    fn publish(
        &self,
        command: Command,
        target: &str,
        body: &Map<String, Value>,
    ) -> Result<(), TransitError> {
        let transport = self.transport().ok_or(TransitError::NotConnected)?;
        let message = self.serializer.map_to_payload(body)?;
        tracing::trace!(node = self.local_id(), %command, to = target, "publish");
        transport.publish(command, target, message);
        Ok(())
    }

    /// Publish where nobody is waiting for the outcome.
    fn publish_logged(&self, command: Command, target: &str, body: &Map<String, Value>) {
        if let Err(e) = self.publish(command, target, body) {
            tracing::warn!(node = self.local_id(), %command, to = target, "not sent: {}", e);
        }
    }

    async fn connect(self: Arc<Self>) -> bool {
        let _guard = self.connect_lock.lock().await;
        if self.is_connected() {
            return true;
        }
        let transport = (self.transport_factory)();
        let connected = transport.connect().await.unwrap_or(false);
        if !connected {
            tracing::warn!(node = self.local_id(), "transport connect failed");
            return false;
        }

        *self.transport.lock() = Some(transport.clone());
        self.subscribe(transport.as_ref());
        transport.make_balanced_subscriptions();
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(node = self.local_id(), "transit connected");

        self.broadcast_node_info("");
        true
    }

    async fn disconnect(self: Arc<Self>) -> bool {
        let _guard = self.connect_lock.lock().await;
        let heartbeat = self.heartbeat.lock().take();
        if let Some(task) = heartbeat {
            task.abort();
        }
        if self.is_connected() {
            let body = self.body();
            self.publish_logged(Command::Disconnect, "", &body);
        }
        self.connected.store(false, Ordering::SeqCst);
        let transport = self.transport.lock().take();

        let local = self.local_id().to_string();
        for (id, request) in self.pending.drain() {
            tracing::debug!(node = %local, %id, "request canceled by local disconnect");
            request.deliver(Err(TransitError::NodeDisconnected {
                node_id: local.clone(),
            }));
        }

        match transport {
            Some(transport) => {
                let disconnected = transport.disconnect().await.unwrap_or(false);
                tracing::info!(node = %local, "transit disconnected");
                disconnected
            }
            None => true,
        }
    }

    fn subscribe(self: &Arc<Self>, transport: &dyn Transport) {
        for (command, channel) in SUBSCRIPTIONS {
            let target = match channel {
                Channel::Local => self.local_id(),
                Channel::Broadcast => "",
            };
            let weak: Weak<Inner> = Arc::downgrade(self);
            transport.subscribe(
                command,
                target,
                handler(move |message| {
                    let weak = weak.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.handle(command, message).await;
                        }
                    }
                }),
            );
        }
    }

    fn request(self: &Arc<Self>, context: CallContext) -> Result<ResultReceiver, TransitError> {
        let target = context
            .target_node_id
            .clone()
            .ok_or_else(|| TransitError::NoTarget {
                action: context.action.clone(),
            })?;
        let transport = self.transport().ok_or(TransitError::NotConnected)?;

        let mut body = context.to_map();
        body.insert(fields::SENDER.into(), Value::from(self.local_id()));
        let message = self.serializer.map_to_payload(&body).map_err(|e| {
            tracing::error!(
                node = self.local_id(),
                action = %context.action,
                "failed to serialize request params: {}", e
            );
            TransitError::Encoding(e)
        })?;

        let (request, receiver) = PendingRequest::new(target.clone(), context.action.clone());
        self.pending
            .register(context.id.clone(), request, self.config.max_pending_requests)?;

        // A disconnect that drained the table before this entry went in would
        // leave it unresolvable; `disconnect` flips the flag before draining.
        if !self.is_attached(&transport) {
            self.pending.resolve(&context.id);
            tracing::debug!(node = self.local_id(), id = %context.id, "disconnected while sending");
            return Err(TransitError::NotConnected);
        }

        let timeout = context
            .timeout
            .map(Duration::from_millis)
            .or_else(|| self.config.request_timeout());
        if let Some(after) = timeout {
            self.expire_after(context.id.clone(), after);
        }

        tracing::debug!(
            node = self.local_id(),
            id = %context.id,
            action = %context.action,
            to = %target,
            "request"
        );
        transport.publish(Command::Req, &target, message);
        Ok(receiver)
    }

    fn expire_after(self: &Arc<Self>, id: String, after: Duration) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let Some(inner) = weak.upgrade() else { return };
            if let Some(request) = inner.pending.resolve(&id) {
                tracing::debug!(node = inner.local_id(), %id, "request timed out");
                let error = TransitError::RequestTimeout {
                    action: request.action.clone(),
                    node_id: request.target_node_id.clone(),
                    after,
                };
                request.deliver(Err(error));
            }
        });
    }

    async fn handle(self: Arc<Self>, command: Command, message: Payload) {
        let incoming = match Incoming::decode(command, message, self.serializer.as_ref()) {
            Ok(incoming) => incoming,
            Err(e) => {
                tracing::warn!(node = self.local_id(), "dropping packet: {}", e);
                return;
            }
        };
        let own = incoming.sender() == self.local_id();

        match incoming {
            Incoming::Request(context) => self.handle_request(context).await,
            Incoming::Response {
                id,
                sender,
                success,
                data,
                error,
            } => self.handle_response(&id, &sender, success, data, &error),
            Incoming::Registry { .. } | Incoming::Discover { .. } if own => {}
            Incoming::Registry {
                command, message, ..
            } => self.registry.handle(command, &message),
            Incoming::Discover { sender } => self.broadcast_node_info(&sender),
            Incoming::Ping { sender, time } => self.reply_pong(&sender, time),
            Incoming::Pong {
                sender,
                time,
                arrived,
            } => self.handle_pong(&sender, time, arrived),
            Incoming::Event { sender, event, .. } => {
                tracing::debug!(
                    node = self.local_id(),
                    %sender,
                    %event,
                    "event handling is not active"
                );
            }
        }
    }

    async fn handle_request(&self, context: CallContext) {
        let caller = context.sender.clone().unwrap_or_default();
        let id = context.id.clone();
        let meta = context.meta.clone();
        tracing::debug!(
            node = self.local_id(),
            %id,
            action = %context.action,
            %caller,
            "serving request"
        );

        let outcome = self.invoker.invoke(context).await;
        self.send_response(&caller, &id, meta, outcome);
    }

    fn send_response(
        &self,
        caller: &str,
        id: &str,
        meta: Map<String, Value>,
        outcome: Result<Value, ActionError>,
    ) {
        let mut body = self.body();
        body.insert(fields::ID.into(), Value::from(id));
        body.insert(fields::META.into(), Value::Object(meta));
        match outcome {
            Ok(data) => {
                body.insert(fields::SUCCESS.into(), Value::Bool(true));
                body.insert(fields::DATA.into(), data);
            }
            Err(error) => {
                body.insert(fields::SUCCESS.into(), Value::Bool(false));
                body.insert(fields::ERROR.into(), error_body(&error.name, &error.message));
            }
        }

        match self.publish(Command::Res, caller, &body) {
            Ok(()) => {}
            Err(TransitError::Encoding(e)) => {
                tracing::error!(node = self.local_id(), id, "failed to serialize response: {}", e);
                body.remove(fields::DATA);
                body.insert(fields::SUCCESS.into(), Value::Bool(false));
                body.insert(
                    fields::ERROR.into(),
                    error_body("EncodingError", &e.to_string()),
                );
                self.publish_logged(Command::Res, caller, &body);
            }
            Err(e) => tracing::warn!(node = self.local_id(), id, "response not sent: {}", e),
        }
    }

    fn handle_response(
        &self,
        id: &str,
        sender: &str,
        success: bool,
        data: Payload,
        error: &Payload,
    ) {
        let Some(request) = self.pending.resolve(id) else {
            tracing::debug!(node = self.local_id(), id, sender, "unmatched response dropped");
            return;
        };
        let result: CallResult = if success {
            Ok(data)
        } else {
            Err(TransitError::Remote {
                node_id: sender.to_string(),
                name: error.get("name").string(),
                message: error
                    .get("message")
                    .exists()
                    .then(|| error.get("message").string())
                    .unwrap_or_else(|| error.string()),
            })
        };
        tracing::trace!(node = self.local_id(), id, sender, "response delivered");
        if !request.deliver(result) {
            tracing::debug!(node = self.local_id(), id, "caller stopped waiting");
        }
    }

    fn on_node_disconnected(&self, node_id: &str) {
        let canceled = self.pending.cancel_node(node_id);
        tracing::debug!(
            node = self.local_id(),
            disconnected = node_id,
            canceled = canceled.len(),
            "node disconnected"
        );
        for (_, request) in canceled {
            request.deliver(Err(TransitError::NodeDisconnected {
                node_id: node_id.to_string(),
            }));
        }
    }

    fn send_heartbeat(&self) {
        let node = self.node.export();
        let mut body = self.body();
        body.insert(fields::CPU.into(), node.get("cpu").cloned().unwrap_or(Value::Null));
        body.insert(
            fields::CPU_SEQ.into(),
            node.get("cpuSeq").cloned().unwrap_or(Value::Null),
        );
        self.publish_logged(Command::Heartbeat, "", &body);
    }

    fn discover_node(&self, node_id: &str) {
        let body = self.body();
        self.publish_logged(Command::Discover, node_id, &body);
    }

    fn broadcast_node_info(&self, target: &str) {
        let mut body = self.node.export();
        body.insert(fields::SENDER.into(), Value::from(self.local_id()));
        self.publish_logged(Command::Info, target, &body);
    }

    fn reply_pong(&self, sender: &str, time: i64) {
        let mut body = self.body();
        body.insert(fields::TIME.into(), Value::from(time));
        body.insert(fields::ARRIVED.into(), Value::from(unix_now()));
        self.publish_logged(Command::Pong, sender, &body);
    }

    fn handle_pong(&self, sender: &str, time: i64, arrived: i64) {
        let sample = LatencySample::measure(time, arrived, unix_now());
        tracing::trace!(
            node = self.local_id(),
            remote = sender,
            elapsed = sample.elapsed,
            time_diff = sample.time_diff,
            "pong"
        );
        self.bus.emit_async(
            events::NODE_PONG,
            vec![json!({
                "nodeID": sender,
                "elapsedTime": sample.elapsed,
                "timeDiff": sample.time_diff,
            })],
        );
    }
}

fn error_body(name: &str, message: &str) -> Value {
    json!({ "name": name, "message": message })
}
