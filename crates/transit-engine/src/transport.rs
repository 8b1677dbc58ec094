//! The pub/sub capability the engine is built on.
//!
//! A transport moves [`Payload`]s between channels identified by a command
//! and a node ID. An empty node ID names the command's broadcast channel.
//! Delivery is at most once and unordered; filtering a node's own messages
//! is left to the caller.

use crate::error::TransportError;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use transit_core::{Command, Payload};

/// Callback for one received message. Each delivery runs as its own task.
pub type TransportHandler = Arc<dyn Fn(Payload) -> BoxFuture<'static, ()> + Send + Sync>;

/// Builds a fresh transport for each connect attempt.
pub type TransportFactory = Arc<dyn Fn() -> Arc<dyn Transport> + Send + Sync>;

pub trait Transport: Send + Sync {
    /// Register `handler` for `(command, node_id)`. Subscriptions on the same
    /// channel are additive.
    fn subscribe(&self, command: Command, node_id: &str, handler: TransportHandler);

    /// Hook for transports that set up queue-group subscriptions separately.
    fn make_balanced_subscriptions(&self);

    /// Fire-and-forget delivery to every current subscriber of the channel.
    fn publish(&self, command: Command, node_id: &str, message: Payload);

    /// Resolves once with the connection outcome.
    fn connect(&self) -> oneshot::Receiver<bool>;

    /// Resolves once when the transport has disconnected. Drops every
    /// subscription made through this transport.
    fn disconnect(&self) -> oneshot::Receiver<bool>;

    /// Native request/reply, for transports that have one.
    fn request(&self, message: Payload) -> oneshot::Receiver<Result<Payload, TransportError>>;
}

/// Wrap an async closure as a [`TransportHandler`].
pub fn handler<F, Fut>(f: F) -> TransportHandler
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |message| f(message).boxed())
}

/// Channel name: `<prefix>.<COMMAND>` or `<prefix>.<COMMAND>.<nodeID>`.
pub fn channel_name(prefix: &str, command: Command, node_id: &str) -> String {
    if node_id.is_empty() {
        format!("{prefix}.{command}")
    } else {
        format!("{prefix}.{command}.{node_id}")
    }
}
