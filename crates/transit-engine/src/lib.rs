//! Transit protocol engine.
//!
//! Turns a fire-and-forget pub/sub [`Transport`] into request/response
//! messaging between nodes. Outbound calls are correlated with inbound
//! responses through a pending-request table; heartbeats, discovery and
//! PING/PONG latency probes keep the cluster view fresh.
//!
//! [`MemoryHub`] provides an in-process transport for tests and demos.

mod bus;
mod config;
mod error;
mod incoming;
mod latency;
mod memory;
mod pending;
mod transit;
mod transport;

pub use bus::{EventHandler, LocalBus, events};
pub use config::TransitConfig;
pub use error::{ConfigError, TransitError, TransportError};
pub use incoming::{Incoming, MalformedPacket};
pub use latency::LatencySample;
pub use memory::{MemoryHub, MemoryTransport};
pub use pending::{CallResult, PendingRequest, PendingTable, ResultReceiver};
pub use transit::{ActionError, ActionInvoker, Collaborators, RegistryHandler, Transit};
pub use transport::{Transport, TransportFactory, TransportHandler, channel_name, handler};
