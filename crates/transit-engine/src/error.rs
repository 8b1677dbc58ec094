//! Engine error types.

use std::path::PathBuf;
use std::time::Duration;
use transit_core::EncodingError;

/// Why a call failed, either synchronously from `request` or as the value
/// delivered on its result channel.
#[derive(Debug, thiserror::Error)]
pub enum TransitError {
    /// The call could not be serialized. This is a programming error in the
    /// caller, not a network condition.
    #[error("failed to serialize request: {0}")]
    Encoding(#[from] EncodingError),
    #[error("call to {action} has no target node")]
    NoTarget { action: String },
    #[error("transit is not connected")]
    NotConnected,
    #[error("too many pending requests (limit {limit})")]
    QueueFull { limit: usize },
    #[error("request {0} is already pending")]
    DuplicateRequest(String),
    #[error("node {node_id} disconnected, request canceled")]
    NodeDisconnected { node_id: String },
    #[error("request to {action} on {node_id} timed out after {after:?}")]
    RequestTimeout {
        action: String,
        node_id: String,
        after: Duration,
    },
    #[error("{name} from node {node_id}: {message}")]
    Remote {
        node_id: String,
        name: String,
        message: String,
    },
}

/// Errors raised by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("operation not supported by this transport: {0}")]
    Unsupported(&'static str),
    #[error("transport is not connected")]
    NotConnected,
}

/// Errors loading a [`TransitConfig`](crate::TransitConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid node id in config: {0}")]
    NodeId(#[from] transit_core::NodeIdParseError),
}
