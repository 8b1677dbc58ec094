//! Core types for Transit.
//!
//! This crate provides the protocol primitives shared by every node: node
//! identity, command kinds, the call context, and the [`Payload`] view with
//! the [`Serializer`] seam that turns maps into wire messages. It has no
//! runtime; the engine lives in `transit-engine`.

mod context;
mod error;
mod message;
mod node;
mod payload;
mod serializer;

pub use context::CallContext;
pub use error::{DecodeError, EncodingError, PayloadError};
pub use message::{Command, UnknownCommand, fields};
pub use node::{LocalNode, NodeId, NodeIdParseError, NodeInfo, ServiceInfo};
pub use payload::{Payload, time_to_value};
pub use serializer::{JsonSerializer, Serializer};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in whole Unix seconds, as carried by PING/PONG.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
