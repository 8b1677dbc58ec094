//! Call context: one action invocation travelling between nodes.

use crate::error::EncodingError;
use crate::message::fields;
use crate::payload::Payload;
use crate::serializer::Serializer;
use serde::Serialize;
use serde_json::{Map, Value};

/// An outbound or inbound action call.
///
/// `id` doubles as the correlation ID of the REQ/RES exchange and must be
/// unique among a node's in-flight calls.
#[derive(Debug, Clone, PartialEq)]
pub struct CallContext {
    pub id: String,
    pub action: String,
    pub params: Value,
    pub meta: Map<String, Value>,
    /// Call depth, starting at 1.
    pub level: u32,
    /// Per-call timeout in milliseconds.
    pub timeout: Option<u64>,
    pub parent_id: Option<String>,
    pub request_id: Option<String>,
    /// Node the call is routed to. Never sent on the wire.
    pub target_node_id: Option<String>,
    /// Node that issued the call; set when decoded from a REQ.
    pub sender: Option<String>,
}

impl CallContext {
    /// New root call with a fresh correlation ID.
    pub fn new(action: impl Into<String>, params: impl Serialize) -> Result<Self, EncodingError> {
        Ok(Self::with_value(action, serde_json::to_value(params)?))
    }

    pub fn with_value(action: impl Into<String>, params: Value) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            request_id: Some(id.clone()),
            id,
            action: action.into(),
            params,
            meta: Map::new(),
            level: 1,
            timeout: None,
            parent_id: None,
            target_node_id: None,
            sender: None,
        }
    }

    /// Child call made while handling `self`.
    pub fn child(&self, action: impl Into<String>, params: Value) -> Self {
        let mut child = Self::with_value(action, params);
        child.level = self.level + 1;
        child.parent_id = Some(self.id.clone());
        child.request_id = self.request_id.clone().or_else(|| Some(self.id.clone()));
        child.meta = self.meta.clone();
        child
    }

    pub fn with_target(mut self, node_id: impl Into<String>) -> Self {
        self.target_node_id = Some(node_id.into());
        self
    }

    pub fn with_timeout(mut self, millis: u64) -> Self {
        self.timeout = Some(millis);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// REQ body, without `sender`.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(fields::ID.into(), Value::from(self.id.clone()));
        map.insert(fields::ACTION.into(), Value::from(self.action.clone()));
        map.insert(fields::PARAMS.into(), self.params.clone());
        map.insert(fields::META.into(), Value::Object(self.meta.clone()));
        map.insert("level".into(), Value::from(self.level));
        map.insert("timeout".into(), self.timeout.map_or(Value::Null, Value::from));
        map.insert("parentID".into(), self.parent_id.clone().map_or(Value::Null, Value::from));
        map.insert("requestID".into(), self.request_id.clone().map_or(Value::Null, Value::from));
        map
    }

    /// Rebuild a call from a decoded REQ. Returns `None` when the message
    /// has no correlation ID or no action.
    pub fn from_payload(serializer: &dyn Serializer, message: &Payload) -> Option<Self> {
        let map = Payload::from_map(serializer.payload_to_context_map(message));
        let id = map.get(fields::ID).string();
        let action = map.get(fields::ACTION).string();
        if id.is_empty() || action.is_empty() {
            return None;
        }
        let optional = |key: &str| {
            let field = map.get(key);
            (field.exists() && !field.value().is_null()).then(|| field.string())
        };
        let timeout = map.get("timeout");
        Some(Self {
            id,
            action,
            params: map.get(fields::PARAMS).value(),
            meta: map.get(fields::META).raw_map().unwrap_or_default(),
            level: map.get("level").uint().min(u32::MAX as u64) as u32,
            timeout: (timeout.exists() && !timeout.value().is_null()).then(|| timeout.uint()),
            parent_id: optional("parentID"),
            request_id: optional("requestID"),
            target_node_id: None,
            sender: optional(fields::SENDER),
        })
    }
}
