//! Node identity and self-description.
//!
//! A node ID is an opaque string, but it doubles as a pub/sub channel
//! component (`MOL.REQ.<nodeID>`), so it must not contain characters that
//! would split or wildcard a channel name.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::str::FromStr;

/// Identifier of one running node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Generate a fresh `Node_xxxxxxxx` identity.
    pub fn generate() -> Self {
        let random = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("Node_{}", &random[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodeId {
    type Err = NodeIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(NodeIdParseError::Empty);
        }
        if let Some(c) = s
            .chars()
            .find(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>'))
        {
            return Err(NodeIdParseError::InvalidChar {
                id: s.to_string(),
                found: c,
            });
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for NodeId {
    type Error = NodeIdParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for NodeId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for NodeId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Error parsing a node ID.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeIdParseError {
    #[error("node id cannot be empty")]
    Empty,
    #[error("node id {id:?} contains invalid character {found:?}")]
    InvalidChar { id: String, found: char },
}

/// Self-description of the local node, as published in INFO and HEARTBEAT.
pub trait LocalNode: Send + Sync {
    fn id(&self) -> &NodeId;

    /// Exported descriptor. Must contain at least `id`, `services`, `cpu`
    /// and `cpuSeq`.
    fn export(&self) -> Map<String, Value>;
}

/// A service and the actions it exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub actions: Vec<String>,
}

impl ServiceInfo {
    pub fn new<I, S>(name: impl Into<String>, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            actions: actions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CpuSample {
    cpu: Option<f64>,
    seq: u64,
}

/// Concrete [`LocalNode`] with a static service list and a mutable CPU sample.
#[derive(Debug)]
pub struct NodeInfo {
    id: NodeId,
    hostname: Option<String>,
    services: Vec<ServiceInfo>,
    cpu: RwLock<CpuSample>,
}

impl NodeInfo {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            hostname: None,
            services: Vec::new(),
            cpu: RwLock::new(CpuSample::default()),
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_service(mut self, service: ServiceInfo) -> Self {
        self.services.push(service);
        self
    }

    pub fn services(&self) -> &[ServiceInfo] {
        &self.services
    }

    /// Record a new CPU load sample and bump `cpuSeq`.
    pub fn update_cpu(&self, cpu: f64) {
        let mut sample = self.cpu.write();
        sample.cpu = Some(cpu);
        sample.seq += 1;
    }
}

impl LocalNode for NodeInfo {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn export(&self) -> Map<String, Value> {
        let sample = *self.cpu.read();
        let mut map = Map::new();
        map.insert("id".into(), json!(self.id));
        if let Some(hostname) = &self.hostname {
            map.insert("hostname".into(), json!(hostname));
        }
        map.insert("services".into(), json!(self.services));
        map.insert("cpu".into(), json!(sample.cpu));
        map.insert("cpuSeq".into(), json!(sample.seq));
        map
    }
}
