//! Engine configuration.

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use transit_core::NodeId;

/// Settings for one [`Transit`](crate::Transit) instance.
///
/// Every field has a default, so an empty TOML document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransitConfig {
    /// Channel namespace, e.g. `MOL` gives `MOL.REQ.<nodeID>`.
    pub prefix: String,
    /// Fixed node identity; generated when absent.
    pub node_id: Option<String>,
    /// Period of the background heartbeat task.
    pub heartbeat_interval_secs: u64,
    /// Default per-call timeout. Calls without one wait until a response or
    /// a disconnect of the target node.
    pub request_timeout_ms: Option<u64>,
    /// Admission limit on in-flight outbound calls.
    pub max_pending_requests: Option<usize>,
}

impl Default for TransitConfig {
    fn default() -> Self {
        Self {
            prefix: "MOL".to_string(),
            node_id: None,
            heartbeat_interval_secs: 5,
            request_timeout_ms: None,
            max_pending_requests: None,
        }
    }
}

impl TransitConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// The configured node ID, or a freshly generated one.
    pub fn resolve_node_id(&self) -> Result<NodeId, ConfigError> {
        match &self.node_id {
            Some(id) => Ok(id.parse()?),
            None => Ok(NodeId::generate()),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}
