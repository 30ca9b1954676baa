//! Autosync Configuration
//!
//! This module provides configuration structures for the Autosync
//! replication gateway. Every section is optional; without a `[cluster]`
//! section replication stays inert and requests pass straight through.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cluster::{ClusterIdentity, PlacementSet};

/// Environment variable overriding `cluster.my_cluster`
pub const ENV_MY_CLUSTER: &str = "AUTOSYNC_MY_CLUSTER";
/// Environment variable overriding `cluster.placement`
pub const ENV_PLACEMENT: &str = "AUTOSYNC_PLACEMENT";

/// Main Autosync configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutosyncConfig {
    /// Default placement (overridable per request)
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Peer cluster communication
    #[serde(default)]
    pub peer: PeerConfig,

    /// HTTP gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default placement of accounts and containers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// URL of the local cluster
    #[serde(default)]
    pub my_cluster: Option<String>,

    /// Every cluster holding a replica, the local one included
    #[serde(default)]
    pub placement: Option<PlacementList>,
}

/// Placement as written in the config file
///
/// Accepts `"http://a:8080, http://b:8080"` as well as a TOML array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlacementList {
    Joined(String),
    List(Vec<String>),
}

impl PlacementList {
    pub fn to_placement_set(&self) -> PlacementSet {
        match self {
            PlacementList::Joined(list) => PlacementSet::parse(list),
            PlacementList::List(list) => list.iter().map(String::as_str).collect(),
        }
    }
}

/// Peer cluster communication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Time allowed to establish a connection to a peer
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Time allowed for a peer to send back its full response
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Extra time granted when joining peer tasks
    #[serde(default = "default_join_grace_ms")]
    pub join_grace_ms: u64,
}

/// HTTP gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address the gateway listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Base URL of the local storage proxy
    #[serde(default = "default_upstream")]
    pub upstream: String,

    /// Timeout for connecting to the local proxy, and for a full round
    /// trip of a replicated request. Streamed requests have no overall bound.
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// Largest body buffered for a replicated account or container request.
    /// Object and other pass-through bodies are streamed without a limit.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Take the per-request placement from `X-Autosync-*` headers
    #[serde(default)]
    pub trust_context_headers: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (full, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    2_000
}

fn default_join_grace_ms() -> u64 {
    500
}

fn default_bind_address() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_upstream() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_upstream_timeout_ms() -> u64 {
    30_000
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "full".to_string()
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            join_grace_ms: default_join_grace_ms(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            upstream: default_upstream(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
            trust_context_headers: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl AutosyncConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: AutosyncConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AUTOSYNC_MY_CLUSTER` / `AUTOSYNC_PLACEMENT` if set
    pub fn apply_env_overrides(&mut self) -> crate::Result<()> {
        if let Ok(my_cluster) = std::env::var(ENV_MY_CLUSTER) {
            tracing::info!("{} overrides the local cluster: {}", ENV_MY_CLUSTER, my_cluster);
            self.cluster.my_cluster = Some(my_cluster);
        }
        if let Ok(placement) = std::env::var(ENV_PLACEMENT) {
            tracing::info!("{} overrides the placement: {}", ENV_PLACEMENT, placement);
            self.cluster.placement = Some(PlacementList::Joined(placement));
        }
        self.validate()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.gateway.bind_address.is_empty() {
            return Err(crate::Error::Config("gateway.bind_address cannot be empty".into()));
        }

        if self.gateway.upstream.is_empty() {
            return Err(crate::Error::Config("gateway.upstream cannot be empty".into()));
        }

        if self.peer.connect_timeout_ms == 0 || self.peer.request_timeout_ms == 0 {
            return Err(crate::Error::Config("peer timeouts must be greater than zero".into()));
        }

        if let (Some(my_cluster), Some(placement)) = (self.my_cluster(), self.placement()) {
            if !placement.contains(&my_cluster) {
                return Err(crate::Error::Config(format!(
                    "cluster.my_cluster {} is not listed in cluster.placement",
                    my_cluster
                )));
            }
        }

        Ok(())
    }

    /// Configured local cluster, if any
    pub fn my_cluster(&self) -> Option<ClusterIdentity> {
        self.cluster
            .my_cluster
            .as_deref()
            .map(ClusterIdentity::new)
            .filter(|c| !c.as_str().is_empty())
    }

    /// Configured placement, if any
    pub fn placement(&self) -> Option<PlacementSet> {
        self.cluster
            .placement
            .as_ref()
            .map(PlacementList::to_placement_set)
            .filter(|p| !p.is_empty())
    }

    /// Whether requests without context get replicated at all
    pub fn replication_enabled(&self) -> bool {
        self.my_cluster().is_some() && self.placement().is_some()
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.peer.connect_timeout_ms)
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.peer.request_timeout_ms)
    }

    /// Get join grace as Duration
    pub fn join_grace(&self) -> Duration {
        Duration::from_millis(self.peer.join_grace_ms)
    }

    /// Get upstream timeout as Duration
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway.upstream_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[cluster]
my_cluster = "http://Serengeti.Tanzania.biz:8081"
placement = "http://Annapurna.Nepal.info:8080, http://Serengeti.Tanzania.biz:8081"

[peer]
connect_timeout_ms = 5000
request_timeout_ms = 1500

[gateway]
bind_address = "127.0.0.1:9000"
upstream = "http://127.0.0.1:8080"
"#;

        let config = AutosyncConfig::from_str(toml).unwrap();
        assert!(config.replication_enabled());
        assert_eq!(config.placement().unwrap().len(), 2);
        assert_eq!(config.connect_timeout(), Duration::from_millis(5000));
        assert_eq!(config.request_timeout(), Duration::from_millis(1500));
        assert_eq!(config.join_grace(), Duration::from_millis(500));
        assert_eq!(config.gateway.bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn test_placement_as_array() {
        let toml = r#"
[cluster]
my_cluster = "http://a:8080"
placement = ["http://a:8080", "http://b:8080"]
"#;

        let config = AutosyncConfig::from_str(toml).unwrap();
        let placement: Vec<String> = config
            .placement()
            .unwrap()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(placement, vec!["http://a:8080", "http://b:8080"]);
    }

    #[test]
    fn test_empty_config_is_inert() {
        let config = AutosyncConfig::from_str("").unwrap();
        assert!(!config.replication_enabled());
        assert_eq!(config.peer.connect_timeout_ms, 10_000);
        assert_eq!(config.peer.request_timeout_ms, 2_000);
        assert_eq!(config.gateway.upstream, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_my_cluster_must_be_placed() {
        let toml = r#"
[cluster]
my_cluster = "http://z:8080"
placement = "http://a:8080,http://b:8080"
"#;

        let err = AutosyncConfig::from_str(toml).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let toml = r#"
[peer]
request_timeout_ms = 0
"#;

        assert!(AutosyncConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cluster]\nmy_cluster = \"http://a:1\"\nplacement = \"http://a:1,http://b:2\"").unwrap();

        let config = AutosyncConfig::from_file(file.path()).unwrap();
        assert_eq!(config.my_cluster().unwrap().as_str(), "http://a:1");
    }

    #[test]
    fn test_invalid_toml() {
        let err = AutosyncConfig::from_str("[cluster\nmy_cluster = ").unwrap_err();
        assert!(matches!(err, crate::Error::ConfigParse(_)));
    }
}
