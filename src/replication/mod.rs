//! Replication Module
//!
//! Sends account/container operations to peer clusters and picks the
//! response returned to the caller.

pub mod arbitrate;
mod fanout;
mod transport;

pub use arbitrate::ArbitrationPolicy;
pub use fanout::FanOutCoordinator;
pub use transport::{HttpPeerTransport, PeerCall, PeerTransport};

use std::time::Duration;

/// Configuration for replication to peers
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Time allowed to connect to a peer
    pub connect_timeout: Duration,
    /// Time allowed for a peer to answer
    pub request_timeout: Duration,
    /// Slack added on top of both when joining peer tasks
    pub join_grace: Duration,
}

impl ReplicationConfig {
    /// Upper bound on waiting for one peer task
    pub fn join_timeout(&self) -> Duration {
        self.connect_timeout + self.request_timeout + self.join_grace
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(2),
            join_grace: Duration::from_millis(500),
        }
    }
}

impl From<&crate::config::AutosyncConfig> for ReplicationConfig {
    fn from(config: &crate::config::AutosyncConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            join_grace: config.join_grace(),
        }
    }
}
