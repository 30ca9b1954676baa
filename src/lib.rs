//! Autosync - Multi-Cluster Replication Gateway
//!
//! Keeps accounts and containers present on every cluster of their
//! placement. Account and container writes arriving at one cluster are
//! applied locally and replayed on the peer cluster; container writes also
//! configure container sync between the two, so objects follow on their
//! own.
//!
//! # Architecture
//!
//! Every request goes through the [`interceptor::Interceptor`]. Reads,
//! object operations and requests that already came from a peer are
//! served locally. Account and container mutations are executed locally,
//! fanned out concurrently to the peer, and a single response is
//! arbitrated from all of them.
//!
//! # Features
//!
//! - Peer derivation from a placement and the local cluster identity
//! - Concurrent fan-out with separate connect and request timeouts
//! - Fresh container sync key on every container create/update
//! - Delete-aware response arbitration
//! - HTTP gateway in front of an existing storage proxy

pub mod api;
pub mod cluster;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod pipeline;
pub mod replication;
pub mod request;
pub mod response;
pub mod sync_key;

pub use config::AutosyncConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cluster::{ClusterIdentity, PeerSet, PlacementSet};
    pub use crate::config::AutosyncConfig;
    pub use crate::error::{Error, Result};
    pub use crate::interceptor::{Interceptor, ReplicationDefaults};
    pub use crate::pipeline::{HttpUpstream, LocalPipeline};
    pub use crate::replication::{FanOutCoordinator, PeerTransport, ReplicationConfig};
    pub use crate::request::{OperationKind, ProxyRequest, RequestContext};
    pub use crate::response::ClusterResponse;
    pub use crate::sync_key::SyncKey;
}
