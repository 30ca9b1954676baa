//! Fan-Out Coordinator
//!
//! Sends the same operation to every peer concurrently and collects one
//! response per peer. A peer that fails, panics or runs out of time is
//! represented by the 503 sentinel, so the result always has one entry
//! per peer, in peer order.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::transport::{PeerCall, PeerTransport};
use crate::cluster::{ClusterIdentity, PeerSet};
use crate::error::Result;
use crate::request::ProxyRequest;
use crate::response::ClusterResponse;
use crate::sync_key::SyncKey;

/// Dispatches one task per peer and joins them all
pub struct FanOutCoordinator {
    transport: Arc<dyn PeerTransport>,
    /// Upper bound on waiting for a single peer task
    join_timeout: Duration,
}

impl FanOutCoordinator {
    pub fn new(transport: Arc<dyn PeerTransport>, join_timeout: Duration) -> Self {
        Self {
            transport,
            join_timeout,
        }
    }

    /// Send `request` to every peer of `local`
    ///
    /// The first peer is told to sync to `local`, every later peer to the
    /// peer before it. Sync headers are only attached when `sync_key` is
    /// present.
    pub async fn fan_out(
        &self,
        local: &ClusterIdentity,
        peers: &PeerSet,
        sync_key: Option<&SyncKey>,
        request: &ProxyRequest,
    ) -> Vec<ClusterResponse> {
        let request = Arc::new(request.clone());

        // Spawn everything before awaiting anything
        let tasks: Vec<(ClusterIdentity, JoinHandle<Result<ClusterResponse>>)> = peers
            .chain(local)
            .into_iter()
            .map(|(peer, sync_to)| {
                let call = PeerCall {
                    peer: peer.clone(),
                    sync_to,
                    origin: local.clone(),
                    sync_key: sync_key.cloned(),
                    request: Arc::clone(&request),
                };
                let transport = Arc::clone(&self.transport);
                let handle = tokio::spawn(async move { transport.send(call).await });
                (peer, handle)
            })
            .collect();

        join_all(
            tasks
                .into_iter()
                .map(|(peer, handle)| self.join_peer(peer, handle)),
        )
        .await
    }

    /// Wait for one peer task, downgrading every failure to the sentinel
    async fn join_peer(
        &self,
        peer: ClusterIdentity,
        mut handle: JoinHandle<Result<ClusterResponse>>,
    ) -> ClusterResponse {
        match timeout(self.join_timeout, &mut handle).await {
            Ok(Ok(Ok(response))) => {
                tracing::debug!("Peer {} answered {}", peer, response.status);
                response
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!("Peer {} unavailable: {}", peer, e);
                ClusterResponse::unavailable()
            }
            Ok(Err(e)) => {
                tracing::error!("Peer task for {} did not complete: {}", peer, e);
                ClusterResponse::unavailable()
            }
            Err(_) => {
                handle.abort();
                tracing::warn!(
                    "Peer {} did not finish within {:?}, giving up",
                    peer,
                    self.join_timeout
                );
                ClusterResponse::unavailable()
            }
        }
    }
}
