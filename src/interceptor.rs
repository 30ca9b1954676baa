//! Request Interceptor
//!
//! Entry point for every inbound request. Decides whether the request
//! needs replication, runs it locally, fans it out to the peer cluster
//! and arbitrates the response returned to the caller.

use std::sync::Arc;

use crate::cluster::{ClusterIdentity, PeerSet, PlacementSet};
use crate::config::AutosyncConfig;
use crate::error::{Error, Result};
use crate::pipeline::{HttpUpstream, LocalPipeline};
use crate::replication::{arbitrate, FanOutCoordinator, HttpPeerTransport, ReplicationConfig};
use crate::request::{
    OperationKind, ProxyRequest, RequestContext, ResourceKind, ResourcePath, CONTAINER_SYNC_KEY,
    CONTAINER_SYNC_TO, ORIG_CLUSTER,
};
use crate::response::{BodyStream, ClusterResponse, StreamedResponse};
use crate::sync_key::SyncKey;

/// Configured fallbacks for requests without placement context
#[derive(Debug, Clone, Default)]
pub struct ReplicationDefaults {
    pub my_cluster: Option<ClusterIdentity>,
    pub placement: Option<PlacementSet>,
}

impl From<&AutosyncConfig> for ReplicationDefaults {
    fn from(config: &AutosyncConfig) -> Self {
        Self {
            my_cluster: config.my_cluster(),
            placement: config.placement(),
        }
    }
}

/// Why a request is served locally without replication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassThrough {
    /// Already handled by autosync on the originating cluster
    AlreadyReplicated,
    /// Internal call that bypassed authorization
    InternalCall,
    /// No local cluster or no placement
    NotConfigured,
    /// Path is not an account, container or object
    NotAResource,
    /// Object operations are propagated by container sync
    ObjectRequest,
    /// GET, HEAD, OPTIONS
    ReadOnly,
}

/// Everything needed to replicate one request
#[derive(Debug, Clone)]
pub struct ReplicationPlan {
    pub my_cluster: ClusterIdentity,
    pub peers: PeerSet,
    pub resource: ResourcePath,
    pub operation: OperationKind,
}

/// Outcome of classifying a request
#[derive(Debug, Clone)]
pub enum Route {
    PassThrough(PassThrough),
    Replicate(ReplicationPlan),
}

/// Intercepts account/container mutations and replicates them
pub struct Interceptor {
    defaults: ReplicationDefaults,
    pipeline: Arc<dyn LocalPipeline>,
    fanout: FanOutCoordinator,
}

impl Interceptor {
    pub fn new(
        defaults: ReplicationDefaults,
        pipeline: Arc<dyn LocalPipeline>,
        fanout: FanOutCoordinator,
    ) -> Self {
        Self {
            defaults,
            pipeline,
            fanout,
        }
    }

    /// Build the interceptor with HTTP upstream and HTTP peer transport
    pub fn from_config(config: &AutosyncConfig) -> Result<Self> {
        let replication = ReplicationConfig::from(config);
        let transport =
            HttpPeerTransport::new(replication.connect_timeout, replication.request_timeout)?;
        let upstream = HttpUpstream::new(&config.gateway.upstream, config.upstream_timeout())?;

        Ok(Self::new(
            ReplicationDefaults::from(config),
            Arc::new(upstream),
            FanOutCoordinator::new(Arc::new(transport), replication.join_timeout()),
        ))
    }

    pub fn defaults(&self) -> &ReplicationDefaults {
        &self.defaults
    }

    /// Decide what to do with a request
    ///
    /// Errors are placement misconfigurations and end the request.
    pub fn classify(&self, request: &ProxyRequest, ctx: &RequestContext) -> Result<Route> {
        if request.has_header(ORIG_CLUSTER) {
            return Ok(Route::PassThrough(PassThrough::AlreadyReplicated));
        }

        if ctx.authorize_override {
            return Ok(Route::PassThrough(PassThrough::InternalCall));
        }

        let my_cluster = ctx.my_cluster.as_ref().or(self.defaults.my_cluster.as_ref());
        let placement = ctx.placement.as_ref().or(self.defaults.placement.as_ref());
        let (my_cluster, placement) = match (my_cluster, placement) {
            (Some(my_cluster), Some(placement)) => (my_cluster, placement),
            _ => return Ok(Route::PassThrough(PassThrough::NotConfigured)),
        };

        let peers = placement.peers_of(my_cluster)?.require_single()?;

        let resource = match ResourcePath::parse(&request.path) {
            Some(resource) => resource,
            None => return Ok(Route::PassThrough(PassThrough::NotAResource)),
        };
        if resource.kind() == ResourceKind::Object {
            return Ok(Route::PassThrough(PassThrough::ObjectRequest));
        }

        let operation = request.operation();
        if operation.is_read() {
            return Ok(Route::PassThrough(PassThrough::ReadOnly));
        }

        Ok(Route::Replicate(ReplicationPlan {
            my_cluster: my_cluster.clone(),
            peers,
            resource,
            operation,
        }))
    }

    /// Handle one inbound request with its body already read
    pub async fn handle(&self, request: ProxyRequest, ctx: &RequestContext) -> ClusterResponse {
        match self.classify(&request, ctx) {
            Ok(Route::PassThrough(reason)) => {
                tracing::debug!("{} {}: served locally ({:?})", request.method, request.path, reason);
                self.execute_local(request).await
            }
            Ok(Route::Replicate(plan)) => self.replicate(request, plan).await,
            Err(e) => self.reject(&request, e),
        }
    }

    /// Serve a request that needs no replication, body still streaming
    pub async fn pass_through(
        &self,
        request: ProxyRequest,
        body: BodyStream,
        reason: PassThrough,
    ) -> StreamedResponse {
        tracing::debug!("{} {}: served locally ({:?})", request.method, request.path, reason);
        match self.pipeline.stream(request, body).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Local execution failed: {}", e);
                ClusterResponse::for_status(e.status_code()).into()
            }
        }
    }

    /// Answer for a request that failed classification
    pub fn reject(&self, request: &ProxyRequest, error: Error) -> ClusterResponse {
        tracing::warn!("{} {}: {}", request.method, request.path, error);
        ClusterResponse::for_status(error.status_code())
    }

    /// Execute locally, fan out and arbitrate
    pub async fn replicate(&self, request: ProxyRequest, plan: ReplicationPlan) -> ClusterResponse {
        let ReplicationPlan {
            my_cluster,
            peers,
            resource,
            operation,
        } = plan;

        // Every container create/update rotates the sync key
        let sync_key = (resource.kind() == ResourceKind::Container
            && operation.is_create_or_update())
        .then(SyncKey::generate);

        let mut local_request = request.clone();
        if let (Some(key), Some(last_peer)) = (&sync_key, peers.last()) {
            local_request.set_header(CONTAINER_SYNC_KEY, key.as_str());
            local_request.set_header(
                CONTAINER_SYNC_TO,
                format!("{}{}", last_peer.as_str(), request.path),
            );
        }

        let local = self.execute_local(local_request).await;

        // A failed local create/update never reaches the peers
        if !local.is_success() && operation != OperationKind::Delete {
            tracing::info!(
                "{} {}: local cluster answered {}, peers not contacted",
                request.method,
                request.path,
                local.status
            );
            return local;
        }

        let mut results = self
            .fanout
            .fan_out(&my_cluster, &peers, sync_key.as_ref(), &request)
            .await;
        results.push(local);

        let response = arbitrate::resolve(&results, operation);
        tracing::info!(
            "{} {}: replicated to {} peer(s), answering {}",
            request.method,
            request.path,
            peers.len(),
            response.status
        );
        response
    }

    async fn execute_local(&self, request: ProxyRequest) -> ClusterResponse {
        match self.pipeline.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Local execution failed: {}", e);
                ClusterResponse::for_status(e.status_code())
            }
        }
    }
}
