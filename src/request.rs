//! Inbound Request Model
//!
//! Classification of the operation, parsing of the storage resource path,
//! and the request-scoped context passed down the call chain.

use axum::http::{HeaderMap, Method};
use bytes::Bytes;

use crate::cluster::{ClusterIdentity, PlacementSet};

/// Marks a request that already went through autosync on some cluster
pub const ORIG_CLUSTER: &str = "X-Orig-Cluster";
/// Account-scoped variant of the origin marker
pub const ACCOUNT_ORIG_CLUSTER: &str = "X-Account-Meta-Orig-Cluster";
/// Container-scoped variant of the origin marker
pub const CONTAINER_ORIG_CLUSTER: &str = "X-Container-Meta-Orig-Cluster";
/// Where a container replica pushes its objects
pub const CONTAINER_SYNC_TO: &str = "X-Container-Sync-To";
/// Shared secret authorizing container sync
pub const CONTAINER_SYNC_KEY: &str = "X-Container-Sync-Key";

/// Connection-scoped headers, never forwarded in either direction
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Set by the HTTP client for the connection it opens
const CLIENT_SET: &[&str] = &["host", "content-length"];

pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Inbound header that must not be copied onto an outgoing request
pub(crate) fn is_regenerated(name: &str) -> bool {
    is_hop_by_hop(name) || CLIENT_SET.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Ordered name/value pairs of a header map, values decoded lossily
pub(crate) fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Kind of operation, derived once from the HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// PUT
    Create,
    /// POST
    Update,
    /// DELETE
    Delete,
    /// GET, HEAD, OPTIONS
    Read,
    /// Anything else
    Other,
}

impl OperationKind {
    pub fn from_method(method: &Method) -> Self {
        match *method {
            Method::PUT => OperationKind::Create,
            Method::POST => OperationKind::Update,
            Method::DELETE => OperationKind::Delete,
            Method::GET | Method::HEAD | Method::OPTIONS => OperationKind::Read,
            _ => OperationKind::Other,
        }
    }

    pub fn is_create_or_update(&self) -> bool {
        matches!(self, OperationKind::Create | OperationKind::Update)
    }

    pub fn is_read(&self) -> bool {
        matches!(self, OperationKind::Read)
    }
}

/// Level of the storage hierarchy a path points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Account,
    Container,
    Object,
}

/// Parsed `/version/account[/container[/object]]` path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    pub version: String,
    pub account: String,
    pub container: Option<String>,
    pub object: Option<String>,
}

impl ResourcePath {
    /// Parse a request path, `None` when it is not a storage resource
    ///
    /// The object part keeps embedded slashes. Empty trailing segments
    /// count as absent.
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix('/')?;
        let mut segments = rest.splitn(4, '/');

        let version = segments.next().filter(|s| !s.is_empty())?;
        let account = segments.next().filter(|s| !s.is_empty())?;
        let container = segments.next().filter(|s| !s.is_empty());
        let object = segments.next().filter(|s| !s.is_empty());

        // An object can only live inside a container
        if container.is_none() && object.is_some() {
            return None;
        }

        Some(Self {
            version: version.to_string(),
            account: account.to_string(),
            container: container.map(str::to_string),
            object: object.map(str::to_string),
        })
    }

    pub fn kind(&self) -> ResourceKind {
        match (&self.container, &self.object) {
            (_, Some(_)) => ResourceKind::Object,
            (Some(_), None) => ResourceKind::Container,
            (None, None) => ResourceKind::Account,
        }
    }
}

/// An inbound request as seen by the interceptor
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Path without the query string
    pub path: String,
    pub query: Option<String>,
    /// Ordered header multimap, names compared case-insensitively
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ProxyRequest {
    pub fn new(method: Method, path_and_query: &str) -> Self {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (path_and_query.to_string(), None),
        };

        Self {
            method,
            path,
            query,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Builder-style header append
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn operation(&self) -> OperationKind {
        OperationKind::from_method(&self.method)
    }

    /// Path plus query string, as replayed to peers
    pub fn path_qs(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// First value of a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Replace every value of a header with a single one
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.into()));
    }

    /// Remove a header, returning its first value
    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        let first = self.header(name).map(str::to_string);
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        first
    }
}

/// Request-scoped replication context
///
/// Filled by whatever sits in front of the interceptor (a placement
/// engine, the gateway, an embedding application). Unset fields fall back
/// to the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Identity of the cluster serving this request
    pub my_cluster: Option<ClusterIdentity>,
    /// Clusters that should hold the target resource
    pub placement: Option<PlacementSet>,
    /// Internal call that bypassed authorization; never replicated
    pub authorize_override: bool,
}

impl RequestContext {
    pub fn with_my_cluster(mut self, cluster: impl Into<ClusterIdentity>) -> Self {
        self.my_cluster = Some(cluster.into());
        self
    }

    pub fn with_placement(mut self, placement: PlacementSet) -> Self {
        self.placement = Some(placement);
        self
    }

    pub fn internal(mut self) -> Self {
        self.authorize_override = true;
        self
    }
}
