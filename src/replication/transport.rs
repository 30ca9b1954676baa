//! Peer Transport
//!
//! Replays an inbound account/container request on one peer cluster.

use async_trait::async_trait;
use axum::http::{header, HeaderName, HeaderValue, Request, Uri};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::cluster::ClusterIdentity;
use crate::error::{Error, Result};
use crate::request::{
    header_pairs, is_regenerated, ProxyRequest, ACCOUNT_ORIG_CLUSTER, CONTAINER_ORIG_CLUSTER,
    CONTAINER_SYNC_KEY, CONTAINER_SYNC_TO, ORIG_CLUSTER,
};
use crate::response::ClusterResponse;
use crate::sync_key::SyncKey;

/// Headers computed per peer, never copied from the inbound request
const RECOMPUTED: &[&str] = &[
    ORIG_CLUSTER,
    ACCOUNT_ORIG_CLUSTER,
    CONTAINER_ORIG_CLUSTER,
    CONTAINER_SYNC_TO,
    CONTAINER_SYNC_KEY,
];

fn is_recomputed(name: &str) -> bool {
    RECOMPUTED.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// One request to one peer
#[derive(Debug, Clone)]
pub struct PeerCall {
    /// Cluster receiving the request
    pub peer: ClusterIdentity,
    /// Cluster the peer's replica must sync to
    pub sync_to: ClusterIdentity,
    /// Cluster the request originates from
    pub origin: ClusterIdentity,
    /// Present only when the sync relationship is (re)established
    pub sync_key: Option<SyncKey>,
    /// The inbound request, shared by every peer call
    pub request: Arc<ProxyRequest>,
}

impl PeerCall {
    /// Headers sent to the peer
    ///
    /// Origin markers first, then sync headers, then every inbound header
    /// that is neither recomputed here nor set by the connection.
    pub fn headers(&self) -> Vec<(String, String)> {
        let origin = self.origin.as_str().to_string();
        let mut headers = vec![
            (ORIG_CLUSTER.to_string(), origin.clone()),
            (ACCOUNT_ORIG_CLUSTER.to_string(), origin.clone()),
            (CONTAINER_ORIG_CLUSTER.to_string(), origin),
        ];

        if let Some(key) = &self.sync_key {
            headers.push((
                CONTAINER_SYNC_TO.to_string(),
                format!("{}{}", self.sync_to.as_str(), self.request.path),
            ));
            headers.push((CONTAINER_SYNC_KEY.to_string(), key.as_str().to_string()));
        }

        headers.extend(
            self.request
                .headers
                .iter()
                .filter(|(name, _)| !is_recomputed(name) && !is_regenerated(name))
                .cloned(),
        );

        headers
    }

    /// Full URL on the peer
    pub fn url(&self) -> String {
        format!("{}{}", self.peer.base_url(), self.request.path_qs())
    }
}

/// Sends one request to one peer cluster
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn send(&self, call: PeerCall) -> Result<ClusterResponse>;
}

/// Where to open the connection for a call
struct PeerTarget {
    host: String,
    port: u16,
    tls: bool,
    /// `host[:port]` as written in the URL
    authority: String,
}

impl PeerTarget {
    fn parse(uri: &Uri) -> Result<Self> {
        let tls = uri.scheme_str() == Some("https");
        let authority = uri
            .authority()
            .ok_or_else(|| Error::Network(format!("Peer URL {} has no host", uri)))?;
        let host = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        Ok(Self {
            host,
            port: authority.port_u16().unwrap_or(if tls { 443 } else { 80 }),
            tls,
            authority: authority.as_str().to_string(),
        })
    }
}

/// Aborts the connection task once the exchange is over
struct ConnectionDriver(JoinHandle<()>);

impl Drop for ConnectionDriver {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// HTTP(S) transport to peer clusters
///
/// Every call opens its own connection. Connecting (TCP and TLS) is
/// bounded by the connect timeout; the response window opens once the
/// connection is up and is bounded by the request timeout.
pub struct HttpPeerTransport {
    tls: tokio_native_tls::TlsConnector,
    /// Connection timeout
    connect_timeout: Duration,
    /// Request timeout
    request_timeout: Duration,
}

impl HttpPeerTransport {
    /// Create a new peer transport
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let tls = native_tls::TlsConnector::new()
            .map_err(|e| Error::Network(format!("Failed to create TLS connector: {}", e)))?;

        Ok(Self {
            tls: tokio_native_tls::TlsConnector::from(tls),
            connect_timeout,
            request_timeout,
        })
    }

    async fn connect_tcp(&self, target: &PeerTarget) -> Result<TcpStream> {
        let stream = TcpStream::connect((target.host.as_str(), target.port))
            .await
            .map_err(|e| Error::ConnectionFailed {
                address: target.authority.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn connect_tls(
        &self,
        target: &PeerTarget,
    ) -> Result<tokio_native_tls::TlsStream<TcpStream>> {
        let stream = self.connect_tcp(target).await?;
        self.tls
            .connect(&target.host, stream)
            .await
            .map_err(|e| Error::ConnectionFailed {
                address: target.authority.clone(),
                reason: format!("TLS handshake failed: {}", e),
            })
    }

    /// Wait for a connect phase, mapping expiry to a connection timeout
    async fn within_connect_window<T>(
        &self,
        target: &PeerTarget,
        connect: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| Error::ConnectionTimeout(target.authority.clone()))?
    }

    /// Wait for the response, mapping expiry to a request timeout
    async fn within_request_window(
        &self,
        target: &PeerTarget,
        exchange: impl std::future::Future<Output = Result<ClusterResponse>>,
    ) -> Result<ClusterResponse> {
        timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| Error::RequestTimeout(target.authority.clone()))?
    }
}

fn build_request(call: &PeerCall, uri: &Uri, target: &PeerTarget) -> Result<Request<Full<Bytes>>> {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let mut builder = Request::builder()
        .method(call.request.method.clone())
        .uri(path)
        .header(header::HOST, target.authority.as_str())
        .header(header::CONNECTION, "close")
        .header(header::CONTENT_LENGTH, call.request.body.len());

    for (name, value) in call.headers() {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => builder = builder.header(name, value),
            _ => tracing::debug!("Not replaying unrepresentable header {}", name),
        }
    }

    builder
        .body(Full::new(call.request.body.clone()))
        .map_err(|e| Error::Internal(format!("Failed to build request for {}: {}", target.authority, e)))
}

/// Run one HTTP/1.1 exchange on an open connection and drain the response
async fn exchange<S>(stream: S, request: Request<Full<Bytes>>, address: &str) -> Result<ClusterResponse>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let network_error = |e: hyper::Error| Error::Network(format!("Request to {} failed: {}", address, e));

    let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
        .await
        .map_err(network_error)?;
    let _driver = ConnectionDriver(tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!("Peer connection ended: {}", e);
        }
    }));

    let response = sender.send_request(request).await.map_err(network_error)?;
    let status = response.status().as_u16();
    let headers = header_pairs(response.headers());
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(network_error)?
        .to_bytes();

    Ok(ClusterResponse::new(status, headers, body))
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn send(&self, call: PeerCall) -> Result<ClusterResponse> {
        tracing::debug!(
            "{} {} -> {} (sync to {})",
            call.request.method,
            call.request.path,
            call.peer,
            if call.sync_key.is_some() { call.sync_to.as_str() } else { "-" }
        );

        let url = call.url();
        let uri: Uri = url
            .parse()
            .map_err(|e| Error::Network(format!("Invalid peer URL {}: {}", url, e)))?;
        let target = PeerTarget::parse(&uri)?;
        let request = build_request(&call, &uri, &target)?;

        if target.tls {
            let stream = self
                .within_connect_window(&target, self.connect_tls(&target))
                .await?;
            self.within_request_window(&target, exchange(stream, request, &target.authority))
                .await
        } else {
            let stream = self
                .within_connect_window(&target, self.connect_tcp(&target))
                .await?;
            self.within_request_window(&target, exchange(stream, request, &target.authority))
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{HeaderMap, Method, StatusCode},
        Router,
    };
    use std::sync::Mutex;

    type Seen = Arc<Mutex<Vec<(String, HeaderMap, String)>>>;

    async fn record(
        State(seen): State<Seen>,
        uri: axum::http::Uri,
        headers: HeaderMap,
        body: String,
    ) -> (StatusCode, [(&'static str, &'static str); 1], &'static str) {
        seen.lock().unwrap().push((uri.to_string(), headers, body));
        (StatusCode::CREATED, [("x-trans-id", "tx-peer")], "created")
    }

    async fn spawn_peer() -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .fallback(record)
            .with_state(Arc::clone(&seen));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), seen)
    }

    /// Peer that accepts at once and answers after `delay`
    async fn spawn_slow_peer(delay: Duration) -> String {
        let app = Router::new().fallback(move || async move {
            tokio::time::sleep(delay).await;
            StatusCode::CREATED
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn call(peer: &str, key: Option<SyncKey>, request: ProxyRequest) -> PeerCall {
        PeerCall {
            peer: ClusterIdentity::new(peer),
            sync_to: ClusterIdentity::new("http://Local.Cluster:8081"),
            origin: ClusterIdentity::new("http://Local.Cluster:8081"),
            sync_key: key,
            request: Arc::new(request),
        }
    }

    #[test]
    fn test_headers_with_sync_key() {
        let key = SyncKey::generate();
        let request = ProxyRequest::new(Method::PUT, "/v1/AUTH_a/photos?x=1")
            .with_header("X-Auth-Token", "tk")
            .with_header("x-container-sync-to", "http://elsewhere/v1/AUTH_a/photos")
            .with_header("X-Orig-Cluster", "http://spoofed")
            .with_header("Content-Length", "0")
            .with_header("Host", "local.cluster:8081");
        let call = call("http://peer:8080", Some(key.clone()), request);

        let headers = call.headers();
        let get = |name: &str| -> Vec<&str> {
            headers
                .iter()
                .filter(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
                .collect()
        };

        assert_eq!(get(ORIG_CLUSTER), vec!["http://Local.Cluster:8081"]);
        assert_eq!(get(ACCOUNT_ORIG_CLUSTER), vec!["http://Local.Cluster:8081"]);
        assert_eq!(get(CONTAINER_ORIG_CLUSTER), vec!["http://Local.Cluster:8081"]);
        assert_eq!(get(CONTAINER_SYNC_TO), vec!["http://Local.Cluster:8081/v1/AUTH_a/photos"]);
        assert_eq!(get(CONTAINER_SYNC_KEY), vec![key.as_str()]);
        assert_eq!(get("X-Auth-Token"), vec!["tk"]);
        assert!(get("Host").is_empty());
        assert!(get("Content-Length").is_empty());
    }

    #[test]
    fn test_headers_without_sync_key() {
        let request = ProxyRequest::new(Method::DELETE, "/v1/AUTH_a/photos")
            .with_header("X-Container-Sync-To", "http://old/v1/AUTH_a/photos")
            .with_header("X-Container-Sync-Key", "stale");
        let call = call("https://peer:8443", None, request);

        let headers = call.headers();
        assert!(!headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(CONTAINER_SYNC_TO)));
        assert!(!headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(CONTAINER_SYNC_KEY)));
        assert_eq!(call.url(), "https://peer:8443/v1/AUTH_a/photos");
    }

    #[test]
    fn test_peer_target() {
        let uri: Uri = "https://Peer.Example:8443/v1/a/c?x=1".parse().unwrap();
        let target = PeerTarget::parse(&uri).unwrap();
        assert!(target.tls);
        assert_eq!(target.port, 8443);
        assert_eq!(target.authority, "Peer.Example:8443");

        let uri: Uri = "http://[::1]/v1/a".parse().unwrap();
        let target = PeerTarget::parse(&uri).unwrap();
        assert!(!target.tls);
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 80);
    }

    #[tokio::test]
    async fn test_send_replays_request() {
        let (peer, seen) = spawn_peer().await;
        let transport =
            HttpPeerTransport::new(Duration::from_secs(1), Duration::from_secs(2)).unwrap();

        let key = SyncKey::generate();
        let mut request = ProxyRequest::new(Method::PUT, "/v1/AUTH_a/photos?format=json")
            .with_header("X-Auth-Token", "tk");
        request.body = Bytes::from("meta");
        let resp = transport.send(call(&peer, Some(key.clone()), request)).await.unwrap();

        assert_eq!(resp.status, 201);
        assert_eq!(resp.header("x-trans-id"), Some("tx-peer"));
        assert_eq!(resp.body, Bytes::from("created"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (uri, headers, body) = &seen[0];
        assert_eq!(uri, "/v1/AUTH_a/photos?format=json");
        assert_eq!(body, "meta");
        assert_eq!(headers["x-orig-cluster"], "http://Local.Cluster:8081");
        assert_eq!(headers["x-container-sync-key"], key.as_str());
        assert_eq!(
            headers["x-container-sync-to"],
            "http://Local.Cluster:8081/v1/AUTH_a/photos"
        );
        assert_eq!(headers["x-auth-token"], "tk");
        assert_eq!(headers["host"], peer.trim_start_matches("http://"));
    }

    #[tokio::test]
    async fn test_connection_failure() {
        // Grab a free port, then close it
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport =
            HttpPeerTransport::new(Duration::from_millis(200), Duration::from_millis(200)).unwrap();
        let request = ProxyRequest::new(Method::DELETE, "/v1/AUTH_a/photos");
        let result = transport.send(call(&format!("http://{}", addr), None, request)).await;

        assert!(matches!(result, Err(Error::ConnectionFailed { .. })));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let peer = spawn_slow_peer(Duration::from_secs(5)).await;

        let transport =
            HttpPeerTransport::new(Duration::from_millis(100), Duration::from_millis(200)).unwrap();
        let request = ProxyRequest::new(Method::POST, "/v1/AUTH_a/photos");
        let result = transport.send(call(&peer, None, request)).await;

        assert!(matches!(result, Err(Error::RequestTimeout(_))));
    }

    #[tokio::test]
    async fn test_response_window_ignores_unused_connect_budget() {
        // Connects at once; the answer fits in connect + request but not in request
        let peer = spawn_slow_peer(Duration::from_millis(1500)).await;

        let transport =
            HttpPeerTransport::new(Duration::from_secs(2), Duration::from_millis(500)).unwrap();
        let started = std::time::Instant::now();
        let request = ProxyRequest::new(Method::PUT, "/v1/AUTH_a/photos");
        let result = transport.send(call(&peer, None, request)).await;

        assert!(matches!(result, Err(Error::RequestTimeout(_))));
        assert!(started.elapsed() < Duration::from_millis(1400));
    }

    #[tokio::test]
    async fn test_slow_answer_within_request_window() {
        let peer = spawn_slow_peer(Duration::from_millis(300)).await;

        let transport =
            HttpPeerTransport::new(Duration::from_millis(100), Duration::from_secs(2)).unwrap();
        let request = ProxyRequest::new(Method::DELETE, "/v1/AUTH_a/photos");
        let resp = transport.send(call(&peer, None, request)).await.unwrap();

        assert_eq!(resp.status, 201);
    }
}
