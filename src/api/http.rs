//! HTTP Gateway Server
//!
//! Catches every method and path, runs it through the interceptor and
//! writes the arbitrated response back exactly once.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use futures::{StreamExt, TryStreamExt};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::cluster::PlacementSet;
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::interceptor::{Interceptor, Route};
use crate::request::{header_pairs, is_hop_by_hop, ProxyRequest, RequestContext};
use crate::response::{BoxError, ClusterResponse, StreamedResponse};

/// Local cluster identity asserted by a placement engine
pub const CONTEXT_MY_CLUSTER: &str = "X-Autosync-My-Cluster";
/// Comma-separated placement asserted by a placement engine
pub const CONTEXT_PLACEMENT: &str = "X-Autosync-Placement";

/// Shared gateway state
pub struct GatewayState {
    pub interceptor: Interceptor,
    pub max_body_bytes: usize,
    pub trust_context_headers: bool,
}

/// HTTP gateway in front of the local storage proxy
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<GatewayState>,
}

impl GatewayServer {
    /// Create a new gateway server
    pub fn new(config: GatewayConfig, interceptor: Interceptor) -> Self {
        let state = Arc::new(GatewayState {
            interceptor,
            max_body_bytes: config.max_body_bytes,
            trust_context_headers: config.trust_context_headers,
        });

        Self { config, state }
    }

    /// Get the state for sharing with other components
    pub fn state(&self) -> Arc<GatewayState> {
        Arc::clone(&self.state)
    }

    /// Create the router
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(handle_request)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(Arc::clone(&self.state))
    }

    /// Start the gateway and serve until ctrl-c
    pub async fn start(&self) -> Result<()> {
        let app = self.router();

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!(
            "Gateway listening on {}, local proxy at {}",
            self.config.bind_address,
            self.config.upstream
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Network(format!("HTTP server error: {}", e)))?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn handle_request(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());

    let mut proxy_request = ProxyRequest::new(parts.method.clone(), path_and_query);
    proxy_request.headers = header_pairs(&parts.headers);

    let ctx = take_context(&mut proxy_request, state.trust_context_headers);
    let interceptor = &state.interceptor;

    match interceptor.classify(&proxy_request, &ctx) {
        Ok(Route::PassThrough(reason)) => {
            let body = body.into_data_stream().map_err(BoxError::from).boxed();
            into_streamed_response(interceptor.pass_through(proxy_request, body, reason).await)
        }
        Ok(Route::Replicate(plan)) => {
            // Only replicated requests are buffered; they are replayed to the peer
            proxy_request.body = match axum::body::to_bytes(body, state.max_body_bytes).await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!("Rejecting {} {}: {}", parts.method, parts.uri, e);
                    return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
                }
            };
            into_http_response(interceptor.replicate(proxy_request, plan).await)
        }
        Err(e) => into_http_response(interceptor.reject(&proxy_request, e)),
    }
}

/// Pull the placement context out of the request
///
/// The context headers are stripped whether or not they are trusted.
fn take_context(request: &mut ProxyRequest, trusted: bool) -> RequestContext {
    let my_cluster = request.remove_header(CONTEXT_MY_CLUSTER);
    let placement = request.remove_header(CONTEXT_PLACEMENT);

    let mut ctx = RequestContext::default();
    if !trusted {
        if my_cluster.is_some() || placement.is_some() {
            tracing::debug!("Ignoring untrusted context headers on {}", request.path);
        }
        return ctx;
    }

    if let Some(my_cluster) = my_cluster.filter(|c| !c.trim().is_empty()) {
        ctx = ctx.with_my_cluster(my_cluster);
    }
    if let Some(placement) = placement {
        let placement = PlacementSet::parse(&placement);
        if !placement.is_empty() {
            ctx = ctx.with_placement(placement);
        }
    }
    ctx
}

fn into_http_response(response: ClusterResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let body_len = response.body.len().to_string();

    let mut http_response = Response::new(Body::from(response.body.clone()));
    *http_response.status_mut() = status;

    // A stated length must agree with the drained body, except on empty
    // (HEAD) answers where it describes the resource
    let headers = response.headers.iter().filter(|(name, value)| {
        !name.eq_ignore_ascii_case("content-length")
            || response.body.is_empty()
            || value.trim() == body_len
    });
    copy_headers(http_response.headers_mut(), headers);

    http_response
}

fn into_streamed_response(response: StreamedResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut http_response = Response::new(Body::from_stream(response.body));
    *http_response.status_mut() = status;
    copy_headers(http_response.headers_mut(), response.headers.iter());

    http_response
}

fn copy_headers<'a>(target: &mut HeaderMap, headers: impl Iterator<Item = &'a (String, String)>) {
    for (name, value) in headers.filter(|(n, _)| !is_hop_by_hop(n)) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                target.append(name, value);
            }
            _ => tracing::debug!("Dropping unrepresentable response header {}", name),
        }
    }
}
