//! Cluster Response
//!
//! The status, headers and body produced by one cluster (local or peer),
//! or synthesized when no cluster could give a usable answer.

use axum::http::StatusCode;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;

/// Error carried by a body stream
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Request or response body forwarded without buffering
pub type BodyStream = BoxStream<'static, std::result::Result<Bytes, BoxError>>;

/// Outcome of an operation on one cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ClusterResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Stand-in for a peer that did not answer in time
    pub fn unavailable() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE.as_u16(), Vec::new(), Bytes::new())
    }

    /// Synthetic 503 returned to the caller
    pub fn service_unavailable() -> Self {
        Self::for_status(StatusCode::SERVICE_UNAVAILABLE)
    }

    /// Synthetic 500 returned to the caller
    pub fn internal_error() -> Self {
        Self::for_status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Synthetic response with the canonical reason as body
    pub fn for_status(status: StatusCode) -> Self {
        let body = status.canonical_reason().unwrap_or("Error").to_string();
        Self::new(
            status.as_u16(),
            vec![("Content-Type".to_string(), "text/plain; charset=utf-8".to_string())],
            body,
        )
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response of a pass-through request, body still in flight
pub struct StreamedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: BodyStream,
}

impl StreamedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Debug for StreamedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamedResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl From<ClusterResponse> for StreamedResponse {
    fn from(response: ClusterResponse) -> Self {
        let body = if response.body.is_empty() {
            stream::empty().boxed()
        } else {
            stream::once(async move { Ok(response.body) }).boxed()
        };

        Self {
            status: response.status,
            headers: response.headers,
            body,
        }
    }
}
