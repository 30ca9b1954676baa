//! Local Execution Pipeline
//!
//! The boundary to the local storage cluster. Replicated requests are
//! executed with a fully drained response so they can be arbitrated;
//! everything else is streamed through untouched.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::request::{is_regenerated, ProxyRequest};
use crate::response::{BodyStream, BoxError, ClusterResponse, StreamedResponse};

/// Executes a request against the local cluster
#[async_trait]
pub trait LocalPipeline: Send + Sync {
    /// Execute and drain the response
    async fn execute(&self, request: ProxyRequest) -> Result<ClusterResponse>;

    /// Execute with the request body still arriving
    ///
    /// Pipelines that cannot stream collect the body and fall back to
    /// [`LocalPipeline::execute`].
    async fn stream(&self, mut request: ProxyRequest, body: BodyStream) -> Result<StreamedResponse> {
        let chunks: Vec<Bytes> = body
            .try_collect()
            .await
            .map_err(|e| Error::Upstream(format!("Failed to read request body: {}", e)))?;
        request.body = Bytes::from(chunks.concat());
        Ok(self.execute(request).await?.into())
    }
}

/// Local storage proxy reached over HTTP
pub struct HttpUpstream {
    base_url: String,
    client: reqwest::Client,
    /// Bound on drained executions, and on connecting
    request_timeout: Duration,
}

impl HttpUpstream {
    /// Create a new upstream client for `base_url`
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Upstream(format!("Failed to create upstream HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_builder(&self, request: &ProxyRequest) -> Result<reqwest::RequestBuilder> {
        let url = format!("{}{}", self.base_url, request.path_qs());
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| Error::Upstream(format!("Unsupported method {}: {}", request.method, e)))?;

        let mut builder = self.client.request(method, url);
        for (name, value) in request.headers.iter().filter(|(n, _)| !is_regenerated(n)) {
            builder = builder.header(name.as_str(), value.as_str());
        }
        Ok(builder)
    }

    async fn send(&self, request: &ProxyRequest, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        builder.send().await.map_err(|e| {
            Error::Upstream(format!("{} {} failed: {}", request.method, request.path, e))
        })
    }
}

/// Header pairs of a local proxy response
fn response_headers(response: &reqwest::Response) -> Vec<(String, String)> {
    response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

#[async_trait]
impl LocalPipeline for HttpUpstream {
    async fn execute(&self, request: ProxyRequest) -> Result<ClusterResponse> {
        let mut builder = self.request_builder(&request)?;
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let exchange = async {
            let response = self.send(&request, builder).await?;
            let status = response.status().as_u16();
            let headers = response_headers(&response);
            let body = response
                .bytes()
                .await
                .map_err(|e| Error::Upstream(format!("Failed to read local response: {}", e)))?;
            Ok::<_, Error>(ClusterResponse::new(status, headers, body))
        };

        timeout(self.request_timeout, exchange).await.map_err(|_| {
            Error::Upstream(format!(
                "{} {} timed out after {:?}",
                request.method, request.path, self.request_timeout
            ))
        })?
    }

    async fn stream(&self, request: ProxyRequest, body: BodyStream) -> Result<StreamedResponse> {
        let mut builder = self.request_builder(&request)?;

        // Only requests that announced a body get one
        if let Some(length) = request.header("content-length") {
            builder = builder
                .header("content-length", length)
                .body(reqwest::Body::wrap_stream(body));
        } else if request.has_header("transfer-encoding") {
            builder = builder.body(reqwest::Body::wrap_stream(body));
        }

        let response = self.send(&request, builder).await?;
        Ok(StreamedResponse {
            status: response.status().as_u16(),
            headers: response_headers(&response),
            body: response.bytes_stream().map_err(BoxError::from).boxed(),
        })
    }
}
