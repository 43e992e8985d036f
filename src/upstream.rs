//! Upstream MCP client with connection pooling.
//!
//! A thin wrapper over `reqwest` that forwards the raw item bytes of a
//! JSON-RPC call to the single configured upstream. Only a narrow header
//! allowlist crosses the boundary: `Authorization` always, `Accept` only
//! when the caller negotiated an event stream, plus whatever the policy
//! explicitly lists. No automatic retries — upstream calls are not assumed
//! idempotent.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::header::{HeaderMap, HeaderName, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use thiserror::Error;

/// Failure modes when draining an upstream JSON body.
#[derive(Debug, Error)]
pub enum UpstreamBodyError {
    #[error("upstream response too large")]
    TooLarge,
    #[error("upstream read failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Pooled client bound to one upstream URL. Cloning is cheap; the pool is
/// shared. Cancellation rides on future drop: when the caller goes away the
/// in-flight request is aborted.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    url: Url,
}

impl UpstreamClient {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;
        Ok(Self { client, url })
    }

    /// POST one JSON-RPC item to the upstream. `body` is the item's bytes
    /// verbatim, never a re-encoding.
    pub async fn forward(
        &self,
        headers: &HeaderMap,
        body: Bytes,
        include_accept: bool,
        forward_headers: &[HeaderName],
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(auth) = headers.get(AUTHORIZATION) {
            request = request.header(AUTHORIZATION, auth.clone());
        }
        if include_accept {
            if let Some(accept) = headers.get(ACCEPT) {
                request = request.header(ACCEPT, accept.clone());
            }
        }
        for name in forward_headers {
            if let Some(value) = headers.get(name) {
                request = request.header(name.clone(), value.clone());
            }
        }

        request.send().await
    }
}

/// Drain a JSON response body, bailing as soon as it exceeds `max_body`.
pub async fn read_json_body(
    response: reqwest::Response,
    max_body: usize,
) -> Result<Bytes, UpstreamBodyError> {
    let mut buf = BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > max_body {
            return Err(UpstreamBodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}
