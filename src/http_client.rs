//! HTTP client abstraction for provider APIs.
//!
//! Providers talk to the network only through [`HttpClient`], so tests can
//! swap in a mock that returns canned bodies or byte streams.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use std::pin::Pin;
use tracing::{debug, warn};

/// A response body delivered incrementally.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Trait for HTTP communication with external APIs.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a POST request with a JSON body and returns the whole response
    /// text. Non-success statuses are errors carrying the status and body.
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<String>;

    /// Sends a POST request with a JSON body and returns the response body
    /// as a stream of chunks.
    async fn post_json_stream(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<ByteStream>;
}

/// HTTP client implementation using reqwest.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to initialize HTTP client")?;
        Ok(Self { client })
    }

    fn request(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> RequestBuilder {
        let mut request = self.client.post(url);
        for (key, value) in headers {
            request = request.header(*key, *value);
        }
        request.json(body)
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read response body>".to_string());
    warn!(status = %status, body_len = body.len(), "API returned non-success status");
    Err(anyhow!("API error {}: {}", status, body.trim()))
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<String> {
        debug!(url = %redact(url), "sending request");
        let response = self
            .request(url, headers, body)
            .send()
            .await
            .context("request to model API failed")?;
        let response = ensure_success(response).await?;
        response
            .text()
            .await
            .context("failed to read model API response")
    }

    async fn post_json_stream(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<ByteStream> {
        debug!(url = %redact(url), "opening streaming request");
        let response = self
            .request(url, headers, body)
            .send()
            .await
            .context("streaming request to model API failed")?;
        let response = ensure_success(response).await?;
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.context("stream interrupted"));
        Ok(Box::pin(stream))
    }
}

/// Strips the query string so keys passed as parameters never reach the logs.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
