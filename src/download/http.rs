//! Shared HTTP client for provider APIs and byte downloads.
//!
//! One `HttpClient` is built per provider and reused for every request of a
//! run, taking advantage of connection pooling.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_LENGTH, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;

/// Browser User-Agent; several providers refuse unknown agents.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// HTTP client with the crate's timeouts and User-Agent.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Plain client: browser User-Agent, gzip, 30s connect and 5min overall
    /// timeout so a full hi-res album track fits.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Client that keeps the cookies its responses set; Deezer's gateway
    /// session lives in them.
    #[must_use]
    pub fn with_cookie_jar(cookie_jar: Arc<Jar>) -> Self {
        Self::build(Some(cookie_jar))
    }

    // Every option is static, building can only fail if the TLS backend
    // cannot initialise at all.
    #[allow(clippy::expect_used)]
    fn build(cookie_jar: Option<Arc<Jar>>) -> Self {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .gzip(true)
            .user_agent(BROWSER_USER_AGENT);
        if let Some(jar) = cookie_jar {
            builder = builder.cookie_provider(jar);
        }
        let client = builder.build().expect("TLS backend unavailable");
        Self { client }
    }

    /// For requests that need more than a checked GET (POST forms, headers).
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Sends a GET and fails on non-success status.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Network`]/[`DownloadError::Timeout`] when the
    /// request fails and [`DownloadError::HttpStatus`] for 4xx/5xx responses.
    #[instrument(skip(self))]
    pub async fn get(&self, url: &str) -> Result<Response, DownloadError> {
        send_checked(self.client.get(url), url).await
    }

    /// Returns the `Content-Length` a HEAD request reports, if any.
    ///
    /// # Errors
    ///
    /// Same as [`HttpClient::get`].
    #[instrument(skip(self))]
    pub async fn content_length(&self, url: &str) -> Result<Option<u64>, DownloadError> {
        let response = send_checked(self.client.head(url), url).await?;
        Ok(header_content_length(&response))
    }
}

/// Reads the `Content-Length` header itself; the body size hint is
/// meaningless for HEAD responses.
#[must_use]
pub fn header_content_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Sends `request` and maps failures and error statuses to [`DownloadError`].
///
/// # Errors
///
/// See [`HttpClient::get`].
pub async fn send_checked(request: RequestBuilder, url: &str) -> Result<Response, DownloadError> {
    let response = request
        .send()
        .await
        .map_err(|e| DownloadError::network(url, e))?;

    if !response.status().is_success() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string);
        return Err(DownloadError::http_status_with_retry_after(
            url,
            response.status().as_u16(),
            retry_after,
        ));
    }

    Ok(response)
}

/// Streams a response body into `sink`, returning the byte count.
///
/// # Errors
///
/// Returns [`DownloadError::Network`] if the body stream fails and
/// [`DownloadError::Io`] if the sink rejects a write.
pub async fn stream_body<W>(response: Response, url: &str, sink: &mut W) -> Result<u64, DownloadError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::network(url, e))?;
        sink.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io("<sink>", e))?;
        written += chunk.len() as u64;
    }
    debug!(url, bytes = written, "body streamed");
    Ok(written)
}
