//! Plain HTTP GET downloadable.

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::sync::OnceCell;
use tracing::instrument;

use super::downloadable::Downloadable;
use super::error::DownloadError;
use super::http::{HttpClient, stream_body};

/// A file served as-is from a URL.
#[derive(Debug)]
pub struct BasicDownloadable {
    http: HttpClient,
    url: String,
    extension: String,
    size: OnceCell<Option<u64>>,
}

impl BasicDownloadable {
    #[must_use]
    pub fn new(http: HttpClient, url: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            extension: extension.into(),
            size: OnceCell::new(),
        }
    }

    /// Same as [`BasicDownloadable::new`] with a size the provider already
    /// reported, so no HEAD request is needed.
    #[must_use]
    pub fn with_known_size(
        http: HttpClient,
        url: impl Into<String>,
        extension: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            extension: extension.into(),
            size: OnceCell::new_with(Some(Some(size))),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Downloadable for BasicDownloadable {
    fn extension(&self) -> &str {
        &self.extension
    }

    async fn size(&self) -> Result<Option<u64>, DownloadError> {
        self.size
            .get_or_try_init(|| self.http.content_length(&self.url))
            .await
            .copied()
    }

    #[instrument(skip(self, sink), fields(url = %self.url))]
    async fn fetch(&self, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64, DownloadError> {
        let response = self.http.get(&self.url).await?;
        stream_body(response, &self.url, sink).await
    }
}
