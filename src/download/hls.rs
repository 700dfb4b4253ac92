//! HLS playlist downloadable (SoundCloud transcodings).
//!
//! The m3u8 is fetched (and parsed with `m3u8-rs`) when the download starts.
//! Its segments are requested concurrently and written to the sink in
//! playlist order. MPEG audio frames concatenate without remuxing.

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt, stream};
use m3u8_rs::{MediaPlaylist, Playlist};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, instrument};
use url::Url;

use super::constants::HLS_SEGMENT_CONCURRENCY;
use super::downloadable::Downloadable;
use super::error::DownloadError;
use super::http::HttpClient;

#[derive(Debug)]
pub struct HlsDownloadable {
    http: HttpClient,
    playlist_url: String,
    extension: String,
}

impl HlsDownloadable {
    #[must_use]
    pub fn new(http: HttpClient, playlist_url: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            http,
            playlist_url: playlist_url.into(),
            extension: extension.into(),
        }
    }

    async fn playlist(&self, url: &str) -> Result<(Url, Playlist), DownloadError> {
        let base = Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;
        let body = self
            .http
            .get(url)
            .await?
            .bytes()
            .await
            .map_err(|e| DownloadError::network(url, e))?;
        let playlist = m3u8_rs::parse_playlist_res(&body)
            .map_err(|_| DownloadError::non_streamable(format!("malformed HLS playlist at {url}")))?;
        Ok((base, playlist))
    }

    /// Follows a master playlist to its highest-bandwidth variant.
    async fn segment_urls(&self) -> Result<Vec<String>, DownloadError> {
        let (base, playlist) = self.playlist(&self.playlist_url).await?;
        match playlist {
            Playlist::MediaPlaylist(media) => media_segment_urls(&base, &media),
            Playlist::MasterPlaylist(master) => {
                let variant = master
                    .variants
                    .iter()
                    .max_by_key(|v| v.bandwidth)
                    .ok_or_else(|| DownloadError::non_streamable("HLS master playlist has no variants"))?;
                let variant_url = join(&base, &variant.uri)?;
                debug!(variant = %variant_url, bandwidth = variant.bandwidth, "picked HLS variant");
                match self.playlist(&variant_url).await? {
                    (base, Playlist::MediaPlaylist(media)) => media_segment_urls(&base, &media),
                    (_, Playlist::MasterPlaylist(_)) => Err(DownloadError::non_streamable(
                        "HLS variant is another master playlist",
                    )),
                }
            }
        }
    }
}

fn join(base: &Url, uri: &str) -> Result<String, DownloadError> {
    base.join(uri)
        .map(String::from)
        .map_err(|_| DownloadError::invalid_url(uri))
}

/// Segment URIs of a media playlist, absolute and in order.
fn media_segment_urls(base: &Url, playlist: &MediaPlaylist) -> Result<Vec<String>, DownloadError> {
    playlist
        .segments
        .iter()
        .map(|segment| join(base, &segment.uri))
        .collect()
}

#[async_trait]
impl Downloadable for HlsDownloadable {
    fn extension(&self) -> &str {
        &self.extension
    }

    /// Segment sizes are unknown until they are fetched.
    async fn size(&self) -> Result<Option<u64>, DownloadError> {
        Ok(None)
    }

    #[instrument(skip(self, sink), fields(playlist = %self.playlist_url))]
    async fn fetch(&self, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64, DownloadError> {
        let segments = self.segment_urls().await?;
        debug!(segments = segments.len(), "playlist parsed");

        let http = &self.http;
        let mut bodies = stream::iter(segments)
            .map(|url| async move {
                let response = http.get(&url).await?;
                response
                    .bytes()
                    .await
                    .map_err(|e| DownloadError::network(&url, e))
            })
            .buffered(HLS_SEGMENT_CONCURRENCY);

        let mut written: u64 = 0;
        while let Some(bytes) = bodies.try_next().await? {
            sink.write_all(&bytes)
                .await
                .map_err(|e| DownloadError::io("<sink>", e))?;
            written += bytes.len() as u64;
        }
        Ok(written)
    }
}
