//! SoundCloud client.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::search::SearchTable;
use super::transport::ApiTransport;
use super::{ClientCapability, ClientError};
use crate::config::SoundcloudConfig;
use crate::download::{BasicDownloadable, Downloadable, HlsDownloadable, HttpClient, RateLimiter};
use crate::media::{MediaType, Provider, Reference};

pub const SOUNDCLOUD_BASE_URL: &str = "https://api-v2.soundcloud.com";

/// Playlist stubs are filled in batches of this many ids.
const STUB_BATCH_SIZE: usize = 50;

pub struct SoundcloudClient {
    config: SoundcloudConfig,
    base_url: String,
    api: ApiTransport,
    logged_in: OnceCell<()>,
    search_table: SearchTable,
}

impl SoundcloudClient {
    #[must_use]
    pub fn new(config: SoundcloudConfig, limiter: Arc<RateLimiter>) -> Self {
        Self::with_base_url(config, limiter, SOUNDCLOUD_BASE_URL)
    }

    /// Creates a client with a custom endpoint for tests.
    #[must_use]
    pub fn with_base_url(
        config: SoundcloudConfig,
        limiter: Arc<RateLimiter>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            config,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api: ApiTransport::new(Provider::Soundcloud, HttpClient::new(), limiter),
            logged_in: OnceCell::new(),
            search_table: SearchTable::new(
                Provider::Soundcloud,
                &[
                    (MediaType::Track, "search/tracks"),
                    (MediaType::Playlist, "search/playlists"),
                ],
            ),
        }
    }

    fn request(&self, url: &str, query: &[(&str, &str)]) -> reqwest::RequestBuilder {
        self.api
            .client()
            .get(url)
            .query(&[
                ("client_id", self.config.client_id.as_str()),
                ("app_version", self.config.app_version.as_str()),
                ("app_locale", "en"),
            ])
            .query(query)
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ClientError> {
        let url = format!("{}/{path}", self.base_url);
        self.api.send_ok(self.request(&url, query), &url).await
    }

    async fn announce(&self) -> Result<(), ClientError> {
        if self.config.client_id.is_empty() || self.config.app_version.is_empty() {
            return Err(ClientError::missing_credentials(
                Provider::Soundcloud,
                "client_id and app_version are required",
            ));
        }
        let url = format!("{}/announcements", self.base_url);
        let (status, _) = self.api.send(self.request(&url, &[]), &url).await?;
        if !(200..300).contains(&status) {
            return Err(ClientError::authentication(
                Provider::Soundcloud,
                format!("client_id/app_version rejected (HTTP {status})"),
            ));
        }
        info!(provider = "soundcloud", "logged in");
        Ok(())
    }

    fn ensure_logged_in(&self) -> Result<(), ClientError> {
        if self.logged_in.initialized() {
            Ok(())
        } else {
            Err(ClientError::authentication(Provider::Soundcloud, "not logged in"))
        }
    }

    /// Playlists list tracks beyond the first few as id-only stubs.
    async fn fill_stubs(&self, playlist: &mut Value) -> Result<(), ClientError> {
        let Some(tracks) = playlist.get_mut("tracks").and_then(Value::as_array_mut) else {
            return Ok(());
        };
        let stub_ids: Vec<String> = tracks
            .iter()
            .filter(|t| t.get("title").is_none())
            .filter_map(|t| t.get("id").map(ToString::to_string))
            .collect();
        if stub_ids.is_empty() {
            return Ok(());
        }
        debug!(stubs = stub_ids.len(), "filling playlist stubs");

        let batches = stub_ids.chunks(STUB_BATCH_SIZE).map(|batch| {
            let ids = batch.join(",");
            async move { self.get("tracks", &[("ids", ids.as_str())]).await }
        });
        let full: Vec<Value> = try_join_all(batches)
            .await?
            .into_iter()
            .filter_map(|batch| batch.as_array().cloned())
            .flatten()
            .collect();

        for track in tracks.iter_mut() {
            if track.get("title").is_some() {
                continue;
            }
            if let Some(found) = full.iter().find(|f| f.get("id") == track.get("id")) {
                *track = found.clone();
            }
        }
        Ok(())
    }

    async fn original_file(&self, id: &str) -> Result<Box<dyn Downloadable>, ClientError> {
        let download = self.get(&format!("tracks/{id}/download"), &[]).await?;
        let url = download
            .get("redirectUri")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::non_streamable("No download URL was returned."))?;
        Ok(Box::new(BasicDownloadable::new(
            self.api.http().clone(),
            url,
            "flac",
        )))
    }

    async fn hls_stream(&self, track: &Value) -> Result<Box<dyn Downloadable>, ClientError> {
        let transcoding = track
            .pointer("/media/transcodings")
            .and_then(Value::as_array)
            .and_then(|all| {
                all.iter().find(|t| {
                    t.pointer("/format/protocol").and_then(Value::as_str) == Some("hls")
                        && t.pointer("/format/mime_type").and_then(Value::as_str)
                            == Some("audio/mpeg")
                })
            })
            .and_then(|t| t.get("url").and_then(Value::as_str))
            .ok_or_else(|| ClientError::non_streamable("No MP3 stream is available for this track."))?;

        let resolved = self.api.send_ok(self.request(transcoding, &[]), transcoding).await?;
        let playlist_url = resolved
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::invalid_response(transcoding, "missing playlist url"))?;
        Ok(Box::new(HlsDownloadable::new(
            self.api.http().clone(),
            playlist_url,
            "mp3",
        )))
    }
}

impl std::fmt::Debug for SoundcloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundcloudClient")
            .field("base_url", &self.base_url)
            .field("logged_in", &self.logged_in.initialized())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ClientCapability for SoundcloudClient {
    fn provider(&self) -> Provider {
        Provider::Soundcloud
    }

    async fn login(&self) -> Result<(), ClientError> {
        self.logged_in
            .get_or_try_init(|| self.announce())
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), fields(provider = "soundcloud"))]
    async fn get_metadata(&self, id: &str, media_type: MediaType) -> Result<Value, ClientError> {
        self.ensure_logged_in()?;
        match media_type {
            MediaType::Track => self.get(&format!("tracks/{id}"), &[]).await,
            MediaType::Playlist => {
                let mut playlist = self.get(&format!("playlists/{id}"), &[]).await?;
                self.fill_stubs(&mut playlist).await?;
                Ok(playlist)
            }
            _ => Err(ClientError::unsupported(
                Provider::Soundcloud,
                media_type,
                "metadata",
            )),
        }
    }

    #[instrument(skip(self), fields(provider = "soundcloud"))]
    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Value>, ClientError> {
        let endpoint = self.search_table.endpoint(media_type)?;
        let page = self
            .get(
                endpoint,
                &[
                    ("q", query),
                    ("limit", limit.to_string().as_str()),
                    ("offset", "0"),
                    ("linked_partitioning", "1"),
                ],
            )
            .await?;
        Ok(vec![page])
    }

    #[instrument(skip(self), fields(provider = "soundcloud"))]
    async fn get_downloadable(
        &self,
        id: &str,
        _quality: u8,
    ) -> Result<Box<dyn Downloadable>, ClientError> {
        self.ensure_logged_in()?;
        let track = self.get(&format!("tracks/{id}"), &[]).await?;

        let streamable = track.get("streamable").and_then(Value::as_bool).unwrap_or(true);
        let blocked = track.get("policy").and_then(Value::as_str) == Some("BLOCK");
        if !streamable || blocked {
            return Err(ClientError::non_streamable(
                "This track is not streamable in your region.",
            ));
        }

        let downloadable = track.get("downloadable").and_then(Value::as_bool) == Some(true);
        let downloads_left = track
            .get("has_downloads_left")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if downloadable && downloads_left {
            return self.original_file(id).await;
        }
        self.hls_stream(&track).await
    }

    #[instrument(skip(self), fields(provider = "soundcloud"))]
    async fn resolve_url(&self, url: &str) -> Result<Reference, ClientError> {
        self.ensure_logged_in()?;
        let resolved = self.get("resolve", &[("url", url)]).await?;

        let id = match resolved.get("id") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s.clone(),
            _ => return Err(ClientError::invalid_response(url, "resolved item has no id")),
        };
        let media_type = match resolved.get("kind").and_then(Value::as_str) {
            Some("track") => MediaType::Track,
            Some("playlist") => MediaType::Playlist,
            _ => {
                return Err(ClientError::UnsupportedUrl {
                    provider: Provider::Soundcloud,
                    url: url.to_string(),
                });
            }
        };
        Ok(Reference::new(Provider::Soundcloud, media_type, id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config() -> SoundcloudConfig {
        SoundcloudConfig {
            client_id: "cid".into(),
            app_version: "1700000000".into(),
            ..SoundcloudConfig::default()
        }
    }

    async fn logged_in_client(server: &MockServer) -> SoundcloudClient {
        Mock::given(method("GET"))
            .and(path("/announcements"))
            .and(query_param("client_id", "cid"))
            .and(query_param("app_locale", "en"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"collection": []})))
            .mount(server)
            .await;
        let client = SoundcloudClient::with_base_url(
            config(),
            Arc::new(RateLimiter::disabled()),
            server.uri(),
        );
        client.login().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_login_requires_client_id() {
        let client = SoundcloudClient::new(
            SoundcloudConfig::default(),
            Arc::new(RateLimiter::disabled()),
        );
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, ClientError::MissingCredentials { .. }));
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/announcements"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let client = SoundcloudClient::with_base_url(
            config(),
            Arc::new(RateLimiter::disabled()),
            server.uri(),
        );
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, ClientError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_resolve_url_maps_kind() {
        let server = MockServer::start().await;
        let client = logged_in_client(&server).await;
        Mock::given(method("GET"))
            .and(path("/resolve"))
            .and(query_param("url", "https://soundcloud.com/artist/song"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"kind": "track", "id": 987})))
            .mount(&server)
            .await;

        let reference = client
            .resolve_url("https://soundcloud.com/artist/song")
            .await
            .unwrap();
        assert_eq!(reference, Reference::new(Provider::Soundcloud, MediaType::Track, "987"));
    }

    #[tokio::test]
    async fn test_playlist_stubs_are_filled() {
        let server = MockServer::start().await;
        let client = logged_in_client(&server).await;
        Mock::given(method("GET"))
            .and(path("/playlists/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 5,
                "title": "Mix",
                "tracks": [{"id": 1, "title": "One"}, {"id": 2}, {"id": 3}],
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tracks"))
            .and(query_param("ids", "2,3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 3, "title": "Three"},
                {"id": 2, "title": "Two"},
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let playlist = client.get_metadata("5", MediaType::Playlist).await.unwrap();
        let titles: Vec<&str> = playlist["tracks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["One", "Two", "Three"]);
    }

    #[tokio::test]
    async fn test_downloadable_prefers_hls_mp3_without_downloads() {
        let server = MockServer::start().await;
        let client = logged_in_client(&server).await;
        let transcoding = format!("{}/media/soundcloud:tracks:7/hls", server.uri());
        Mock::given(method("GET"))
            .and(path("/tracks/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 7,
                "streamable": true,
                "downloadable": false,
                "media": {"transcodings": [
                    {"url": "https://ignored.example.com/opus", "format": {"protocol": "hls", "mime_type": "audio/ogg"}},
                    {"url": transcoding, "format": {"protocol": "hls", "mime_type": "audio/mpeg"}},
                ]},
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/media/soundcloud:tracks:7/hls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"url": "https://cf-hls-media.sndcdn.com/playlist/7.m3u8"})))
            .mount(&server)
            .await;

        let downloadable = client.get_downloadable("7", 0).await.unwrap();
        assert_eq!(downloadable.extension(), "mp3");
    }

    #[tokio::test]
    async fn test_blocked_track_is_not_streamable() {
        let server = MockServer::start().await;
        let client = logged_in_client(&server).await;
        Mock::given(method("GET"))
            .and(path("/tracks/8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 8, "policy": "BLOCK"})))
            .mount(&server)
            .await;

        let err = client.get_downloadable("8", 0).await.unwrap_err();
        assert!(matches!(err, ClientError::NonStreamable { .. }));
    }

    #[tokio::test]
    async fn test_search_label_unsupported() {
        let client = SoundcloudClient::new(config(), Arc::new(RateLimiter::disabled()));
        let err = client.search(MediaType::Label, "x", 5).await.unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedMediaType { .. }));
    }
}
