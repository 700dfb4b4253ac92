//! Tidal client.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::search::SearchTable;
use super::transport::{ApiTransport, error_message, restriction_sentence};
use super::{ClientCapability, ClientError};
use crate::config::TidalConfig;
use crate::download::{BasicDownloadable, Downloadable, HttpClient, RateLimiter};
use crate::media::{MediaType, Provider};

pub const TIDAL_BASE_URL: &str = "https://api.tidalhifi.com/v1";
pub const TIDAL_AUTH_URL: &str = "https://auth.tidal.com/v1/oauth2";

/// Tokens expiring sooner than this are refreshed at login.
const REFRESH_MARGIN_SECS: i64 = 86_400;

/// Largest page of items Tidal returns.
const PAGE_LIMIT: usize = 100;

const QUALITY_MAP: [&str; 4] = ["LOW", "HIGH", "LOSSLESS", "HI_RES"];

#[derive(Debug)]
struct TidalSession {
    access_token: String,
    country_code: String,
}

pub struct TidalClient {
    config: TidalConfig,
    base_url: String,
    auth_url: String,
    api: ApiTransport,
    session: OnceCell<TidalSession>,
    search_table: SearchTable,
}

impl TidalClient {
    #[must_use]
    pub fn new(config: TidalConfig, limiter: Arc<RateLimiter>) -> Self {
        Self::with_endpoints(config, limiter, TIDAL_BASE_URL, TIDAL_AUTH_URL)
    }

    /// Creates a client with custom endpoints for tests.
    #[must_use]
    pub fn with_endpoints(
        config: TidalConfig,
        limiter: Arc<RateLimiter>,
        base_url: impl Into<String>,
        auth_url: impl Into<String>,
    ) -> Self {
        Self {
            config,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_url: auth_url.into().trim_end_matches('/').to_string(),
            api: ApiTransport::new(Provider::Tidal, HttpClient::new(), limiter),
            session: OnceCell::new(),
            search_table: SearchTable::new(
                Provider::Tidal,
                &[
                    (MediaType::Track, "search/tracks"),
                    (MediaType::Album, "search/albums"),
                    (MediaType::Playlist, "search/playlists"),
                    (MediaType::Artist, "search/artists"),
                ],
            ),
        }
    }

    fn session(&self) -> Result<&TidalSession, ClientError> {
        self.session
            .get()
            .ok_or_else(|| ClientError::authentication(Provider::Tidal, "not logged in"))
    }

    async fn establish_session(&self) -> Result<TidalSession, ClientError> {
        let c = &self.config;
        if c.access_token.is_empty() {
            return Err(ClientError::missing_credentials(
                Provider::Tidal,
                "access_token is required",
            ));
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX));

        if c.token_expiry.saturating_sub(now) < REFRESH_MARGIN_SECS {
            let access_token = self.refresh_access_token().await?;
            let country_code = if c.country_code.is_empty() {
                self.validate_token(&access_token, false).await?
            } else {
                c.country_code.clone()
            };
            info!(provider = "tidal", "logged in with refreshed token");
            return Ok(TidalSession {
                access_token,
                country_code,
            });
        }

        let country_code = self.validate_token(&c.access_token, true).await?;
        info!(provider = "tidal", country = %country_code, "logged in");
        Ok(TidalSession {
            access_token: c.access_token.clone(),
            country_code,
        })
    }

    async fn refresh_access_token(&self) -> Result<String, ClientError> {
        let c = &self.config;
        if c.refresh_token.is_empty() || c.client_id.is_empty() || c.client_secret.is_empty() {
            return Err(ClientError::missing_credentials(
                Provider::Tidal,
                "the access token is expiring and refresh_token, client_id and client_secret are needed to refresh it",
            ));
        }

        let url = format!("{}/token", self.auth_url);
        let request = self
            .api
            .client()
            .post(&url)
            .basic_auth(&c.client_id, Some(&c.client_secret))
            .form(&[
                ("client_id", c.client_id.as_str()),
                ("refresh_token", c.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
                ("scope", "r_usr+w_usr+w_sub"),
            ]);
        let (status, body) = self.api.send(request, &url).await?;
        if !(200..300).contains(&status) {
            return Err(ClientError::authentication(
                Provider::Tidal,
                format!("token refresh failed: {}", error_message(&body)),
            ));
        }

        debug!(
            expires_in = body.get("expires_in").and_then(serde_json::Value::as_i64),
            "access token refreshed"
        );
        body.get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::invalid_response(&url, "missing access_token"))
    }

    /// Checks a token against `sessions`; returns the session's country.
    async fn validate_token(&self, token: &str, check_user: bool) -> Result<String, ClientError> {
        let url = format!("{}/sessions", self.base_url);
        let (status, body) = self
            .api
            .send(self.api.client().get(&url).bearer_auth(token), &url)
            .await?;
        if !(200..300).contains(&status) {
            return Err(ClientError::authentication(
                Provider::Tidal,
                format!("session check failed: {}", error_message(&body)),
            ));
        }

        if check_user {
            let user_id = body.get("userId").map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
            if user_id.as_deref() != Some(self.config.user_id.as_str()) {
                return Err(ClientError::authentication(
                    Provider::Tidal,
                    format!(
                        "user id mismatch: token belongs to {}, config says {}",
                        user_id.unwrap_or_default(),
                        self.config.user_id
                    ),
                ));
            }
        }

        body.get("countryCode")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClientError::invalid_response(&url, "missing countryCode"))
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ClientError> {
        let session = self.session()?;
        let url = format!("{}/{path}", self.base_url);
        let request = self
            .api
            .client()
            .get(&url)
            .bearer_auth(&session.access_token)
            .query(&[("countryCode", session.country_code.as_str())])
            .query(query);
        self.api.send_ok(request, &url).await
    }

    /// Every item of a paged listing, unwrapping `{item: ...}` entries.
    async fn all_items(&self, path: &str, first: &Value, total: usize) -> Result<Vec<Value>, ClientError> {
        let mut items = unwrap_items(first);
        let limit = PAGE_LIMIT.to_string();
        while items.len() < total {
            let offset = items.len().to_string();
            let page = self
                .get(path, &[("limit", limit.as_str()), ("offset", offset.as_str())])
                .await?;
            let more = unwrap_items(&page);
            if more.is_empty() {
                break;
            }
            items.extend(more);
        }
        Ok(items)
    }

    async fn with_listing(
        &self,
        path: &str,
        listing: &str,
        key: &str,
        total_key: &str,
    ) -> Result<Value, ClientError> {
        let listing_path = format!("{path}/{listing}");
        let limit = PAGE_LIMIT.to_string();
        let listing_query = [("limit", limit.as_str())];
        let (mut header, first) = tokio::try_join!(
            self.get(path, &[]),
            self.get(&listing_path, &listing_query),
        )?;

        let total = header
            .get(total_key)
            .or_else(|| first.get("totalNumberOfItems"))
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0);
        let items = self.all_items(&listing_path, &first, total).await?;

        if let Some(object) = header.as_object_mut() {
            object.insert(key.to_string(), Value::Array(items));
        }
        Ok(header)
    }
}

impl std::fmt::Debug for TidalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TidalClient")
            .field("base_url", &self.base_url)
            .field("logged_in", &self.session.initialized())
            .finish_non_exhaustive()
    }
}

fn unwrap_items(page: &Value) -> Vec<Value> {
    page.get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|entry| entry.get("item").unwrap_or(entry).clone())
                .collect()
        })
        .unwrap_or_default()
}

/// Stream manifest decoded from `playbackinfopostpaywall`.
#[derive(Debug, PartialEq)]
struct Manifest {
    url: Option<String>,
    mime_type: String,
    encrypted: bool,
    restriction: Option<String>,
}

fn decode_manifest(playback: &Value) -> Result<Manifest, ClientError> {
    let Some(encoded) = playback.get("manifest").and_then(Value::as_str) else {
        return Err(ClientError::non_streamable(error_message(playback)));
    };
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| ClientError::non_streamable(format!("undecodable manifest: {e}")))?;
    let manifest: Value = serde_json::from_slice(&bytes)
        .map_err(|_| ClientError::non_streamable("Only JSON stream manifests are supported."))?;

    let text = |key: &str| manifest.get(key).and_then(Value::as_str).unwrap_or_default();
    Ok(Manifest {
        url: manifest
            .pointer("/urls/0")
            .and_then(Value::as_str)
            .map(str::to_string),
        mime_type: format!("{} {}", text("mimeType"), text("codecs")),
        encrypted: !matches!(text("encryptionType"), "" | "NONE"),
        restriction: manifest
            .pointer("/restrictions/0/code")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[async_trait]
impl ClientCapability for TidalClient {
    fn provider(&self) -> Provider {
        Provider::Tidal
    }

    async fn login(&self) -> Result<(), ClientError> {
        self.session
            .get_or_try_init(|| self.establish_session())
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), fields(provider = "tidal"))]
    async fn get_metadata(&self, id: &str, media_type: MediaType) -> Result<Value, ClientError> {
        match media_type {
            MediaType::Track => self.get(&format!("tracks/{id}"), &[]).await,
            MediaType::Album => {
                self.with_listing(&format!("albums/{id}"), "items", "tracks", "numberOfTracks")
                    .await
            }
            MediaType::Playlist => {
                self.with_listing(&format!("playlists/{id}"), "items", "tracks", "numberOfTracks")
                    .await
            }
            MediaType::Artist => {
                self.with_listing(&format!("artists/{id}"), "albums", "albums", "numberOfAlbums")
                    .await
            }
            MediaType::Label => Err(ClientError::unsupported(
                Provider::Tidal,
                media_type,
                "metadata",
            )),
        }
    }

    #[instrument(skip(self), fields(provider = "tidal"))]
    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Value>, ClientError> {
        let endpoint = self.search_table.endpoint(media_type)?;
        let page = self
            .get(endpoint, &[("query", query), ("limit", limit.to_string().as_str())])
            .await?;
        let has_items = page
            .get("items")
            .and_then(Value::as_array)
            .is_some_and(|items| !items.is_empty());
        Ok(if has_items { vec![page] } else { Vec::new() })
    }

    #[instrument(skip(self), fields(provider = "tidal"))]
    async fn get_downloadable(
        &self,
        id: &str,
        quality: u8,
    ) -> Result<Box<dyn Downloadable>, ClientError> {
        let audio_quality = QUALITY_MAP[usize::from(quality.min(3))];
        let playback = self
            .get(
                &format!("tracks/{id}/playbackinfopostpaywall"),
                &[
                    ("audioquality", audio_quality),
                    ("playbackmode", "STREAM"),
                    ("assetpresentation", "FULL"),
                ],
            )
            .await?;

        let manifest = decode_manifest(&playback)?;
        let Some(url) = manifest.url else {
            return Err(ClientError::non_streamable(
                manifest
                    .restriction
                    .as_deref()
                    .map_or_else(|| "No stream URL was returned.".to_string(), restriction_sentence),
            ));
        };
        if manifest.encrypted {
            return Err(ClientError::non_streamable(
                "Encrypted Tidal streams are not supported.",
            ));
        }

        let extension = if manifest.mime_type.to_lowercase().contains("flac") {
            "flac"
        } else {
            "m4a"
        };
        debug!(audio_quality, extension, "stream negotiated");
        Ok(Box::new(BasicDownloadable::new(
            self.api.http().clone(),
            url,
            extension,
        )))
    }
}

/// Builds a `playbackinfopostpaywall` body around a JSON manifest.
#[cfg(test)]
pub(crate) fn playback_with_manifest(manifest: &Value) -> Value {
    serde_json::json!({ "manifest": BASE64.encode(manifest.to_string()) })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_flac_manifest() {
        let playback = playback_with_manifest(&json!({
            "mimeType": "audio/flac",
            "codecs": "flac",
            "encryptionType": "NONE",
            "urls": ["https://sp-pr-fa.audio.tidal.com/a.flac"],
        }));
        let manifest = decode_manifest(&playback).unwrap();
        assert_eq!(manifest.url.as_deref(), Some("https://sp-pr-fa.audio.tidal.com/a.flac"));
        assert!(manifest.mime_type.contains("flac"));
        assert!(!manifest.encrypted);
    }

    #[test]
    fn test_decode_manifest_restriction() {
        let playback = playback_with_manifest(&json!({
            "mimeType": "audio/mp4",
            "urls": [],
            "restrictions": [{"code": "TrackNotAvailableInRegion"}],
        }));
        let manifest = decode_manifest(&playback).unwrap();
        assert!(manifest.url.is_none());
        assert_eq!(manifest.restriction.as_deref(), Some("TrackNotAvailableInRegion"));
    }

    #[test]
    fn test_missing_manifest_uses_user_message() {
        let err = decode_manifest(&json!({"userMessage": "Asset is not ready for playback"}))
            .unwrap_err();
        assert!(matches!(err, ClientError::NonStreamable { ref message } if message == "Asset is not ready for playback"));
    }

    #[test]
    fn test_unwrap_items() {
        let page = json!({"items": [{"item": {"id": 1}, "type": "track"}, {"id": 2}]});
        let items = unwrap_items(&page);
        assert_eq!(items, vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[tokio::test]
    async fn test_login_requires_access_token() {
        let client = TidalClient::new(TidalConfig::default(), Arc::new(RateLimiter::disabled()));
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, ClientError::MissingCredentials { .. }));
    }

    #[tokio::test]
    async fn test_expiring_token_without_client_credentials() {
        let config = TidalConfig {
            access_token: "token".into(),
            refresh_token: "refresh".into(),
            token_expiry: 0,
            ..TidalConfig::default()
        };
        let client = TidalClient::new(config, Arc::new(RateLimiter::disabled()));
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, ClientError::MissingCredentials { ref detail, .. } if detail.contains("client_id")));
    }

    #[tokio::test]
    async fn test_far_past_expiry_counts_as_expiring() {
        let config = TidalConfig {
            access_token: "token".into(),
            token_expiry: i64::MIN,
            ..TidalConfig::default()
        };
        let client = TidalClient::new(config, Arc::new(RateLimiter::disabled()));
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, ClientError::MissingCredentials { ref detail, .. } if detail.contains("refresh_token")));
    }
}
