//! Deezer client.
//!
//! Metadata and search go through the public API. Login and stream
//! negotiation go through the private gateway, authenticated with the `arl`
//! cookie, and the media service hands out stream URLs for track tokens.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use reqwest::cookie::Jar;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use super::quality::negotiate_available;
use super::search::SearchTable;
use super::transport::ApiTransport;
use super::{ClientCapability, ClientError};
use crate::config::DeezerConfig;
use crate::download::{DeezerDownloadable, Downloadable, HttpClient, RateLimiter, encrypted_file_url};
use crate::media::{MediaType, Provider};

pub const DEEZER_API_URL: &str = "https://api.deezer.com";
pub const DEEZER_GATEWAY_URL: &str = "https://www.deezer.com/ajax/gw-light.php";
pub const DEEZER_MEDIA_URL: &str = "https://media.deezer.com/v1/get_url";

/// Tier → (legacy format code, media format name).
const QUALITY_MAP: [(u8, &str); 3] = [(9, "MP3_128"), (3, "MP3_320"), (1, "FLAC")];

/// Public API error code for "no data".
const NO_DATA_CODE: u64 = 800;
/// Media API error code for geo restrictions.
const GEO_RESTRICTED_CODE: u64 = 2002;

const WRONG_LICENSE_MESSAGE: &str = "The requested quality is not available with your subscription. \
    Deezer HiFi is required for quality 2. Otherwise, the maximum quality allowed is 1.";
const GEO_RESTRICTED_MESSAGE: &str =
    "The requested track is not available. This may be due to your country/location.";

#[derive(Debug)]
struct DeezerSession {
    api_token: String,
    license_token: String,
    can_stream_lossless: bool,
    can_stream_hq: bool,
}

pub struct DeezerClient {
    config: DeezerConfig,
    api_url: String,
    gateway_url: String,
    media_url: String,
    api: ApiTransport,
    session: OnceCell<DeezerSession>,
    search_table: SearchTable,
}

impl DeezerClient {
    #[must_use]
    pub fn new(config: DeezerConfig, limiter: Arc<RateLimiter>) -> Self {
        Self::with_endpoints(config, limiter, DEEZER_API_URL, DEEZER_GATEWAY_URL, DEEZER_MEDIA_URL)
    }

    /// Creates a client with custom endpoints for tests.
    #[must_use]
    pub fn with_endpoints(
        config: DeezerConfig,
        limiter: Arc<RateLimiter>,
        api_url: impl Into<String>,
        gateway_url: impl Into<String>,
        media_url: impl Into<String>,
    ) -> Self {
        let gateway_url = gateway_url.into();

        // The gateway session lives in cookies, starting with arl
        let jar = Arc::new(Jar::default());
        if !config.arl.is_empty()
            && let Ok(url) = Url::parse(&gateway_url)
        {
            jar.add_cookie_str(&format!("arl={}", config.arl), &url);
        }

        Self {
            config,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            gateway_url,
            media_url: media_url.into(),
            api: ApiTransport::new(Provider::Deezer, HttpClient::with_cookie_jar(jar), limiter),
            session: OnceCell::new(),
            search_table: SearchTable::new(
                Provider::Deezer,
                &[
                    (MediaType::Track, "search/track"),
                    (MediaType::Album, "search/album"),
                    (MediaType::Playlist, "search/playlist"),
                    (MediaType::Artist, "search/artist"),
                ],
            ),
        }
    }

    fn session(&self) -> Result<&DeezerSession, ClientError> {
        self.session
            .get()
            .ok_or_else(|| ClientError::authentication(Provider::Deezer, "not logged in"))
    }

    async fn establish_session(&self) -> Result<DeezerSession, ClientError> {
        if self.config.arl.is_empty() {
            return Err(ClientError::missing_credentials(
                Provider::Deezer,
                "the arl cookie is required",
            ));
        }

        let data = self.gateway("deezer.getUserData", "null", &json!({})).await?;
        let user_id = data.pointer("/USER/USER_ID").and_then(text_of);
        if user_id.as_deref().is_none_or(|id| id == "0") {
            return Err(ClientError::authentication(
                Provider::Deezer,
                "the arl cookie was rejected",
            ));
        }

        let options = data.pointer("/USER/OPTIONS").unwrap_or(&Value::Null);
        let flag = |key: &str| options.get(key).and_then(Value::as_bool).unwrap_or(false);
        let session = DeezerSession {
            api_token: data
                .get("checkForm")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            license_token: options
                .get("license_token")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            can_stream_lossless: flag("web_lossless") || flag("mobile_lossless"),
            can_stream_hq: flag("web_hq") || flag("mobile_hq"),
        };
        info!(
            provider = "deezer",
            lossless = session.can_stream_lossless,
            hq = session.can_stream_hq,
            "logged in"
        );
        Ok(session)
    }

    /// Calls a private gateway method and returns its `results`.
    async fn gateway(&self, method: &str, api_token: &str, body: &Value) -> Result<Value, ClientError> {
        let request = self
            .api
            .client()
            .post(&self.gateway_url)
            .query(&[
                ("method", method),
                ("input", "3"),
                ("api_version", "1.0"),
                ("api_token", api_token),
            ])
            .json(body);
        let response = self.api.send_ok(request, &self.gateway_url).await?;

        if let Some(error) = response.get("error").filter(|e| !is_empty(e)) {
            return Err(ClientError::api(Provider::Deezer, 200, error.to_string()));
        }
        response
            .get("results")
            .cloned()
            .ok_or_else(|| ClientError::invalid_response(&self.gateway_url, "missing results"))
    }

    /// Calls the public API. Errors arrive in-band with a 200 status.
    async fn public(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ClientError> {
        let url = format!("{}/{path}", self.api_url);
        let body = self
            .api
            .send_ok(self.api.client().get(&url).query(query), &url)
            .await?;

        if let Some(error) = body.get("error").filter(|e| !is_empty(e)) {
            let code = error.get("code").and_then(Value::as_u64);
            let status = if code == Some(NO_DATA_CODE) { 404 } else { 400 };
            return Err(ClientError::api(Provider::Deezer, status, super::error_message(&body)));
        }
        Ok(body)
    }

    /// Header and listing, fetched concurrently; both must succeed.
    async fn with_listing(
        &self,
        path: &str,
        listing: &str,
        key: &str,
    ) -> Result<Value, ClientError> {
        let listing_path = format!("{path}/{listing}");
        let (mut header, list) = tokio::try_join!(
            self.public(path, &[]),
            self.public(&listing_path, &[("limit", "-1")]),
        )?;
        let items = list.get("data").cloned().unwrap_or_else(|| json!([]));
        if key == "tracks"
            && let Some(count) = items.as_array().map(Vec::len)
        {
            attach(&mut header, "track_total", json!(count));
        }
        attach(&mut header, key, items);
        Ok(header)
    }

    async fn media_url(
        &self,
        license_token: &str,
        track_token: &str,
        format: &str,
    ) -> Result<Option<String>, ClientError> {
        let body = json!({
            "license_token": license_token,
            "media": [{
                "type": "FULL",
                "formats": [{"cipher": "BF_CBC_STRIPE", "format": format}],
            }],
            "track_tokens": [track_token],
        });
        let response = self
            .api
            .send_ok(self.api.client().post(&self.media_url).json(&body), &self.media_url)
            .await?;

        let entry = response.pointer("/data/0").unwrap_or(&Value::Null);
        if entry
            .get("media")
            .and_then(Value::as_array)
            .is_some_and(Vec::is_empty)
        {
            return Err(ClientError::non_streamable(WRONG_LICENSE_MESSAGE));
        }
        if let Some(error) = entry.pointer("/errors/0") {
            return Err(
                if error.get("code").and_then(Value::as_u64) == Some(GEO_RESTRICTED_CODE) {
                    ClientError::non_streamable(GEO_RESTRICTED_MESSAGE)
                } else {
                    ClientError::non_streamable(super::error_message(error))
                },
            );
        }
        Ok(entry
            .pointer("/media/0/sources/0/url")
            .and_then(Value::as_str)
            .map(str::to_string))
    }
}

impl std::fmt::Debug for DeezerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeezerClient")
            .field("api_url", &self.api_url)
            .field("gateway_url", &self.gateway_url)
            .field("logged_in", &self.session.initialized())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ClientCapability for DeezerClient {
    fn provider(&self) -> Provider {
        Provider::Deezer
    }

    async fn login(&self) -> Result<(), ClientError> {
        self.session
            .get_or_try_init(|| self.establish_session())
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), fields(provider = "deezer"))]
    async fn get_metadata(&self, id: &str, media_type: MediaType) -> Result<Value, ClientError> {
        match media_type {
            MediaType::Track => {
                let mut track = self.public(&format!("track/{id}"), &[]).await?;
                let Some(album_id) = track.pointer("/album/id").and_then(text_of) else {
                    return Ok(track);
                };
                // The bare track is still usable when its album is not
                match self
                    .with_listing(&format!("album/{album_id}"), "tracks", "tracks")
                    .await
                {
                    Ok(album) => attach(&mut track, "album", album),
                    Err(e) => warn!(track_id = id, album_id = %album_id, error = %e, "album of track unavailable"),
                }
                Ok(track)
            }
            MediaType::Album => self.with_listing(&format!("album/{id}"), "tracks", "tracks").await,
            MediaType::Playlist => {
                self.with_listing(&format!("playlist/{id}"), "tracks", "tracks")
                    .await
            }
            MediaType::Artist => {
                self.with_listing(&format!("artist/{id}"), "albums", "albums")
                    .await
            }
            MediaType::Label => Err(ClientError::unsupported(
                Provider::Deezer,
                media_type,
                "metadata",
            )),
        }
    }

    #[instrument(skip(self), fields(provider = "deezer"))]
    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Value>, ClientError> {
        let endpoint = self.search_table.endpoint(media_type)?;
        let page = self
            .public(endpoint, &[("q", query), ("limit", limit.to_string().as_str())])
            .await?;
        Ok(vec![page])
    }

    #[instrument(skip(self), fields(provider = "deezer"))]
    async fn get_downloadable(
        &self,
        id: &str,
        quality: u8,
    ) -> Result<Box<dyn Downloadable>, ClientError> {
        let session = self.session()?;
        let info = self
            .gateway("song.getData", &session.api_token, &json!({"sng_id": id}))
            .await?;

        // Unavailable songs may point at an equivalent one
        let data = match info.get("FALLBACK") {
            Some(fallback) if info.get("TRACK_TOKEN").is_none() => fallback,
            _ => &info,
        };
        let track_id = data.get("SNG_ID").and_then(text_of).unwrap_or_else(|| id.to_string());

        let sizes: Vec<Option<u64>> = QUALITY_MAP
            .iter()
            .map(|(_, format)| data.get(format!("FILESIZE_{format}")).and_then(number_of))
            .collect();
        let available: Vec<u8> = if sizes.iter().all(Option::is_none) {
            vec![0, 1, 2]
        } else {
            (0u8..)
                .zip(&sizes)
                .filter(|(_, size)| size.is_some_and(|s| s > 0))
                .map(|(tier, _)| tier)
                .collect()
        };
        let tier = licensed_tier(session, quality.min(2), &available)?;
        let (_, format) = QUALITY_MAP[usize::from(tier)];
        debug!(requested = quality, tier, format, "negotiated format");

        let track_token = data
            .get("TRACK_TOKEN")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let url = match self
            .media_url(&session.license_token, track_token, format)
            .await?
        {
            Some(url) => url,
            None => {
                let hash = data.get("MD5_ORIGIN").and_then(text_of).unwrap_or_default();
                let version = data
                    .get("MEDIA_VERSION")
                    .and_then(text_of)
                    .unwrap_or_default();
                debug!(track_id = %track_id, "no media URL, deriving legacy URL");
                encrypted_file_url(&track_id, &hash, &version).ok_or_else(|| {
                    ClientError::non_streamable("No stream URL is available for this track.")
                })?
            }
        };

        let extension = if tier <= 1 { "mp3" } else { "flac" };
        Ok(Box::new(DeezerDownloadable::new(
            self.api.http().clone(),
            url,
            track_id,
            extension,
            sizes[usize::from(tier)],
        )))
    }
}

/// Best tier at or below `requested` among the offered ones the account may
/// stream. Steps down with a warning when the subscription is the limit.
fn licensed_tier(
    session: &DeezerSession,
    requested: u8,
    available: &[u8],
) -> Result<u8, ClientError> {
    let licensed: Vec<u8> = available
        .iter()
        .copied()
        .filter(|tier| match tier {
            2 => session.can_stream_lossless,
            1 => session.can_stream_hq || session.can_stream_lossless,
            _ => true,
        })
        .collect();
    let offered = negotiate_available(requested, available)?;
    if licensed.is_empty() {
        return Err(ClientError::non_streamable(WRONG_LICENSE_MESSAGE));
    }
    let tier = negotiate_available(requested, &licensed)?;
    if tier < offered {
        warn!(
            requested,
            offered, tier, "subscription does not cover the offered quality, stepping down"
        );
    }
    Ok(tier)
}

fn attach(parent: &mut Value, key: &str, value: Value) {
    if let Some(object) = parent.as_object_mut() {
        object.insert(key.to_string(), value);
    }
}

/// Deezer signals "no error" with `[]`, `{}` or an absent key.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number_of(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_is_empty_error_shapes() {
        assert!(is_empty(&json!([])));
        assert!(is_empty(&json!({})));
        assert!(!is_empty(&json!({"VALID_TOKEN_REQUIRED": "Invalid CSRF token"})));
    }

    #[test]
    fn test_number_and_text_of() {
        assert_eq!(number_of(&json!("1234")), Some(1234));
        assert_eq!(number_of(&json!(0)), Some(0));
        assert_eq!(text_of(&json!(3_135_556)), Some("3135556".to_string()));
        assert_eq!(text_of(&json!("")), None);
    }

    #[test]
    fn test_attach_ignores_non_objects() {
        let mut value = json!([1]);
        attach(&mut value, "tracks", json!([]));
        assert_eq!(value, json!([1]));
    }

    #[tokio::test]
    async fn test_login_requires_arl() {
        let client = DeezerClient::new(DeezerConfig::default(), Arc::new(RateLimiter::disabled()));
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, ClientError::MissingCredentials { .. }));
    }

    #[tokio::test]
    async fn test_label_metadata_unsupported() {
        let client = DeezerClient::new(DeezerConfig::default(), Arc::new(RateLimiter::disabled()));
        let err = client.get_metadata("1", MediaType::Label).await.unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedMediaType { .. }));
    }

    // ==================== Quality Tests ====================

    fn session(lossless: bool, hq: bool) -> DeezerSession {
        DeezerSession {
            api_token: "token".to_string(),
            license_token: "license".to_string(),
            can_stream_lossless: lossless,
            can_stream_hq: hq,
        }
    }

    #[test]
    fn test_hq_account_steps_down_from_lossless() {
        let tier = licensed_tier(&session(false, true), 2, &[0, 1, 2]).unwrap();
        assert_eq!(tier, 1);
        let (_, format) = QUALITY_MAP[usize::from(tier)];
        assert_eq!(format, "MP3_320");
    }

    #[test]
    fn test_free_account_gets_lowest_tier() {
        assert_eq!(licensed_tier(&session(false, false), 2, &[0, 1, 2]).unwrap(), 0);
    }

    #[test]
    fn test_hifi_account_keeps_requested_tier() {
        assert_eq!(licensed_tier(&session(true, false), 2, &[0, 1, 2]).unwrap(), 2);
        assert_eq!(licensed_tier(&session(true, false), 1, &[0, 1, 2]).unwrap(), 1);
    }

    #[test]
    fn test_nothing_streamable_is_an_error() {
        let err = licensed_tier(&session(false, false), 2, &[1, 2]).unwrap_err();
        assert!(err.to_string().contains("subscription"));
        assert!(licensed_tier(&session(true, true), 2, &[]).is_err());
    }
}
