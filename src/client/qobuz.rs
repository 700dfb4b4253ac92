//! Qobuz client.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::future::join_all;
use md5::{Digest, Md5};
use reqwest::RequestBuilder;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::search::SearchTable;
use super::transport::{ApiTransport, restriction_sentence};
use super::{ClientCapability, ClientError};
use crate::config::QobuzConfig;
use crate::download::{BasicDownloadable, Downloadable, HttpClient, RateLimiter};
use crate::media::{MediaType, Provider};

pub const QOBUZ_BASE_URL: &str = "https://www.qobuz.com/api.json/0.2";

/// A track every account can request, used to probe app secrets.
const SECRET_PROBE_TRACK: &str = "19512574";

/// Largest page Qobuz returns.
const PAGE_LIMIT: usize = 500;

#[derive(Debug)]
struct QobuzSession {
    user_auth_token: String,
    secret: String,
}

pub struct QobuzClient {
    config: QobuzConfig,
    base_url: String,
    api: ApiTransport,
    session: OnceCell<QobuzSession>,
    search_table: SearchTable,
}

impl QobuzClient {
    #[must_use]
    pub fn new(config: QobuzConfig, limiter: Arc<RateLimiter>) -> Self {
        Self::with_base_url(config, limiter, QOBUZ_BASE_URL)
    }

    /// Creates a client with a custom endpoint for tests.
    #[must_use]
    pub fn with_base_url(
        config: QobuzConfig,
        limiter: Arc<RateLimiter>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            config,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api: ApiTransport::new(Provider::Qobuz, HttpClient::new(), limiter),
            session: OnceCell::new(),
            search_table: SearchTable::new(
                Provider::Qobuz,
                &[
                    (MediaType::Track, "track/search"),
                    (MediaType::Album, "album/search"),
                    (MediaType::Playlist, "playlist/search"),
                    (MediaType::Artist, "artist/search"),
                ],
            ),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.base_url)
    }

    fn request(&self, url: &str, user_auth_token: Option<&str>) -> RequestBuilder {
        let mut request = self
            .api
            .client()
            .get(url)
            .header("X-App-Id", &self.config.app_id);
        if let Some(token) = user_auth_token {
            request = request.header("X-User-Auth-Token", token);
        }
        request
    }

    fn session(&self) -> Result<&QobuzSession, ClientError> {
        self.session.get().ok_or_else(|| {
            ClientError::authentication(Provider::Qobuz, "not logged in")
        })
    }

    async fn establish_session(&self) -> Result<QobuzSession, ClientError> {
        let c = &self.config;
        if c.email_or_userid.is_empty() || c.password_or_token.is_empty() {
            return Err(ClientError::missing_credentials(
                Provider::Qobuz,
                "email_or_userid and password_or_token are required",
            ));
        }
        if c.app_id.is_empty() || c.secrets.is_empty() {
            return Err(ClientError::missing_credentials(
                Provider::Qobuz,
                "app_id and at least one entry in secrets are required",
            ));
        }

        let params: [(&str, &str); 3] = if c.use_auth_token {
            [
                ("user_id", c.email_or_userid.as_str()),
                ("user_auth_token", c.password_or_token.as_str()),
                ("app_id", c.app_id.as_str()),
            ]
        } else {
            [
                ("email", c.email_or_userid.as_str()),
                ("password", c.password_or_token.as_str()),
                ("app_id", c.app_id.as_str()),
            ]
        };

        let url = self.url("user/login");
        let (status, body) = self
            .api
            .send(self.request(&url, None).query(&params), &url)
            .await?;
        match status {
            401 => {
                return Err(ClientError::authentication(
                    Provider::Qobuz,
                    "invalid email/user id or password/token",
                ));
            }
            400 => return Err(ClientError::InvalidAppId { provider: Provider::Qobuz }),
            200..=299 => {}
            _ => return Err(ClientError::api(Provider::Qobuz, status, super::error_message(&body))),
        }

        let eligible = body
            .pointer("/user/credential/parameters")
            .is_some_and(|p| p.as_object().is_some_and(|o| !o.is_empty()));
        if !eligible {
            return Err(ClientError::Ineligible { provider: Provider::Qobuz });
        }

        let user_auth_token = body
            .get("user_auth_token")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::invalid_response(&url, "missing user_auth_token"))?
            .to_string();

        let secret = self.valid_secret(&user_auth_token).await?;
        info!(provider = "qobuz", "logged in");
        Ok(QobuzSession {
            user_auth_token,
            secret,
        })
    }

    /// Probes every configured secret concurrently; the first accepted wins.
    async fn valid_secret(&self, user_auth_token: &str) -> Result<String, ClientError> {
        let probes = self.config.secrets.iter().map(|secret| async move {
            let (status, _) = self
                .file_url(SECRET_PROBE_TRACK, 4, secret, user_auth_token)
                .await?;
            Ok::<_, ClientError>((status != 400).then(|| secret.clone()))
        });

        let mut valid = None;
        for probe in join_all(probes).await {
            if let Some(secret) = probe? {
                valid.get_or_insert(secret);
            }
        }
        debug!(found = valid.is_some(), "app secrets probed");
        valid.ok_or(ClientError::InvalidAppSecret { provider: Provider::Qobuz })
    }

    async fn file_url(
        &self,
        track_id: &str,
        quality: u8,
        secret: &str,
        user_auth_token: &str,
    ) -> Result<(u16, Value), ClientError> {
        let format_id = format_id(quality);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
            .to_string();
        let signature = request_signature(track_id, format_id, &timestamp, secret);

        let url = self.url("track/getFileUrl");
        let request = self.request(&url, Some(user_auth_token)).query(&[
            ("request_ts", timestamp.as_str()),
            ("request_sig", signature.as_str()),
            ("track_id", track_id),
            ("format_id", format_id.to_string().as_str()),
            ("intent", "stream"),
        ]);
        self.api.send(request, &url).await
    }
}

impl std::fmt::Debug for QobuzClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QobuzClient")
            .field("base_url", &self.base_url)
            .field("logged_in", &self.session.initialized())
            .finish_non_exhaustive()
    }
}

/// Tier 1..=4 → Qobuz `format_id`.
fn format_id(quality: u8) -> u8 {
    match quality {
        0 | 1 => 5,
        2 => 6,
        3 => 7,
        _ => 27,
    }
}

fn request_signature(track_id: &str, format_id: u8, timestamp: &str, secret: &str) -> String {
    let raw = format!(
        "trackgetFileUrlformat_id{format_id}intentstreamtrack_id{track_id}{timestamp}{secret}"
    );
    hex::encode(Md5::digest(raw.as_bytes()))
}

#[async_trait]
impl ClientCapability for QobuzClient {
    fn provider(&self) -> Provider {
        Provider::Qobuz
    }

    async fn login(&self) -> Result<(), ClientError> {
        self.session
            .get_or_try_init(|| self.establish_session())
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), fields(provider = "qobuz"))]
    async fn get_metadata(&self, id: &str, media_type: MediaType) -> Result<Value, ClientError> {
        let session = self.session()?;
        let id_key = format!("{media_type}_id");
        let limit = PAGE_LIMIT.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("app_id", self.config.app_id.as_str()),
            (id_key.as_str(), id),
            ("limit", limit.as_str()),
            ("offset", "0"),
        ];
        match media_type {
            MediaType::Artist | MediaType::Label => params.push(("extra", "albums")),
            MediaType::Playlist => params.push(("extra", "tracks")),
            MediaType::Track | MediaType::Album => {}
        }

        let url = self.url(&format!("{media_type}/get"));
        self.api
            .send_ok(
                self.request(&url, Some(&session.user_auth_token)).query(&params),
                &url,
            )
            .await
    }

    #[instrument(skip(self), fields(provider = "qobuz"))]
    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Value>, ClientError> {
        let endpoint = self.search_table.endpoint(media_type)?;
        let token = self.session.get().map(|s| s.user_auth_token.as_str());
        let key = format!("{media_type}s");
        let url = self.url(endpoint);

        let mut pages = Vec::new();
        let mut offset = 0usize;
        loop {
            let page_size = limit.saturating_sub(offset).min(PAGE_LIMIT);
            if page_size == 0 {
                break;
            }
            let request = self.request(&url, token).query(&[
                ("query", query),
                ("limit", page_size.to_string().as_str()),
                ("offset", offset.to_string().as_str()),
            ]);
            let page = self.api.send_ok(request, &url).await?;

            let returned = page
                .pointer(&format!("/{key}/items"))
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            let total = page
                .pointer(&format!("/{key}/total"))
                .and_then(Value::as_u64)
                .and_then(|t| usize::try_from(t).ok())
                .unwrap_or(0);
            pages.push(page);

            offset += returned;
            if returned == 0 || offset >= total {
                break;
            }
        }
        Ok(pages)
    }

    #[instrument(skip(self), fields(provider = "qobuz"))]
    async fn get_downloadable(
        &self,
        id: &str,
        quality: u8,
    ) -> Result<Box<dyn Downloadable>, ClientError> {
        let session = self.session()?;
        let (status, body) = self
            .file_url(id, quality, &session.secret, &session.user_auth_token)
            .await?;
        if !(200..300).contains(&status) {
            return Err(ClientError::api(
                Provider::Qobuz,
                status,
                super::error_message(&body),
            ));
        }

        let Some(url) = body.get("url").and_then(Value::as_str) else {
            let code = body
                .pointer("/restrictions/0/code")
                .and_then(Value::as_str);
            return Err(match code {
                Some(code) => ClientError::non_streamable(restriction_sentence(code)),
                None => ClientError::non_streamable("No stream URL was returned."),
            });
        };

        let extension = if quality > 1 { "flac" } else { "mp3" };
        Ok(Box::new(BasicDownloadable::new(
            self.api.http().clone(),
            url,
            extension,
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_signature_vector() {
        assert_eq!(
            request_signature("12345", 27, "1700000000", "secret"),
            "3eb350f911f88c6970d99eebd510d6f4"
        );
    }

    #[test]
    fn test_format_ids() {
        assert_eq!(format_id(1), 5);
        assert_eq!(format_id(2), 6);
        assert_eq!(format_id(3), 7);
        assert_eq!(format_id(4), 27);
    }

    #[tokio::test]
    async fn test_login_requires_credentials() {
        let client = QobuzClient::new(QobuzConfig::default(), Arc::new(RateLimiter::disabled()));
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, ClientError::MissingCredentials { .. }));
    }

    #[tokio::test]
    async fn test_login_requires_app_secrets() {
        let config = QobuzConfig {
            email_or_userid: "me@example.com".into(),
            password_or_token: "5f4dcc3b5aa765d61d8327deb882cf99".into(),
            app_id: "123".into(),
            ..QobuzConfig::default()
        };
        let client = QobuzClient::new(config, Arc::new(RateLimiter::disabled()));
        let err = client.login().await.unwrap_err();
        assert!(matches!(err, ClientError::MissingCredentials { ref detail, .. } if detail.contains("secrets")));
    }

    #[tokio::test]
    async fn test_metadata_before_login_is_rejected() {
        let client = QobuzClient::new(QobuzConfig::default(), Arc::new(RateLimiter::disabled()));
        let err = client.get_metadata("1", MediaType::Album).await.unwrap_err();
        assert!(err.is_fatal_for_provider());
    }
}
