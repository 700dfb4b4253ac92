//! TOML-backed configuration.
//!
//! Every section and key is optional; anything missing takes its default.
//! The file lives at `$XDG_CONFIG_HOME/ripper/config.toml` (or
//! `$HOME/.config/ripper/config.toml`) unless a path is given explicitly.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::download::DEFAULT_MAX_RETRIES;
use crate::media::Provider;

/// Upper bound for a bounded worker pool.
pub const MAX_CONNECTIONS_LIMIT: i64 = 100;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for `{field}`: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub downloads: DownloadsConfig,
    pub database: DatabaseConfig,
    pub qobuz: QobuzConfig,
    pub tidal: TidalConfig,
    pub deezer: DeezerConfig,
    pub soundcloud: SoundcloudConfig,
    pub conversion: ConversionConfig,
    pub artwork: ArtworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadsConfig {
    /// Root folder for downloaded albums.
    pub folder: PathBuf,
    /// Put each provider's downloads in its own subfolder.
    pub source_subdirectories: bool,
    /// Run items of one provider concurrently. Off means one at a time.
    pub concurrency: bool,
    /// Worker pool size per provider. Zero or negative means unlimited.
    pub max_connections: i64,
    /// Outbound API requests per provider per rolling minute. Zero disables.
    pub requests_per_minute: u32,
    /// Attempts for a download that fails transiently.
    pub max_retries: u32,
    /// Ignore previously failed records when deciding what to skip.
    pub bypass_ledger: bool,
}

impl Default for DownloadsConfig {
    fn default() -> Self {
        Self {
            folder: default_downloads_folder(),
            source_subdirectories: false,
            concurrency: true,
            max_connections: 6,
            requests_per_minute: 60,
            max_retries: DEFAULT_MAX_RETRIES,
            bypass_ledger: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub downloads_enabled: bool,
    pub downloads_path: PathBuf,
    pub failed_downloads_enabled: bool,
    pub failed_downloads_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let dir = default_data_dir();
        Self {
            downloads_enabled: true,
            downloads_path: dir.join("downloads.db"),
            failed_downloads_enabled: true,
            failed_downloads_path: dir.join("failed_downloads.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QobuzConfig {
    /// 1: 320kbps MP3, 2: 16/44.1, 3: 24/<=96, 4: 24/>=96
    pub quality: u8,
    pub email_or_userid: String,
    /// MD5 of the account password, or a user auth token.
    pub password_or_token: String,
    pub use_auth_token: bool,
    pub app_id: String,
    pub secrets: Vec<String>,
    pub max_connections: Option<i64>,
    pub requests_per_minute: Option<u32>,
}

impl Default for QobuzConfig {
    fn default() -> Self {
        Self {
            quality: 3,
            email_or_userid: String::new(),
            password_or_token: String::new(),
            use_auth_token: false,
            app_id: String::new(),
            secrets: Vec::new(),
            max_connections: None,
            requests_per_minute: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TidalConfig {
    /// 0: 256kbps AAC, 1: 320kbps AAC, 2: 16/44.1 FLAC, 3: 24/44.1 MQA
    pub quality: u8,
    pub user_id: String,
    pub country_code: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp at which the access token expires.
    pub token_expiry: i64,
    /// OAuth client used to refresh the access token.
    pub client_id: String,
    pub client_secret: String,
    pub max_connections: Option<i64>,
    pub requests_per_minute: Option<u32>,
}

impl Default for TidalConfig {
    fn default() -> Self {
        Self {
            quality: 3,
            user_id: String::new(),
            country_code: String::new(),
            access_token: String::new(),
            refresh_token: String::new(),
            token_expiry: 0,
            client_id: String::new(),
            client_secret: String::new(),
            max_connections: None,
            requests_per_minute: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeezerConfig {
    /// 0: 128kbps MP3, 1: 320kbps MP3, 2: FLAC
    pub quality: u8,
    /// The `arl` session cookie of a logged-in browser.
    pub arl: String,
    pub max_connections: Option<i64>,
    pub requests_per_minute: Option<u32>,
}

impl Default for DeezerConfig {
    fn default() -> Self {
        Self {
            quality: 2,
            arl: String::new(),
            max_connections: None,
            requests_per_minute: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SoundcloudConfig {
    /// Only 0 is available.
    pub quality: u8,
    pub client_id: String,
    pub app_version: String,
    pub max_connections: Option<i64>,
    pub requests_per_minute: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversionConfig {
    pub enabled: bool,
    /// FLAC, ALAC, OPUS, MP3, VORBIS or AAC.
    pub codec: String,
    pub sampling_rate: u32,
    pub bit_depth: u32,
    /// kbps, lossy codecs only.
    pub lossy_bitrate: u32,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            codec: "ALAC".to_string(),
            sampling_rate: 48_000,
            bit_depth: 24,
            lossy_bitrate: 320,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArtworkConfig {
    /// Hand the cover to the tag writer for embedding.
    pub embed: bool,
    /// Keep `cover.jpg` in the album folder.
    pub save: bool,
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            embed: true,
            save: true,
        }
    }
}

/// Concurrency and rate limits that apply to one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderLimits {
    pub concurrency: bool,
    pub max_connections: i64,
    pub requests_per_minute: u32,
}

const CODECS: [&str; 6] = ["FLAC", "ALAC", "OPUS", "MP3", "VORBIS", "AAC"];

impl Config {
    /// Loads and validates the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read,
    /// [`ConfigError::Parse`] for malformed TOML or unknown keys, and
    /// [`ConfigError::Invalid`] for out-of-range values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Loads the file at `path`, or the default location when `None`.
    ///
    /// A missing file at the default location yields defaults; a missing
    /// explicit path is an error.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match resolve_default_config_path() {
            Some(default_path) if default_path.exists() => Self::load(&default_path),
            _ => {
                debug!("no config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Parses TOML text without validating values.
    ///
    /// # Errors
    ///
    /// Returns the TOML error for malformed input or unknown keys.
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for provider in Provider::ALL {
            let quality = self.quality(provider);
            let range = provider.min_quality()..=provider.max_quality();
            if !range.contains(&quality) {
                return Err(ConfigError::invalid(
                    format!("{provider}.quality"),
                    format!(
                        "{quality}. Expected range: {}..={}",
                        range.start(),
                        range.end()
                    ),
                ));
            }

            let limits = self.limits(provider);
            if limits.max_connections > MAX_CONNECTIONS_LIMIT {
                return Err(ConfigError::invalid(
                    format!("{provider}.max_connections"),
                    format!(
                        "{}. Expected at most {MAX_CONNECTIONS_LIMIT} (or <= 0 for unlimited)",
                        limits.max_connections
                    ),
                ));
            }
        }

        if self.downloads.max_retries == 0 || self.downloads.max_retries > 10 {
            return Err(ConfigError::invalid(
                "downloads.max_retries",
                format!("{}. Expected range: 1..=10", self.downloads.max_retries),
            ));
        }

        if !CODECS
            .iter()
            .any(|codec| codec.eq_ignore_ascii_case(&self.conversion.codec))
        {
            return Err(ConfigError::invalid(
                "conversion.codec",
                format!(
                    "'{}'. Expected one of: {}",
                    self.conversion.codec,
                    CODECS.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Requested quality tier for `provider`.
    #[must_use]
    pub fn quality(&self, provider: Provider) -> u8 {
        match provider {
            Provider::Qobuz => self.qobuz.quality,
            Provider::Tidal => self.tidal.quality,
            Provider::Deezer => self.deezer.quality,
            Provider::Soundcloud => self.soundcloud.quality,
        }
    }

    /// Limits for `provider`: its own section's overrides, else `[downloads]`.
    #[must_use]
    pub fn limits(&self, provider: Provider) -> ProviderLimits {
        let (max_connections, requests_per_minute) = match provider {
            Provider::Qobuz => (self.qobuz.max_connections, self.qobuz.requests_per_minute),
            Provider::Tidal => (self.tidal.max_connections, self.tidal.requests_per_minute),
            Provider::Deezer => (self.deezer.max_connections, self.deezer.requests_per_minute),
            Provider::Soundcloud => (
                self.soundcloud.max_connections,
                self.soundcloud.requests_per_minute,
            ),
        };
        ProviderLimits {
            concurrency: self.downloads.concurrency,
            max_connections: max_connections.unwrap_or(self.downloads.max_connections),
            requests_per_minute: requests_per_minute
                .unwrap_or(self.downloads.requests_per_minute),
        }
    }
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/ripper/config.toml`
/// 2. `$HOME/.config/ripper/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("ripper").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("ripper")
            .join("config.toml"),
    )
}

fn default_data_dir() -> PathBuf {
    if let Some(xdg_data_home) = env_var_non_empty_os("XDG_DATA_HOME") {
        return PathBuf::from(xdg_data_home).join("ripper");
    }
    env_var_non_empty_os("HOME").map_or_else(
        || PathBuf::from(".ripper"),
        |home| PathBuf::from(home).join(".local").join("share").join("ripper"),
    )
}

fn default_downloads_folder() -> PathBuf {
    env_var_non_empty_os("HOME").map_or_else(
        || PathBuf::from("downloads"),
        |home| PathBuf::from(home).join("Music").join("ripper"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
