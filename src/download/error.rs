//! Byte transfer failures.
//!
//! These errors cover byte retrieval only. Negotiating what to download is
//! the client's job and has its own error type.

use std::path::PathBuf;

use thiserror::Error;

/// Why the bytes of a track did not reach the staging file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The transport failed before or during the body transfer.
    #[error("could not fetch {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timeout while fetching {url}")]
    Timeout { url: String },

    /// The CDN answered with a non-success status.
    #[error("CDN returned {status} for {url}")]
    HttpStatus {
        url: String,
        status: u16,
        /// Raw `Retry-After` header, kept for rate-limited responses.
        retry_after: Option<String>,
    },

    /// Staging file could not be created, written or moved into place.
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The URL is malformed or cannot be joined against its playlist.
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// The server answered with an error document instead of audio.
    #[error("not streamable: {message}")]
    NonStreamable { message: String },

    /// The stream cipher could not be set up.
    #[error("cannot decrypt stream for track {track_id}: {message}")]
    Decrypt { track_id: String, message: String },
}

impl DownloadError {
    /// Wraps a transport error; reqwest timeouts become [`Self::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::timeout(url);
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    pub fn non_streamable(message: impl Into<String>) -> Self {
        Self::NonStreamable {
            message: message.into(),
        }
    }

    pub fn decrypt(track_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decrypt {
            track_id: track_id.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_message_names_cdn_url() {
        let error = DownloadError::http_status("https://cdn.example.com/a.flac", 404);
        assert_eq!(
            error.to_string(),
            "CDN returned 404 for https://cdn.example.com/a.flac"
        );
    }

    #[test]
    fn test_write_failure_names_staging_path() {
        let source = std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full");
        let msg = DownloadError::io("/music/.a.flac.part", source).to_string();
        assert_eq!(msg, "cannot write /music/.a.flac.part: disk full");
    }

    #[test]
    fn test_decrypt_message_names_track() {
        let error = DownloadError::decrypt("3135556", "bad key length");
        assert_eq!(
            error.to_string(),
            "cannot decrypt stream for track 3135556: bad key length"
        );
    }

    #[test]
    fn test_non_streamable_keeps_server_message() {
        let error = DownloadError::non_streamable("File not found.");
        assert_eq!(error.to_string(), "not streamable: File not found.");
    }

    #[test]
    fn test_retry_after_header_is_kept() {
        let error = DownloadError::http_status_with_retry_after(
            "https://cdn.example.com/a.flac",
            429,
            Some("30".to_string()),
        );
        assert!(matches!(
            error,
            DownloadError::HttpStatus {
                status: 429,
                retry_after: Some(ref value),
                ..
            } if value == "30"
        ));
    }
}
