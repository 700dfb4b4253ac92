//! Rip error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::state::RipState;
use super::tagger::TagError;
use crate::client::ClientError;
use crate::download::{DownloadError, FailureType, classify_error, parse_retry_after};

#[derive(Debug, Error)]
pub enum RipError {
    /// A state change the lifecycle does not allow.
    #[error("illegal rip transition {from} -> {to}")]
    InvalidTransition { from: RipState, to: RipState },

    /// Negotiating the downloadable failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Streaming the bytes failed.
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// The destination folder could not be created.
    #[error("cannot create {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The tag/convert collaborator rejected the file.
    #[error(transparent)]
    Postprocess(#[from] TagError),
}

impl RipError {
    pub fn directory(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Directory {
            path: path.into(),
            source,
        }
    }

    /// Retry classification, shared with the byte-level policy.
    #[must_use]
    pub fn failure_type(&self) -> FailureType {
        match self {
            Self::Client(e) if e.is_fatal_for_provider() => FailureType::NeedsAuth,
            Self::Client(ClientError::Api { status: 429, .. }) => FailureType::RateLimited,
            Self::Client(e) if e.is_transient() => FailureType::Transient,
            Self::Download(e) => classify_error(e),
            Self::Client(_)
            | Self::InvalidTransition { .. }
            | Self::Directory { .. }
            | Self::Postprocess(_) => FailureType::Permanent,
        }
    }

    /// Server-requested wait before the next attempt, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Download(DownloadError::HttpStatus {
                retry_after: Some(value),
                ..
            }) => parse_retry_after(value),
            _ => None,
        }
    }

    /// Returns true if the failure belongs to the item and should be
    /// remembered in the failed ledger.
    ///
    /// Credential problems, exhausted transient errors and local
    /// filesystem trouble are not properties of the item.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::Download(DownloadError::Io { .. })
            | Self::Directory { .. }
            | Self::InvalidTransition { .. } => false,
            Self::Postprocess(_) => true,
            _ => self.failure_type() == FailureType::Permanent,
        }
    }

    #[must_use]
    pub fn is_fatal_for_provider(&self) -> bool {
        matches!(self, Self::Client(e) if e.is_fatal_for_provider())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::media::Provider;

    #[test]
    fn test_classification() {
        let auth = RipError::from(ClientError::authentication(Provider::Qobuz, "expired"));
        assert_eq!(auth.failure_type(), FailureType::NeedsAuth);
        assert!(auth.is_fatal_for_provider());
        assert!(!auth.is_permanent());

        let gone = RipError::from(ClientError::non_streamable("region locked"));
        assert_eq!(gone.failure_type(), FailureType::Permanent);
        assert!(gone.is_permanent());

        let busy = RipError::from(ClientError::api(Provider::Tidal, 503, "busy"));
        assert_eq!(busy.failure_type(), FailureType::Transient);
        assert!(!busy.is_permanent());

        let limited = RipError::from(ClientError::api(Provider::Tidal, 429, "slow down"));
        assert_eq!(limited.failure_type(), FailureType::RateLimited);
    }

    #[test]
    fn test_download_errors_follow_byte_policy() {
        let missing = RipError::from(DownloadError::http_status("https://cdn/x", 404));
        assert!(missing.is_permanent());

        let timeout = RipError::from(DownloadError::timeout("https://cdn/x"));
        assert_eq!(timeout.failure_type(), FailureType::Transient);
        assert!(!timeout.is_permanent());

        let disk = RipError::from(DownloadError::io(
            "/music/x.flac",
            std::io::Error::other("disk full"),
        ));
        assert!(!disk.is_permanent());
    }

    #[test]
    fn test_retry_after_from_download_status() {
        let err = RipError::from(DownloadError::http_status_with_retry_after(
            "https://cdn/x",
            429,
            Some("7".to_string()),
        ));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(
            RipError::from(DownloadError::timeout("https://cdn/x")).retry_after(),
            None
        );
    }
}
