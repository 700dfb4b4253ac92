//! Why a URL could not be turned into a provider reference.

use thiserror::Error;

/// Longer input is rejected before it reaches the URL parser.
pub const MAX_URL_LENGTH: usize = 2000;

#[derive(Debug, Clone, Error)]
pub enum ParseError {
    /// Not a usable web URL at all.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("URL too long ({length} chars, max {max}): {url_preview}...")]
    UrlTooLong {
        url_preview: String,
        length: usize,
        max: usize,
    },

    /// A web URL that names no Qobuz, Tidal, Deezer or SoundCloud item.
    #[error("unsupported URL '{url}': {reason}")]
    UnsupportedUrl { url: String, reason: String },
}

impl ParseError {
    #[must_use]
    pub fn unsupported_scheme(url: &str, scheme: &str) -> Self {
        Self::invalid(url, format!("scheme '{scheme}' is not http or https"))
    }

    #[must_use]
    pub fn malformed(url: &str, parse_error: &str) -> Self {
        Self::invalid(url, parse_error)
    }

    #[must_use]
    pub fn no_host(url: &str) -> Self {
        Self::invalid(url, "URL has no host")
    }

    #[must_use]
    pub fn unsupported(url: &str, reason: &str) -> Self {
        Self::UnsupportedUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Keeps the first 50 characters for display.
    #[must_use]
    pub fn too_long(url: &str) -> Self {
        Self::UrlTooLong {
            url_preview: url.chars().take(50).collect(),
            length: url.len(),
            max: MAX_URL_LENGTH,
        }
    }

    fn invalid(url: &str, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}
