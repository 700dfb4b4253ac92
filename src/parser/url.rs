//! Provider URL recognition.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, trace};
use url::Url;

use super::error::{MAX_URL_LENGTH, ParseError};
use crate::media::{MediaType, Provider, Reference};

/// Finds URLs in free text: up to whitespace or common delimiters.
#[allow(clippy::expect_used)]
static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'\]]+"#).expect("URL regex is valid") // Static pattern, safe to panic
});

/// Hosts of the id-addressed providers: `www.qobuz.com`, `open.qobuz.com`,
/// `listen.tidal.com`, `deezer.com`, ...
#[allow(clippy::expect_used)]
static PROVIDER_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?:www|open|play|listen)\.)?(qobuz|tidal|deezer)\.com$")
        .expect("provider host regex is valid")
});

/// A recognized provider URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedUrl {
    /// The URL names its item directly.
    Reference(Reference),
    /// A SoundCloud page; only the provider can turn it into an id.
    SoundcloudPermalink(String),
}

/// Parses one provider URL.
///
/// Qobuz, Tidal and Deezer URLs carry the media type as a path segment and
/// the id as the last segment (`/us-en/album/some-name/0060254728697`,
/// `/browse/track/123`). SoundCloud URLs are returned as permalinks.
///
/// # Errors
///
/// Returns [`ParseError::InvalidUrl`] / [`ParseError::UrlTooLong`] for
/// malformed input and [`ParseError::UnsupportedUrl`] for URLs of unknown
/// hosts or without a recognizable media type.
#[tracing::instrument]
pub fn parse_reference_url(raw: &str) -> Result<ParsedUrl, ParseError> {
    let parsed = validate_url(clean_url_trailing(raw.trim()))?;
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();

    if host == "soundcloud.com" || host == "www.soundcloud.com" || host == "m.soundcloud.com" {
        if parsed.path().trim_matches('/').is_empty() {
            return Err(ParseError::unsupported(raw, "SoundCloud URL has no path"));
        }
        return Ok(ParsedUrl::SoundcloudPermalink(canonical_soundcloud(&parsed)));
    }

    let provider = PROVIDER_HOST
        .captures(&host)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<Provider>().ok())
        .ok_or_else(|| ParseError::unsupported(raw, "not a supported provider"))?;

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    let Some((id, rest)) = segments.split_last() else {
        return Err(ParseError::unsupported(raw, "URL has no item id"));
    };
    let media_type = rest
        .iter()
        .rev()
        .find_map(|seg| seg.parse::<MediaType>().ok())
        .ok_or_else(|| ParseError::unsupported(raw, "URL does not name a media type"))?;

    if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(ParseError::unsupported(raw, "URL id has unexpected characters"));
    }

    debug!(%provider, %media_type, id, "parsed provider URL");
    Ok(ParsedUrl::Reference(Reference::new(provider, media_type, *id)))
}

/// Extracts every provider URL from free text, one result per candidate.
#[tracing::instrument(skip(input), fields(input_len = input.len()))]
#[must_use]
pub fn extract_urls(input: &str) -> Vec<Result<ParsedUrl, ParseError>> {
    URL_PATTERN
        .find_iter(input)
        .map(|m| {
            trace!(url = m.as_str(), "found URL candidate");
            parse_reference_url(m.as_str())
        })
        .collect()
}

/// Drops query, fragment and the mobile host so equal pages compare equal.
fn canonical_soundcloud(url: &Url) -> String {
    format!(
        "https://soundcloud.com/{}",
        url.path().trim_matches('/')
    )
}

/// Cleans trailing punctuation that often gets captured with URLs.
fn clean_url_trailing(url: &str) -> &str {
    let mut result = url;

    while let Some(last) = result.chars().last() {
        match last {
            '.' | ',' | ';' | ':' | '!' | '?' => {
                result = &result[..result.len() - 1];
            }
            // Closing parens/brackets are kept only when balanced.
            ')' | ']' => {
                let open = if last == ')' { '(' } else { '[' };
                let open_count = result.chars().filter(|&c| c == open).count();
                let close_count = result.chars().filter(|&c| c == last).count();
                if close_count > open_count {
                    result = &result[..result.len() - 1];
                } else {
                    break;
                }
            }
            _ => break,
        }
    }

    result
}

/// Validation rules:
/// - Must not exceed `MAX_URL_LENGTH` (2000 chars)
/// - Must be parseable by the `url` crate
/// - Must use http or https scheme
/// - Must have a host
fn validate_url(raw: &str) -> Result<Url, ParseError> {
    if raw.len() > MAX_URL_LENGTH {
        return Err(ParseError::too_long(raw));
    }

    let parsed = Url::parse(raw).map_err(|e| ParseError::malformed(raw, &e.to_string()))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(ParseError::unsupported_scheme(raw, scheme)),
    }

    if parsed.host().is_none() {
        return Err(ParseError::no_host(raw));
    }

    Ok(parsed)
}
