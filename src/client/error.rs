//! Error types for provider clients.

use thiserror::Error;

use crate::media::{MediaType, Provider};

/// Errors raised by a [`ClientCapability`](super::ClientCapability).
#[derive(Debug, Error)]
pub enum ClientError {
    /// No credentials are configured for the provider.
    #[error("missing {provider} credentials: {detail}\n  Suggestion: Add them to the [{provider}] section of the config file")]
    MissingCredentials { provider: Provider, detail: String },

    /// The provider rejected the configured credentials.
    #[error("{provider} authentication failed: {message}")]
    Authentication { provider: Provider, message: String },

    /// The account cannot stream (free tier).
    #[error("{provider} account is not eligible for streaming; a paid subscription is required")]
    Ineligible { provider: Provider },

    /// The configured app id was rejected.
    #[error("invalid {provider} app id")]
    InvalidAppId { provider: Provider },

    /// None of the configured app secrets were accepted.
    #[error("no valid {provider} app secret among the configured ones")]
    InvalidAppSecret { provider: Provider },

    /// Subscription or geo restrictions prevent streaming the item.
    #[error("not streamable: {message}")]
    NonStreamable { message: String },

    /// The provider cannot perform `operation` on this media type.
    #[error("{provider} does not support {operation} for {media_type}")]
    UnsupportedMediaType {
        provider: Provider,
        media_type: MediaType,
        operation: &'static str,
    },

    /// The provider cannot resolve this URL.
    #[error("{provider} cannot resolve URL {url}")]
    UnsupportedUrl { provider: Provider, url: String },

    /// The item does not exist.
    #[error("{provider} {media_type} {id} not found")]
    NotFound {
        provider: Provider,
        media_type: MediaType,
        id: String,
    },

    /// The API answered with an error status.
    #[error("{provider} API error (HTTP {status}): {message}")]
    Api {
        provider: Provider,
        status: u16,
        message: String,
    },

    /// The request never got an answer.
    #[error("network error requesting {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The answer could not be understood.
    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

impl ClientError {
    pub fn missing_credentials(provider: Provider, detail: impl Into<String>) -> Self {
        Self::MissingCredentials {
            provider,
            detail: detail.into(),
        }
    }

    pub fn authentication(provider: Provider, message: impl Into<String>) -> Self {
        Self::Authentication {
            provider,
            message: message.into(),
        }
    }

    pub fn non_streamable(message: impl Into<String>) -> Self {
        Self::NonStreamable {
            message: message.into(),
        }
    }

    pub fn unsupported(provider: Provider, media_type: MediaType, operation: &'static str) -> Self {
        Self::UnsupportedMediaType {
            provider,
            media_type,
            operation,
        }
    }

    pub fn api(provider: Provider, status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            provider,
            status,
            message: message.into(),
        }
    }

    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn invalid_response(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Credential and session failures stop all work for the provider.
    #[must_use]
    pub fn is_fatal_for_provider(&self) -> bool {
        matches!(
            self,
            Self::MissingCredentials { .. }
                | Self::Authentication { .. }
                | Self::Ineligible { .. }
                | Self::InvalidAppId { .. }
                | Self::InvalidAppSecret { .. }
        )
    }

    /// Worth retrying: connection trouble, throttling and server errors.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { source, .. } => !source.is_builder() && !source.is_decode(),
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
