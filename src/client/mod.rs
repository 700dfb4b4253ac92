//! Provider clients: authentication, metadata, search and negotiation.
//!
//! # Architecture
//!
//! - [`ClientCapability`] - Async trait each provider implements
//! - [`QobuzClient`], [`TidalClient`], [`DeezerClient`], [`SoundcloudClient`]
//! - [`ClientError`] - Shared error taxonomy
//! - [`clamp_quality`] / [`negotiate_available`] - Quality tier rules
//! - [`SearchTable`] - Media type → search endpoint dispatch
//!
//! Clients hold an `Arc<RateLimiter>` and take a slot before every API call;
//! byte downloads run unlimited.

mod deezer;
mod error;
mod qobuz;
mod quality;
mod search;
mod soundcloud;
mod tidal;
mod transport;

pub use deezer::{DEEZER_API_URL, DEEZER_GATEWAY_URL, DEEZER_MEDIA_URL, DeezerClient};
pub use error::ClientError;
pub use qobuz::{QOBUZ_BASE_URL, QobuzClient};
pub use quality::{clamp_quality, negotiate_available};
pub use search::SearchTable;
pub use soundcloud::{SOUNDCLOUD_BASE_URL, SoundcloudClient};
pub use tidal::{TIDAL_AUTH_URL, TIDAL_BASE_URL, TidalClient};
pub use transport::{ApiTransport, error_message, restriction_sentence};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Config;
use crate::download::{Downloadable, RateLimiter};
use crate::media::{MediaType, Provider, Reference};

/// Capability every provider client implements.
///
/// # Object Safety
///
/// This trait uses `async_trait` so clients can be stored as
/// `Arc<dyn ClientCapability>`; Rust 2024 native async traits are not
/// object-safe.
#[async_trait]
pub trait ClientCapability: Send + Sync {
    fn provider(&self) -> Provider;

    /// Highest quality tier the client can deliver.
    fn max_quality(&self) -> u8 {
        self.provider().max_quality()
    }

    /// Establishes a session from the configured credentials.
    ///
    /// Idempotent: calls after a successful login return immediately.
    async fn login(&self) -> Result<(), ClientError>;

    /// Raw metadata for an item. Composite responses include their full
    /// child listing.
    async fn get_metadata(&self, id: &str, media_type: MediaType) -> Result<Value, ClientError>;

    /// Raw search result pages.
    async fn search(
        &self,
        media_type: MediaType,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Value>, ClientError>;

    /// Negotiates the encoding for `quality` and resolves a fresh URL.
    async fn get_downloadable(
        &self,
        id: &str,
        quality: u8,
    ) -> Result<Box<dyn Downloadable>, ClientError>;

    /// Turns a provider page URL into a reference.
    async fn resolve_url(&self, url: &str) -> Result<Reference, ClientError> {
        Err(ClientError::UnsupportedUrl {
            provider: self.provider(),
            url: url.to_string(),
        })
    }
}

/// Builds one client per provider against the production endpoints.
#[must_use]
pub fn build_clients(
    config: &Config,
    limiter: &Arc<RateLimiter>,
) -> HashMap<Provider, Arc<dyn ClientCapability>> {
    let mut clients: HashMap<Provider, Arc<dyn ClientCapability>> = HashMap::new();
    clients.insert(
        Provider::Qobuz,
        Arc::new(QobuzClient::new(config.qobuz.clone(), Arc::clone(limiter))),
    );
    clients.insert(
        Provider::Tidal,
        Arc::new(TidalClient::new(config.tidal.clone(), Arc::clone(limiter))),
    );
    clients.insert(
        Provider::Deezer,
        Arc::new(DeezerClient::new(config.deezer.clone(), Arc::clone(limiter))),
    );
    clients.insert(
        Provider::Soundcloud,
        Arc::new(SoundcloudClient::new(
            config.soundcloud.clone(),
            Arc::clone(limiter),
        )),
    );
    clients
}
