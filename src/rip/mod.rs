//! Rip state machine: preprocess → download → postprocess for one leaf.
//!
//! # Overview
//!
//! A [`Rip`] owns one resolved [`Track`] and walks it through
//! [`RipState`]. Shared per-provider collaborators (client, ledger, tagger,
//! artwork cache, retry policy) live in a [`RipContext`].
//!
//! - `preprocess` creates the album folder and fetches the cover once per
//!   album. Artwork failure only warns.
//! - `download` negotiates a fresh [`Downloadable`](crate::download::Downloadable)
//!   for the clamped quality and streams it through
//!   [`download_to`], retrying transient failures with backoff.
//! - `postprocess` hands the file to the [`TagConverter`] and records the id
//!   as succeeded.
//!
//! A permanent failure at any phase records the item in the failed ledger.

mod artwork;
mod error;
mod paths;
mod state;
mod tagger;

pub use artwork::ArtworkCache;
pub use error::RipError;
pub use paths::{album_folder, album_folder_name, sanitize_component, track_file_name};
pub use state::RipState;
pub use tagger::{PassthroughTagger, TagConverter, TagError};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::client::{ClientCapability, clamp_quality};
use crate::config::{Config, ConversionConfig};
use crate::download::{HttpClient, RetryDecision, RetryPolicy, download_to};
use crate::ledger::Ledger;
use crate::media::{MediaType, Track};

/// Collaborators shared by every rip of one provider.
#[derive(Clone)]
pub struct RipContext {
    client: Arc<dyn ClientCapability>,
    ledger: Arc<Ledger>,
    tagger: Arc<dyn TagConverter>,
    artwork: Arc<ArtworkCache>,
    retry: RetryPolicy,
    folder: PathBuf,
    source_subdirectories: bool,
    quality: u8,
    conversion: ConversionConfig,
}

impl std::fmt::Debug for RipContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RipContext")
            .field("provider", &self.client.provider())
            .field("folder", &self.folder)
            .field("quality", &self.quality)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl RipContext {
    /// Context for `client`'s provider with the pass-through tagger.
    #[must_use]
    pub fn new(client: Arc<dyn ClientCapability>, ledger: Arc<Ledger>, config: &Config) -> Self {
        let provider = client.provider();
        Self {
            quality: config.quality(provider),
            client,
            ledger,
            tagger: Arc::new(PassthroughTagger),
            artwork: Arc::new(ArtworkCache::new(HttpClient::new(), config.artwork.clone())),
            retry: RetryPolicy::with_max_attempts(config.downloads.max_retries),
            folder: config.downloads.folder.clone(),
            source_subdirectories: config.downloads.source_subdirectories,
            conversion: config.conversion.clone(),
        }
    }

    #[must_use]
    pub fn with_tagger(mut self, tagger: Arc<dyn TagConverter>) -> Self {
        self.tagger = tagger;
        self
    }

    /// Shares one cover cache across providers.
    #[must_use]
    pub fn with_artwork(mut self, artwork: Arc<ArtworkCache>) -> Self {
        self.artwork = artwork;
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }
}

/// One leaf download in flight.
#[derive(Debug)]
pub struct Rip {
    track: Track,
    state: RipState,
}

impl Rip {
    #[must_use]
    pub fn new(track: Track) -> Self {
        Self {
            track,
            state: RipState::Created,
        }
    }

    #[must_use]
    pub fn state(&self) -> RipState {
        self.state
    }

    #[must_use]
    pub fn track(&self) -> &Track {
        &self.track
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`RipError::InvalidTransition`] when the lifecycle forbids it;
    /// the state is left unchanged.
    pub fn transition(&mut self, next: RipState) -> Result<(), RipError> {
        if !self.state.can_transition_to(next) {
            return Err(RipError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        debug!(track_id = %self.track.meta.id, from = %self.state, to = %next, "rip transition");
        self.state = next;
        Ok(())
    }

    /// Runs every phase and returns the finished file.
    ///
    /// # Errors
    ///
    /// Returns the first phase error; the rip is then `Failed`. Permanent
    /// failures are written to the failed ledger before returning.
    #[instrument(skip(self, ctx), fields(provider = %self.track.provider, track_id = %self.track.meta.id))]
    pub async fn run(&mut self, ctx: &RipContext) -> Result<PathBuf, RipError> {
        match self.drive(ctx).await {
            Ok(path) => {
                info!(path = %path.display(), "track done");
                Ok(path)
            }
            Err(error) => {
                if !self.state.is_terminal() {
                    self.state = RipState::Failed;
                }
                if error.is_permanent() {
                    if let Err(e) = ctx
                        .ledger
                        .record_failure(
                            self.track.provider,
                            MediaType::Track,
                            &self.track.meta.id,
                            &error.to_string(),
                        )
                        .await
                    {
                        warn!(error = %e, "could not record failure");
                    }
                }
                warn!(error = %error, "track failed");
                Err(error)
            }
        }
    }

    async fn drive(&mut self, ctx: &RipContext) -> Result<PathBuf, RipError> {
        self.transition(RipState::Preprocessing)?;
        let (folder, cover) = self.preprocess(ctx).await?;

        self.transition(RipState::Downloading)?;
        let downloaded = self.download(ctx, &folder).await?;

        self.transition(RipState::Postprocessing)?;
        let finished = self.postprocess(ctx, &downloaded, cover.as_deref()).await?;

        self.transition(RipState::Done)?;
        Ok(finished)
    }

    async fn preprocess(&self, ctx: &RipContext) -> Result<(PathBuf, Option<PathBuf>), RipError> {
        let album = &self.track.meta.album;
        let folder = album_folder(
            &ctx.folder,
            self.track.provider,
            ctx.source_subdirectories,
            album,
        );
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| RipError::directory(&folder, e))?;
        let cover = ctx.artwork.cover(self.track.provider, album, &folder).await;
        Ok((folder, cover))
    }

    async fn download(&self, ctx: &RipContext, folder: &Path) -> Result<PathBuf, RipError> {
        let quality = clamp_quality(self.track.provider, ctx.quality);
        let mut attempt = 1;
        loop {
            let error = match self.attempt(ctx, folder, quality).await {
                Ok(path) => return Ok(path),
                Err(error) => error,
            };
            match ctx.retry.should_retry(error.failure_type(), attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    let delay = error.retry_after().unwrap_or(delay);
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "download failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(attempt, reason = %reason, "giving up");
                    return Err(error);
                }
            }
        }
    }

    /// One negotiation plus transfer. URLs expire, so every attempt asks
    /// the client for a fresh downloadable.
    async fn attempt(&self, ctx: &RipContext, folder: &Path, quality: u8) -> Result<PathBuf, RipError> {
        let downloadable = ctx
            .client
            .get_downloadable(&self.track.meta.id, quality)
            .await?;
        let dest = folder.join(track_file_name(&self.track.meta, downloadable.extension()));
        let bytes = download_to(downloadable.as_ref(), &dest).await?;
        debug!(bytes, dest = %dest.display(), "downloaded");
        Ok(dest)
    }

    async fn postprocess(
        &self,
        ctx: &RipContext,
        path: &Path,
        cover: Option<&Path>,
    ) -> Result<PathBuf, RipError> {
        let finished = ctx
            .tagger
            .apply(path, &self.track.meta, &ctx.conversion, cover)
            .await?;
        if let Err(e) = ctx.ledger.record_success(&self.track.meta.id).await {
            warn!(error = %e, locked = e.is_locked(), "could not record success");
        }
        Ok(finished)
    }
}
