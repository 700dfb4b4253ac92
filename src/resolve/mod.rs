//! Resolution pipeline: pending references → resolved media trees.
//!
//! # Overview
//!
//! [`Resolver::resolve`] turns a [`Reference`] into a [`Resolution`]:
//!
//! 1. Ledger check. A succeeded id (or, unless bypassed, a previously failed
//!    item) is skipped without touching the network.
//! 2. One `get_metadata` call, holding a worker-pool permit only for the call.
//! 3. Mapping into the internal variant. Composites resolve their children
//!    concurrently with `join_all`; a broken child becomes a `Failed` node
//!    and its siblings carry on.
//!
//! Album tracks inherit the album header. Playlist tracks take their album
//! context from their own response. Artist and label children are albums
//! resolved through the album path.

mod error;

pub use error::ResolveError;

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::client::ClientCapability;
use crate::ledger::Ledger;
use crate::media::{
    Album, AlbumMeta, Artist, ArtistMeta, Label, LabelMeta, MediaType, Playlist, PlaylistMeta,
    Reference, Resolution, ResolvedMedia, SkipReason, Track, TrackMeta, child_ids,
};
use crate::orchestrator::WorkerPool;

/// Resolves references for one provider.
#[derive(Clone)]
pub struct Resolver {
    client: Arc<dyn ClientCapability>,
    ledger: Arc<Ledger>,
    pool: WorkerPool,
    bypass_ledger: bool,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("provider", &self.client.provider())
            .field("pool", &self.pool)
            .field("bypass_ledger", &self.bypass_ledger)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    #[must_use]
    pub fn new(client: Arc<dyn ClientCapability>, ledger: Arc<Ledger>, pool: WorkerPool) -> Self {
        Self {
            client,
            ledger,
            pool,
            bypass_ledger: false,
        }
    }

    /// Ignore previously failed records when checking the ledger.
    #[must_use]
    pub fn with_bypass_ledger(mut self, bypass: bool) -> Self {
        self.bypass_ledger = bypass;
        self
    }

    /// Resolves `reference` into a tree. Never fails as a whole: failures
    /// are reported in the returned [`Resolution`].
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn resolve(&self, reference: &Reference) -> Resolution {
        match reference.media_type {
            MediaType::Track => self.resolve_track(reference, None).await,
            MediaType::Album => self.resolve_album(reference).await,
            MediaType::Playlist => self.resolve_playlist(reference).await,
            MediaType::Artist | MediaType::Label => self.resolve_collection(reference).await,
        }
    }

    async fn resolve_track(
        &self,
        reference: &Reference,
        album: Option<Arc<AlbumMeta>>,
    ) -> Resolution {
        if let Some(reason) = self.skip_reason(reference).await {
            return skipped(reference, reason);
        }
        let resp = match self.fetch(reference).await {
            Ok(resp) => resp,
            Err(error) => return failed(reference, error),
        };
        match TrackMeta::from_response(reference.provider, &resp, album) {
            Ok(meta) => Resolution::Resolved(ResolvedMedia::Track(Track {
                provider: reference.provider,
                meta,
            })),
            Err(source) => failed(reference, ResolveError::metadata(reference, source)),
        }
    }

    async fn resolve_album(&self, reference: &Reference) -> Resolution {
        if let Some(reason) = self.skip_reason(reference).await {
            return skipped(reference, reason);
        }
        let resp = match self.fetch(reference).await {
            Ok(resp) => resp,
            Err(error) => return failed(reference, error),
        };
        let header = AlbumMeta::from_response(reference.provider, &resp)
            .and_then(|meta| Ok((meta, child_ids(reference.provider, MediaType::Album, &resp)?)));
        let (meta, ids) = match header {
            Ok((meta, ids)) => (Arc::new(meta), ids),
            Err(source) => return failed(reference, ResolveError::metadata(reference, source)),
        };

        debug!(album = %meta.title, tracks = ids.len(), "resolving album tracks");
        let tracks = join_all(ids.iter().map(|id| {
            let album = Arc::clone(&meta);
            async move { self.resolve_track(&reference.track(id), Some(album)).await }
        }))
        .await;

        Resolution::Resolved(ResolvedMedia::Album(Album { meta, tracks }))
    }

    async fn resolve_playlist(&self, reference: &Reference) -> Resolution {
        if let Some(reason) = self.skip_reason(reference).await {
            return skipped(reference, reason);
        }
        let resp = match self.fetch(reference).await {
            Ok(resp) => resp,
            Err(error) => return failed(reference, error),
        };
        let header = PlaylistMeta::from_response(reference.provider, &resp).and_then(|meta| {
            Ok((meta, child_ids(reference.provider, MediaType::Playlist, &resp)?))
        });
        let (meta, ids) = match header {
            Ok(header) => header,
            Err(source) => return failed(reference, ResolveError::metadata(reference, source)),
        };

        debug!(playlist = %meta.name, tracks = ids.len(), "resolving playlist tracks");
        let tracks = join_all(ids.iter().map(|id| async move {
            self.resolve_track(&reference.track(id), None).await
        }))
        .await;

        Resolution::Resolved(ResolvedMedia::Playlist(Playlist { meta, tracks }))
    }

    /// Artists and labels: a named list of albums.
    async fn resolve_collection(&self, reference: &Reference) -> Resolution {
        if let Some(reason) = self.skip_reason(reference).await {
            return skipped(reference, reason);
        }
        let resp = match self.fetch(reference).await {
            Ok(resp) => resp,
            Err(error) => return failed(reference, error),
        };
        let header = match reference.media_type {
            MediaType::Label => {
                LabelMeta::from_response(reference.provider, &resp).map(Collection::Label)
            }
            _ => ArtistMeta::from_response(reference.provider, &resp).map(Collection::Artist),
        }
        .and_then(|header| {
            Ok((
                header,
                child_ids(reference.provider, reference.media_type, &resp)?,
            ))
        });
        let (header, ids) = match header {
            Ok(header) => header,
            Err(source) => return failed(reference, ResolveError::metadata(reference, source)),
        };

        debug!(albums = ids.len(), "resolving discography");
        let albums = join_all(
            ids.iter()
                .map(|id| async move { self.resolve_album(&reference.album(id)).await }),
        )
        .await;

        Resolution::Resolved(match header {
            Collection::Artist(meta) => ResolvedMedia::Artist(Artist { meta, albums }),
            Collection::Label(meta) => ResolvedMedia::Label(Label { meta, albums }),
        })
    }

    /// Ledger lookups. A read error is logged and treated as "not present".
    ///
    /// Only tracks are ever recorded as succeeded, so composites only
    /// consult the failed table.
    async fn skip_reason(&self, reference: &Reference) -> Option<SkipReason> {
        if reference.media_type == MediaType::Track {
            match self.ledger.contains(&reference.id).await {
                Ok(true) => {
                    debug!(id = %reference.id, "already downloaded, skipping");
                    return Some(SkipReason::AlreadyDownloaded);
                }
                Ok(false) => {}
                Err(e) => warn!(id = %reference.id, error = %e, "ledger lookup failed"),
            }
        }

        if self.bypass_ledger {
            return None;
        }
        match self
            .ledger
            .contains_failed(reference.provider, reference.media_type, &reference.id)
            .await
        {
            Ok(true) => {
                debug!(id = %reference.id, "previously failed, skipping");
                Some(SkipReason::PreviouslyFailed)
            }
            Ok(false) => None,
            Err(e) => {
                warn!(id = %reference.id, error = %e, "failed-ledger lookup failed");
                None
            }
        }
    }

    /// One metadata call under a pool permit.
    async fn fetch(&self, reference: &Reference) -> Result<Value, ResolveError> {
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| ResolveError::PoolClosed {
                reference: reference.clone(),
            })?;
        Ok(self
            .client
            .get_metadata(&reference.id, reference.media_type)
            .await?)
    }
}

enum Collection {
    Artist(ArtistMeta),
    Label(LabelMeta),
}

fn skipped(reference: &Reference, reason: SkipReason) -> Resolution {
    Resolution::Skipped {
        reference: reference.clone(),
        reason,
    }
}

fn failed(reference: &Reference, error: ResolveError) -> Resolution {
    warn!(reference = %reference, error = %error, "resolution failed");
    Resolution::Failed {
        reference: reference.clone(),
        error,
    }
}
