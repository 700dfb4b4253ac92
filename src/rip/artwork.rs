//! Album cover cache shared by every rip in a run.
//!
//! Tracks of one album run concurrently; the first to ask downloads the
//! cover and the rest await the same cell. Covers that are only embedded
//! live in a scratch folder removed when the cache is dropped, so a cache
//! is built per run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tempfile::TempDir;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::ArtworkConfig;
use crate::download::{BasicDownloadable, HttpClient, download_to};
use crate::media::{AlbumMeta, Provider};

const COVER_FILE_NAME: &str = "cover.jpg";

type CoverCell = Arc<OnceCell<Option<PathBuf>>>;

#[derive(Debug)]
pub struct ArtworkCache {
    http: HttpClient,
    config: ArtworkConfig,
    covers: DashMap<(Provider, String), CoverCell>,
    scratch: OnceCell<TempDir>,
}

impl ArtworkCache {
    #[must_use]
    pub fn new(http: HttpClient, config: ArtworkConfig) -> Self {
        Self {
            http,
            config,
            covers: DashMap::new(),
            scratch: OnceCell::new(),
        }
    }

    /// Cover for `album`, downloaded at most once per run.
    ///
    /// Saved as `cover.jpg` in `folder` when covers are kept, otherwise in
    /// the cache's scratch folder for the tagger only. Returns `None` when
    /// artwork is off, the album has no cover, or the download failed
    /// (which only warns).
    pub async fn cover(&self, provider: Provider, album: &AlbumMeta, folder: &Path) -> Option<PathBuf> {
        if !self.config.embed && !self.config.save {
            return None;
        }
        let url = album.cover_url.as_deref()?;

        let cell = Arc::clone(
            self.covers
                .entry((provider, album.id.clone()))
                .or_default()
                .value(),
        );
        cell.get_or_init(|| self.fetch(provider, url, album, folder))
            .await
            .clone()
    }

    async fn fetch(
        &self,
        provider: Provider,
        url: &str,
        album: &AlbumMeta,
        folder: &Path,
    ) -> Option<PathBuf> {
        let dest = if self.config.save {
            folder.join(COVER_FILE_NAME)
        } else {
            let scratch = self
                .scratch
                .get_or_try_init(|| async {
                    tempfile::Builder::new().prefix("ripper-covers-").tempdir()
                })
                .await;
            match scratch {
                Ok(dir) => dir.path().join(format!("{provider}-{}.jpg", album.id)),
                Err(e) => {
                    warn!(error = %e, "cannot create cover scratch folder");
                    return None;
                }
            }
        };
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(path = %dest.display(), "cover already present");
            return Some(dest);
        }

        let downloadable = BasicDownloadable::new(self.http.clone(), url, "jpg");
        match download_to(&downloadable, &dest).await {
            Ok(bytes) => {
                debug!(album_id = %album.id, bytes, "cover saved");
                Some(dest)
            }
            Err(e) => {
                warn!(album_id = %album.id, error = %e, "artwork download failed");
                None
            }
        }
    }
}
