//! Tagging and conversion hand-off.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ConversionConfig;
use crate::media::TrackMeta;

#[derive(Debug, Error)]
#[error("postprocessing {path} failed: {message}")]
pub struct TagError {
    pub path: PathBuf,
    pub message: String,
}

impl TagError {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Writes tags (and optionally converts) a freshly downloaded file.
///
/// Called once per leaf after the bytes are in their final location.
/// Returns the path of the finished file, which differs from `path` when a
/// conversion changed the extension.
#[async_trait]
pub trait TagConverter: Send + Sync {
    async fn apply(
        &self,
        path: &Path,
        track: &TrackMeta,
        conversion: &ConversionConfig,
        cover: Option<&Path>,
    ) -> Result<PathBuf, TagError>;
}

/// Leaves files exactly as downloaded.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughTagger;

#[async_trait]
impl TagConverter for PassthroughTagger {
    async fn apply(
        &self,
        path: &Path,
        track: &TrackMeta,
        conversion: &ConversionConfig,
        _cover: Option<&Path>,
    ) -> Result<PathBuf, TagError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(TagError::new(path, "file vanished before tagging"));
        }
        if conversion.enabled {
            info!(
                track_id = %track.id,
                codec = %conversion.codec,
                "conversion requested but no converter is installed; keeping original"
            );
        }
        debug!(path = %path.display(), "postprocess passthrough");
        Ok(path.to_path_buf())
    }
}
