//! The `Downloadable` capability and the atomic write-to-disk helper.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};

use super::error::DownloadError;

/// Bytes for one item at one negotiated quality.
///
/// Implementations are created right before the download, so the URLs they
/// hold are fresh. Decryption, when a provider needs it, happens inside
/// [`Downloadable::fetch`].
#[async_trait]
pub trait Downloadable: Send + Sync + fmt::Debug {
    /// File extension of the negotiated encoding, without the dot.
    fn extension(&self) -> &str;

    /// Total size in bytes, when it can be known before the transfer.
    async fn size(&self) -> Result<Option<u64>, DownloadError>;

    /// Streams the (decrypted) bytes into `sink` and returns the byte count.
    async fn fetch(&self, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64, DownloadError>;
}

/// Downloads into `dest` without ever leaving a partial file there.
///
/// Bytes go to a hidden sibling (`.<name>.part`) which is renamed over
/// `dest` once fully flushed. On any error the temporary file is removed.
///
/// # Errors
///
/// Returns the fetch error, or [`DownloadError::Io`] if the temporary file
/// cannot be created, flushed or renamed.
#[instrument(skip(downloadable), fields(dest = %dest.display()))]
pub async fn download_to(
    downloadable: &dyn Downloadable,
    dest: &Path,
) -> Result<u64, DownloadError> {
    let temp = temp_path(dest);

    let result = write_then_rename(downloadable, &temp, dest).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&temp).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %temp.display(), error = %e, "failed to remove partial download");
        }
    }
    result
}

async fn write_then_rename(
    downloadable: &dyn Downloadable,
    temp: &Path,
    dest: &Path,
) -> Result<u64, DownloadError> {
    let file = File::create(temp)
        .await
        .map_err(|e| DownloadError::io(temp, e))?;
    let mut writer = BufWriter::new(file);

    let bytes = downloadable.fetch(&mut writer).await?;

    writer.flush().await.map_err(|e| DownloadError::io(temp, e))?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| DownloadError::io(temp, e))?;

    tokio::fs::rename(temp, dest)
        .await
        .map_err(|e| DownloadError::io(dest, e))?;

    debug!(bytes, "download complete");
    Ok(bytes)
}

/// `.<name>.part` next to `dest`.
fn temp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map_or_else(|| "download".into(), |n| n.to_string_lossy());
    dest.with_file_name(format!(".{name}.part"))
}
