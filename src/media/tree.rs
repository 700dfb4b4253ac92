//! The resolved media tree.

use std::fmt;
use std::sync::Arc;

use super::metadata::{AlbumMeta, ArtistMeta, LabelMeta, PlaylistMeta, TrackMeta};
use super::{MediaType, Provider, Reference};
use crate::resolve::ResolveError;

/// A downloadable leaf.
#[derive(Debug, Clone)]
pub struct Track {
    pub provider: Provider,
    pub meta: TrackMeta,
}

impl Track {
    #[must_use]
    pub fn reference(&self) -> Reference {
        Reference::new(self.provider, MediaType::Track, self.meta.id.clone())
    }
}

#[derive(Debug)]
pub struct Album {
    pub meta: Arc<AlbumMeta>,
    pub tracks: Vec<Resolution>,
}

#[derive(Debug)]
pub struct Playlist {
    pub meta: PlaylistMeta,
    pub tracks: Vec<Resolution>,
}

#[derive(Debug)]
pub struct Artist {
    pub meta: ArtistMeta,
    pub albums: Vec<Resolution>,
}

#[derive(Debug)]
pub struct Label {
    pub meta: LabelMeta,
    pub albums: Vec<Resolution>,
}

/// A fully resolved reference. Composites own their children.
#[derive(Debug)]
pub enum ResolvedMedia {
    Track(Track),
    Album(Album),
    Playlist(Playlist),
    Artist(Artist),
    Label(Label),
}

impl ResolvedMedia {
    #[must_use]
    pub fn media_type(&self) -> MediaType {
        match self {
            Self::Track(_) => MediaType::Track,
            Self::Album(_) => MediaType::Album,
            Self::Playlist(_) => MediaType::Playlist,
            Self::Artist(_) => MediaType::Artist,
            Self::Label(_) => MediaType::Label,
        }
    }
}

/// Why an item was skipped without being downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyDownloaded,
    PreviouslyFailed,
    DuplicateInRun,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AlreadyDownloaded => "already downloaded",
            Self::PreviouslyFailed => "previously failed",
            Self::DuplicateInRun => "duplicate in run",
        })
    }
}

/// Outcome of resolving one reference or one child of a composite.
#[derive(Debug)]
pub enum Resolution {
    Resolved(ResolvedMedia),
    Skipped {
        reference: Reference,
        reason: SkipReason,
    },
    Failed {
        reference: Reference,
        error: ResolveError,
    },
}

impl Resolution {
    /// Flattens the tree into its leaves, in tree order.
    ///
    /// Resolved tracks come out as `Resolved(Track)`; skipped and failed
    /// nodes come out as themselves, whatever their media type.
    #[must_use]
    pub fn into_leaves(self) -> Vec<Resolution> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves(self, out: &mut Vec<Resolution>) {
        let children = match self {
            Self::Resolved(ResolvedMedia::Album(album)) => album.tracks,
            Self::Resolved(ResolvedMedia::Playlist(playlist)) => playlist.tracks,
            Self::Resolved(ResolvedMedia::Artist(artist)) => artist.albums,
            Self::Resolved(ResolvedMedia::Label(label)) => label.albums,
            leaf => {
                out.push(leaf);
                return;
            }
        };
        for child in children {
            child.collect_leaves(out);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn album_meta() -> Arc<AlbumMeta> {
        Arc::new(AlbumMeta {
            id: "a".into(),
            title: "Album".into(),
            albumartist: "Artist".into(),
            year: Some("2020".into()),
            tracktotal: Some(2),
            cover_url: None,
            label: None,
            genres: Vec::new(),
        })
    }

    fn track(id: &str, album: &Arc<AlbumMeta>) -> Resolution {
        Resolution::Resolved(ResolvedMedia::Track(Track {
            provider: Provider::Deezer,
            meta: TrackMeta {
                id: id.into(),
                title: format!("Track {id}"),
                artist: "Artist".into(),
                tracknumber: 1,
                discnumber: 1,
                composer: None,
                explicit: false,
                bit_depth: None,
                sampling_rate: None,
                album: album.clone(),
            },
        }))
    }

    #[test]
    fn test_into_leaves_flattens_nested_composites() {
        let meta = album_meta();
        let first = Resolution::Resolved(ResolvedMedia::Album(Album {
            meta: meta.clone(),
            tracks: vec![track("1", &meta), track("2", &meta)],
        }));
        let second = Resolution::Skipped {
            reference: Reference::new(Provider::Deezer, MediaType::Album, "b"),
            reason: SkipReason::AlreadyDownloaded,
        };
        let artist = Resolution::Resolved(ResolvedMedia::Artist(Artist {
            meta: ArtistMeta {
                id: "x".into(),
                name: "Artist".into(),
            },
            albums: vec![first, second],
        }));

        let leaves = artist.into_leaves();
        assert_eq!(leaves.len(), 3);
        assert!(matches!(
            &leaves[0],
            Resolution::Resolved(ResolvedMedia::Track(t)) if t.meta.id == "1"
        ));
        assert!(matches!(&leaves[2], Resolution::Skipped { .. }));
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(SkipReason::DuplicateInRun.to_string(), "duplicate in run");
    }
}
