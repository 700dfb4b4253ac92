//! Media model: providers, references and the resolved media tree.
//!
//! A [`Reference`] names one item on one provider. Resolution turns it into
//! a [`ResolvedMedia`] tree whose leaves are [`Track`]s; composites own their
//! children as [`Resolution`]s so a broken child never takes its siblings down.

mod metadata;
mod tree;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use metadata::{
    AlbumMeta, ArtistMeta, LabelMeta, MetadataError, PlaylistMeta, TrackMeta, child_ids,
};
pub use tree::{
    Album, Artist, Label, Playlist, Resolution, ResolvedMedia, SkipReason, Track,
};

/// A content provider the crate knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Qobuz,
    Tidal,
    Deezer,
    Soundcloud,
}

impl Provider {
    /// Every provider, in display order.
    pub const ALL: [Provider; 4] = [
        Provider::Qobuz,
        Provider::Tidal,
        Provider::Deezer,
        Provider::Soundcloud,
    ];

    /// Returns the lowercase name used in config files, URLs and the ledger.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Qobuz => "qobuz",
            Self::Tidal => "tidal",
            Self::Deezer => "deezer",
            Self::Soundcloud => "soundcloud",
        }
    }

    /// Lowest quality tier the provider serves.
    #[must_use]
    pub fn min_quality(self) -> u8 {
        match self {
            Self::Qobuz => 1,
            Self::Tidal | Self::Deezer | Self::Soundcloud => 0,
        }
    }

    /// Highest quality tier the provider serves.
    #[must_use]
    pub fn max_quality(self) -> u8 {
        match self {
            Self::Qobuz => 4,
            Self::Tidal => 3,
            Self::Deezer => 2,
            Self::Soundcloud => 0,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qobuz" => Ok(Self::Qobuz),
            "tidal" => Ok(Self::Tidal),
            "deezer" => Ok(Self::Deezer),
            "soundcloud" => Ok(Self::Soundcloud),
            _ => Err(UnknownVariant::new("provider", s, "qobuz, tidal, deezer, soundcloud")),
        }
    }
}

/// The closed set of media kinds a reference can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Track,
    Album,
    Playlist,
    Artist,
    Label,
}

impl MediaType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Album => "album",
            Self::Playlist => "playlist",
            Self::Artist => "artist",
            Self::Label => "label",
        }
    }

    /// Composites own children and are never downloaded themselves.
    #[must_use]
    pub fn is_composite(self) -> bool {
        !matches!(self, Self::Track)
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "track" => Ok(Self::Track),
            "album" => Ok(Self::Album),
            "playlist" => Ok(Self::Playlist),
            "artist" => Ok(Self::Artist),
            "label" => Ok(Self::Label),
            _ => Err(UnknownVariant::new(
                "media type",
                s,
                "track, album, playlist, artist, label",
            )),
        }
    }
}

/// Error returned when parsing a [`Provider`] or [`MediaType`] from text.
#[derive(Debug, Clone, Error)]
#[error("unknown {kind} '{value}'\n  Suggestion: Use one of: {expected}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
    expected: &'static str,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str, expected: &'static str) -> Self {
        Self {
            kind,
            value: value.to_string(),
            expected,
        }
    }
}

/// An unresolved pointer to one item on one provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub provider: Provider,
    pub media_type: MediaType,
    pub id: String,
}

impl Reference {
    #[must_use]
    pub fn new(provider: Provider, media_type: MediaType, id: impl Into<String>) -> Self {
        Self {
            provider,
            media_type,
            id: id.into(),
        }
    }

    /// Reference to a track on the same provider.
    #[must_use]
    pub fn track(&self, id: impl Into<String>) -> Self {
        Self::new(self.provider, MediaType::Track, id)
    }

    /// Reference to an album on the same provider.
    #[must_use]
    pub fn album(&self, id: impl Into<String>) -> Self {
        Self::new(self.provider, MediaType::Album, id)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.provider, self.media_type, self.id)
    }
}
