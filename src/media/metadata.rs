//! Mapping of provider-native JSON into the internal metadata types.
//!
//! Every provider spells the same facts differently (`track_number` vs
//! `trackNumber` vs `track_position`). The parsers here are the only place
//! that knows those spellings; everything downstream works on [`TrackMeta`]
//! and [`AlbumMeta`].

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::{MediaType, Provider};

/// Errors raised while mapping a provider response into internal metadata.
#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    /// A field required to identify or name the item is absent.
    #[error("{provider} {media_type} response is missing '{field}'")]
    Missing {
        provider: Provider,
        media_type: MediaType,
        field: &'static str,
    },

    /// The provider marks the track as not streamable.
    #[error("{provider} track {id} is not streamable")]
    NotStreamable { provider: Provider, id: String },
}

impl MetadataError {
    fn missing(provider: Provider, media_type: MediaType, field: &'static str) -> Self {
        Self::Missing {
            provider,
            media_type,
            field,
        }
    }
}

/// Album context shared by every track of an album.
#[derive(Debug, Clone, PartialEq)]
pub struct AlbumMeta {
    pub id: String,
    pub title: String,
    pub albumartist: String,
    pub year: Option<String>,
    pub tracktotal: Option<u32>,
    pub cover_url: Option<String>,
    pub label: Option<String>,
    pub genres: Vec<String>,
}

/// Per-track metadata. Every leaf carries its album context.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMeta {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub tracknumber: u32,
    pub discnumber: u32,
    pub composer: Option<String>,
    pub explicit: bool,
    pub bit_depth: Option<u32>,
    pub sampling_rate: Option<f64>,
    pub album: Arc<AlbumMeta>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistMeta {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtistMeta {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabelMeta {
    pub id: String,
    pub name: String,
}

impl AlbumMeta {
    /// Parses an album header response.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Missing`] when the id or title is absent.
    pub fn from_response(provider: Provider, resp: &Value) -> Result<Self, MetadataError> {
        let missing = |field| MetadataError::missing(provider, MediaType::Album, field);
        let id = id_of(resp).ok_or_else(|| missing("id"))?;
        let title = versioned_title(resp).ok_or_else(|| missing("title"))?;
        let albumartist = album_artist(provider, resp).ok_or_else(|| missing("artist"))?;
        Ok(Self::assemble(provider, resp, id, title, albumartist))
    }

    /// Album context embedded in a track response, with the track's own
    /// performer as the fallback album artist.
    fn embedded(
        provider: Provider,
        track: &Value,
        fallback_artist: &str,
    ) -> Result<Self, MetadataError> {
        let missing = |field| MetadataError::missing(provider, MediaType::Track, field);

        if provider == Provider::Soundcloud {
            // SoundCloud tracks stand alone; the track doubles as its album.
            let id = id_of(track).ok_or_else(|| missing("id"))?;
            let title = str_at(track, &["publisher_metadata", "album_title"])
                .or_else(|| str_at(track, &["title"]))
                .ok_or_else(|| missing("title"))?
                .to_string();
            return Ok(Self {
                id,
                title,
                albumartist: fallback_artist.to_string(),
                year: str_at(track, &["created_at"]).and_then(year_of),
                tracktotal: Some(1),
                cover_url: str_at(track, &["artwork_url"])
                    .map(|url| url.replace("large", "t500x500")),
                label: str_at(track, &["label_name"]).map(str::to_string),
                genres: str_at(track, &["genre"])
                    .filter(|g| !g.is_empty())
                    .map(|g| vec![g.to_string()])
                    .unwrap_or_default(),
            });
        }

        let album = track.get("album").ok_or_else(|| missing("album"))?;
        let id = id_of(album).ok_or_else(|| missing("album.id"))?;
        let title = versioned_title(album).ok_or_else(|| missing("album.title"))?;
        let albumartist =
            album_artist(provider, album).unwrap_or_else(|| fallback_artist.to_string());
        Ok(Self::assemble(provider, album, id, title, albumartist))
    }

    fn assemble(
        provider: Provider,
        resp: &Value,
        id: String,
        title: String,
        albumartist: String,
    ) -> Self {
        let (date_key, total_key) = match provider {
            Provider::Qobuz => ("release_date_original", "tracks_count"),
            Provider::Deezer => ("release_date", "nb_tracks"),
            Provider::Tidal => ("releaseDate", "numberOfTracks"),
            Provider::Soundcloud => ("created_at", "track_count"),
        };

        let cover_url = match provider {
            Provider::Qobuz => str_at(resp, &["image", "large"]).map(str::to_string),
            Provider::Deezer => str_at(resp, &["cover_xl"]).map(str::to_string),
            Provider::Tidal => str_at(resp, &["cover"]).map(tidal_cover_url),
            Provider::Soundcloud => str_at(resp, &["artwork_url"]).map(str::to_string),
        };

        let label = match provider {
            Provider::Qobuz => str_at(resp, &["label", "name"]),
            Provider::Deezer => str_at(resp, &["label"]),
            Provider::Tidal => str_at(resp, &["copyright"]),
            Provider::Soundcloud => str_at(resp, &["label_name"]),
        }
        .map(str::to_string);

        let genres = match provider {
            Provider::Qobuz => str_at(resp, &["genre", "name"])
                .map(|g| vec![g.to_string()])
                .unwrap_or_default(),
            Provider::Deezer => list_at(resp, "genres")
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|g| str_at(g, &["name"]).map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            Provider::Tidal | Provider::Soundcloud => Vec::new(),
        };

        Self {
            id,
            title,
            albumartist,
            year: str_at(resp, &[date_key]).and_then(year_of),
            tracktotal: u32_at(resp, &[total_key])
                .or_else(|| u32_at(resp, &["track_total"])),
            cover_url,
            label,
            genres,
        }
    }
}

impl TrackMeta {
    /// Parses a track response.
    ///
    /// Album tracks pass the album they were resolved under; other tracks
    /// take their album context from the response itself.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Missing`] for absent identifying fields and
    /// [`MetadataError::NotStreamable`] when the provider flags the track.
    pub fn from_response(
        provider: Provider,
        resp: &Value,
        album: Option<Arc<AlbumMeta>>,
    ) -> Result<Self, MetadataError> {
        let missing = |field| MetadataError::missing(provider, MediaType::Track, field);
        let id = id_of(resp).ok_or_else(|| missing("id"))?;

        let streamable_key = match provider {
            Provider::Qobuz => "streamable",
            Provider::Deezer => "readable",
            Provider::Tidal => "streamReady",
            Provider::Soundcloud => "streamable",
        };
        if resp.get(streamable_key) == Some(&Value::Bool(false)) {
            return Err(MetadataError::NotStreamable { provider, id });
        }

        let title = versioned_title(resp).ok_or_else(|| missing("title"))?;

        let artist = match provider {
            Provider::Qobuz => str_at(resp, &["performer", "name"])
                .or_else(|| str_at(resp, &["album", "artist", "name"])),
            Provider::Deezer => str_at(resp, &["artist", "name"]),
            Provider::Tidal => str_at(resp, &["artist", "name"]).or_else(|| {
                resp.get("artists")
                    .and_then(Value::as_array)
                    .and_then(|artists| artists.first())
                    .and_then(|first| str_at(first, &["name"]))
            }),
            Provider::Soundcloud => str_at(resp, &["user", "username"]),
        }
        .or_else(|| album.as_deref().map(|a| a.albumartist.as_str()))
        .ok_or_else(|| missing("artist"))?
        .to_string();

        let (number_key, disc_key) = match provider {
            Provider::Qobuz => ("track_number", "media_number"),
            Provider::Deezer => ("track_position", "disk_number"),
            Provider::Tidal => ("trackNumber", "volumeNumber"),
            Provider::Soundcloud => ("track_number", "disc_number"),
        };

        let explicit = match provider {
            Provider::Qobuz => bool_at(resp, "parental_warning"),
            Provider::Deezer => bool_at(resp, "explicit_lyrics"),
            Provider::Tidal => bool_at(resp, "explicit"),
            Provider::Soundcloud => false,
        };

        let (bit_depth, sampling_rate) = match provider {
            Provider::Qobuz => (
                u32_at(resp, &["maximum_bit_depth"]),
                resp.get("maximum_sampling_rate").and_then(Value::as_f64),
            ),
            _ => (None, None),
        };

        let album = match album {
            Some(album) => album,
            None => Arc::new(AlbumMeta::embedded(provider, resp, &artist)?),
        };

        Ok(Self {
            id,
            title,
            artist,
            tracknumber: u32_at(resp, &[number_key]).unwrap_or(1),
            discnumber: u32_at(resp, &[disc_key]).unwrap_or(1),
            composer: str_at(resp, &["composer", "name"]).map(str::to_string),
            explicit,
            bit_depth,
            sampling_rate,
            album,
        })
    }
}

impl PlaylistMeta {
    /// # Errors
    ///
    /// Returns [`MetadataError::Missing`] when the id or name is absent.
    pub fn from_response(provider: Provider, resp: &Value) -> Result<Self, MetadataError> {
        let (id, name) = named(provider, MediaType::Playlist, resp, &["title", "name"])?;
        Ok(Self { id, name })
    }
}

impl ArtistMeta {
    /// # Errors
    ///
    /// Returns [`MetadataError::Missing`] when the id or name is absent.
    pub fn from_response(provider: Provider, resp: &Value) -> Result<Self, MetadataError> {
        let (id, name) = named(provider, MediaType::Artist, resp, &["name", "username"])?;
        Ok(Self { id, name })
    }
}

impl LabelMeta {
    /// # Errors
    ///
    /// Returns [`MetadataError::Missing`] when the id or name is absent.
    pub fn from_response(provider: Provider, resp: &Value) -> Result<Self, MetadataError> {
        let (id, name) = named(provider, MediaType::Label, resp, &["name"])?;
        Ok(Self { id, name })
    }
}

/// Extracts the ordered child ids from a composite response.
///
/// Albums and playlists list tracks; artists and labels list albums. Lists
/// may be bare arrays, `{items: [...]}` pages or `{data: [...]}` pages, and
/// entries may wrap the child in an `item` object.
///
/// # Errors
///
/// Returns [`MetadataError::Missing`] when the child listing is absent.
pub fn child_ids(
    provider: Provider,
    media_type: MediaType,
    resp: &Value,
) -> Result<Vec<String>, MetadataError> {
    let key = match media_type {
        MediaType::Track => return Ok(Vec::new()),
        MediaType::Album | MediaType::Playlist => "tracks",
        MediaType::Artist | MediaType::Label => "albums",
    };
    let items =
        list_at(resp, key).ok_or_else(|| MetadataError::missing(provider, media_type, key))?;

    Ok(items
        .iter()
        .filter_map(|entry| id_of(entry).or_else(|| entry.get("item").and_then(id_of)))
        .collect())
}

fn named(
    provider: Provider,
    media_type: MediaType,
    resp: &Value,
    name_keys: &[&str],
) -> Result<(String, String), MetadataError> {
    let id = id_of(resp).ok_or_else(|| MetadataError::missing(provider, media_type, "id"))?;
    let name = name_keys
        .iter()
        .find_map(|key| str_at(resp, &[*key]))
        .ok_or_else(|| MetadataError::missing(provider, media_type, "name"))?;
    Ok((id, name.to_string()))
}

fn album_artist(provider: Provider, resp: &Value) -> Option<String> {
    match provider {
        Provider::Soundcloud => str_at(resp, &["user", "username"]),
        _ => str_at(resp, &["artist", "name"]),
    }
    .map(str::to_string)
}

/// Title with the provider's version suffix, e.g. `Song (Live)`.
fn versioned_title(resp: &Value) -> Option<String> {
    let title = str_at(resp, &["title"])?.trim();
    if title.is_empty() {
        return None;
    }
    match str_at(resp, &["version"]).map(str::trim) {
        Some(version) if !version.is_empty() && !title.contains(version) => {
            Some(format!("{title} ({version})"))
        }
        _ => Some(title.to_string()),
    }
}

fn tidal_cover_url(uuid: &str) -> String {
    format!(
        "https://resources.tidal.com/images/{}/1280x1280.jpg",
        uuid.replace('-', "/")
    )
}

fn year_of(date: &str) -> Option<String> {
    let year: String = date.chars().take(4).collect();
    (year.len() == 4 && year.chars().all(|c| c.is_ascii_digit())).then_some(year)
}

/// Ids arrive as numbers on some providers and strings on others.
fn id_of(value: &Value) -> Option<String> {
    match value.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |current, key| current.get(key))
        .and_then(Value::as_str)
}

fn u32_at(value: &Value, path: &[&str]) -> Option<u32> {
    let leaf = path.iter().try_fold(value, |current, key| current.get(key))?;
    match leaf {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn bool_at(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn list_at<'a>(value: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    let node = value.get(key)?;
    node.as_array()
        .or_else(|| node.get("items").and_then(Value::as_array))
        .or_else(|| node.get("data").and_then(Value::as_array))
}
