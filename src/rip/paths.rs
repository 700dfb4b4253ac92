//! Destination folder and file naming.
//!
//! Layout: `<downloads>/<provider?>/<albumartist> - <album> (<year>)/<NN>. <title>.<ext>`.

use std::path::{Component, Path, PathBuf};

use crate::media::{AlbumMeta, Provider, TrackMeta};

/// Longest component we emit, in characters. Leaves headroom under the
/// common 255-byte limit once the track number and extension are added.
const MAX_COMPONENT_CHARS: usize = 180;

/// Makes one path component safe on common filesystems.
///
/// Replaces `/ \ : * ? " < > |` and control characters with `_`, trims
/// trailing dots and spaces (Windows drops them silently) and rewrites
/// `.`/`..` so the result can never walk out of its parent.
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let replaced: String = value
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_COMPONENT_CHARS)
        .collect();
    let trimmed = replaced.trim_end_matches(['.', ' ']);

    if trimmed.is_empty() {
        return if replaced.is_empty() {
            "_".to_string()
        } else {
            replaced.replace('.', "_")
        };
    }
    if is_safe_segment(trimmed) {
        trimmed.to_string()
    } else {
        trimmed.replace('.', "_")
    }
}

/// `<albumartist> - <album> (<year>)`, or without the year when unknown.
#[must_use]
pub fn album_folder_name(album: &AlbumMeta) -> String {
    let name = match &album.year {
        Some(year) => format!("{} - {} ({year})", album.albumartist, album.title),
        None => format!("{} - {}", album.albumartist, album.title),
    };
    sanitize_component(&name)
}

/// Folder for one album under the downloads root.
#[must_use]
pub fn album_folder(
    root: &Path,
    provider: Provider,
    source_subdirectories: bool,
    album: &AlbumMeta,
) -> PathBuf {
    let mut folder = root.to_path_buf();
    if source_subdirectories {
        folder.push(provider.as_str());
    }
    folder.push(album_folder_name(album));
    folder
}

/// `<NN>. <title>.<ext>` with a zero-padded track number.
#[must_use]
pub fn track_file_name(track: &TrackMeta, extension: &str) -> String {
    let title = sanitize_component(&track.title);
    format!("{:02}. {title}.{extension}", track.tracknumber)
}

fn is_safe_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn album(year: Option<&str>) -> AlbumMeta {
        AlbumMeta {
            id: "a1".into(),
            title: "Blue: Live".into(),
            albumartist: "AC/DC".into(),
            year: year.map(str::to_string),
            tracktotal: Some(10),
            cover_url: None,
            label: None,
            genres: Vec::new(),
        }
    }

    // ==================== Sanitize Tests ====================

    #[test]
    fn test_sanitize_replaces_invalid_chars() {
        assert_eq!(sanitize_component("a/b\\c:d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_component("tab\there"), "tab_here");
    }

    #[test]
    fn test_sanitize_rewrites_dot_segments() {
        assert_eq!(sanitize_component("."), "_");
        assert_eq!(sanitize_component(".."), "__");
        assert_eq!(sanitize_component(""), "_");
    }

    #[test]
    fn test_sanitize_trims_trailing_dots_and_spaces() {
        assert_eq!(sanitize_component("  Hello World...  "), "Hello World");
    }

    #[test]
    fn test_sanitize_keeps_unicode_and_truncates() {
        assert_eq!(sanitize_component("日本語 (Remix)"), "日本語 (Remix)");
        let long = "x".repeat(500);
        assert_eq!(sanitize_component(&long).chars().count(), MAX_COMPONENT_CHARS);
    }

    // ==================== Layout Tests ====================

    #[test]
    fn test_album_folder_with_and_without_year() {
        assert_eq!(album_folder_name(&album(Some("1999"))), "AC_DC - Blue_ Live (1999)");
        assert_eq!(album_folder_name(&album(None)), "AC_DC - Blue_ Live");
    }

    #[test]
    fn test_album_folder_provider_subdirectory() {
        let root = Path::new("/music");
        assert_eq!(
            album_folder(root, Provider::Qobuz, true, &album(Some("1999"))),
            PathBuf::from("/music/qobuz/AC_DC - Blue_ Live (1999)")
        );
        assert_eq!(
            album_folder(root, Provider::Qobuz, false, &album(Some("1999"))),
            PathBuf::from("/music/AC_DC - Blue_ Live (1999)")
        );
    }

    #[test]
    fn test_track_file_name_pads_number() {
        let track = TrackMeta {
            id: "t1".into(),
            title: "What? Now".into(),
            artist: "AC/DC".into(),
            tracknumber: 3,
            discnumber: 1,
            composer: None,
            explicit: false,
            bit_depth: None,
            sampling_rate: None,
            album: Arc::new(album(None)),
        };
        assert_eq!(track_file_name(&track, "flac"), "03. What_ Now.flac");
    }
}
