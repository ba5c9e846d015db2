//! Filename based classification of downloaded files.
//!
//! A file is a series episode when its normalized name contains a season and episode marker
//! like `S01E02` or `S1 E2`. The text in front of the marker is the show name.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Season and episode marker anywhere in a name, e.g. "S01E02" or "s1 e2".
pub static RE_EPISODE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)S\d{1,2}\s?E\d{1,2}").expect("Invalid episode marker regex"));

/// Collapse runs of whitespace.
static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

/// Characters that are not allowed in directory names on common filesystems.
const INVALID_DIR_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// What a file looks like based on its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Media file with a season and episode marker.
    /// The show name is `None` when nothing precedes the marker.
    Series { show_name: Option<String> },
    /// Media file without an episode marker.
    Movie,
    /// File extension is not a recognized media extension.
    Unrecognized,
}

/// Replace underscores and dots with spaces.
///
/// The extension separator is replaced too,
/// so extension checks must use the original file name.
///
/// ```rust
/// use media_sort::classify::normalize_name;
///
/// assert_eq!(normalize_name("Show.Name.S01E02.mkv"), "Show Name S01E02 mkv");
/// assert_eq!(normalize_name("Show_Name.S01E02.mkv"), "Show Name S01E02 mkv");
/// ```
#[must_use]
pub fn normalize_name(raw_name: &str) -> String {
    raw_name.replace(['_', '.'], " ")
}

/// Check if the name contains a season and episode marker.
#[must_use]
pub fn is_series(name: &str) -> bool {
    RE_EPISODE_MARKER.is_match(name)
}

/// Get the show name in front of the first season and episode marker.
///
/// Returns `None` if the marker is at the start of the name or the name has no marker.
#[must_use]
pub fn extract_show_name(name: &str) -> Option<String> {
    let marker = RE_EPISODE_MARKER.find(name)?;
    let show_name = name[..marker.start()].trim();
    if show_name.is_empty() {
        None
    } else {
        Some(show_name.to_string())
    }
}

/// Check if the original file name has one of the given media extensions.
///
/// Extensions are compared case-insensitively and without the leading dot.
#[must_use]
pub fn is_media_file(file_name: &str, extensions: &[String]) -> bool {
    let extension = crate::path_to_file_extension_string(Path::new(file_name));
    !extension.is_empty() && extensions.iter().any(|ext| *ext == extension)
}

/// Classify a file based on its original file name.
#[must_use]
pub fn classify(file_name: &str, extensions: &[String]) -> Classification {
    if !is_media_file(file_name, extensions) {
        return Classification::Unrecognized;
    }
    let name = normalize_name(file_name);
    if is_series(&name) {
        Classification::Series {
            show_name: extract_show_name(&name),
        }
    } else {
        Classification::Movie
    }
}

/// Make a show name safe to use as a directory name.
///
/// Removes characters that are invalid in paths and collapses whitespace.
#[must_use]
pub fn sanitize_dir_name(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !INVALID_DIR_NAME_CHARS.contains(c)).collect();
    RE_WHITESPACE.replace_all(cleaned.trim(), " ").into_owned()
}
