//! Map a classification to its destination folder.

use std::fmt;
use std::path::PathBuf;

use crate::classify::{Classification, sanitize_dir_name};
use crate::config::Config;

/// What to do with files that are not recognized as media.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum NonMediaPolicy {
    /// Move them to the unsorted folder.
    #[default]
    Unsorted,
    /// Leave them in the source folder.
    Leave,
}

/// Where a file should go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Movies,
    Series(String),
    Unsorted,
    /// Stay where it is.
    Leave,
}

/// Resolve the destination for a classified file.
#[must_use]
pub fn resolve(classification: &Classification, policy: NonMediaPolicy) -> Destination {
    match classification {
        Classification::Unrecognized => match policy {
            NonMediaPolicy::Unsorted => Destination::Unsorted,
            NonMediaPolicy::Leave => Destination::Leave,
        },
        Classification::Series {
            show_name: Some(show_name),
        } => {
            let dir_name = sanitize_dir_name(show_name);
            if dir_name.is_empty() {
                Destination::Movies
            } else {
                Destination::Series(dir_name)
            }
        }
        Classification::Series { show_name: None } | Classification::Movie => Destination::Movies,
    }
}

impl Destination {
    /// Destination directory under the configured roots.
    /// Returns `None` for files that stay in place.
    #[must_use]
    pub fn path(&self, config: &Config) -> Option<PathBuf> {
        match self {
            Self::Movies => Some(config.movies.clone()),
            Self::Series(show_name) => Some(config.series.join(show_name)),
            Self::Unsorted => Some(config.unsorted.clone()),
            Self::Leave => None,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Movies => write!(f, "Movies"),
            Self::Series(show_name) => write!(f, "Series/{show_name}"),
            Self::Unsorted => write!(f, "Unsorted"),
            Self::Leave => write!(f, "(left in place)"),
        }
    }
}
