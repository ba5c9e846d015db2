use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use clap_complete::Shell;
use itertools::Itertools;
use serde::Deserialize;

use crate::mover::{DEFAULT_RETRY_ATTEMPTS, DEFAULT_RETRY_DELAY, RetryPolicy};
use crate::resolve::NonMediaPolicy;

const PROJECT_NAME: &str = env!("CARGO_PKG_NAME");

/// Recognized media file extensions.
pub const DEFAULT_MEDIA_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov"];

/// Extensions of downloads that are still in progress.
pub const DEFAULT_SKIP_EXTENSIONS: &[&str] = &["part", "crdownload", "tmp"];

/// Path to the user config file: `$HOME/.config/media-sort.toml`
///
/// Returns `None` if the home directory cannot be determined.
pub static CONFIG_PATH: LazyLock<Option<PathBuf>> = LazyLock::new(|| {
    let home_dir = dirs::home_dir()?;
    Some(home_dir.join(".config").join(format!("{PROJECT_NAME}.toml")))
});

#[derive(Parser, Debug, Default)]
#[command(author, version, name = "mediasort", about = "Sort downloaded movies and series episodes into media folders")]
pub struct MediaSortArgs {
    /// Optional source directories to sort instead of the configured ones
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub paths: Vec<PathBuf>,

    /// Print debug information
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Only sort files that match the given pattern
    #[arg(short = 'n', long, num_args = 1, action = clap::ArgAction::Append, name = "INCLUDE")]
    pub include: Vec<String>,

    /// Leave files that match the given pattern in place
    #[arg(short = 'e', long, num_args = 1, action = clap::ArgAction::Append, name = "EXCLUDE")]
    pub exclude: Vec<String>,

    /// Leave unrecognized files in place instead of moving them to the unsorted folder
    #[arg(short, long)]
    pub keep: bool,

    /// Only print changes without moving files
    #[arg(short, long)]
    pub print: bool,

    /// Also move series episodes found in the movies folder to the series folder
    #[arg(short, long)]
    pub tidy: bool,

    /// Generate shell completion
    #[arg(short = 'l', long, name = "SHELL")]
    pub completion: Option<Shell>,

    /// Print verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Final config combined from CLI arguments, user config file and defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub debug: bool,
    pub dryrun: bool,
    pub exclude: Vec<String>,
    pub extensions: Vec<String>,
    pub include: Vec<String>,
    pub log_file: PathBuf,
    pub movies: PathBuf,
    pub non_media: NonMediaPolicy,
    pub retry: RetryPolicy,
    pub series: PathBuf,
    pub skip_extensions: Vec<String>,
    pub sources: Vec<PathBuf>,
    pub tidy: bool,
    pub unsorted: PathBuf,
    pub verbose: bool,
}

/// Config from the user config file
#[derive(Debug, Default, Deserialize)]
pub struct MediaSortConfig {
    #[serde(default)]
    pub dryrun: bool,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub leave_unrecognized: bool,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub movies: Option<PathBuf>,
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    #[serde(default)]
    pub retry_delay_seconds: Option<u64>,
    #[serde(default)]
    pub series: Option<PathBuf>,
    #[serde(default)]
    pub skip_extensions: Option<Vec<String>>,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub tidy: bool,
    #[serde(default)]
    pub unsorted: Option<PathBuf>,
    #[serde(default)]
    pub verbose: bool,
}

/// Wrapper needed for parsing the user config file section.
#[derive(Debug, Default, Deserialize)]
struct UserConfig {
    #[serde(default)]
    mediasort: MediaSortConfig,
}

/// Default folder layout under the user home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultFolders {
    pub sources: Vec<PathBuf>,
    pub movies: PathBuf,
    pub series: PathBuf,
    pub unsorted: PathBuf,
    pub log_file: PathBuf,
}

impl DefaultFolders {
    #[must_use]
    pub fn from_home(home: &Path) -> Self {
        let downloads = home.join("Downloads");
        let videos = home.join("Videos");
        Self {
            sources: vec![downloads.clone(), downloads.join("Telegram Desktop")],
            movies: videos.join("Movies"),
            series: videos.join("Series"),
            unsorted: downloads.join("Unsorted"),
            log_file: home.join("logs").join(PROJECT_NAME).join("media_sort.log"),
        }
    }
}

impl MediaSortConfig {
    /// Try to read user config from the file if it exists.
    /// Otherwise, fall back to default config.
    ///
    /// # Errors
    /// Returns an error if config file exists but cannot be read or parsed.
    pub fn get_user_config() -> Result<Self> {
        let Some(path) = CONFIG_PATH.as_deref() else {
            return Ok(Self::default());
        };

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse config file {}:\n{e}", path.display())),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(anyhow::anyhow!(
                "Failed to read config file {}: {error}",
                path.display()
            )),
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns an error if the TOML string is invalid.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        toml::from_str::<UserConfig>(toml_str)
            .map(|config| config.mediasort)
            .with_context(|| "Failed to parse config TOML")
    }
}

impl Config {
    /// Create config from given command line args and user config file.
    ///
    /// # Errors
    /// Returns an error if the user config file is invalid,
    /// or a folder is not configured and the home directory cannot be determined.
    pub fn from_args(args: MediaSortArgs) -> Result<Self> {
        let user_config = MediaSortConfig::get_user_config()?;
        let home_dir = dirs::home_dir();
        Self::from_parts(args, user_config, home_dir.as_deref())
    }

    /// Combine args, user config and home directory defaults.
    /// CLI arguments take precedence over the user config, which takes precedence over defaults.
    ///
    /// # Errors
    /// Returns an error if a folder is not configured and there is no home directory to default to.
    pub fn from_parts(args: MediaSortArgs, user_config: MediaSortConfig, home_dir: Option<&Path>) -> Result<Self> {
        let defaults = home_dir.map(DefaultFolders::from_home);

        let sources: Vec<PathBuf> = if !args.paths.is_empty() {
            args.paths
        } else if !user_config.sources.is_empty() {
            user_config.sources.iter().map(|path| crate::expand_tilde(path)).collect()
        } else {
            defaults
                .as_ref()
                .map(|defaults| defaults.sources.clone())
                .context("No source folders configured and home directory not found")?
        };

        let folder = |configured: Option<PathBuf>, default: Option<PathBuf>, name: &str| -> Result<PathBuf> {
            configured
                .map(|path| crate::expand_tilde(&path))
                .or(default)
                .with_context(|| format!("No {name} folder configured and home directory not found"))
        };

        let movies = folder(
            user_config.movies,
            defaults.as_ref().map(|d| d.movies.clone()),
            "movies",
        )?;
        let series = folder(
            user_config.series,
            defaults.as_ref().map(|d| d.series.clone()),
            "series",
        )?;
        let unsorted = folder(
            user_config.unsorted,
            defaults.as_ref().map(|d| d.unsorted.clone()),
            "unsorted",
        )?;
        let log_file = folder(
            user_config.log_file,
            defaults.as_ref().map(|d| d.log_file.clone()),
            "log",
        )?;

        let extensions = if user_config.extensions.is_empty() {
            normalize_extensions(DEFAULT_MEDIA_EXTENSIONS.iter().copied())
        } else {
            normalize_extensions(user_config.extensions.iter().map(String::as_str))
        };
        let skip_extensions = user_config.skip_extensions.map_or_else(
            || normalize_extensions(DEFAULT_SKIP_EXTENSIONS.iter().copied()),
            |skip| normalize_extensions(skip.iter().map(String::as_str)),
        );

        let include: Vec<String> = user_config.include.into_iter().chain(args.include).unique().collect();
        let exclude: Vec<String> = user_config.exclude.into_iter().chain(args.exclude).unique().collect();

        let non_media = if args.keep || user_config.leave_unrecognized {
            NonMediaPolicy::Leave
        } else {
            NonMediaPolicy::Unsorted
        };

        let retry = RetryPolicy {
            attempts: user_config.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS).max(1),
            delay: user_config
                .retry_delay_seconds
                .map_or(DEFAULT_RETRY_DELAY, Duration::from_secs),
        };

        Ok(Self {
            debug: args.debug,
            dryrun: args.print || user_config.dryrun,
            exclude,
            extensions,
            include,
            log_file,
            movies,
            non_media,
            retry,
            series,
            skip_extensions,
            sources,
            tidy: args.tidy || user_config.tidy,
            unsorted,
            verbose: args.verbose || user_config.verbose,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            dryrun: false,
            exclude: Vec::new(),
            extensions: normalize_extensions(DEFAULT_MEDIA_EXTENSIONS.iter().copied()),
            include: Vec::new(),
            log_file: PathBuf::new(),
            movies: PathBuf::new(),
            non_media: NonMediaPolicy::default(),
            retry: RetryPolicy::default(),
            series: PathBuf::new(),
            skip_extensions: normalize_extensions(DEFAULT_SKIP_EXTENSIONS.iter().copied()),
            sources: Vec::new(),
            tidy: false,
            unsorted: PathBuf::new(),
            verbose: false,
        }
    }
}

/// Lowercase extensions without the leading dot, duplicates and empty values removed.
fn normalize_extensions<'a>(extensions: impl Iterator<Item = &'a str>) -> Vec<String> {
    extensions
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .unique()
        .collect()
}
