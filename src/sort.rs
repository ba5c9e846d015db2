//! Sort files from the source folders into the movies, series and unsorted folders.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use itertools::Itertools;

use crate::classify::{self, Classification};
use crate::config::Config;
use crate::logger::EventLog;
use crate::mover::{FileOps, MoveOutcome, Mover, SystemFileOps, ensure_directory_exists};
use crate::resolve::{self, Destination, NonMediaPolicy};
use crate::stats::RunStats;

/// Single pass media sorter over the configured source folders.
pub struct MediaSort<F: FileOps = SystemFileOps, W: Write = BufWriter<File>> {
    config: Config,
    mover: Mover<F>,
    log: EventLog<W>,
    stats: RunStats,
}

impl MediaSort {
    /// Create a sorter that moves files on disk and logs to the configured log file.
    pub fn new(config: Config) -> Result<Self> {
        let log = EventLog::open(&config.log_file, config.verbose)?;
        Ok(Self::with_parts(config, SystemFileOps, log))
    }
}

impl<F: FileOps, W: Write> MediaSort<F, W> {
    pub fn with_parts(config: Config, ops: F, log: EventLog<W>) -> Self {
        let mover = Mover::new(ops, config.retry, config.dryrun);
        Self {
            config,
            mover,
            log,
            stats: RunStats::default(),
        }
    }

    pub const fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub const fn log(&self) -> &EventLog<W> {
        &self.log
    }

    /// Sort all configured source folders once.
    ///
    /// A missing source folder is logged and skipped.
    pub fn run(&mut self) -> &RunStats {
        let start = Instant::now();
        self.log.log_init(&self.config);

        if self.config.non_media == NonMediaPolicy::Unsorted
            && !self.config.dryrun
            && let Err(error) = ensure_directory_exists(&self.config.unsorted, &mut self.log)
        {
            self.log.error(format!(
                "Failed to create unsorted folder {}: {error}",
                self.config.unsorted.display()
            ));
        }

        let tidy_files = if self.config.tidy {
            self.list_movies_folder()
        } else {
            None
        };

        for source in self.config.sources.clone() {
            if !source.is_dir() {
                self.log
                    .error(format!("Downloads folder not found: {}", source.display()));
                continue;
            }
            self.process_folder(&source);
        }

        if let Some(files) = tidy_files {
            self.tidy_movies_folder(files);
        }

        self.stats.total_duration = start.elapsed();
        self.log.log_stats(&self.stats);
        &self.stats
    }

    /// Sort the files directly inside the given folder.
    ///
    /// The folder is listed once before anything is moved.
    /// Subdirectories are not entered.
    pub fn process_folder(&mut self, folder: &Path) {
        let files = match self.collect_files(folder) {
            Ok(files) => files,
            Err(error) => {
                self.log
                    .error(format!("Failed to read folder {}: {error}", folder.display()));
                return;
            }
        };

        for path in files {
            self.process_file(&path);
        }
    }

    /// Classify one file and move it to its destination.
    pub fn process_file(&mut self, path: &Path) {
        let file_name = crate::path_to_filename_string(path);
        self.log.info(format!("Processing file: {}", path.display()));

        if let Some(reason) = self.skip_reason(&file_name) {
            self.log.info(format!("Skipping {file_name}: {reason}"));
            self.stats.add_skipped();
            return;
        }

        let classification = classify::classify(&file_name, &self.config.extensions);
        match &classification {
            Classification::Series {
                show_name: Some(show_name),
            } => {
                self.log.info(format!("File {file_name} identified as media."));
                self.log.info(format!("Series detected: {show_name}"));
            }
            Classification::Series { show_name: None } => {
                self.log.info(format!("File {file_name} identified as media."));
                self.log.warning(format!(
                    "Series name could not be extracted for {file_name}. Moving to Movies."
                ));
            }
            Classification::Movie => {
                self.log.info(format!("File {file_name} identified as media."));
                self.log.info(format!("File {file_name} identified as a movie."));
            }
            Classification::Unrecognized => {
                self.log.info(format!("File {file_name} is not recognized as media."));
            }
        }

        let destination = resolve::resolve(&classification, self.config.non_media);
        let Some(dest_dir) = destination.path(&self.config) else {
            self.log
                .warning(format!("Unrecognized file format: {file_name}. Leaving in place."));
            self.stats.add_skipped();
            return;
        };

        self.log.info(format!("Sorting {file_name} to {destination}"));
        self.move_to(path, &dest_dir, &file_name);
        if classification == Classification::Unrecognized {
            self.log.warning(format!("Unrecognized file format: {file_name}"));
        }
    }

    /// List the movies folder for tidying.
    ///
    /// `run` calls this before sorting the sources so files moved in the same run are not visited again.
    fn list_movies_folder(&mut self) -> Option<Vec<PathBuf>> {
        let movies = self.config.movies.clone();
        if !movies.is_dir() {
            self.log
                .warning(format!("Movies folder not found: {}", movies.display()));
            return None;
        }

        match self.collect_files(&movies) {
            Ok(files) => Some(files),
            Err(error) => {
                self.log
                    .error(format!("Failed to read folder {}: {error}", movies.display()));
                None
            }
        }
    }

    /// Move series episodes that ended up in the movies folder to their show folder.
    ///
    /// Files without an episode marker stay in the movies folder.
    fn tidy_movies_folder(&mut self, files: Vec<PathBuf>) {
        for path in files {
            let file_name = crate::path_to_filename_string(&path);
            self.log.info(format!("Processing file: {}", path.display()));

            let name = classify::normalize_name(&file_name);
            if !classify::is_series(&name) {
                self.log
                    .info(format!("File {file_name} is not a series. No action taken."));
                continue;
            }

            let classification = Classification::Series {
                show_name: classify::extract_show_name(&name),
            };
            let destination = resolve::resolve(&classification, self.config.non_media);
            match (&destination, destination.path(&self.config)) {
                (Destination::Series(show_name), Some(dest_dir)) => {
                    self.log.info(format!(
                        "Series detected: {show_name}. Moving to: {}",
                        dest_dir.display()
                    ));
                    self.move_to(&path, &dest_dir, &file_name);
                }
                _ => {
                    self.log.warning(format!(
                        "Series name could not be extracted for {file_name}. Skipping."
                    ));
                    self.stats.add_skipped();
                }
            }
        }
    }

    fn move_to(&mut self, path: &Path, dest_dir: &Path, file_name: &str) {
        let result = self.mover.move_file(path, dest_dir, file_name, &mut self.log);
        if let Ok(MoveOutcome::Moved { size, .. }) = &result {
            self.log.info(format!(
                "Moved {file_name} to {}. Size: {}",
                dest_dir.display(),
                crate::format_mebibytes(*size)
            ));
        }
        self.stats.add_result(&result);
    }

    /// List regular files in the folder, sorted by name.
    fn collect_files(&mut self, folder: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(folder)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    self.log
                        .error(format!("Failed to read entry in {}: {error}", folder.display()));
                    continue;
                }
            };
            if crate::is_hidden(&entry) {
                let path = entry.path();
                if path.is_file() {
                    self.log
                        .info(format!("Skipping hidden file: {}", path.display()));
                    self.stats.add_skipped();
                }
                continue;
            }
            let path = entry.path();
            if path.is_file() {
                files.push(path);
            }
        }
        Ok(files
            .into_iter()
            .sorted_by_key(|path| crate::path_to_filename_string(path).to_lowercase())
            .collect())
    }

    /// Reason to leave a file in place before classifying it.
    fn skip_reason(&self, file_name: &str) -> Option<&'static str> {
        let extension = crate::path_to_file_extension_string(Path::new(file_name));
        if !extension.is_empty() && self.config.skip_extensions.contains(&extension) {
            return Some("download in progress");
        }

        let lowercase_name = file_name.to_lowercase();
        if !self.config.include.is_empty()
            && !self
                .config
                .include
                .iter()
                .any(|pattern| lowercase_name.contains(&pattern.to_lowercase()))
        {
            return Some("does not match include patterns");
        }
        if self
            .config
            .exclude
            .iter()
            .any(|pattern| lowercase_name.contains(&pattern.to_lowercase()))
        {
            return Some("matches exclude pattern");
        }
        None
    }
}
