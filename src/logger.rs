use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use itertools::Itertools;

use crate::config::Config;
use crate::stats::RunStats;
use crate::{print_error, print_warning};

/// Log line severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Append-only event log with buffered writes.
///
/// Every line has the format `<timestamp> - <LEVEL> - <message>`.
/// Warnings and errors are also printed to the console when echo is enabled,
/// info lines only in verbose mode.
pub struct EventLog<W: Write = BufWriter<File>> {
    writer: W,
    echo: bool,
    verbose: bool,
}

impl EventLog {
    /// Open the log file for appending, creating it and its parent directories if needed.
    pub fn open(log_path: &Path, verbose: bool) -> Result<Self> {
        if let Some(log_dir) = log_path.parent()
            && !log_dir.as_os_str().is_empty()
            && !log_dir.exists()
        {
            fs::create_dir_all(log_dir)
                .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

        Ok(Self {
            writer: BufWriter::new(file),
            echo: true,
            verbose,
        })
    }
}

impl<W: Write> EventLog<W> {
    /// Log into the given writer without console output.
    pub const fn new(writer: W) -> Self {
        Self {
            writer,
            echo: false,
            verbose: false,
        }
    }

    /// Get a reference to the underlying writer.
    pub const fn get_ref(&self) -> &W {
        &self.writer
    }

    fn timestamp() -> String {
        Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        self.log(Level::Info, message.as_ref());
    }

    pub fn warning(&mut self, message: impl AsRef<str>) {
        self.log(Level::Warning, message.as_ref());
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        self.log(Level::Error, message.as_ref());
    }

    /// Append one line and flush so nothing is lost if the run is interrupted.
    pub fn log(&mut self, level: Level, message: &str) {
        let _ = writeln!(self.writer, "{} - {level} - {message}", Self::timestamp());
        let _ = self.writer.flush();

        if self.echo {
            match level {
                Level::Info if self.verbose => println!("{message}"),
                Level::Info => {}
                Level::Warning => print_warning!("{message}"),
                Level::Error => print_error!("{message}"),
            }
        }
    }

    /// Log the effective configuration at the start of a run.
    pub fn log_init(&mut self, config: &Config) {
        self.info(format!(
            "Starting run{}",
            if config.dryrun { " (dry run)" } else { "" }
        ));
        self.info(format!(
            "Sources: {}",
            config.sources.iter().map(|path| format!("\"{}\"", path.display())).join(", ")
        ));
        self.info(format!("Movies: \"{}\"", config.movies.display()));
        self.info(format!("Series: \"{}\"", config.series.display()));
        self.info(format!("Unsorted: \"{}\"", config.unsorted.display()));
        self.info(format!("Media extensions: {}", config.extensions.join(", ")));
        if !config.include.is_empty() {
            self.info(format!("Include: {:?}", config.include));
        }
        if !config.exclude.is_empty() {
            self.info(format!("Exclude: {:?}", config.exclude));
        }
    }

    /// Log final statistics.
    pub fn log_stats(&mut self, stats: &RunStats) {
        for line in stats.summary_lines() {
            self.info(line);
        }
    }
}
