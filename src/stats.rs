use std::fmt;
use std::time::Duration;

use colored::Colorize;

use crate::mover::{MoveError, MoveOutcome};

/// Statistics for one sorting run
#[derive(Debug, Default)]
pub struct RunStats {
    pub files_moved: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub files_dry_run: usize,
    pub bytes_moved: u64,
    pub total_duration: Duration,
}

impl RunStats {
    /// Count the result of one move.
    pub fn add_result(&mut self, result: &Result<MoveOutcome, MoveError>) {
        match result {
            Ok(MoveOutcome::Moved { size, .. }) => {
                self.files_moved += 1;
                self.bytes_moved += size;
            }
            Ok(MoveOutcome::Skipped(_)) => self.files_dry_run += 1,
            Err(_) => self.files_failed += 1,
        }
    }

    /// Count a file that was left in place.
    pub const fn add_skipped(&mut self) {
        self.files_skipped += 1;
    }

    #[must_use]
    pub const fn total_files(&self) -> usize {
        self.files_moved + self.files_failed + self.files_skipped + self.files_dry_run
    }

    /// Summary as separate lines for the log file.
    #[must_use]
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Files moved: {}", self.files_moved),
            format!("Files failed: {}", self.files_failed),
            format!("Files skipped: {}", self.files_skipped),
        ];
        if self.files_dry_run > 0 {
            lines.push(format!("Files not moved (dry run): {}", self.files_dry_run));
        }
        lines.push(format!("Total size moved: {}", crate::format_mebibytes(self.bytes_moved)));
        lines.push(format!("Total time: {}", crate::format_duration(self.total_duration)));
        lines
    }

    /// Print coloured summary to the console.
    pub fn print_summary(&self) {
        println!("{}", "Sort summary".bold());
        println!("{self}");
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Moved:   {}", self.files_moved.to_string().green())?;
        if self.files_failed > 0 {
            writeln!(f, "  Failed:  {}", self.files_failed.to_string().red())?;
        } else {
            writeln!(f, "  Failed:  {}", self.files_failed)?;
        }
        writeln!(f, "  Skipped: {}", self.files_skipped)?;
        if self.files_dry_run > 0 {
            writeln!(f, "  Dry run: {}", self.files_dry_run.to_string().cyan())?;
        }
        writeln!(f, "  Size:    {}", crate::format_mebibytes(self.bytes_moved))?;
        write!(f, "  Time:    {}", crate::format_duration(self.total_duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io;
    use std::path::PathBuf;

    use crate::mover::SkipReason;

    #[test]
    fn counts_each_result_kind() {
        let mut stats = RunStats::default();
        stats.add_result(&Ok(MoveOutcome::Moved {
            path: PathBuf::from("/movies/a.mkv"),
            size: 2 * 1_048_576,
        }));
        stats.add_result(&Ok(MoveOutcome::Skipped(SkipReason::DryRun {
            target: PathBuf::from("/movies/b.mkv"),
        })));
        stats.add_result(&Err(MoveError::NotFound(io::Error::from(io::ErrorKind::NotFound))));
        stats.add_skipped();

        assert_eq!(stats.files_moved, 1);
        assert_eq!(stats.files_dry_run, 1);
        assert_eq!(stats.files_failed, 1);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.bytes_moved, 2 * 1_048_576);
        assert_eq!(stats.total_files(), 4);
    }

    #[test]
    fn summary_lines_include_size() {
        let stats = RunStats {
            files_moved: 2,
            bytes_moved: 1_572_864,
            ..RunStats::default()
        };
        let lines = stats.summary_lines();
        assert!(lines.contains(&"Files moved: 2".to_string()));
        assert!(lines.contains(&"Total size moved: 1.50 MB".to_string()));
        assert!(!lines.iter().any(|line| line.contains("dry run")));
    }
}
