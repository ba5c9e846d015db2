//! Collision-safe file moves with retries on permission errors.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::insert_suffix_before_extension;
use crate::logger::EventLog;

/// Number of move attempts before giving up on a locked file.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Wait between attempts after a permission error.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Filesystem operations used for moving files.
pub trait FileOps {
    /// Move `source` to `target`.
    fn rename(&mut self, source: &Path, target: &Path) -> io::Result<()>;

    /// Block before the next attempt.
    fn wait(&mut self, delay: Duration) {
        thread::sleep(delay);
    }
}

/// Moves files on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFileOps;

impl FileOps for SystemFileOps {
    /// Rename within a volume, copy and remove across volumes.
    fn rename(&mut self, source: &Path, target: &Path) -> io::Result<()> {
        match fs::rename(source, target) {
            Err(error) if error.kind() == io::ErrorKind::CrossesDevices => move_across_devices(source, target),
            result => result,
        }
    }
}

/// Copy `source` to a new `target` file and remove the source.
///
/// Keeps the modification time and permissions of the source.
/// On failure the source is left untouched and no partial target remains.
pub fn move_across_devices(source: &Path, target: &Path) -> io::Result<()> {
    let mut reader = File::open(source)?;
    let metadata = reader.metadata()?;
    let file = copy_to_new_file(&mut reader, target)?;
    drop(reader);

    let finished = metadata
        .modified()
        .and_then(|modified| file.set_modified(modified))
        .and_then(|()| file.set_permissions(metadata.permissions()));
    drop(file);
    let result = finished.and_then(|()| fs::remove_file(source));
    if result.is_err() {
        let _ = fs::remove_file(target);
    }
    result
}

/// Write everything from `reader` to `target`, which must not exist yet.
///
/// A partially written target is removed if the copy fails.
fn copy_to_new_file<R: Read>(reader: &mut R, target: &Path) -> io::Result<File> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(target)?;
    if let Err(error) = io::copy(reader, &mut file) {
        drop(file);
        let _ = fs::remove_file(target);
        return Err(error);
    }
    Ok(file)
}

/// Why a single move failed.
#[derive(Debug, Error)]
pub enum MoveError {
    /// File is locked or not accessible. Retried.
    #[error("permission denied: {0}")]
    PermissionDenied(#[source] io::Error),
    /// Source file disappeared after listing.
    #[error("file not found: {0}")]
    NotFound(#[source] io::Error),
    #[error("{0}")]
    Other(#[source] io::Error),
}

impl From<io::Error> for MoveError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(error),
            io::ErrorKind::NotFound => Self::NotFound(error),
            _ => Self::Other(error),
        }
    }
}

/// Why a move was not performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Dry run, file would have been moved to `target`.
    DryRun { target: PathBuf },
}

/// Result of a successful move call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// File was moved to `path` and has `size` bytes.
    Moved { path: PathBuf, size: u64 },
    Skipped(SkipReason),
}

/// How many times to try and how long to wait after a permission error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Get a file name that does not exist yet in the destination directory.
///
/// Appends `_1`, `_2`, ... before the extension until the name is free.
#[must_use]
pub fn unique_file_name(dest_dir: &Path, file_name: &str) -> String {
    unique_file_name_with(dest_dir, file_name, |path| path.exists())
}

/// Get the first numbered variant of `file_name` in `dest_dir` that is not taken.
fn unique_file_name_with(dest_dir: &Path, file_name: &str, is_taken: impl Fn(&Path) -> bool) -> String {
    let mut unique_name = file_name.to_string();
    let mut counter: u64 = 1;
    while is_taken(&dest_dir.join(&unique_name)) {
        let candidate = insert_suffix_before_extension(Path::new(file_name), &format!("_{counter}"));
        unique_name = crate::path_to_string(&candidate);
        counter += 1;
    }
    unique_name
}

/// Moves files into destination directories without overwriting existing files.
#[derive(Debug, Default)]
pub struct Mover<F: FileOps = SystemFileOps> {
    ops: F,
    policy: RetryPolicy,
    dryrun: bool,
    /// Dry run targets handed out so far.
    planned: HashSet<PathBuf>,
}

impl<F: FileOps> Mover<F> {
    pub fn new(ops: F, policy: RetryPolicy, dryrun: bool) -> Self {
        Self {
            ops,
            policy,
            dryrun,
            planned: HashSet::new(),
        }
    }

    pub const fn ops(&self) -> &F {
        &self.ops
    }

    /// Move `source` into `dest_dir` keeping `file_name`, or a numbered variant of it if taken.
    ///
    /// Permission errors are retried up to the policy attempt count with a wait after each failure.
    /// A missing source file or any other error ends the move immediately.
    /// Every failed attempt is written to the log.
    pub fn move_file<W: Write>(
        &mut self,
        source: &Path,
        dest_dir: &Path,
        file_name: &str,
        log: &mut EventLog<W>,
    ) -> Result<MoveOutcome, MoveError> {
        if self.dryrun {
            let unique_name =
                unique_file_name_with(dest_dir, file_name, |path| path.exists() || self.planned.contains(path));
            let target = dest_dir.join(unique_name);
            self.planned.insert(target.clone());
            log.info(format!(
                "Dry run: would move {} to {}",
                source.display(),
                target.display()
            ));
            return Ok(MoveOutcome::Skipped(SkipReason::DryRun { target }));
        }

        let mut last_error = None;
        for _ in 0..self.policy.attempts.max(1) {
            match self.try_move(source, dest_dir, file_name, log) {
                Ok(outcome) => return Ok(outcome),
                Err(MoveError::PermissionDenied(error)) => {
                    log.error(format!(
                        "Permission error moving {file_name} to {}: {error}",
                        dest_dir.display()
                    ));
                    self.ops.wait(self.policy.delay);
                    last_error = Some(error);
                }
                Err(MoveError::NotFound(error)) => {
                    log.error(format!("File not found: {file_name}. Error: {error}"));
                    return Err(MoveError::NotFound(error));
                }
                Err(MoveError::Other(error)) => {
                    log.error(format!("Error moving {file_name} to {}: {error}", dest_dir.display()));
                    return Err(MoveError::Other(error));
                }
            }
        }

        Err(MoveError::PermissionDenied(
            last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::PermissionDenied)),
        ))
    }

    fn try_move<W: Write>(
        &mut self,
        source: &Path,
        dest_dir: &Path,
        file_name: &str,
        log: &mut EventLog<W>,
    ) -> Result<MoveOutcome, MoveError> {
        ensure_directory_exists(dest_dir, log)?;
        let target = dest_dir.join(unique_file_name(dest_dir, file_name));
        log.info(format!("Moving file from {} to {}", source.display(), target.display()));
        self.ops.rename(source, &target)?;
        let size = match fs::metadata(&target) {
            Ok(metadata) => metadata.len(),
            Err(error) => {
                log.warning(format!("Could not read size of {}: {error}", target.display()));
                0
            }
        };
        Ok(MoveOutcome::Moved { path: target, size })
    }
}

/// Create the directory and its parents if it does not exist yet.
pub fn ensure_directory_exists<W: Write>(directory: &Path, log: &mut EventLog<W>) -> io::Result<()> {
    if !directory.exists() {
        fs::create_dir_all(directory)?;
        log.info(format!("Created directory: {}", directory.display()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::time::SystemTime;

    use tempfile::tempdir;

    /// Fails with the queued error kinds before moving for real, and records waits.
    #[derive(Default)]
    struct FlakyOps {
        failures: VecDeque<io::ErrorKind>,
        renames: usize,
        waits: Vec<Duration>,
    }

    impl FlakyOps {
        fn failing(kinds: &[io::ErrorKind]) -> Self {
            Self {
                failures: kinds.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    impl FileOps for FlakyOps {
        fn rename(&mut self, source: &Path, target: &Path) -> io::Result<()> {
            self.renames += 1;
            match self.failures.pop_front() {
                Some(kind) => Err(io::Error::new(kind, "simulated failure")),
                None => fs::rename(source, target),
            }
        }

        fn wait(&mut self, delay: Duration) {
            self.waits.push(delay);
        }
    }

    /// Removes the source without creating the target.
    struct VanishingOps;

    impl FileOps for VanishingOps {
        fn rename(&mut self, source: &Path, _target: &Path) -> io::Result<()> {
            fs::remove_file(source)
        }
    }

    /// Yields some bytes and then fails like a full disk.
    struct FailingReader {
        remaining: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::other("no space left on device"));
            }
            let count = self.remaining.min(buf.len());
            buf[..count].fill(b'x');
            self.remaining -= count;
            Ok(count)
        }
    }

    fn log_lines(log: &EventLog<Vec<u8>>, level: &str) -> usize {
        String::from_utf8(log.get_ref().clone())
            .unwrap()
            .lines()
            .filter(|line| line.contains(&format!(" - {level} - ")))
            .count()
    }

    fn touch(path: &Path, contents: &[u8]) {
        let mut file = File::create(path).unwrap();
        file.write_all(contents).unwrap();
    }

    #[test]
    fn unique_file_name_free_name_unchanged() {
        let dir = tempdir().unwrap();
        assert_eq!(unique_file_name(dir.path(), "movie.mkv"), "movie.mkv");
    }

    #[test]
    fn unique_file_name_increments_counter() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("movie.mkv"), b"");
        assert_eq!(unique_file_name(dir.path(), "movie.mkv"), "movie_1.mkv");

        touch(&dir.path().join("movie_1.mkv"), b"");
        assert_eq!(unique_file_name(dir.path(), "movie.mkv"), "movie_2.mkv");
    }

    #[test]
    fn unique_file_name_without_extension() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("README"), b"");
        assert_eq!(unique_file_name(dir.path(), "README"), "README_1");
    }

    #[test]
    fn unique_file_name_missing_directory() {
        let dir = tempdir().unwrap();
        assert_eq!(unique_file_name(&dir.path().join("missing"), "a.mkv"), "a.mkv");
    }

    #[test]
    fn moves_file_and_creates_directory() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        touch(&source, b"0123456789");
        let dest_dir = dir.path().join("Movies").join("nested");

        let mut mover = Mover::new(SystemFileOps, RetryPolicy::default(), false);
        let mut log = EventLog::new(Vec::<u8>::new());
        let outcome = mover.move_file(&source, &dest_dir, "movie.mkv", &mut log).unwrap();

        assert_eq!(
            outcome,
            MoveOutcome::Moved {
                path: dest_dir.join("movie.mkv"),
                size: 10
            }
        );
        assert!(!source.exists());
        assert!(dest_dir.join("movie.mkv").exists());
        let text = String::from_utf8(log.get_ref().clone()).unwrap();
        assert!(text.contains("Created directory:"));
    }

    #[test]
    fn renames_on_collision_without_overwriting() {
        let dir = tempdir().unwrap();
        let dest_dir = dir.path().join("Movies");
        fs::create_dir(&dest_dir).unwrap();
        touch(&dest_dir.join("movie.mkv"), b"old");
        let source = dir.path().join("movie.mkv");
        touch(&source, b"new");

        let mut mover = Mover::<SystemFileOps>::default();
        let mut log = EventLog::new(Vec::<u8>::new());
        let outcome = mover.move_file(&source, &dest_dir, "movie.mkv", &mut log).unwrap();

        assert!(matches!(outcome, MoveOutcome::Moved { ref path, .. } if *path == dest_dir.join("movie_1.mkv")));
        assert_eq!(fs::read(dest_dir.join("movie.mkv")).unwrap(), b"old");
        assert_eq!(fs::read(dest_dir.join("movie_1.mkv")).unwrap(), b"new");
    }

    #[test]
    fn retries_permission_denied_then_succeeds() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("locked.mkv");
        touch(&source, b"data");
        let dest_dir = dir.path().join("Movies");

        let ops = FlakyOps::failing(&[io::ErrorKind::PermissionDenied, io::ErrorKind::PermissionDenied]);
        let mut mover = Mover::new(ops, RetryPolicy::default(), false);
        let mut log = EventLog::new(Vec::<u8>::new());
        let outcome = mover.move_file(&source, &dest_dir, "locked.mkv", &mut log).unwrap();

        assert!(matches!(outcome, MoveOutcome::Moved { size: 4, .. }));
        assert_eq!(mover.ops.renames, 3);
        assert_eq!(mover.ops.waits, vec![Duration::from_secs(5); 2]);
        assert_eq!(log_lines(&log, "ERROR"), 2);
        assert!(dest_dir.join("locked.mkv").exists());
    }

    #[test]
    fn gives_up_after_three_permission_errors() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("locked.mkv");
        touch(&source, b"data");
        let dest_dir = dir.path().join("Movies");

        let ops = FlakyOps::failing(&[io::ErrorKind::PermissionDenied; 3]);
        let mut mover = Mover::new(ops, RetryPolicy::default(), false);
        let mut log = EventLog::new(Vec::<u8>::new());
        let result = mover.move_file(&source, &dest_dir, "locked.mkv", &mut log);

        assert!(matches!(result, Err(MoveError::PermissionDenied(_))));
        assert_eq!(mover.ops.renames, 3);
        assert_eq!(mover.ops.waits.len(), 3);
        assert_eq!(log_lines(&log, "ERROR"), 3);
        assert!(source.exists());
        assert!(!dest_dir.join("locked.mkv").exists());
    }

    #[test]
    fn not_found_is_not_retried() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("gone.mkv");
        let dest_dir = dir.path().join("Movies");

        let ops = FlakyOps::failing(&[io::ErrorKind::NotFound]);
        let mut mover = Mover::new(ops, RetryPolicy::default(), false);
        let mut log = EventLog::new(Vec::<u8>::new());
        let result = mover.move_file(&source, &dest_dir, "gone.mkv", &mut log);

        assert!(matches!(result, Err(MoveError::NotFound(_))));
        assert_eq!(mover.ops.renames, 1);
        assert!(mover.ops.waits.is_empty());
        assert_eq!(log_lines(&log, "ERROR"), 1);
    }

    #[test]
    fn missing_source_with_real_filesystem_is_not_found() {
        let dir = tempdir().unwrap();
        let mut mover = Mover::<SystemFileOps>::default();
        let mut log = EventLog::new(Vec::<u8>::new());
        let result = mover.move_file(&dir.path().join("gone.mkv"), dir.path(), "gone.mkv", &mut log);
        assert!(matches!(result, Err(MoveError::NotFound(_))));
    }

    #[test]
    fn other_errors_are_not_retried() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("file.mkv");
        touch(&source, b"");

        let ops = FlakyOps::failing(&[io::ErrorKind::InvalidInput]);
        let mut mover = Mover::new(ops, RetryPolicy::default(), false);
        let mut log = EventLog::new(Vec::<u8>::new());
        let result = mover.move_file(&source, &dir.path().join("Movies"), "file.mkv", &mut log);

        assert!(matches!(result, Err(MoveError::Other(_))));
        assert_eq!(mover.ops.renames, 1);
        assert!(mover.ops.waits.is_empty());
        assert_eq!(log_lines(&log, "ERROR"), 1);
        assert!(source.exists());
    }

    #[test]
    fn dry_run_does_not_touch_filesystem() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        touch(&source, b"");
        let dest_dir = dir.path().join("Movies");

        let mut mover = Mover::new(FlakyOps::default(), RetryPolicy::default(), true);
        let mut log = EventLog::new(Vec::<u8>::new());
        let outcome = mover.move_file(&source, &dest_dir, "movie.mkv", &mut log).unwrap();

        assert_eq!(
            outcome,
            MoveOutcome::Skipped(SkipReason::DryRun {
                target: dest_dir.join("movie.mkv")
            })
        );
        assert_eq!(mover.ops.renames, 0);
        assert!(source.exists());
        assert!(!dest_dir.exists());
    }

    #[test]
    fn dry_run_reserves_planned_names() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("a").join("Film.avi");
        let second = dir.path().join("b").join("Film.avi");
        let dest_dir = dir.path().join("Movies");

        let mut mover = Mover::new(SystemFileOps, RetryPolicy::default(), true);
        let mut log = EventLog::new(Vec::<u8>::new());
        let first_outcome = mover.move_file(&first, &dest_dir, "Film.avi", &mut log).unwrap();
        let second_outcome = mover.move_file(&second, &dest_dir, "Film.avi", &mut log).unwrap();

        assert_eq!(
            first_outcome,
            MoveOutcome::Skipped(SkipReason::DryRun {
                target: dest_dir.join("Film.avi")
            })
        );
        assert_eq!(
            second_outcome,
            MoveOutcome::Skipped(SkipReason::DryRun {
                target: dest_dir.join("Film_1.avi")
            })
        );
    }

    #[test]
    fn completed_move_without_size_is_still_moved() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        touch(&source, b"data");
        let dest_dir = dir.path().join("Movies");

        let mut mover = Mover::new(VanishingOps, RetryPolicy::default(), false);
        let mut log = EventLog::new(Vec::<u8>::new());
        let outcome = mover.move_file(&source, &dest_dir, "movie.mkv", &mut log).unwrap();

        assert_eq!(
            outcome,
            MoveOutcome::Moved {
                path: dest_dir.join("movie.mkv"),
                size: 0
            }
        );
        assert_eq!(log_lines(&log, "WARNING"), 1);
        assert_eq!(log_lines(&log, "ERROR"), 0);
    }

    #[test]
    fn move_across_devices_copies_and_removes_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        touch(&source, b"0123456789");
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        File::options()
            .write(true)
            .open(&source)
            .unwrap()
            .set_modified(modified)
            .unwrap();
        let target = dir.path().join("moved.mkv");

        move_across_devices(&source, &target).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&target).unwrap(), b"0123456789");
        assert_eq!(fs::metadata(&target).unwrap().modified().unwrap(), modified);
    }

    #[test]
    fn move_across_devices_keeps_existing_target() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("movie.mkv");
        touch(&source, b"new");
        let target = dir.path().join("taken.mkv");
        touch(&target, b"old");

        let error = move_across_devices(&source, &target).unwrap_err();

        assert_eq!(error.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&source).unwrap(), b"new");
        assert_eq!(fs::read(&target).unwrap(), b"old");
    }

    #[test]
    fn failed_copy_removes_partial_target() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("partial.mkv");
        let mut reader = FailingReader { remaining: 100_000 };

        let error = copy_to_new_file(&mut reader, &target).unwrap_err();

        assert_eq!(error.kind(), io::ErrorKind::Other);
        assert!(!target.exists());
        assert_eq!(unique_file_name(dir.path(), "partial.mkv"), "partial.mkv");
    }

    #[test]
    fn io_error_kinds_map_to_move_errors() {
        let denied = MoveError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        let missing = MoveError::from(io::Error::from(io::ErrorKind::NotFound));
        let other = MoveError::from(io::Error::from(io::ErrorKind::AlreadyExists));
        assert!(matches!(denied, MoveError::PermissionDenied(_)));
        assert!(matches!(missing, MoveError::NotFound(_)));
        assert!(matches!(other, MoveError::Other(_)));
    }
}
