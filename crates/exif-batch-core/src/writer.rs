use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::NaiveDateTime;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::collection::Download;
use crate::error::CancelledError;
use crate::ThrottledProgress;

/// Result of the write phase.
#[derive(Debug)]
pub struct WriteResult {
    /// Destination of each download, in input order.
    pub assignments: Vec<PathBuf>,
    pub files_written: u64,
}

fn existing_files(dir: &Path) -> HashSet<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return HashSet::new();
    };
    entries.flatten().map(|entry| entry.path()).collect()
}

/// Pick a destination for `name` that is neither taken on disk nor by an
/// earlier download of this batch: `name`, then `stem(1).ext`, `stem(2).ext`, ...
fn assign_path(dir: &Path, name: &str, taken: &HashSet<PathBuf>, used: &HashSet<PathBuf>) -> PathBuf {
    let base = dir.join(name);
    if !taken.contains(&base) && !used.contains(&base) {
        return base;
    }

    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("photo");
    let ext = Path::new(name).extension().and_then(|s| s.to_str()).unwrap_or("");
    let mut counter = 1u32;
    loop {
        let candidate = if ext.is_empty() {
            dir.join(format!("{}({})", stem, counter))
        } else {
            dir.join(format!("{}({}).{}", stem, counter, ext))
        };
        if !taken.contains(&candidate) && !used.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Set the file's modification time to the capture date, read as local time.
fn set_mtime(dest: &Path, timestamp: &NaiveDateTime) {
    let Some(local) = timestamp.and_local_timezone(chrono::Local).earliest() else {
        warn!(path = %dest.display(), "capture date does not exist in the local timezone");
        return;
    };
    let ft = filetime::FileTime::from_unix_time(local.timestamp(), 0);
    if let Err(e) = filetime::set_file_mtime(dest, ft) {
        warn!(path = %dest.display(), error = %e, "cannot set modification time");
    }
}

/// Write every download into `output_dir`.
///
/// Existing files are left alone (the download gets a `(N)` suffix) unless
/// `force` is set, in which case they are overwritten.
pub fn write_output(
    downloads: &[Download<'_>],
    output_dir: &Path,
    force: bool,
    set_file_times: bool,
    progress: &ThrottledProgress,
    cancel_token: Option<&CancellationToken>,
) -> anyhow::Result<WriteResult> {
    fs::create_dir_all(output_dir)?;

    // Phase 1: assign destination paths (sequential, needs collision tracking)
    let taken = if force { HashSet::new() } else { existing_files(output_dir) };
    let mut used: HashSet<PathBuf> = HashSet::with_capacity(downloads.len());
    let mut assignments: Vec<PathBuf> = Vec::with_capacity(downloads.len());
    for d in downloads {
        let dest = assign_path(output_dir, d.name, &taken, &used);
        used.insert(dest.clone());
        assignments.push(dest);
    }

    // Phase 2: write in parallel
    let total = downloads.len() as u64;
    let counter = AtomicU64::new(0);
    let cancelled = AtomicBool::new(false);

    downloads
        .par_iter()
        .zip(assignments.par_iter())
        .try_for_each(|(d, dest)| -> anyhow::Result<()> {
            if cancel_token.map_or(false, CancellationToken::is_cancelled) {
                cancelled.store(true, Ordering::SeqCst);
                return Ok(());
            }

            fs::write(dest, &d.bytes[..])?;
            if set_file_times {
                set_mtime(dest, &d.timestamp);
            }
            debug!(name = d.name, path = %dest.display(), "wrote photo");

            let current = counter.fetch_add(1, Ordering::Relaxed);
            progress.report("write", current, total, "Writing photos");
            Ok(())
        })?;

    if cancelled.load(Ordering::SeqCst) {
        return Err(CancelledError.into());
    }

    Ok(WriteResult {
        assignments,
        files_written: counter.into_inner(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use img_parts::Bytes;
    use tempfile::tempdir;

    fn quiet(_: &str, _: u64, _: u64, _: &str) {}

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(10, 0, 0).unwrap()
    }

    #[test]
    fn test_assign_path_counters() {
        let dir = Path::new("/out");
        let taken: HashSet<PathBuf> = [dir.join("a.jpg"), dir.join("a(1).jpg")].into_iter().collect();
        let used = HashSet::new();
        assert_eq!(assign_path(dir, "a.jpg", &taken, &used), dir.join("a(2).jpg"));
        assert_eq!(assign_path(dir, "b.jpg", &taken, &used), dir.join("b.jpg"));

        let used: HashSet<PathBuf> = [dir.join("c")].into_iter().collect();
        assert_eq!(assign_path(dir, "c", &HashSet::new(), &used), dir.join("c(1)"));
    }

    #[test]
    fn test_write_keeps_existing_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"old").unwrap();
        let bytes = Bytes::from_static(b"new");
        let downloads = [Download { name: "a.jpg", timestamp: stamp(), bytes: &bytes }];

        let result =
            write_output(&downloads, dir.path(), false, false, &ThrottledProgress::new(&quiet), None).unwrap();
        assert_eq!(result.files_written, 1);
        assert_eq!(result.assignments, vec![dir.path().join("a(1).jpg")]);
        assert_eq!(fs::read(dir.path().join("a.jpg")).unwrap(), b"old");
        assert_eq!(fs::read(dir.path().join("a(1).jpg")).unwrap(), b"new");
    }

    #[test]
    fn test_write_force_overwrites() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.jpg"), b"old").unwrap();
        let bytes = Bytes::from_static(b"new");
        let downloads = [Download { name: "a.jpg", timestamp: stamp(), bytes: &bytes }];

        let result =
            write_output(&downloads, dir.path(), true, false, &ThrottledProgress::new(&quiet), None).unwrap();
        assert_eq!(result.assignments, vec![dir.path().join("a.jpg")]);
        assert_eq!(fs::read(dir.path().join("a.jpg")).unwrap(), b"new");
    }

    #[test]
    fn test_write_sets_mtime() {
        let dir = tempdir().unwrap();
        let bytes = Bytes::from_static(b"x");
        let downloads = [Download { name: "a.jpg", timestamp: stamp(), bytes: &bytes }];
        write_output(&downloads, dir.path(), false, true, &ThrottledProgress::new(&quiet), None).unwrap();

        let meta = fs::metadata(dir.path().join("a.jpg")).unwrap();
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        let expected = stamp().and_local_timezone(chrono::Local).earliest().unwrap().timestamp();
        assert_eq!(mtime.unix_seconds(), expected);
    }

    #[test]
    fn test_write_cancelled() {
        let dir = tempdir().unwrap();
        let bytes = Bytes::from_static(b"x");
        let downloads = [Download { name: "a.jpg", timestamp: stamp(), bytes: &bytes }];
        let token = CancellationToken::new();
        token.cancel();

        let err = write_output(&downloads, dir.path(), false, false, &ThrottledProgress::new(&quiet), Some(&token))
            .unwrap_err();
        assert!(err.downcast_ref::<CancelledError>().is_some());
        assert!(!dir.path().join("a.jpg").exists());
    }
}
