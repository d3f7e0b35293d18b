//! Filesystem utilities for the crash-safe store rewrite.
//!
//! A commit rewrites the entire store into a temporary file in the same
//! directory and then renames it over the original. On POSIX that rename
//! is atomic: either the old store or the complete new one is visible,
//! never a partial write. A short-lived advisory `flock(2)` (via the `fs2`
//! crate) brackets the create/rename window so two processes can't swap
//! the same store at once; it is never held across slow work.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::error::{StrataError, StrataResult};

/// Exclusive lock around the swap window.
///
/// Held for the lifetime of the value; the OS releases it automatically
/// when dropped or when the process dies, so there is no stale-lock state
/// to clean up.
pub struct SwapGuard {
    _file: File,
}

impl SwapGuard {
    /// Acquire the swap lock for `store_path`, polling until `timeout`.
    pub fn acquire(store_path: &Path, timeout: Duration) -> StrataResult<SwapGuard> {
        let lock_path = lock_path_for(store_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        let start = Instant::now();
        let poll_interval = Duration::from_millis(10);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(SwapGuard { _file: file }),
                Err(_) if start.elapsed() >= timeout => {
                    return Err(StrataError::Semantic(format!(
                        "store {} is busy (swap lock timed out)",
                        store_path.display()
                    )));
                }
                Err(_) => std::thread::sleep(poll_interval),
            }
        }
    }
}

fn lock_path_for(store_path: &Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    store_path.with_file_name(name)
}

/// Replace `path` with `contents` atomically, preserving its mode bits.
///
/// The data is written and fsynced to a temp file in the same directory
/// (renames don't cross filesystems), then renamed into place. Any failure
/// before the rename leaves the original untouched; the temp file is
/// cleaned up on drop.
pub fn atomic_replace(path: &Path, contents: &str) -> StrataResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_data()?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())?;
    }
    tmp.persist(path).map_err(|e| StrataError::Io(e.error))?;
    Ok(())
}

/// Whether the current process owns the file at `path`.
///
/// Compared against the uid a freshly created file gets, so no extra
/// crate is needed for the process uid. On non-Unix there is no uid to
/// compare, so everyone counts as the owner.
#[cfg(unix)]
pub fn process_owns(path: &Path) -> StrataResult<bool> {
    use std::os::unix::fs::MetadataExt;

    let file_uid = fs::metadata(path)?.uid();
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let probe = NamedTempFile::new_in(dir)?;
    let my_uid = probe.as_file().metadata()?.uid();
    Ok(file_uid == my_uid)
}

#[cfg(not(unix))]
pub fn process_owns(_path: &Path) -> StrataResult<bool> {
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_replace_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store,v");
        atomic_replace(&path, "head\t;\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "head\t;\n");
    }

    #[test]
    fn test_atomic_replace_overwrites_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store,v");
        fs::write(&path, "old contents that are much longer than the new").unwrap();
        atomic_replace(&path, "new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_replace_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store,v");
        fs::write(&path, "old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o444)).unwrap();
        atomic_replace(&path, "new").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o444);
    }

    #[test]
    fn test_swap_guard_excludes_second_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store,v");
        let _guard = SwapGuard::acquire(&path, Duration::from_secs(1)).unwrap();
        let second = SwapGuard::acquire(&path, Duration::from_millis(50));
        assert!(second.is_err());
    }

    #[test]
    fn test_swap_guard_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store,v");
        {
            let _guard = SwapGuard::acquire(&path, Duration::from_secs(1)).unwrap();
        }
        assert!(SwapGuard::acquire(&path, Duration::from_secs(1)).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_owns_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store,v");
        fs::write(&path, "x").unwrap();
        assert!(process_owns(&path).unwrap());
    }
}
