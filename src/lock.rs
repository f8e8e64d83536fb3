//! Advisory process lock held by every mutating command.

use crate::errors::{ArchiveError, ArchiveResult};
use std::{
    fs::{File, OpenOptions},
    io,
    os::unix::io::AsRawFd,
    path::Path,
};
use tracing::debug;

pub const LOCK_FILENAME: &str = ".epg_downloader.lock";

/// Exclusive `flock` on `{directory}/.epg_downloader.lock`. The kernel drops
/// the lock when the file is closed, so it dies with the process.
#[derive(Debug)]
pub struct ProcessLock {
    _file: File,
}

impl ProcessLock {
    /// Take the lock or fail with `Locked` when another invocation holds it.
    pub fn acquire(directory: &Path) -> ArchiveResult<Self> {
        std::fs::create_dir_all(directory)?;
        let path = directory.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        // SAFETY: the descriptor belongs to `file`, which outlives the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EWOULDBLOCK) => ArchiveError::Locked(path),
                _ => ArchiveError::Io(err),
            });
        }

        debug!(path = %path.display(), "acquired process lock");
        Ok(Self { _file: file })
    }
}
