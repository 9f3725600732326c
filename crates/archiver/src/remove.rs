//! Removal of corrupt outputs with retry while the file is locked.
//!
//! Editing applications and file indexers commonly hold a handle on a
//! freshly failed render for a moment after it exits, so a busy file is
//! retried a bounded number of times before the target is given up on.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Errors that can occur while removing a file.
#[derive(Debug, Error)]
pub enum RemoveError {
    /// The file stayed busy for every attempt.
    #[error("{} still locked after {attempts} attempts: {source}", path.display())]
    Locked {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// A non-lock failure; not retried.
    #[error("Failed to remove {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Checks if an I/O error means the file is busy or locked.
pub fn is_lock_error(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    match err.raw_os_error() {
        // EBUSY, ETXTBSY
        #[cfg(unix)]
        Some(16) | Some(26) => true,
        // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
        #[cfg(windows)]
        Some(32) | Some(33) => true,
        _ => false,
    }
}

/// Removes `path`, retrying lock errors up to `attempts` times with `delay`
/// between tries.
///
/// Returns the number of attempts used. A file that is already gone counts
/// as removed.
pub fn remove_with_retry(path: &Path, attempts: u32, delay: Duration) -> Result<u32, RemoveError> {
    remove_with_retry_by(path, attempts, delay, |p| fs::remove_file(p))
}

/// [`remove_with_retry`] with the single-attempt removal supplied by the caller.
pub fn remove_with_retry_by<F>(
    path: &Path,
    attempts: u32,
    delay: Duration,
    mut remove: F,
) -> Result<u32, RemoveError>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match remove(path) {
            Ok(()) => return Ok(attempt),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(attempt),
            Err(e) if is_lock_error(&e) => {
                if attempt >= attempts {
                    return Err(RemoveError::Locked {
                        path: path.to_path_buf(),
                        attempts: attempt,
                        source: e,
                    });
                }
                warn!(
                    "{} is locked (attempt {}/{}), retrying in {:?}: {}",
                    path.display(),
                    attempt,
                    attempts,
                    delay,
                    e
                );
                thread::sleep(delay);
            }
            Err(e) => {
                return Err(RemoveError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }
    }
}
