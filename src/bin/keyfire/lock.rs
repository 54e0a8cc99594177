// Keyfire CLI - Instance Lock
// One daemon per user via flock on a runtime file

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

const LOCK_FILE_NAME: &str = "keyfire.lock";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another instance holds {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("failed to lock {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// `$XDG_RUNTIME_DIR/keyfire.lock`, or under /tmp without a runtime dir
pub fn default_lock_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(LOCK_FILE_NAME)
}

/// Exclusive lock held for the life of the value
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let io_error = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(io_error)?;

        // SAFETY: flock on a descriptor owned by `file`.
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(LockError::AlreadyRunning(path.to_path_buf()));
            }
            return Err(io_error(err));
        }

        file.set_len(0).map_err(io_error)?;
        writeln!(file, "{}", std::process::id()).map_err(io_error)?;
        log::debug!("Locked {}", path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // SAFETY: unlocking our own descriptor; closing the file would too.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        log::debug!("Released {}", self.path.display());
    }
}
