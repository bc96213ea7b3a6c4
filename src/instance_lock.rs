use anyhow::{anyhow, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// Single-session lock using flock(2). While held, this process owns the
/// device connection and is the only writer of the preset store.
pub struct InstanceLock {
    _file: File,
    lock_path: PathBuf,
}

impl InstanceLock {
    /// Acquire the lock at the default location.
    pub fn acquire() -> Result<Self> {
        Self::acquire_at(&Self::lock_file_path())
    }

    /// Returns Err if another session holds the lock.
    pub fn acquire_at(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };

        if result != 0 {
            return Err(anyhow!(
                "Another subtune session is already controlling the subwoofer.\n\
                 Lock file: {}",
                lock_path.display()
            ));
        }

        // PID for debugging
        let mut file_clone = file.try_clone()?;
        file_clone.set_len(0)?;
        writeln!(file_clone, "{}", std::process::id())?;
        file_clone.flush()?;

        Ok(Self {
            _file: file,
            lock_path: lock_path.to_path_buf(),
        })
    }

    fn lock_file_path() -> PathBuf {
        let lock_dir = std::env::var("XDG_RUNTIME_DIR")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        lock_dir.join("subtune.lock")
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // flock is released with the descriptor
        let _ = std::fs::remove_file(&self.lock_path);
    }
}
