//! Advisory lock serializing writers of one data directory.
//!
//! An exclusive `flock` on `<data dir>/.lock`, held for one read-modify-write
//! cycle and released on drop. Every acquisition opens its own descriptor, so
//! two handles inside one process exclude each other the same way two
//! processes do.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;

pub(crate) const LOCK_FILE: &str = ".lock";

pub(crate) struct StoreLock {
    file: File,
}

impl StoreLock {
    /// Block until the lock at `path` is ours.
    pub(crate) fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        loop {
            match lock_file_blocking(&file) {
                Ok(()) => return Ok(Self { file }),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // The file itself stays: removing it would let a waiter lock a
        // stale inode while a newcomer locks a fresh one.
        let _ = unlock_file(&self.file);
    }
}

#[cfg(unix)]
fn lock_file_blocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_EX) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(unix)]
extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("tally file storage locks currently require Unix (macOS/Linux)");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_second_acquire_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(LOCK_FILE);

        let held = StoreLock::acquire(&path).unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = {
            let path = path.clone();
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _lock = StoreLock::acquire(&path).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(held);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
        assert!(path.exists());
    }
}
