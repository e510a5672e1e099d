//! Process-level locks so two passes of the same kind never overlap.
//!
//! Lock strategy:
//! - `beacon-escalate.lock` marks an active escalation pass (or watch loop).
//! - `beacon-brief.lock` marks an active daily brief pass.
//! - Lock files are scoped to the database path, so passes against
//!   different databases do not contend.
//! - Locks are advisory OS file locks (flock), held for process lifetime.

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

/// Kind of batch pass holding the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Escalate,
    Brief,
}

impl PassKind {
    fn lock_filename(&self) -> &'static str {
        match self {
            PassKind::Escalate => "beacon-escalate.lock",
            PassKind::Brief => "beacon-brief.lock",
        }
    }

    fn binary(&self) -> &'static str {
        match self {
            PassKind::Escalate => "beacon-escalate",
            PassKind::Brief => "beacon-brief",
        }
    }
}

/// Guard held for the lifetime of a pass
pub struct PassGuard {
    _lock: ProcessLock,
}

/// Acquire the lock for `kind` against `db_path`.
///
/// Fails if another pass of the same kind already holds it.
pub fn acquire_pass_guard(kind: PassKind, db_path: &Path) -> Result<PassGuard> {
    match try_acquire_lock(kind.lock_filename(), db_path)? {
        Some(lock) => Ok(PassGuard { _lock: lock }),
        None => anyhow::bail!(
            "another {} pass is already running against {}",
            kind.binary(),
            db_path.display()
        ),
    }
}

struct ProcessLock {
    file: File,
    path: PathBuf,
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        let _ = unlock_file(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

fn try_acquire_lock(filename: &str, db_path: &Path) -> Result<Option<ProcessLock>> {
    let dir = lock_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create runtime lock directory: {}", dir.display()))?;

    let path = dir.join(scoped_lock_filename(filename, db_path));
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .with_context(|| format!("failed to open lock file: {}", path.display()))?;

    match lock_file_nonblocking(&file) {
        Ok(()) => {
            // Owner info for debugging
            let _ = file.set_len(0);
            let _ = file.seek(SeekFrom::Start(0));
            let _ = writeln!(file, "pid={}", std::process::id());
            let _ = file.flush();

            Ok(Some(ProcessLock { file, path }))
        }
        Err(e) if is_lock_busy(&e) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to lock file: {}", path.display())),
    }
}

fn lock_dir() -> PathBuf {
    let mut dir = match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => std::env::temp_dir(),
    };
    dir.push("beacon");
    dir
}

fn scoped_lock_filename(base_filename: &str, db_path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    db_path.to_string_lossy().hash(&mut hasher);
    let digest = hasher.finish();
    format!("{base_filename}.{digest:016x}")
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

#[cfg(unix)]
fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
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
unsafe extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
compile_error!("beacon process locks currently require Unix (macOS/Linux)");
