//! Host-local single-instance lock.
//!
//! The lock is a file whose whole content is the decimal pid of its holder.
//! It is published with `link(2)` from a fully written temp file, so the
//! lock path either does not exist or names a complete pid; two processes
//! racing for it cannot both succeed.
//!
//! A lock whose pid no longer runs is stale and is reclaimed on the next
//! attempt. Publication and reclaim both run under a `flock` on a sidecar
//! `.<name>.gate` file, so a reclaim can never remove a lock that another
//! contender published after the staleness check. The [`RunLockGuard`] removes the file on drop, which covers
//! normal returns, `?` propagation and unwinding panics. A signal handler
//! can call [`release_if_owned`]. Nothing runs on `SIGKILL`, which is why the
//! liveness check exists at all.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(not(target_os = "linux"))]
use std::time::{Duration, SystemTime};

use fs2::FileExt;

use crate::error::{SyncError, SyncResult};

const ACQUIRE_ATTEMPTS: usize = 3;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Without a `/proc` probe, a lock older than this is presumed abandoned.
/// It exceeds the sum of the default fetch, merge and ledger timeouts by a
/// wide margin.
#[cfg(not(target_os = "linux"))]
pub const LOCK_STALE_AFTER: Duration = Duration::from_secs(30 * 60);

/// Result of a non-blocking acquisition attempt.
#[derive(Debug)]
pub enum LockAttempt {
    Acquired(RunLockGuard),
    /// A live process holds the lock.
    Held { pid: u32 },
}

#[derive(Debug, Clone)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pid of the live holder, if any. A missing, unreadable-as-pid or
    /// dead-owner lock file all report `None`.
    pub fn live_holder(&self) -> SyncResult<Option<u32>> {
        Ok(match read_lock(&self.path)? {
            LockContent::Pid(pid) if holder_is_live(&self.path, pid) => Some(pid),
            _ => None,
        })
    }

    /// Attempts to take the lock without waiting for a live holder.
    ///
    /// Publication and stale reclaim happen under an exclusive `flock` on a
    /// sidecar gate file, so two contenders can never both remove a stale
    /// lock and then both publish their own. The gate is held only for this
    /// call and is dropped by the kernel if the process dies.
    pub fn try_acquire(&self) -> SyncResult<LockAttempt> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let gate = open_gate(&self.path)?;
        gate.lock_exclusive()?;

        let pid = std::process::id();
        for _ in 0..ACQUIRE_ATTEMPTS {
            if publish_lock(&self.path, pid)? {
                tracing::debug!(path = %self.path.display(), pid, "run lock acquired");
                return Ok(LockAttempt::Acquired(RunLockGuard {
                    path: self.path.clone(),
                    pid,
                    released: false,
                }));
            }

            match read_lock(&self.path)? {
                // The holder released between our publish and read.
                LockContent::Missing => continue,
                LockContent::Pid(holder) if holder_is_live(&self.path, holder) => {
                    return Ok(LockAttempt::Held { pid: holder });
                }
                stale => self.reclaim(&stale)?,
            }
        }

        Err(exhausted(&self.path))
    }

    /// Removes a stale lock. Callers hold the gate, so nobody can publish
    /// between the staleness verdict and the removal.
    fn reclaim(&self, observed: &LockContent) -> SyncResult<()> {
        tracing::warn!(
            path = %self.path.display(),
            previous = %observed,
            "reclaiming stale run lock"
        );
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// Ownership of the run lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct RunLockGuard {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl RunLockGuard {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Releases the lock now. Idempotent with the drop-time release.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if release_if_owned(&self.path, self.pid) {
            tracing::debug!(path = %self.path.display(), "run lock released");
        }
    }
}

impl Drop for RunLockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Removes the lock at `path` if, and only if, it names `pid`.
///
/// Never fails: problems are logged. Returns whether a file was removed.
pub fn release_if_owned(path: &Path, pid: u32) -> bool {
    match read_lock(path) {
        Ok(LockContent::Pid(holder)) if holder == pid => match fs::remove_file(path) {
            Ok(()) => true,
            Err(error) => {
                if error.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), %error, "failed to remove run lock");
                }
                false
            }
        },
        Ok(_) => false,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "failed to read run lock on release");
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LockContent {
    Missing,
    Pid(u32),
    Corrupt(String),
}

impl std::fmt::Display for LockContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => f.write_str("missing"),
            Self::Pid(pid) => write!(f, "pid {pid}"),
            Self::Corrupt(raw) => write!(f, "corrupt content {raw:?}"),
        }
    }
}

fn read_lock(path: &Path) -> SyncResult<LockContent> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(parse_lock(&raw)),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(LockContent::Missing),
        Err(error) => Err(error.into()),
    }
}

fn parse_lock(raw: &str) -> LockContent {
    match raw.trim().parse::<u32>() {
        Ok(pid) if pid > 0 => LockContent::Pid(pid),
        _ => LockContent::Corrupt(raw.trim().chars().take(32).collect()),
    }
}

/// Writes the pid to a private temp file and hard-links it into place.
/// Returns `false` when the lock path already exists.
fn publish_lock(path: &Path, pid: u32) -> SyncResult<bool> {
    let staging = staging_path(path, pid);
    {
        let mut file = fs::File::create(&staging)?;
        file.write_all(pid.to_string().as_bytes())?;
        file.sync_all()?;
    }
    let linked = fs::hard_link(&staging, path);
    let _ = fs::remove_file(&staging);
    match linked {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(error) => Err(error.into()),
    }
}

fn staging_path(path: &Path, pid: u32) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "run.lock".into(), |name| name.to_string_lossy());
    let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.{pid}.{seq}.tmp"))
}

fn exhausted(path: &Path) -> SyncError {
    SyncError::Io(io::Error::other(format!(
        "could not claim run lock {} after {ACQUIRE_ATTEMPTS} attempts",
        path.display()
    )))
}

/// Sidecar file whose `flock` serializes publication and reclaim. It is
/// never removed; deleting it would let a new opener lock a different inode.
fn gate_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "run.lock".into(), |name| name.to_string_lossy());
    path.with_file_name(format!(".{name}.gate"))
}

fn open_gate(path: &Path) -> SyncResult<fs::File> {
    let gate = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(gate_path(path))?;
    Ok(gate)
}

#[cfg(target_os = "linux")]
fn holder_is_live(_path: &Path, pid: u32) -> bool {
    pid_is_alive(pid)
}

#[cfg(not(target_os = "linux"))]
fn holder_is_live(path: &Path, _pid: u32) -> bool {
    let age = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok());
    age.is_none_or(|age| age < LOCK_STALE_AFTER)
}

#[cfg(target_os = "linux")]
fn pid_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}
