//! Cross-process mutual exclusion around a ledger's read-modify-write cycle.
//!
//! Two processes that both load the ledger, both see a slot as free, and both
//! append would break the no-overlap invariant. Holding a [`LedgerLock`] for
//! the whole load → select → append sequence rules that out.
//!
//! The lock is a sibling file (`<ledger>.lock`) created with exclusive-create
//! semantics, so only one process can win. It records who holds it and when
//! it expires. The holder pushes the expiry forward with
//! [`LedgerLock::renew`]; [`LockedLedger`] does so before every load and
//! append. A lock past its expiry is considered abandoned by a crashed process
//! and is taken over.
//!
//! Taking over and renewing both happen under a short-lived takeover guard
//! (`<ledger>.lock.takeover`), and a stale lock is only removed if its
//! contents are still exactly what was judged stale. A slow process can
//! therefore never delete a lock that someone else has just acquired or
//! renewed.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{BookingError, Result};
use crate::ledger::{CommittedBooking, Ledger};

/// Default lock TTL (5 minutes).
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(300);

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 8;

const BACKOFF_BASE: Duration = Duration::from_millis(50);
const BACKOFF_MAX: Duration = Duration::from_secs(1);

const GUARD_POLL: Duration = Duration::from_millis(10);
const GUARD_ATTEMPTS: u32 = 200;
/// A takeover guard only lives for a read and a write; older ones were left
/// by a crashed process.
const GUARD_STALE: Duration = Duration::from_secs(10);

/// Contents of the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockInfo {
    holder_id: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl LockInfo {
    fn new(holder_id: &str, acquired_at: DateTime<Utc>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            holder_id: holder_id.to_string(),
            pid: std::process::id(),
            acquired_at,
            expires_at: Utc::now().checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    fn describe(&self) -> String {
        format!(
            "{} (pid {}, since {}, until {})",
            self.holder_id, self.pid, self.acquired_at, self.expires_at
        )
    }
}

/// The lock file as read at one moment.
#[derive(Debug, PartialEq)]
struct Snapshot {
    raw: Vec<u8>,
    modified: Option<SystemTime>,
}

impl Snapshot {
    fn info(&self) -> Option<LockInfo> {
        serde_json::from_slice(&self.raw).ok()
    }

    /// Expired according to its recorded expiry. A file without a readable
    /// expiry (foreign, or torn by a crash during creation) falls back to its
    /// modification time.
    fn is_stale(&self, ttl: Duration) -> bool {
        match self.info() {
            Some(info) => info.expires_at <= Utc::now(),
            None => self
                .modified
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .is_some_and(|age| age > ttl),
        }
    }

    fn holder(&self) -> String {
        self.info()
            .map(|info| info.describe())
            .unwrap_or_else(|| "unknown holder".to_string())
    }
}

/// Guard for an acquired ledger lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct LedgerLock {
    path: PathBuf,
    holder_id: String,
    acquired_at: DateTime<Utc>,
    ttl: Duration,
}

impl LedgerLock {
    /// The lock file used for the ledger at `ledger_path`.
    pub fn lock_path_for(ledger_path: &Path) -> PathBuf {
        let mut name = ledger_path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("ledger"));
        name.push(".lock");
        ledger_path.with_file_name(name)
    }

    /// Acquire the lock for the ledger at `ledger_path`, retrying with capped
    /// exponential backoff. The lock expires `ttl` after acquisition unless
    /// renewed.
    ///
    /// # Errors
    /// Returns `BookingError::LedgerLocked` if another live holder keeps the
    /// lock through every retry, or `StorageUnavailable` if the lock file
    /// cannot be created or inspected.
    pub fn acquire(ledger_path: &Path, ttl: Duration, max_retries: u32) -> Result<Self> {
        let path = Self::lock_path_for(ledger_path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| BookingError::storage(format!("creating {}", parent.display()), e))?;
        }

        let holder_id = Uuid::new_v4().to_string();
        let acquired_at = Utc::now();
        let mut attempt = 0;

        loop {
            let info = LockInfo::new(&holder_id, acquired_at, ttl);
            match try_create(&path, &info) {
                Ok(()) => {
                    debug!(path = %path.display(), holder = %holder_id, "ledger lock acquired");
                    return Ok(Self {
                        path,
                        holder_id,
                        acquired_at,
                        ttl,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let inspect = |e: io::Error| {
                        BookingError::storage(format!("inspecting lock {}", path.display()), e)
                    };
                    match read_snapshot(&path).map_err(inspect)? {
                        // Released between our create and our read.
                        None => continue,
                        Some(existing) if existing.is_stale(ttl) => {
                            if break_stale(&path, &existing, ttl).map_err(inspect)? {
                                warn!(
                                    path = %path.display(),
                                    previous = %existing.holder(),
                                    "took over stale ledger lock"
                                );
                                continue;
                            }
                        }
                        Some(_) => {}
                    }
                }
                Err(e) => {
                    return Err(BookingError::storage(
                        format!("creating lock {}", path.display()),
                        e,
                    ))
                }
            }

            if attempt >= max_retries {
                let holder = read_snapshot(&path)
                    .ok()
                    .flatten()
                    .map_or_else(|| "unknown holder".to_string(), |s| s.holder());
                return Err(BookingError::LedgerLocked { path, holder });
            }
            thread::sleep(backoff(attempt));
            attempt += 1;
        }
    }

    /// Push the expiry to `ttl` from now.
    ///
    /// # Errors
    /// `LedgerLocked` if the lock is no longer ours (it expired and was taken
    /// over, or was removed). Whatever the caller was about to do under the
    /// lock must not happen.
    pub fn renew(&self) -> Result<()> {
        let context = || format!("renewing lock {}", self.path.display());
        let _guard = TakeoverGuard::acquire(&self.path).map_err(|e| BookingError::storage(context(), e))?;

        let current = read_snapshot(&self.path).map_err(|e| BookingError::storage(context(), e))?;
        let ours = current
            .as_ref()
            .and_then(Snapshot::info)
            .is_some_and(|info| info.holder_id == self.holder_id);
        if !ours {
            return Err(BookingError::LedgerLocked {
                path: self.path.clone(),
                holder: current.map_or_else(|| "nobody (lock was removed)".to_string(), |s| s.holder()),
            });
        }

        let info = LockInfo::new(&self.holder_id, self.acquired_at, self.ttl);
        replace_contents(&self.path, &self.holder_id, &info)
            .map_err(|e| BookingError::storage(context(), e))?;
        debug!(path = %self.path.display(), until = %info.expires_at, "ledger lock renewed");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        // Best effort: release even if the guard is stuck.
        let _guard = TakeoverGuard::acquire(&self.path).ok();
        let ours = read_snapshot(&self.path)
            .ok()
            .flatten()
            .and_then(|s| s.info())
            .is_some_and(|info| info.holder_id == self.holder_id);
        if ours {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to release ledger lock");
            }
        }
    }
}

/// A [`Ledger`] that renews its [`LedgerLock`] before every operation, so the
/// lock stays live for as long as the ledger is in use and nothing is read or
/// written once the lock has been lost.
#[derive(Debug)]
pub struct LockedLedger<L: Ledger> {
    inner: L,
    lock: LedgerLock,
}

impl<L: Ledger> LockedLedger<L> {
    pub fn new(inner: L, lock: LedgerLock) -> Self {
        Self { inner, lock }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    pub fn lock(&self) -> &LedgerLock {
        &self.lock
    }
}

impl<L: Ledger> Ledger for LockedLedger<L> {
    fn load(&self) -> Result<Vec<CommittedBooking>> {
        self.lock.renew()?;
        self.inner.load()
    }

    fn append(&mut self, booking: &CommittedBooking) -> Result<()> {
        self.lock.renew()?;
        self.inner.append(booking)
    }
}

/// Serializes takeovers, renewals and releases of one lock file.
struct TakeoverGuard {
    path: PathBuf,
}

impl TakeoverGuard {
    fn acquire(lock_path: &Path) -> io::Result<Self> {
        let mut name = lock_path.as_os_str().to_owned();
        name.push(".takeover");
        let path = PathBuf::from(name);

        for _ in 0..GUARD_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let abandoned = fs::metadata(&path)
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|m| SystemTime::now().duration_since(m).ok())
                        .is_some_and(|age| age > GUARD_STALE);
                    if abandoned {
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    thread::sleep(GUARD_POLL);
                }
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            format!("takeover guard {} stayed busy", path.display()),
        ))
    }
}

impl Drop for TakeoverGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn try_create(path: &Path, info: &LockInfo) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let body = serde_json::to_vec(info).map_err(io::Error::other)?;
    file.write_all(&body)?;
    file.sync_all()
}

fn read_snapshot(path: &Path) -> io::Result<Option<Snapshot>> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok();
    Ok(Some(Snapshot { raw, modified }))
}

/// Remove the lock at `path` if it is still exactly `judged` and still stale.
/// Returns whether the way is now clear.
fn break_stale(path: &Path, judged: &Snapshot, ttl: Duration) -> io::Result<bool> {
    let _guard = TakeoverGuard::acquire(path)?;
    match read_snapshot(path)? {
        None => Ok(true),
        Some(current) if current.raw == judged.raw && current.is_stale(ttl) => {
            match fs::remove_file(path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
                Err(e) => Err(e),
            }
        }
        Some(_) => Ok(false),
    }
}

/// Rewrite the lock file in one step, so readers never see a partial body.
fn replace_contents(path: &Path, holder_id: &str, info: &LockInfo) -> io::Result<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(format!(".{}.tmp", holder_id));
    let tmp = PathBuf::from(tmp_name);

    let result = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&serde_json::to_vec(info).map_err(io::Error::other)?)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn backoff(attempt: u32) -> Duration {
    BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(BACKOFF_MAX)
}
