//! Transactional persistence for the scheduler's relations.
//!
//! Every relation lives in one [`Tables`] value. A [`Store`] hands out either
//! a consistent read-only snapshot or a private working copy under an
//! exclusive lock. A working copy is committed only when the transaction
//! body returns `Ok`. There is exactly one lock per store, so compound
//! operations cannot deadlock against each other.

use crate::calendar::Calendar;
use crate::identity::Accounts;
use crate::inventory::Inventory;
use crate::reservations::ReservationLedger;
use crate::{Error, Result};
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::NamedTempFile;

const SNAPSHOT_FILE: &str = "scheduler.json";
const LOCK_FILE: &str = "scheduler.lock";

/// All persisted relations
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub accounts: Accounts,

    #[serde(default)]
    pub inventory: Inventory,

    #[serde(default)]
    pub calendar: Calendar,

    #[serde(default)]
    pub reservations: ReservationLedger,
}

/// Access to the scheduler's relations
pub trait Store: Send + Sync {
    /// Run `f` against a consistent snapshot
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tables) -> Result<T>;

    /// Run `f` against a working copy and commit it if `f` succeeds
    fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tables) -> Result<T>;
}

// ============================================================================
// File-backed store
// ============================================================================

/// Snapshot file plus advisory lock file in one data directory.
///
/// The lock serializes writers across threads and processes. Commits go to a
/// temp file in the same directory which is synced and renamed over the
/// snapshot, so readers see either the old or the new state.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

/// Releases the advisory lock on every exit path
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release store lock: {}", e);
        }
    }
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        tracing::debug!("Opened store at {:?}", dir);
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn lock(&self, exclusive: bool) -> Result<LockGuard> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(self.dir.join(LOCK_FILE))
            .map_err(|e| Error::StorageUnavailable(format!("cannot open lock file: {}", e)))?;

        let locked = if exclusive {
            FileExt::lock_exclusive(&file)
        } else {
            FileExt::lock_shared(&file)
        };
        locked.map_err(|e| Error::StorageUnavailable(format!("cannot lock store: {}", e)))?;

        Ok(LockGuard { file })
    }

    /// Load the snapshot. Must be called with the lock held.
    ///
    /// A missing snapshot is an empty store. An unreadable one is an error,
    /// never silently replaced.
    fn load(&self) -> Result<Tables> {
        let path = self.snapshot_path();
        if !path.exists() {
            tracing::debug!("No snapshot at {:?}, starting empty", path);
            return Ok(Tables::default());
        }

        let mut contents = String::new();
        File::open(&path)
            .and_then(|mut file| file.read_to_string(&mut contents))
            .map_err(|e| Error::StorageUnavailable(format!("cannot read {:?}: {}", path, e)))?;

        serde_json::from_str(&contents).map_err(|e| {
            tracing::error!("Snapshot {:?} is corrupted: {}", path, e);
            Error::StorageUnavailable(format!("snapshot {:?} is corrupted: {}", path, e))
        })
    }

    /// Atomically replace the snapshot. Must be called with the exclusive lock held.
    fn commit(&self, tables: &Tables) -> Result<()> {
        let unavailable = |e: std::io::Error| Error::StorageUnavailable(format!("commit failed: {}", e));

        let temp = NamedTempFile::new_in(&self.dir).map_err(unavailable)?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(tables)?;
            writer.write_all(contents.as_bytes()).map_err(unavailable)?;
            writer.flush().map_err(unavailable)?;
        }
        temp.as_file().sync_all().map_err(unavailable)?;
        temp.persist(self.snapshot_path())
            .map_err(|e| unavailable(e.error))?;

        tracing::debug!("Committed snapshot to {:?}", self.dir);
        Ok(())
    }
}

impl Store for FileStore {
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tables) -> Result<T>,
    {
        let _guard = self.lock(false)?;
        let tables = self.load()?;
        f(&tables)
    }

    fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tables) -> Result<T>,
    {
        let _guard = self.lock(true)?;
        let mut tables = self.load()?;
        let value = f(&mut tables)?;
        self.commit(&tables)?;
        Ok(value)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-process store for embedding and tests.
///
/// Transactions run on a clone of the tables and swap it in on success.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    failing_commits: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tables(tables: Tables) -> Self {
        Self {
            tables: RwLock::new(tables),
            failing_commits: AtomicU32::new(0),
        }
    }

    /// Make the next `n` commits fail with `StorageUnavailable`
    pub fn fail_next_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Copy of the current committed state
    pub fn snapshot(&self) -> Tables {
        self.tables.read().clone()
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Store for MemoryStore {
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tables) -> Result<T>,
    {
        let tables = self.tables.read();
        f(&tables)
    }

    fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tables) -> Result<T>,
    {
        let mut committed = self.tables.write();
        let mut working = committed.clone();
        let value = f(&mut working)?;
        if self.take_injected_failure() {
            tracing::warn!("Injected commit failure");
            return Err(Error::StorageUnavailable("injected commit failure".into()));
        }
        *committed = working;
        Ok(value)
    }
}
