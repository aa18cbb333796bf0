//! Single-owner lock on a storage volume.
//!
//! Owners initialize and migrate a volume under an advisory `fs2` lock on
//! `<root>/.lock`. While held, the lock file names the holding process and
//! what it is doing, so a volume that stays locked can be traced.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, StorageError};

pub const LOCK_FILE_NAME: &str = ".lock";

/// Record written into the lock file by the process holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub purpose: String,
    pub acquired_at: DateTime<Utc>,
}

/// Exclusive hold on a volume; released on drop.
#[derive(Debug)]
pub struct VolumeLock {
    file: File,
    path: PathBuf,
}

impl VolumeLock {
    /// Wait until no other process holds `root`, then take it for `purpose`.
    pub fn acquire(root: &Path, purpose: &str) -> Result<Self> {
        let (file, path) = open_lock_file(root)?;
        debug!(lock = %path.display(), purpose, "Waiting for volume lock");
        // Qualified: newer toolchains have an inherent File::lock_exclusive
        FileExt::lock_exclusive(&file).map_err(|e| StorageError::io(&path, e))?;
        Ok(Self::claim(file, path, purpose))
    }

    /// Take `root` now or fail with [`StorageError::Locked`].
    pub fn try_acquire(root: &Path, purpose: &str) -> Result<Self> {
        let (file, path) = open_lock_file(root)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Self::claim(file, path, purpose)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(StorageError::Locked(root.to_path_buf()))
            }
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn claim(mut file: File, path: PathBuf, purpose: &str) -> Self {
        let holder = LockHolder {
            pid: std::process::id(),
            purpose: purpose.to_string(),
            acquired_at: Utc::now(),
        };
        if let Err(e) = record_holder(&mut file, &holder) {
            warn!(lock = %path.display(), error = %e, "Could not record lock holder");
        }
        debug!(lock = %path.display(), purpose, "Acquired volume lock");
        Self { file, path }
    }
}

impl Drop for VolumeLock {
    fn drop(&mut self) {
        // Clear the record before unlocking so the next holder starts clean
        if let Err(e) = self.file.set_len(0) {
            debug!(lock = %self.path.display(), error = %e, "Could not clear lock holder");
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(lock = %self.path.display(), error = %e, "Could not unlock volume");
        }
        debug!(lock = %self.path.display(), "Released volume lock");
    }
}

/// Holder recorded in the lock file of `root`.
///
/// `None` when the volume is free. A process that died while holding the
/// lock leaves its record behind until the next owner takes the volume.
pub fn lock_holder(root: &Path) -> Option<LockHolder> {
    let bytes = fs::read(root.join(LOCK_FILE_NAME)).ok()?;
    if bytes.is_empty() {
        return None;
    }
    serde_json::from_slice(&bytes).ok()
}

fn open_lock_file(root: &Path) -> Result<(File, PathBuf)> {
    fs::create_dir_all(root).map_err(|e| StorageError::io(root, e))?;
    let path = root.join(LOCK_FILE_NAME);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|e| StorageError::io(&path, e))?;
    Ok((file, path))
}

fn record_holder(file: &mut File, holder: &LockHolder) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    serde_json::to_writer(&mut *file, holder)?;
    file.flush()
}
