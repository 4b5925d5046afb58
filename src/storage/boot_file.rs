//! Boot file: a single crash-safe 8-byte pointer.
//!
//! Updates are written to `<boot>_tmp`, synced and renamed over the boot
//! file, so a reader sees either the old pointer or the new one.

use crate::error::{Result, StorageError};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub struct BootFile {
    path: PathBuf,
    tmp_path: PathBuf,
    /// Serializes updates so two writers never share the temp file
    update_lock: Mutex<()>,
}

impl BootFile {
    /// Create a boot file holding pointer 0. Fails if it exists.
    pub fn create(path: &Path) -> Result<Self> {
        let boot = Self::at(path);
        boot.remove_stale_tmp()?;
        if path.exists() {
            return Err(StorageError::FileExists(path.to_path_buf()));
        }
        boot.update(0)?;
        Ok(boot)
    }

    /// Open an existing boot file
    pub fn open(path: &Path) -> Result<Self> {
        let boot = Self::at(path);
        boot.remove_stale_tmp()?;
        if !path.exists() {
            return Err(StorageError::FileNotExists(path.to_path_buf()));
        }
        Ok(boot)
    }

    fn at(path: &Path) -> Self {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push("_tmp");
        Self {
            path: path.to_path_buf(),
            tmp_path: PathBuf::from(tmp),
            update_lock: Mutex::new(()),
        }
    }

    /// A temp file left behind by a crash mid-update is discarded; the boot
    /// file itself still holds the previous pointer.
    fn remove_stale_tmp(&self) -> Result<()> {
        if self.tmp_path.exists() {
            fs::remove_file(&self.tmp_path)?;
        }
        Ok(())
    }

    /// Read the current pointer
    pub fn load(&self) -> Result<u64> {
        let mut buf = [0u8; 8];
        let mut file = File::open(&self.path)?;
        file.read_exact(&mut buf)
            .map_err(|e| StorageError::corruption(format!("boot file: {}", e)))?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Atomically replace the pointer
    pub fn update(&self, value: u64) -> Result<()> {
        let _guard = self.update_lock.lock();

        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.tmp_path)?;
        tmp.write_all(&value.to_be_bytes())?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }
}
