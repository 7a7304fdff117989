//! Local durable key/value storage.
//!
//! Holds state that must survive a process restart while the remote store
//! is out of reach (the sync queue). Values are opaque strings stored under
//! flat keys.

use crate::error::{Result, SyncError};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Durable string storage keyed by name.
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` durably; returns once it is on stable storage.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;
}

/// One file per key inside a directory, guarded by an exclusive lock file.
pub struct FileLocalStore {
    dir: PathBuf,
    /// Lock file for exclusive access.
    _lock_file: File,
    /// Serializes writers within this process.
    write_lock: Mutex<()>,
}

impl FileLocalStore {
    /// Open (creating if asked) the storage directory and take its lock.
    pub fn open(dir: impl AsRef<Path>, create_if_missing: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            if !create_if_missing {
                return Err(SyncError::Io(std::io::Error::new(
                    ErrorKind::NotFound,
                    format!("local storage directory {} does not exist", dir.display()),
                )));
            }
            fs::create_dir_all(&dir)?;
        }

        let lock_file = Self::acquire_lock(&dir)?;

        Ok(Self {
            dir,
            _lock_file: lock_file,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn acquire_lock(dir: &Path) -> Result<File> {
        let lock_file = File::create(dir.join("LOCK"))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| SyncError::Locked)?;

        Ok(lock_file)
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(SyncError::InvalidConfig(format!("invalid storage key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.key_path(key)?;
        let tmp = path.with_extension("json.tmp");
        let _lock = self.write_lock.lock();

        // Write-then-rename so a crash leaves either the old or new value.
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;

        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key)?;
        let _lock = self.write_lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Volatile storage for tests.
#[derive(Default)]
pub struct MemoryLocalStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.write().remove(key);
        Ok(())
    }
}
