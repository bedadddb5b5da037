use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::UsageLedger;
use crate::rate_limit::RateWindowRecord;
use crate::storage::{check_version, Storage, Versioned};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// File-based storage: one snapshot file per key.
///
/// Files:
/// - `ledgers/<hex(user_id)>.bin`: bincode `UsageLedger` followed by its version (u64 LE)
/// - `windows/<hex(key)>.bin`: bincode `RateWindowRecord`
/// - `*.bin.tmp`: temporary files for atomic writes
///
/// Every write (ledger compare-and-set, window overwrite and removal) is
/// serialized by an in-process lock, since writers share one temp path per
/// key. Separate processes sharing a data directory are not coordinated.
pub struct FileStorage {
    ledger_dir: PathBuf,
    window_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    /// Create a new FileStorage with paths from config
    pub fn new(config: &Config) -> Self {
        FileStorage::with_dirs(config.get_ledger_dir(), config.get_window_dir())
    }

    /// Create FileStorage with custom directories (for testing)
    pub fn with_dirs(ledger_dir: PathBuf, window_dir: PathBuf) -> Self {
        FileStorage {
            ledger_dir,
            window_dir,
            write_lock: Mutex::new(()),
        }
    }

    fn lock_writes(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::Storage("file storage lock poisoned".to_string()))
    }

    fn ledger_path(&self, user_id: &str) -> PathBuf {
        self.ledger_dir.join(file_name(user_id))
    }

    fn window_path(&self, key: &str) -> PathBuf {
        self.window_dir.join(file_name(key))
    }

    fn read_ledger_file(&self, path: &Path) -> Result<Option<Versioned<UsageLedger>>> {
        let Some(data) = read_file(path)? else {
            return Ok(None);
        };

        // Format: [UsageLedger bytes][version: u64]
        if data.len() < 8 {
            return Err(Error::Storage(format!(
                "Ledger file {} too short",
                path.display()
            )));
        }
        let (body, trailer) = data.split_at(data.len() - 8);
        let mut version_bytes = [0u8; 8];
        version_bytes.copy_from_slice(trailer);
        let version = u64::from_le_bytes(version_bytes);
        let record: UsageLedger = decode(body)?;

        Ok(Some(Versioned { record, version }))
    }
}

/// Hex-encode keys so arbitrary user ids are safe file names.
fn file_name(key: &str) -> String {
    format!("{}.bin", hex::encode(key.as_bytes()))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| Error::Storage(format!("Failed to serialize record: {}", e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| Error::Storage(format!("Failed to deserialize record: {}", e)))
}

fn read_file(path: &Path) -> Result<Option<Vec<u8>>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut file = File::open(path)
        .map_err(|e| Error::Storage(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|e| Error::Storage(format!("Failed to read {}: {}", path.display(), e)))?;
    Ok(Some(data))
}

/// Write temp file, fsync, rename over the target, fsync the directory.
fn write_atomic(path: &Path, chunks: &[&[u8]]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Storage(format!("No parent directory for {}", path.display())))?;
    fs::create_dir_all(parent)
        .map_err(|e| Error::Storage(format!("Failed to create data directory: {}", e)))?;

    let tmp_path = path.with_extension("bin.tmp");
    let mut file = File::create(&tmp_path)
        .map_err(|e| Error::Storage(format!("Failed to create temp file: {}", e)))?;
    for chunk in chunks {
        file.write_all(chunk)
            .map_err(|e| Error::Storage(format!("Failed to write temp file: {}", e)))?;
    }
    file.sync_all()
        .map_err(|e| Error::Storage(format!("Failed to fsync temp file: {}", e)))?;
    drop(file);

    fs::rename(&tmp_path, path)
        .map_err(|e| Error::Storage(format!("Failed to rename temp file: {}", e)))?;

    let parent_file = File::open(parent)
        .map_err(|e| Error::Storage(format!("Failed to open parent directory: {}", e)))?;
    parent_file
        .sync_all()
        .map_err(|e| Error::Storage(format!("Failed to fsync parent directory: {}", e)))?;

    Ok(())
}

impl Storage for FileStorage {
    fn load_ledger(&self, user_id: &str) -> Result<Option<Versioned<UsageLedger>>> {
        self.read_ledger_file(&self.ledger_path(user_id))
    }

    fn persist_ledger(
        &self,
        user_id: &str,
        ledger: &UsageLedger,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        let _guard = self.lock_writes()?;

        let path = self.ledger_path(user_id);
        let current = self.read_ledger_file(&path)?.map(|v| v.version);
        let version = check_version(user_id, current, expected_version)?;

        let body = encode(ledger)?;
        write_atomic(&path, &[&body, &version.to_le_bytes()])?;
        Ok(version)
    }

    fn load_window(&self, key: &str) -> Result<Option<RateWindowRecord>> {
        match read_file(&self.window_path(key))? {
            Some(data) => Ok(Some(decode(&data)?)),
            None => Ok(None),
        }
    }

    fn persist_window(&self, key: &str, record: &RateWindowRecord) -> Result<()> {
        let body = encode(record)?;
        let _guard = self.lock_writes()?;
        write_atomic(&self.window_path(key), &[&body])
    }

    fn remove_window(&self, key: &str) -> Result<()> {
        let _guard = self.lock_writes()?;
        let path = self.window_path(key);
        if !path.exists() {
            return Ok(());
        }
        fs::remove_file(&path)
            .map_err(|e| Error::Storage(format!("Failed to remove {}: {}", path.display(), e)))
    }
}
