//! Directory-backed storage: one file per key, atomic replace on write.
//!
//! DESIGN
//! ======
//! Values are written to `<key>.kv.tmp` and renamed over `<key>.kv`, so a
//! crash mid-write leaves either the old or the new value, never a torn one.
//! Recency comes from file modification time; the quota is measured over all
//! `.kv` files in the directory.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::UNIX_EPOCH;

use super::{KeyValueStorage, StorageEntry, StorageError, charged_bytes};

const VALUE_EXT: &str = "kv";
const TMP_EXT: &str = "kv.tmp";

#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    quota_bytes: Option<usize>,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>, quota_bytes: Option<usize>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, quota_bytes })
    }

    fn value_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.{VALUE_EXT}")))
    }

    fn used_bytes_excluding(&self, key: &str) -> Result<usize, StorageError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|entry| entry.key != key)
            .map(|entry| entry.bytes)
            .sum())
    }
}

/// Keys map directly to file names, so only a conservative charset is allowed.
fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid { Ok(()) } else { Err(StorageError::InvalidKey(key.to_owned())) }
}

fn modified_millis(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.value_path(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let final_path = self.value_path(key)?;

        if let Some(quota) = self.quota_bytes {
            let used = self.used_bytes_excluding(key)?;
            let needed = charged_bytes(key, value);
            let available = quota.saturating_sub(used);
            if needed > available {
                return Err(StorageError::QuotaExceeded { key: key.to_owned(), needed, available });
            }
        }

        let tmp_path = self.dir.join(format!("{key}.{TMP_EXT}"));
        fs::write(&tmp_path, value)?;
        match fs::rename(&tmp_path, &final_path) {
            Ok(()) => Ok(()),
            Err(rename_err) => {
                // EDGE: some platforms refuse to rename over an existing file.
                if final_path.exists() {
                    fs::remove_file(&final_path)?;
                    fs::rename(&tmp_path, &final_path)?;
                    Ok(())
                } else {
                    Err(rename_err.into())
                }
            }
        }
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        let path = self.value_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn entries(&self) -> Result<Vec<StorageEntry>, StorageError> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let path = dirent.path();
            if path.extension().is_none_or(|ext| ext != VALUE_EXT) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let meta = dirent.metadata()?;
            let value_len = usize::try_from(meta.len()).unwrap_or(usize::MAX);
            entries.push(StorageEntry {
                key: key.to_owned(),
                bytes: key.len().saturating_add(value_len),
                touched: modified_millis(&meta),
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
#[path = "file_test.rs"]
mod tests;
