//! Key-value storage backends for the local persistence tier.
//!
//! SYSTEM CONTEXT
//! ==============
//! The local tier behaves like browser `localStorage`: string keys, string
//! values, and a byte quota shared by every key. The persistence adapter
//! writes whole snapshots through this trait and evicts other keys when a
//! write is refused for quota reasons.

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage quota exceeded writing {key}: need {needed} bytes, {available} available")]
    QuotaExceeded { key: String, needed: usize, available: usize },
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Size and recency of one stored key, used to choose eviction victims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub key: String,
    /// Bytes charged against the quota (key + value).
    pub bytes: usize,
    /// Monotonic write recency; larger is more recent.
    pub touched: u64,
}

pub trait KeyValueStorage: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::QuotaExceeded`] when the write would exceed the
    /// quota; the previous value is left intact in that case.
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the backend cannot be written.
    fn remove(&mut self, key: &str) -> Result<bool, StorageError>;

    /// Every stored key with its size and recency.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the backend cannot be listed.
    fn entries(&self) -> Result<Vec<StorageEntry>, StorageError>;
}

/// Bytes a key/value pair costs against a quota.
#[must_use]
pub fn charged_bytes(key: &str, value: &str) -> usize {
    key.len() + value.len()
}
