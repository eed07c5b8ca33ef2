//! In-memory storage with an optional quota.

use std::collections::BTreeMap;

use super::{KeyValueStorage, StorageEntry, StorageError, charged_bytes};

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    touched: u64,
}

/// `localStorage`-like map. Recency is a logical clock bumped on each write.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slots: BTreeMap<String, Slot>,
    quota_bytes: Option<usize>,
    clock: u64,
}

impl MemoryStorage {
    /// Unbounded storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self { quota_bytes: Some(quota_bytes), ..Self::default() }
    }

    /// Bytes currently charged against the quota.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.slots
            .iter()
            .map(|(key, slot)| charged_bytes(key, &slot.value))
            .sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.slots.get(key).map(|slot| slot.value.clone()))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }

        if let Some(quota) = self.quota_bytes {
            // EDGE: the slot being replaced does not count against the new write.
            let replaced = self
                .slots
                .get(key)
                .map_or(0, |slot| charged_bytes(key, &slot.value));
            let used = self.used_bytes() - replaced;
            let needed = charged_bytes(key, value);
            let available = quota.saturating_sub(used);
            if needed > available {
                return Err(StorageError::QuotaExceeded { key: key.to_owned(), needed, available });
            }
        }

        self.clock += 1;
        self.slots
            .insert(key.to_owned(), Slot { value: value.to_owned(), touched: self.clock });
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        Ok(self.slots.remove(key).is_some())
    }

    fn entries(&self) -> Result<Vec<StorageEntry>, StorageError> {
        Ok(self
            .slots
            .iter()
            .map(|(key, slot)| StorageEntry {
                key: key.clone(),
                bytes: charged_bytes(key, &slot.value),
                touched: slot.touched,
            })
            .collect())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
